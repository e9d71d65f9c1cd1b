//! # Caller-facing entry types.
//!
//! What callers hand to the multiplexer: an [`Entry`] per stream, built from
//! a [`Handler`], a [`CloseHandler`], and the receiving half of a channel of
//! [`Payload`] values. [`EntryState`] is what snapshots give back.

mod entry;
mod handler;

pub use entry::{Entry, EntryState};
pub use handler::{CloseHandler, Handler, Payload};
