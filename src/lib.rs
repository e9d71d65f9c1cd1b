//! # chanmux
//!
//! **chanmux** is a small concurrency toolbox built around a dynamic
//! prioritized channel multiplexer.
//!
//! A [`Muxer`] is a runtime-configurable fan-in dispatcher: it watches a
//! mutable set of inbound streams and drives caller-supplied handlers under
//! strict priority and liveness rules. Unlike a static `select!` it accepts
//! new streams after it has started, keeps a kill command from being
//! starved by high-frequency streams, runs long-lived handlers off the
//! dispatch loop, and reports which streams have closed. A companion
//! [`Backoff`] controller provides exponential sleep ticketing with passive
//! cooldown under the same discipline.
//!
//! ## Features
//!
//! | Area             | Description                                                  | Key types                          |
//! |------------------|--------------------------------------------------------------|------------------------------------|
//! | **Multiplexing** | Tiered fan-in dispatch over a mutable set of streams.        | [`Muxer`]                          |
//! | **Entries**      | Bundle a stream with its message and close callbacks.        | [`Entry`], [`Handler`], [`CloseHandler`] |
//! | **Liveness**     | Per-entry closed flags, observable at any time.              | [`EntryState`]                     |
//! | **Backoff**      | Exponential sleep tickets with passive cooldown.             | [`Backoff`], [`BackoffOpts`]       |
//! | **Errors**       | Typed errors for the load and wait boundaries.               | [`MuxError`], [`BackoffError`]     |
//!
//! ```no_run
//! use std::sync::Arc;
//! use chanmux::{CloseHandler, Entry, Handler, Muxer, Payload};
//! use tokio::sync::{mpsc, oneshot};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let (tx, rx) = mpsc::channel::<Payload>(16);
//!     let entry = Entry::new(
//!         rx,
//!         Handler::new(|payload| {
//!             if let Ok(n) = payload.downcast::<u64>() {
//!                 println!("tick {n}");
//!             }
//!         })
//!         .blocking(),
//!         CloseHandler::new(|| println!("ticker went away")),
//!     );
//!
//!     let mux = Arc::new(Muxer::new(|| println!("bye"), vec![entry]));
//!     let (ready_tx, ready_rx) = oneshot::channel();
//!     let runner = tokio::spawn({
//!         let mux = mux.clone();
//!         async move { mux.run(ready_tx).await }
//!     });
//!     ready_rx.await.unwrap();
//!
//!     tx.send(Box::new(1u64)).await.unwrap();
//!     mux.kill();
//!     runner.await.unwrap();
//! }
//! ```
//!
//! ---

mod backoff;
mod core;
mod entries;
mod error;

// ---- Public re-exports ----

pub use crate::backoff::{Backoff, BackoffOpts};
pub use crate::core::Muxer;
pub use crate::entries::{CloseHandler, Entry, EntryState, Handler, Payload};
pub use crate::error::{BackoffError, MuxError};
