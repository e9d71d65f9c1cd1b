//! # Entry: one managed inbound stream with its callbacks.
//!
//! An [`Entry`] bundles what the multiplexer needs to manage a stream: the
//! receiving half of a caller-owned channel, a [`Handler`] for its values,
//! and a [`CloseHandler`] for its end of life.
//!
//! The caller keeps every [`Sender`](tokio::sync::mpsc::Sender); dropping
//! them all is the close signal. The multiplexer never closes a stream it
//! was handed.
//!
//! [`EntryState`] is the snapshot view: the receiver moves into the
//! listener at spawn time, so snapshots expose identity and liveness only.

use tokio::sync::mpsc;

use crate::entries::handler::{CloseHandler, Handler, Payload};

/// One inbound stream plus the callbacks that service it.
#[derive(Debug)]
pub struct Entry {
    stream: mpsc::Receiver<Payload>,
    handler: Handler,
    on_close: CloseHandler,
}

impl Entry {
    /// Bundles a stream with its message and close handlers.
    ///
    /// ```rust
    /// use chanmux::{CloseHandler, Entry, Handler, Payload};
    /// use tokio::sync::mpsc;
    ///
    /// let (_tx, rx) = mpsc::channel::<Payload>(8);
    /// let entry = Entry::new(
    ///     rx,
    ///     Handler::new(|_| {}).blocking(),
    ///     CloseHandler::new(|| {}),
    /// );
    /// ```
    pub fn new(stream: mpsc::Receiver<Payload>, handler: Handler, on_close: CloseHandler) -> Self {
        Self {
            stream,
            handler,
            on_close,
        }
    }

    pub(crate) fn into_parts(self) -> (mpsc::Receiver<Payload>, Handler, CloseHandler) {
        (self.stream, self.handler, self.on_close)
    }
}

/// Point-in-time view of one registered entry.
///
/// The index is assigned at insert time and is the entry's permanent
/// identity for the life of the multiplexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryState {
    /// Registry position, dense and never reused.
    pub index: usize,
    /// Whether the entry's listener has stopped reading the stream.
    pub is_closed: bool,
}
