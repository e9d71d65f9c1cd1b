//! # Listener: per-entry worker task.
//!
//! One listener per registered entry. It reads one value at a time from the
//! caller-owned stream and either dispatches it locally (detached handlers)
//! or forwards it to an aggregator (blocking handlers), back-pressured until
//! the dispatch loop advances.
//!
//! ## Exit path
//! The tail of the task runs exactly once, however the loop ended (end of
//! stream, aggregator fault, or the `done` broadcast):
//! 1. mark the registry slot closed,
//! 2. run `on_close` (inline when blocking, detached otherwise),
//! 3. send a close notice so the dispatch loop can propagate the closed
//!    flag deterministically.
//!
//! The close notice may race shutdown; a failed send is absorbed by the
//! drain task and is not an error.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::muxer::{CloseNotice, Dispatch, Shared};
use crate::entries::{CloseHandler, Handler, Payload};

/// Spawns a tracked listener for the entry at `index`.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    index: usize,
    stream: mpsc::Receiver<Payload>,
    handler: Handler,
    on_close: CloseHandler,
) {
    let tracker = shared.tracker.clone();
    tracker.spawn(listen(shared, index, stream, handler, on_close));
}

async fn listen(
    shared: Arc<Shared>,
    index: usize,
    mut stream: mpsc::Receiver<Payload>,
    handler: Handler,
    on_close: CloseHandler,
) {
    loop {
        // Detached handlers dispatch without touching the aggregators, so
        // the loop re-checks liveness instead of relying on back-pressure.
        if !shared.is_alive() {
            break;
        }

        tokio::select! {
            _ = shared.done.cancelled() => break,
            received = stream.recv() => match received {
                Some(payload) => {
                    if !handler.is_blocking() {
                        let detached = handler.clone();
                        tokio::spawn(async move {
                            detached.run_guarded(index, payload);
                        });
                        continue;
                    }

                    let message = Dispatch { index, payload };
                    let sent = if handler.is_priority() {
                        shared.priority_tx.send(message).await
                    } else {
                        shared.normal_tx.send(message).await
                    };
                    if sent.is_err() {
                        // Aggregator already torn down; same exit as EOF.
                        tracing::warn!(index, "aggregator closed under listener; treating as end of stream");
                        break;
                    }
                }
                // Caller dropped every sender.
                None => break,
            },
        }
    }

    shared.registry.mark_closed(index);

    if on_close.is_blocking() {
        on_close.run_guarded(index);
    } else {
        let detached = on_close.clone();
        tokio::spawn(async move {
            detached.run_guarded(index);
        });
    }

    let _ = shared.close_tx.send(CloseNotice { index }).await;
}
