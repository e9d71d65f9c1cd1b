//! # Drain: post-kill residual consumer.
//!
//! After the dispatch loop halts, listeners may still be mid-send on an
//! aggregator and callers may have a `load` in flight. The drain task
//! consumes and discards everything arriving on the internal channels so no
//! listener is stuck publishing while shutdown waits for them to join.
//!
//! Dropping a load request here drops its ack, which surfaces as `NotAlive`
//! to the pending caller.
//!
//! The stop signal fires only once every listener has joined; the receivers
//! are then closed and flushed, so nothing can be left parked on a send.

use tokio::sync::oneshot;

use crate::core::muxer::Inlets;

pub(crate) async fn run(mut inlets: Inlets, mut stop: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            Some(_) = inlets.normal_rx.recv() => {}
            Some(_) = inlets.priority_rx.recv() => {}
            Some(_) = inlets.close_rx.recv() => {}
            Some(request) = inlets.load_rx.recv() => drop(request),
            else => break,
        }
    }

    inlets.normal_rx.close();
    inlets.priority_rx.close();
    inlets.close_rx.close();
    inlets.load_rx.close();

    while inlets.normal_rx.recv().await.is_some() {}
    while inlets.priority_rx.recv().await.is_some() {}
    while inlets.close_rx.recv().await.is_some() {}
    while inlets.load_rx.recv().await.is_some() {}

    tracing::debug!("drain complete; aggregators closed");
}
