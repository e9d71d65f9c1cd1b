//! # The tiered dispatch loop.
//!
//! One iteration walks three nested tiers, each polling a wider set of
//! inputs than the last:
//!
//! ```text
//! Tier-1 (kill only, non-blocking)
//!   ├─► kill heard → Halt
//!   └─► Tier-2 (close-notify + priority + kill, non-blocking)
//!         ├─► close notice → absorb, Continue
//!         ├─► priority message → dispatch, Continue
//!         ├─► kill heard → Halt
//!         └─► Tier-3 (everything, blocking)
//!               ├─► priority / normal message → dispatch, Continue
//!               ├─► load request → admit batch, Continue
//!               ├─► close notice → absorb, Continue
//!               └─► kill → Halt
//! ```
//!
//! A kill must preempt both backlog and new data; one-time close events and
//! priority data must preempt steady-state data; steady-state data must not
//! starve slow events. The non-blocking fall-through in Tiers 1 and 2 is
//! what implements the preemption: a stream producing every few
//! milliseconds would otherwise drown the kill input in a flat select.
//!
//! ## Fairness
//! Tier-2 polls its two data inputs in a coin-flipped order so neither is
//! structurally favored when both are ready. Tier-3 relies on
//! `tokio::select!`'s unbiased random branch polling.

use std::sync::Arc;

use crate::core::listener;
use crate::core::muxer::{CloseNotice, Dispatch, Inlets, LoadRequest, Shared};

/// Outcome of one loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Halt,
}

/// What Tier-3 woke up on.
enum Waited {
    Priority(Dispatch),
    Normal(Dispatch),
    Load(LoadRequest),
    Close(CloseNotice),
    Kill,
}

pub(crate) struct StateMachine {
    shared: Arc<Shared>,
    inlets: Inlets,
}

impl StateMachine {
    pub(crate) fn new(shared: Arc<Shared>, inlets: Inlets) -> Self {
        Self { shared, inlets }
    }

    /// Hands the aggregator receivers back for draining after Halt.
    pub(crate) fn into_inlets(self) -> Inlets {
        self.inlets
    }

    /// Runs one full iteration, starting at Tier-1.
    pub(crate) async fn step(&mut self) -> Step {
        if self.shared.kill.is_cancelled() {
            return Step::Halt;
        }
        self.priority_poll().await
    }

    /// Tier-2: non-blocking poll over close notices and priority data.
    async fn priority_poll(&mut self) -> Step {
        if rand::random() {
            if let Ok(notice) = self.inlets.close_rx.try_recv() {
                self.absorb_close(notice);
                return Step::Continue;
            }
            if let Ok(message) = self.inlets.priority_rx.try_recv() {
                self.dispatch(message);
                return Step::Continue;
            }
        } else {
            if let Ok(message) = self.inlets.priority_rx.try_recv() {
                self.dispatch(message);
                return Step::Continue;
            }
            if let Ok(notice) = self.inlets.close_rx.try_recv() {
                self.absorb_close(notice);
                return Step::Continue;
            }
        }

        if self.shared.kill.is_cancelled() {
            return Step::Halt;
        }
        self.full_wait().await
    }

    /// Tier-3: block until any input is ready.
    async fn full_wait(&mut self) -> Step {
        let waited = tokio::select! {
            Some(message) = self.inlets.priority_rx.recv() => Waited::Priority(message),
            Some(message) = self.inlets.normal_rx.recv() => Waited::Normal(message),
            Some(request) = self.inlets.load_rx.recv() => Waited::Load(request),
            Some(notice) = self.inlets.close_rx.recv() => Waited::Close(notice),
            _ = self.shared.kill.cancelled() => Waited::Kill,
            else => Waited::Kill,
        };

        match waited {
            Waited::Priority(message) | Waited::Normal(message) => {
                self.dispatch(message);
                Step::Continue
            }
            Waited::Load(request) => {
                self.admit(request);
                Step::Continue
            }
            Waited::Close(notice) => {
                self.absorb_close(notice);
                Step::Continue
            }
            Waited::Kill => Step::Halt,
        }
    }

    /// Invokes the blocking handler for a forwarded value.
    ///
    /// The registry guard is released before the call; only the handler
    /// clone crosses the boundary.
    fn dispatch(&self, message: Dispatch) {
        let Some(handler) = self.shared.registry.handler(message.index) else {
            return;
        };
        handler.run_guarded(message.index, message.payload);
    }

    /// Propagates a listener's closed flag into the registry.
    ///
    /// The listener already ran `on_close`; it is never re-invoked here.
    fn absorb_close(&self, notice: CloseNotice) {
        self.shared.registry.mark_closed(notice.index);
    }

    /// Appends a batch of entries and spawns a listener per entry.
    ///
    /// The ack resolves the caller's `load` only after the batch is
    /// observable in snapshots.
    fn admit(&mut self, request: LoadRequest) {
        for entry in request.entries {
            let (stream, handler, on_close) = entry.into_parts();
            let index = self.shared.registry.append(handler.clone(), on_close.clone());
            listener::spawn(self.shared.clone(), index, stream, handler, on_close);
        }
        let _ = request.ack.send(());
    }
}
