//! # Registry: guarded append-only table of managed entries.
//!
//! The registry is an ordered sequence of slots indexed `0..N-1`. The index
//! assigned at insert time is the entry's permanent identity for the life of
//! the multiplexer.
//!
//! ## Rules
//! - Indices are dense and monotonically assigned.
//! - Once appended, a slot is never removed nor reordered; only its
//!   `is_closed` bit is mutated.
//! - Every access goes through one guard. The guard is released **before**
//!   any handler is invoked; holding it across a handler call would
//!   serialize all work behind that handler.

use std::sync::{Arc, Mutex, PoisonError};

use crate::entries::{CloseHandler, EntryState, Handler};

/// One registered entry, minus its stream (the stream moves into the
/// listener at spawn time).
#[derive(Clone, Debug)]
struct Slot {
    handler: Handler,
    on_close: CloseHandler,
    is_closed: bool,
}

/// Guarded, append-only table of entry slots.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a slot and returns its permanent index.
    pub(crate) fn append(&self, handler: Handler, on_close: CloseHandler) -> usize {
        let mut slots = self.lock();
        let index = slots.len();
        slots.push(Slot {
            handler,
            on_close,
            is_closed: false,
        });
        index
    }

    /// Marks the slot at `index` closed. Idempotent.
    pub(crate) fn mark_closed(&self, index: usize) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(index) {
            slot.is_closed = true;
        }
    }

    /// Returns a clone of the message handler at `index`.
    pub(crate) fn handler(&self, index: usize) -> Option<Handler> {
        self.lock().get(index).map(|slot| slot.handler.clone())
    }

    /// Returns clones of both callbacks at `index`.
    pub(crate) fn handler_pair(&self, index: usize) -> Option<(Handler, CloseHandler)> {
        self.lock()
            .get(index)
            .map(|slot| (slot.handler.clone(), slot.on_close.clone()))
    }

    /// Copies the table as it stands right now.
    pub(crate) fn snapshot(&self) -> Vec<EntryState> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(index, slot)| EntryState {
                index,
                is_closed: slot.is_closed,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        // Handlers run behind a fault barrier and never under this guard, so
        // a poisoned lock still holds coherent data.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_parts() -> (Handler, CloseHandler) {
        (Handler::new(|_| {}), CloseHandler::new(|| {}))
    }

    #[test]
    fn indices_are_dense_and_permanent() {
        let registry = Registry::new();
        for expected in 0..4 {
            let (h, c) = slot_parts();
            assert_eq!(registry.append(h, c), expected);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 4);
        for (i, state) in snapshot.iter().enumerate() {
            assert_eq!(state.index, i);
            assert!(!state.is_closed);
        }
    }

    #[test]
    fn mark_closed_flips_only_its_slot() {
        let registry = Registry::new();
        let (h, c) = slot_parts();
        registry.append(h, c);
        let (h, c) = slot_parts();
        registry.append(h, c);

        registry.mark_closed(1);
        registry.mark_closed(1);

        let snapshot = registry.snapshot();
        assert!(!snapshot[0].is_closed);
        assert!(snapshot[1].is_closed);
    }

    #[test]
    fn out_of_range_lookups_are_none() {
        let registry = Registry::new();
        assert!(registry.handler(0).is_none());
        assert!(registry.handler_pair(3).is_none());
        registry.mark_closed(9);
        assert!(registry.snapshot().is_empty());
    }
}
