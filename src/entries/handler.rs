//! # Handler types for entry callbacks.
//!
//! Defines the two callables an [`Entry`](crate::Entry) carries:
//!
//! - **[`Handler`]** — invoked once per value read from the entry's stream.
//! - **[`CloseHandler`]** — invoked exactly once when the entry's listener exits.
//!
//! Streams carry [`Payload`] (a type-erased box) because handlers are
//! heterogeneous and chosen by the caller; each handler downcasts inside,
//! which keeps type errors at the handler boundary instead of the dispatch
//! loop.
//!
//! ## Dispatch semantics
//!
//! | blocking | priority | Runs on                    | Ordering                            |
//! |----------|----------|----------------------------|-------------------------------------|
//! | true     | false    | dispatch loop (serial)     | serial with every blocking handler  |
//! | true     | true     | dispatch loop (serial)     | served before non-priority blocking |
//! | false    | false    | detached task              | concurrent with anything            |
//! | false    | true     | detached task              | priority is ignored                 |
//!
//! Close handlers follow the same blocking/detached rule and have no
//! priority flag.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Opaque value carried by an entry's stream.
///
/// Handlers receive the box by value and downcast to the type they expect:
///
/// ```rust
/// use chanmux::{Handler, Payload};
///
/// let h = Handler::new(|payload: Payload| {
///     if let Ok(msg) = payload.downcast::<String>() {
///         println!("{msg}");
///     }
/// });
/// assert!(!h.is_blocking());
/// ```
pub type Payload = Box<dyn Any + Send + 'static>;

type HandlerFn = Arc<dyn Fn(Payload) + Send + Sync + 'static>;
type CloseFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Per-value callback with its dispatch attributes.
///
/// Defaults to detached (non-blocking, no priority); use the builder setters
/// to opt into serialized or prioritized dispatch.
#[derive(Clone)]
pub struct Handler {
    func: HandlerFn,
    blocking: bool,
    priority: bool,
}

impl Handler {
    /// Creates a detached (non-blocking) handler.
    pub fn new(f: impl Fn(Payload) + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(f),
            blocking: false,
            priority: false,
        }
    }

    /// Serializes this handler with every other blocking handler.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Marks the handler eligible for the priority dispatch tier.
    ///
    /// Only meaningful together with [`blocking`](Self::blocking): a detached
    /// handler runs concurrently regardless, so its priority flag is ignored.
    #[must_use]
    pub fn priority(mut self) -> Self {
        self.priority = true;
        self
    }

    /// Whether the dispatch loop runs this handler inline.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Whether a blocking handler is served from the priority tier.
    pub fn is_priority(&self) -> bool {
        self.priority
    }

    /// Invokes the handler behind a fault barrier.
    ///
    /// A panic is caught and logged; the dispatch loop and the listeners
    /// must survive arbitrary caller code.
    pub(crate) fn run_guarded(&self, index: usize, payload: Payload) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.func)(payload)));
        if result.is_err() {
            tracing::warn!(index, "recovered from panic in message handler");
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("blocking", &self.blocking)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Callback invoked exactly once when an entry's listener exits.
///
/// Runs whether the stream closed on its own, the listener hit a fault, or a
/// kill forced the listener out.
#[derive(Clone)]
pub struct CloseHandler {
    func: CloseFn,
    blocking: bool,
}

impl CloseHandler {
    /// Creates a detached (non-blocking) close handler.
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(f),
            blocking: false,
        }
    }

    /// Runs the close handler inline on the exiting listener.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Whether the listener runs this handler inline on exit.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Invokes the close handler behind a fault barrier.
    pub(crate) fn run_guarded(&self, index: usize) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.func)()));
        if result.is_err() {
            tracing::warn!(index, "recovered from panic in close handler");
        }
    }
}

impl fmt::Debug for CloseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHandler")
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}
