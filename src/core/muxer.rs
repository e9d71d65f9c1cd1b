//! # Muxer: dynamic prioritized fan-in dispatcher.
//!
//! A [`Muxer`] watches a mutable set of inbound streams and drives the
//! caller's handlers under strict priority and liveness rules. Unlike a
//! static multi-way select it accepts new entries after it has started,
//! keeps a kill command from being starved by chatty streams, runs
//! long-lived handlers off the dispatch loop, and reports per-entry
//! liveness.
//!
//! ## Architecture
//! ```text
//! producers ──► per-entry streams ──► Listener (one per entry)
//!                                        │
//!                  detached handlers ◄───┤ non-blocking
//!                                        │ blocking
//!                                        ▼
//!                      aggregators { normal, priority, close-notify }
//!                                        │
//!                                        ▼
//!                    tiered dispatch loop (kill ► priority ► all)
//!                                        │
//!                              blocking handlers, serial
//! ```
//!
//! ## Rules
//! - Issuing a kill never closes the caller's streams.
//! - Blocking handlers are serialized with each other; detached handlers
//!   run concurrently with anything.
//! - `on_kill` runs exactly once; each entry's `on_close` runs exactly
//!   once, whether the stream closed on its own or a kill forced the
//!   listener out.
//! - A registered entry keeps its index for the life of the muxer.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::drain;
use crate::core::listener;
use crate::core::machine::{StateMachine, Step};
use crate::core::registry::Registry;
use crate::entries::{Entry, EntryState, Payload};
use crate::error::MuxError;

/// One value forwarded from a listener to the dispatch loop.
pub(crate) struct Dispatch {
    pub(crate) index: usize,
    pub(crate) payload: Payload,
}

/// Notice that the listener at `index` has stopped reading its stream.
pub(crate) struct CloseNotice {
    pub(crate) index: usize,
}

/// A batch of entries awaiting admission, plus the ack that resolves the
/// caller's `load`.
pub(crate) struct LoadRequest {
    pub(crate) entries: Vec<Entry>,
    pub(crate) ack: oneshot::Sender<()>,
}

/// State shared between the muxer handle, the dispatch loop, and every
/// listener. Listeners hold this as a non-owning capability handle; it
/// stays valid until the shutdown join completes.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) normal_tx: mpsc::Sender<Dispatch>,
    pub(crate) priority_tx: mpsc::Sender<Dispatch>,
    pub(crate) close_tx: mpsc::Sender<CloseNotice>,
    /// Broadcast that unblocks every listener promptly once a kill is heard.
    pub(crate) done: CancellationToken,
    /// Edge-triggered kill input; cancellation is single-shot by nature.
    pub(crate) kill: CancellationToken,
    /// Outstanding-listener counter; shutdown joins on it.
    pub(crate) tracker: TaskTracker,
    pub(crate) alive: AtomicBool,
    pub(crate) running: AtomicBool,
    pub(crate) kill_heard: AtomicBool,
}

impl Shared {
    /// Unsynchronised liveness read; brief skew against a concurrent kill
    /// is accepted.
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed) && !self.kill_heard.load(Ordering::Relaxed)
    }
}

/// Receiving halves of the internal channels. Owned by the dispatch loop
/// while running, then handed to the drain task.
pub(crate) struct Inlets {
    pub(crate) normal_rx: mpsc::Receiver<Dispatch>,
    pub(crate) priority_rx: mpsc::Receiver<Dispatch>,
    pub(crate) close_rx: mpsc::Receiver<CloseNotice>,
    pub(crate) load_rx: mpsc::Receiver<LoadRequest>,
}

/// Dynamic prioritized fan-in dispatcher.
///
/// ```no_run
/// use chanmux::{CloseHandler, Entry, Handler, Muxer, Payload};
/// use std::sync::Arc;
/// use tokio::sync::{mpsc, oneshot};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let (tx, rx) = mpsc::channel::<Payload>(8);
///     let entry = Entry::new(
///         rx,
///         Handler::new(|payload| {
///             if let Ok(line) = payload.downcast::<String>() {
///                 println!("heard: {line}");
///             }
///         })
///         .blocking(),
///         CloseHandler::new(|| println!("stream closed")),
///     );
///
///     let mux = Arc::new(Muxer::new(|| println!("halting"), vec![entry]));
///     let (ready_tx, ready_rx) = oneshot::channel();
///     let runner = tokio::spawn({
///         let mux = mux.clone();
///         async move { mux.run(ready_tx).await }
///     });
///     ready_rx.await.unwrap();
///
///     tx.send(Box::new("hello".to_string())).await.unwrap();
///     mux.kill();
///     runner.await.unwrap();
/// }
/// ```
pub struct Muxer {
    shared: Arc<Shared>,
    load_tx: mpsc::Sender<LoadRequest>,
    /// Taken by the first (and only) `run` call.
    inlets: Mutex<Option<Inlets>>,
    /// Streams of the entries registered before `run`, keyed by index.
    staged: Mutex<Vec<(usize, mpsc::Receiver<Payload>)>>,
    on_kill: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    /// Serializes kill delivery so exactly one call wins.
    kill_guard: Mutex<()>,
}

impl Muxer {
    /// Builds an inert muxer.
    ///
    /// `on_kill` is invoked exactly once at the end of shutdown.
    /// `initial_entries` may be empty; they are registered immediately (a
    /// snapshot sees them) and their listeners start when [`run`](Self::run)
    /// is called.
    pub fn new(on_kill: impl FnOnce() + Send + 'static, initial_entries: Vec<Entry>) -> Self {
        // Rendezvous aggregators: a listener that cannot hand off is
        // back-pressured until the dispatch loop advances.
        let (normal_tx, normal_rx) = mpsc::channel(1);
        let (priority_tx, priority_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (load_tx, load_rx) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            registry: Registry::new(),
            normal_tx,
            priority_tx,
            close_tx,
            done: CancellationToken::new(),
            kill: CancellationToken::new(),
            tracker: TaskTracker::new(),
            alive: AtomicBool::new(true),
            running: AtomicBool::new(false),
            kill_heard: AtomicBool::new(false),
        });

        let mut staged = Vec::with_capacity(initial_entries.len());
        for entry in initial_entries {
            let (stream, handler, on_close) = entry.into_parts();
            let index = shared.registry.append(handler, on_close);
            staged.push((index, stream));
        }

        Self {
            shared,
            load_tx,
            inlets: Mutex::new(Some(Inlets {
                normal_rx,
                priority_rx,
                close_rx,
                load_rx,
            })),
            staged: Mutex::new(staged),
            on_kill: Mutex::new(Some(Box::new(on_kill))),
            kill_guard: Mutex::new(()),
        }
    }

    /// Runs the muxer until a kill is heard, then completes shutdown.
    ///
    /// Spawns one listener per registered entry, signals `ready` (after
    /// which [`load`](Self::load) is safe), and drives the tiered dispatch
    /// loop. Returns once every listener has joined and `on_kill` has run.
    ///
    /// # Panics
    /// Calling `run` a second time on the same instance is a programmer
    /// error and panics.
    pub async fn run(&self, ready: oneshot::Sender<()>) {
        let inlets = self
            .lock_inlets()
            .take()
            .expect("Muxer::run may only be invoked once per instance");
        self.shared.running.store(true, Ordering::SeqCst);

        let staged = mem::take(&mut *self.lock_staged());
        for (index, stream) in staged {
            if let Some((handler, on_close)) = self.shared.registry.handler_pair(index) {
                listener::spawn(self.shared.clone(), index, stream, handler, on_close);
            }
        }
        let _ = ready.send(());

        let mut machine = StateMachine::new(self.shared.clone(), inlets);
        while machine.step().await == Step::Continue {}
        tracing::debug!("dispatch loop halted; draining and joining listeners");

        self.shutdown(machine.into_inlets()).await;
    }

    /// Appends a batch of entries and starts a listener per entry.
    ///
    /// Resolves once the dispatch loop has admitted the batch; a snapshot
    /// taken after a successful `load` includes the new entries.
    ///
    /// # Errors
    /// - [`MuxError::NotStarted`] before [`run`](Self::run) has begun.
    /// - [`MuxError::NotAlive`] once a kill has been heard or the muxer has
    ///   halted, including while the call is in flight.
    pub async fn load(&self, entries: Vec<Entry>) -> Result<(), MuxError> {
        if !self.is_alive() {
            return Err(MuxError::NotAlive);
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(MuxError::NotStarted);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.load_tx
            .send(LoadRequest {
                entries,
                ack: ack_tx,
            })
            .await
            .map_err(|_| MuxError::NotAlive)?;
        ack_rx.await.map_err(|_| MuxError::NotAlive)
    }

    /// Issues a non-blocking, idempotent kill command.
    ///
    /// The first call wins; the dispatch loop observes it at the next tier
    /// boundary. In-flight blocking handlers run to completion.
    pub fn kill(&self) {
        if !self.is_alive() {
            return;
        }
        let _guard = self
            .kill_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_alive() {
            self.shared.kill_heard.store(true, Ordering::SeqCst);
            self.shared.kill.cancel();
        }
    }

    /// Reports whether the muxer is running and no kill has been heard.
    ///
    /// Flips to `false` as soon as a kill is delivered, before listeners
    /// have joined.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Returns a copy of the entry table with per-entry liveness as of the
    /// moment of the call.
    pub fn snapshot(&self) -> Vec<EntryState> {
        self.shared.registry.snapshot()
    }

    /// Drain-and-join sequence run after the dispatch loop halts.
    async fn shutdown(&self, inlets: Inlets) {
        self.shared.kill_heard.store(true, Ordering::SeqCst);
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);

        // Unblock every listener parked on its stream.
        self.shared.done.cancel();

        // Absorb residual publishes until the listeners have joined, so
        // none of them is stuck mid-send.
        let (stop_tx, stop_rx) = oneshot::channel();
        let drainer = tokio::spawn(drain::run(inlets, stop_rx));

        if let Some(on_kill) = self
            .on_kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            on_kill();
        }

        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        let _ = stop_tx.send(());
        let _ = drainer.await;
    }

    fn lock_inlets(&self) -> std::sync::MutexGuard<'_, Option<Inlets>> {
        self.inlets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_staged(&self) -> std::sync::MutexGuard<'_, Vec<(usize, mpsc::Receiver<Payload>)>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
