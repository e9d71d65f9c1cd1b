//! # Exponential backoff controller.
//!
//! [`Backoff`] hands out sleep tickets whose duration doubles per ticket
//! (capped at a ceiling) and passively cools back down toward a floor while
//! nobody is asking. It shares the multiplexer's concurrency discipline:
//! one control loop, guarded shared state, cooperative kill.
//!
//! ## Flow
//! ```text
//! wait() ──ticket──► control loop ──► snapshot current, double-and-cap
//!                        │                    │
//!                   cooldown tick        detached sleeper (snapshot long)
//!                        │                    │
//!                 step back toward min   ticket resolved (or dropped on kill)
//! ```
//!
//! ## Rules
//! - `min <= current <= max` at every observable instant.
//! - Doubling (ticket) and stepping down (cooldown tick) are the only
//!   mutators, both under the guard.
//! - Concurrent `wait` callers each sleep the value snapshotted when their
//!   ticket was processed, not a shared clock.
//! - `stop` is idempotent; every pending and future `wait` then resolves to
//!   [`BackoffError::Killed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::BackoffError;

/// Completion side of one sleep request.
type Ticket = oneshot::Sender<()>;

/// Construction options for [`Backoff`].
///
/// `cooldown_tick: None` disables passive decay entirely.
#[derive(Clone, Copy, Debug)]
pub struct BackoffOpts {
    /// Floor duration; also the initial wait.
    pub min: Duration,
    /// Ceiling duration.
    pub max: Duration,
    /// Period of the passive decrement, `None` to disable.
    pub cooldown_tick: Option<Duration>,
    /// Magnitude of each passive decrement.
    pub cooldown_step: Duration,
}

impl Default for BackoffOpts {
    /// Returns options with:
    /// - `min = 100ms`;
    /// - `max = 30s`;
    /// - `cooldown_tick = None` (no passive decay);
    /// - `cooldown_step = 100ms`.
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(30),
            cooldown_tick: None,
            cooldown_step: Duration::from_millis(100),
        }
    }
}

/// Exponential sleep ticketing with passive cooldown.
///
/// ```no_run
/// use chanmux::{Backoff, BackoffOpts};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), chanmux::BackoffError> {
///     let backoff = Backoff::new(BackoffOpts::default())?;
///     tokio::spawn({
///         let backoff = backoff.clone();
///         async move { backoff.run().await }
///     });
///     backoff.ready().await;
///
///     backoff.wait().await?; // sleeps 100ms, next ticket sleeps 200ms
///     backoff.stop();
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    cooldown_tick: Option<Duration>,
    cooldown_step: Duration,
    /// The guarded wait value; see module rules for its mutators.
    current: Mutex<Duration>,
    alive: AtomicBool,
    ticket_tx: mpsc::Sender<Ticket>,
    /// Taken by the first (and only) `run` call.
    tickets: Mutex<Option<mpsc::Receiver<Ticket>>>,
    /// Latch the control loop sets once it is accepting tickets.
    ready: CancellationToken,
    /// Idempotent stop input.
    stop: CancellationToken,
    /// Broadcast to in-flight sleepers and waiters on halt.
    kill: CancellationToken,
}

impl Backoff {
    /// Validates the options and builds a controller.
    ///
    /// # Errors
    /// [`BackoffError::BadConfig`] when `min > max`.
    pub fn new(opts: BackoffOpts) -> Result<Arc<Self>, BackoffError> {
        if opts.min > opts.max {
            return Err(BackoffError::BadConfig {
                min: opts.min,
                max: opts.max,
            });
        }

        let (ticket_tx, ticket_rx) = mpsc::channel(1);
        Ok(Arc::new(Self {
            min: opts.min,
            max: opts.max,
            cooldown_tick: opts.cooldown_tick,
            cooldown_step: opts.cooldown_step,
            current: Mutex::new(opts.min),
            alive: AtomicBool::new(true),
            ticket_tx,
            tickets: Mutex::new(Some(ticket_rx)),
            ready: CancellationToken::new(),
            stop: CancellationToken::new(),
            kill: CancellationToken::new(),
        }))
    }

    /// Resolves once the control loop is accepting tickets.
    pub async fn ready(&self) {
        self.ready.cancelled().await;
    }

    /// The control loop; spawn it on a dedicated task.
    ///
    /// Selects over stop, incoming tickets, and the optional cooldown tick
    /// until stopped, then broadcasts the kill to in-flight sleepers.
    ///
    /// # Panics
    /// Calling `run` a second time on the same instance is a programmer
    /// error and panics.
    pub async fn run(&self) {
        let mut tickets = self
            .tickets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .expect("Backoff::run may only be invoked once per instance");

        self.alive.store(true, Ordering::SeqCst);
        let mut cooldown = self.cooldown_tick.map(|tick| {
            let mut interval = time::interval_at(Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        self.ready.cancel();

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                Some(ticket) = tickets.recv() => self.issue(ticket),
                _ = tick(&mut cooldown) => self.cool_off(),
            }
        }

        self.kill.cancel();
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Blocks until the current backoff delay has elapsed.
    ///
    /// The delay observed is the guarded value at the moment the controller
    /// processed this call's ticket; the stored value doubles (capped at
    /// `max`) for the next caller.
    ///
    /// # Errors
    /// [`BackoffError::Killed`] when the controller halts before the delay
    /// elapses, or was already stopped.
    pub async fn wait(&self) -> Result<(), BackoffError> {
        if !self.alive.load(Ordering::SeqCst)
            || self.stop.is_cancelled()
            || self.kill.is_cancelled()
        {
            return Err(BackoffError::Killed);
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.ticket_tx
            .send(done_tx)
            .await
            .map_err(|_| BackoffError::Killed)?;
        done_rx.await.map_err(|_| BackoffError::Killed)
    }

    /// Idempotent shutdown.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Returns `(value, at_min, at_max)` for the current wait.
    ///
    /// A controller that is not alive reports `(min, true, false)`.
    pub fn current_wait_time(&self) -> (Duration, bool, bool) {
        if !self.alive.load(Ordering::SeqCst) {
            return (self.min, true, false);
        }
        let current = *self.lock_current();
        (current, current == self.min, current == self.max)
    }

    /// Snapshots the wait for one ticket, doubles the stored value, and
    /// spawns the detached sleeper.
    fn issue(&self, ticket: Ticket) {
        let wait = {
            let mut current = self.lock_current();
            let snapshot = *current;
            *current = (*current * 2).min(self.max);
            snapshot
        };

        let kill = self.kill.clone();
        tokio::spawn(async move {
            tokio::select! {
                // Dropping the ticket surfaces as Killed at the waiter.
                _ = kill.cancelled() => {}
                _ = time::sleep(wait) => {
                    let _ = ticket.send(());
                }
            }
        });
    }

    /// One passive decrement, clamped at the floor.
    fn cool_off(&self) {
        let mut current = self.lock_current();
        if *current > self.min {
            *current = current.saturating_sub(self.cooldown_step).max(self.min);
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;

    fn opts(
        min: Duration,
        max: Duration,
        cooldown_tick: Option<Duration>,
        cooldown_step: Duration,
    ) -> BackoffOpts {
        BackoffOpts {
            min,
            max,
            cooldown_tick,
            cooldown_step,
        }
    }

    fn started(opts: BackoffOpts) -> (Arc<Backoff>, tokio::task::JoinHandle<()>) {
        let backoff = Backoff::new(opts).expect("valid opts");
        let runner = tokio::spawn({
            let backoff = backoff.clone();
            async move { backoff.run().await }
        });
        (backoff, runner)
    }

    #[test]
    fn incoherent_bounds_are_rejected() {
        let err = Backoff::new(opts(
            Duration::from_secs(3600),
            Duration::from_secs(1),
            None,
            Duration::from_secs(1),
        ))
        .unwrap_err();
        assert!(matches!(err, BackoffError::BadConfig { .. }));

        assert!(Backoff::new(BackoffOpts::default()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn doubles_per_ticket_until_capped() {
        let (backoff, runner) = started(opts(
            Duration::from_secs(1),
            Duration::from_secs(60),
            None,
            Duration::from_secs(1),
        ));
        backoff.ready().await;

        let (current, at_min, at_max) = backoff.current_wait_time();
        assert_eq!(current, Duration::from_secs(1));
        assert!(at_min);
        assert!(!at_max);

        let waits = (0..60).map(|_| {
            let backoff = backoff.clone();
            async move { backoff.wait().await }
        });
        for result in join_all(waits).await {
            result.unwrap();
        }

        let (current, at_min, at_max) = backoff.current_wait_time();
        assert_eq!(current, Duration::from_secs(60));
        assert!(!at_min);
        assert!(at_max);

        backoff.stop();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_decays_toward_the_floor() {
        let (backoff, runner) = started(opts(
            Duration::from_secs(1),
            Duration::from_secs(10),
            Some(Duration::from_secs(3)),
            Duration::from_secs(5),
        ));
        backoff.ready().await;

        for _ in 0..10 {
            let backoff = backoff.clone();
            tokio::spawn(async move {
                let _ = backoff.wait().await;
            });
        }
        // Let every ticket process; well inside the first cooldown tick.
        time::sleep(Duration::from_millis(10)).await;

        let (current, at_min, at_max) = backoff.current_wait_time();
        assert_eq!(current, Duration::from_secs(10));
        assert!(!at_min);
        assert!(at_max);

        // Two ticks land in here: 10s -> 5s -> floor.
        time::sleep(Duration::from_secs(7)).await;

        let (current, at_min, at_max) = backoff.current_wait_time();
        assert_eq!(current, Duration::from_secs(1));
        assert!(at_min);
        assert!(!at_max);

        backoff.stop();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_fails_pending_and_future_waits() {
        let (backoff, runner) = started(opts(
            Duration::from_secs(3600),
            Duration::from_secs(7200),
            None,
            Duration::from_secs(30),
        ));
        backoff.ready().await;

        let pending = tokio::spawn({
            let backoff = backoff.clone();
            async move { backoff.wait().await }
        });
        time::sleep(Duration::from_millis(10)).await;

        backoff.stop();
        backoff.stop();

        assert_eq!(pending.await.unwrap(), Err(BackoffError::Killed));
        assert_eq!(backoff.wait().await, Err(BackoffError::Killed));

        runner.await.unwrap();
        assert_eq!(
            backoff.current_wait_time(),
            (Duration::from_secs(3600), true, false)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_the_snapshot_taken_at_ticket_time() {
        let (backoff, runner) = started(opts(
            Duration::from_secs(2),
            Duration::from_secs(8),
            None,
            Duration::from_secs(1),
        ));
        backoff.ready().await;

        let begin = Instant::now();
        backoff.wait().await.unwrap();
        assert_eq!(begin.elapsed(), Duration::from_secs(2));

        let begin = Instant::now();
        backoff.wait().await.unwrap();
        assert_eq!(begin.elapsed(), Duration::from_secs(4));

        let (current, _, at_max) = backoff.current_wait_time();
        assert_eq!(current, Duration::from_secs(8));
        assert!(at_max);

        backoff.stop();
        runner.await.unwrap();
    }
}
