//! # Error types used by the multiplexer and the backoff controller.
//!
//! This module defines the two error enums that cross the crate boundary:
//!
//! - [`MuxError`] errors raised by [`Muxer::load`](crate::Muxer::load).
//! - [`BackoffError`] errors raised by the [`Backoff`](crate::Backoff) controller.
//!
//! Both types provide an `as_label` helper for logs/metrics. Everything else
//! (handler panics, close-handler panics, publishes racing shutdown) is caught
//! at the owning task's boundary and logged rather than surfaced.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the multiplexer.
///
/// Only `load` can fail; every other operation is infallible.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxError {
    /// `load` was called before `run`; accepting the batch now could deadlock.
    #[error("multiplexer has not been started; loading before run could deadlock")]
    NotStarted,

    /// `load` was called after a kill was issued or after the multiplexer halted.
    #[error("multiplexer has either halted or heard a kill command")]
    NotAlive,
}

impl MuxError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MuxError::NotStarted => "mux_not_started",
            MuxError::NotAlive => "mux_not_alive",
        }
    }
}

/// # Errors produced by the backoff controller.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffError {
    /// Construction was given a floor above the ceiling.
    #[error("incoherent bounds: min {min:?} is greater than max {max:?}")]
    BadConfig {
        /// The offending floor duration.
        min: Duration,
        /// The offending ceiling duration.
        max: Duration,
    },

    /// The controller was stopped; this is **not** the delay elapsing.
    #[error("controller received a kill command; this is not the delay elapsing")]
    Killed,
}

impl BackoffError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BackoffError::BadConfig { .. } => "backoff_bad_config",
            BackoffError::Killed => "backoff_killed",
        }
    }
}
