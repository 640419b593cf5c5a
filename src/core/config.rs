//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the tree runtime.
//!
//! ## Sentinel values
//! - `max_jobs = 0` → unlimited (no job semaphore created)
//! - `tick = 0s` → no timer-driven wakeup in [`Tree::run`](crate::Tree::run)
//! - `job_timeout = 0s` → falls back to [`DEFAULT_JOB_TIMEOUT`]

use std::time::Duration;

/// Timeout applied to a job that carries none and whose config sets none.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Global configuration for the tree runtime.
///
/// ## Field semantics
/// - `protected`: catch panics raised by scripts and child resources (`false` lets them unwind)
/// - `grace`: maximum wait for nodes to close on shutdown
/// - `max_jobs`: job worker pool size (`0` = unlimited)
/// - `job_timeout`: default per-job timeout
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `tick`: interval of timer-driven reconciliation (`0s` = disabled)
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Convert panics into `Panic`/`StopFailed` states instead of unwinding.
    ///
    /// Unprotected mode is meant for development: a panicking script takes
    /// down the caller of `wakeup`.
    pub protected: bool,

    /// Maximum time to wait for nodes to close before giving up.
    pub grace: Duration,

    /// Maximum number of jobs executing concurrently.
    ///
    /// - `0` = unlimited (no semaphore)
    /// - `n > 0` = at most `n` jobs run simultaneously, the rest wait for a permit
    pub max_jobs: usize,

    /// Default job timeout, used when a job does not carry its own.
    pub job_timeout: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Interval between timer-driven `wakeup` passes.
    pub tick: Duration,
}

impl Config {
    /// Returns the job concurrency limit as an `Option`.
    #[inline]
    pub fn job_limit(&self) -> Option<usize> {
        if self.max_jobs == 0 {
            None
        } else {
            Some(self.max_jobs)
        }
    }

    /// Resolves the timeout of one job.
    ///
    /// A positive per-job timeout wins, then `job_timeout`, then [`DEFAULT_JOB_TIMEOUT`].
    #[inline]
    pub fn job_timeout_for(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|d| *d > Duration::ZERO)
            .or(Some(self.job_timeout).filter(|d| *d > Duration::ZERO))
            .unwrap_or(DEFAULT_JOB_TIMEOUT)
    }

    /// Returns the reconciliation interval as an `Option`.
    #[inline]
    pub fn tick_interval(&self) -> Option<Duration> {
        if self.tick == Duration::ZERO {
            None
        } else {
            Some(self.tick)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `protected = true`
    /// - `grace = 60s`
    /// - `max_jobs = 64`
    /// - `job_timeout = 300s`
    /// - `bus_capacity = 1024`
    /// - `tick = 10s`
    fn default() -> Self {
        Self {
            protected: true,
            grace: Duration::from_secs(60),
            max_jobs: 64,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            bus_capacity: 1024,
            tick: Duration::from_secs(10),
        }
    }
}
