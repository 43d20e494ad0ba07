//! Retry with exponential backoff for the synchronous I/O boundaries.
//!
//! Loader reads and sink flushes run on the worker that owns a location, so
//! waiting between attempts blocks only that worker.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::config::RetryConfig;
use crate::error::ReconstructionError;
use crate::storage::StorageError;

/// Exponential backoff calculator.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the next delay, or None if max retries exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay_ms as f64;
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = base * self.config.multiplier.powi(exp);
        let capped = scaled.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Retries performed so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Runs storage calls with retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Runs `operation`, retrying retryable storage errors with backoff.
    ///
    /// Non-retryable errors are returned immediately as `Storage`; when the
    /// retry budget runs out the result is `RetriesExhausted`.
    pub fn run<T, F>(&self, what: &str, mut operation: F) -> Result<T, ReconstructionError>
    where
        F: FnMut() -> Result<T, StorageError>,
    {
        let mut backoff = ExponentialBackoff::new(self.config);
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            operation = what,
                            attempt = backoff.attempt(),
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %err,
                            "retrying after storage failure"
                        );
                        thread::sleep(delay);
                    }
                    None => {
                        return Err(ReconstructionError::RetriesExhausted {
                            operation: what.to_string(),
                            attempts: backoff.attempt() + 1,
                            last_error: err.to_string(),
                        })
                    }
                },
                Err(err) => return Err(ReconstructionError::Storage(err)),
            }
        }
    }
}
