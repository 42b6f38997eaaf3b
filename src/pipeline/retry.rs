//! Bounded retry with exponential backoff and jitter.
//!
//! Used underneath every Paperless and LLM call. Only errors the caller
//! declares transient are retried; anything else is returned on the spot,
//! without sleeping. On the last failed attempt the original error is
//! returned unchanged.

use std::time::Duration;

use rand::Rng;

use crate::config::{ConfigError, Settings};

/// Errors that know whether a repeat of the same call could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Exponent base for the backoff delay (`BACKOFF_BASE^attempt` seconds).
const BACKOFF_BASE: f64 = 2.0;

/// Jitter applied to every delay: uniform in `[1 - JITTER, 1 + JITTER]`.
const JITTER: f64 = 0.2;

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_backoff: Duration,
    sleep: fn(Duration),
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_backoff_secs: u64) -> Result<Self, ConfigError> {
        if max_attempts < 1 {
            return Err(ConfigError::Invalid(
                "retry policy needs at least one attempt".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            max_backoff: Duration::from_secs(max_backoff_secs),
            sleep: std::thread::sleep,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::new(settings.max_retries, settings.max_retry_backoff_secs)
    }

    /// Replace the sleep function (tests use a no-op).
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op`, retrying errors whose `Retryable::is_transient` is true.
    pub fn run<T, E, F>(&self, op_name: &str, op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        self.run_if(op_name, |e: &E| e.is_transient(), op)
    }

    /// Run `op`, retrying only errors accepted by `is_retryable`.
    pub fn run_if<T, E, F, P>(&self, op_name: &str, is_retryable: P, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::error!(
                        op = op_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    let delay = self.backoff(attempt);
                    tracing::info!(
                        op = op_name,
                        delay_secs = delay.as_secs_f64(),
                        "Sleeping before retry"
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range((1.0 - JITTER)..=(1.0 + JITTER));
        let raw = BACKOFF_BASE.powi(attempt.min(64) as i32) * jitter;
        let capped = raw.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}
