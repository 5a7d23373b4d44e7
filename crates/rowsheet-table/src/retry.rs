//! Bounded exponential backoff for store discovery.
//!
//! ```text
//! attempt 1: immediate
//! attempt 2: wait initial_backoff          (100ms)
//! attempt 3: wait initial_backoff * 2      (200ms)
//! attempt n: wait min(initial * 2^(n-2), max_backoff)
//! ```
//!
//! Only errors the caller classifies as transient are retried; anything else fails on the
//! attempt that produced it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for exponential backoff.
///
/// Durations are kept in milliseconds so the policy can be read from the same JSON document as
/// [`crate::TableOptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (default: 10).
    pub max_attempts: u32,
    /// Wait before the second attempt (default: 100ms).
    pub initial_backoff_ms: u64,
    /// Growth factor between consecutive waits (default: 2.0).
    pub backoff_multiplier: f64,
    /// Upper bound for a single wait (default: 30s).
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits; handy for tests and in-process stores.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }

    /// Wait before retry number `retry` (0-indexed: `0` is the wait before the second attempt).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if millis.is_finite() {
            millis.min(self.max_backoff_ms as f64)
        } else {
            self.max_backoff_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// The last error seen by [`retry_with_backoff`] plus how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub source: E,
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the policy runs out
/// of attempts. Blocks the calling thread between attempts.
pub fn retry_with_backoff<T, E, F, P>(
    policy: &RetryPolicy,
    is_transient: P,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_transient(&err) => {
                let wait = policy.backoff(attempt - 1);
                log::warn!("attempt {attempt}/{max_attempts} failed ({err}); retrying in {wait:?}");
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                attempt += 1;
            }
            Err(source) => {
                return Err(RetryFailure {
                    attempts: attempt,
                    source,
                })
            }
        }
    }
}
