//! Bounded retry with pluggable backoff.
//!
//! The policy knows nothing about recognition services: it drives any async
//! operation that returns `Result<T, E>` where `E` can say whether another
//! attempt is worthwhile. That keeps the loop testable with a fake operation
//! that fails a controlled number of times.
//!
//! ## Delay schedule
//!
//! After failed attempt `n` (1-based) the policy sleeps `delay_after(n)`:
//!
//! | Backoff       | n = 1 | n = 2 | n = 3 |
//! |---------------|-------|-------|-------|
//! | `Linear`      | 1×    | 2×    | 3×    |
//! | `Exponential` | 1×    | 2×    | 4×    |
//! | `Constant`    | 1×    | 1×    | 1×    |
//!
//! No sleep follows the final attempt. A per-attempt deadline belongs inside
//! the operation (see [`crate::pipeline::llm::LlmRecognizer`]); it surfaces
//! as a transient error and leaves this loop unchanged.

use crate::error::RecognitionError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Growth function for the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// `base × n` (default).
    #[default]
    Linear,
    /// `base × 2^(n-1)`.
    Exponential,
    /// `base` every time.
    Constant,
}

/// Errors that know whether they are worth retrying.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for RecognitionError {
    fn is_transient(&self) -> bool {
        RecognitionError::is_transient(self)
    }
}

/// `(max_attempts, base_delay, backoff)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first. Always ≥ 1 after config validation.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff: Backoff::Linear,
        }
    }
}

/// Final result of a retried operation plus how many calls it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let n = attempt.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(n - 1)),
            Backoff::Constant => self.base_delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. The returned error is the
    /// last one observed.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if !e.is_transient() || attempt >= max => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "attempt {}/{} failed: {}; retrying in {}ms",
                        attempt,
                        max,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Backoff::Linear)
    }

    #[test]
    fn linear_schedule() {
        let p = RetryPolicy::new(3, Duration::from_secs(1), Backoff::Linear);
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(3));
    }

    #[test]
    fn exponential_and_constant_schedules() {
        let e = RetryPolicy::new(4, Duration::from_millis(500), Backoff::Exponential);
        assert_eq!(e.delay_after(1), Duration::from_millis(500));
        assert_eq!(e.delay_after(3), Duration::from_millis(2000));
        let c = RetryPolicy::new(4, Duration::from_millis(500), Backoff::Constant);
        assert_eq!(c.delay_after(3), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn transient_failures_exhaust_attempts() {
        let calls = AtomicU32::new(0);
        let out: RetryOutcome<String, RecognitionError> = fast(3)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RecognitionError::Transient {
                        detail: "boom".into(),
                    })
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.attempts, 3);
        assert!(out.result.is_err());
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let out = fast(3)
            .run(|attempt| async move {
                if attempt < 3 {
                    Err(RecognitionError::Transient {
                        detail: format!("fail {attempt}"),
                    })
                } else {
                    Ok("text".to_string())
                }
            })
            .await;
        assert_eq!(out.attempts, 3);
        assert_eq!(out.result.unwrap(), "text");
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let out: RetryOutcome<String, _> = fast(5)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RecognitionError::EmptyResponse) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.result.unwrap_err(), RecognitionError::EmptyResponse);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_sleeps() {
        let out: RetryOutcome<(), _> = RetryPolicy::new(1, Duration::from_secs(3600), Backoff::Linear)
            .run(|_| async {
                Err(RecognitionError::Timeout { secs: 1 })
            })
            .await;
        assert_eq!(out.attempts, 1);
    }
}
