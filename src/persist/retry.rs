//! Bounded retry with exponential backoff for durable-store operations.
//!
//! Retries are bounded twice over: by attempt count and by an elapsed-time
//! ceiling. Once either bound is hit the operation is abandoned to the next
//! sweep rather than failed upward. Delays use a fixed formula (no jitter)
//! so tests can reason about exact schedules.

use std::time::{Duration, Instant};

/// Retry policy for durable-store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each retry.
    pub base_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
    /// Ceiling on total time spent inside one retried operation.
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    /// Execute once, no retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_elapsed: Duration::MAX,
        }
    }

    /// Delay before retry number `attempt` (0-indexed): `base * 2^attempt`,
    /// capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Run `op` under this policy, sleeping between attempts.
    ///
    /// Returns the first success, or the last error once the attempt count
    /// or the elapsed ceiling is exhausted. Only ever called on worker
    /// threads; the control loop never sleeps here.
    pub fn run<T, E>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let started = Instant::now();
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    if attempt >= attempts || started.elapsed() + delay > self.max_elapsed {
                        return Err(err);
                    }
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            max_elapsed: Duration::MAX,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(300));
        assert_eq!(policy.delay(10), Duration::from_millis(300));
    }

    #[test]
    fn test_run_retries_until_success() {
        let mut calls = 0;
        let result: Result<u32, &str> = fast().run(|| {
            calls += 1;
            if calls < 3 {
                Err("transient")
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_run_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), &str> = fast().run(|| {
            calls += 1;
            Err("down")
        });
        assert_eq!(result, Err("down"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_none_policy_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = RetryPolicy::none().run(|| {
            calls += 1;
            Err("nope")
        });
        assert_eq!(calls, 1);
    }
}
