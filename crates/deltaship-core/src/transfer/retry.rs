use std::time::Duration;

use crate::error::{DeltashipError, Result};

use super::job::JobState;
use super::rate_limit::RateLimitPolicy;

/// Upper bound on the exponential backoff between generic retries.
pub const BACKOFF_CAP: Duration = Duration::from_secs(20);

/// Blocking wait, injectable so schedules can be asserted without real sleeps.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub(crate) static THREAD_SLEEPER: ThreadSleeper = ThreadSleeper;

/// Backoff before the retry that follows the `attempt`-th generic failure:
/// `min(2^attempt, 20)` seconds.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(BACKOFF_CAP)
}

/// Attempt budget plus rate-limit handling for one unit of work (a job, a
/// bulk call, or a commit batch).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, counting the first one.
    pub max_attempts: u32,
    pub rate_limit: RateLimitPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, rate_limit: RateLimitPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            rate_limit,
        }
    }

    /// Run `op` until it succeeds, the attempt budget is spent, or a rate
    /// limit asks for more than the ceiling.
    ///
    /// Rate-limit waits repeat the same attempt. `observe` sees every state
    /// change together with the current attempt number.
    pub fn run<T>(
        &self,
        label: &str,
        sleeper: &dyn Sleeper,
        mut observe: impl FnMut(JobState, u32),
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt: u32 = 1;
        let mut waits: u32 = 0;

        loop {
            observe(JobState::InFlight, attempt);
            let err = match op() {
                Ok(val) => {
                    observe(JobState::Done, attempt);
                    return Ok(val);
                }
                Err(e) => e,
            };

            if err.is_unrecoverable() {
                observe(JobState::Failed, attempt);
                return Err(err);
            }

            let message = err.to_string();
            if let Some(wait) = self.rate_limit.wait_for(&message) {
                if self.rate_limit.exceeds_ceiling(wait) {
                    tracing::warn!(
                        "{label}: rate limit wait of {}s is not recoverable: {message}",
                        wait.as_secs()
                    );
                    observe(JobState::Failed, attempt);
                    return Err(DeltashipError::RateLimitExceeded {
                        label: label.to_string(),
                        wait_secs: wait.as_secs(),
                        ceiling_secs: self.rate_limit.ceiling.as_secs(),
                    });
                }
                if waits >= self.rate_limit.max_waits {
                    tracing::warn!("{label}: still rate limited after {waits} waits: {message}");
                    observe(JobState::Failed, attempt);
                    return Err(DeltashipError::RateLimitWaitsExhausted {
                        label: label.to_string(),
                        waits,
                    });
                }
                waits += 1;
                tracing::warn!(
                    "{label}: rate limited (attempt {attempt}/{}), waiting {}s",
                    self.max_attempts,
                    wait.as_secs()
                );
                observe(JobState::RateLimitedWait, attempt);
                self.rate_limit.sleep_reporting(label, wait, sleeper);
                continue;
            }

            if attempt >= self.max_attempts {
                observe(JobState::Failed, attempt);
                return Err(DeltashipError::TransferFailed {
                    label: label.to_string(),
                    attempts: attempt,
                    message,
                });
            }

            let delay = backoff_delay(attempt);
            tracing::warn!(
                "{label}: attempt {attempt}/{} failed, retrying in {}s: {message}",
                self.max_attempts,
                delay.as_secs()
            );
            observe(JobState::Retrying, attempt);
            sleeper.sleep(delay);
            attempt += 1;
            waits = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let secs: Vec<u64> = (1..=6).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 20, 20]);
        assert_eq!(backoff_delay(200), BACKOFF_CAP);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, RateLimitPolicy::default()).max_attempts, 1);
    }
}
