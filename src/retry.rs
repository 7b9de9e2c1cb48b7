use crate::TaskError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How a failed attempt is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Retryable,
    Critical,
    NonCritical,
}

pub fn classify(error: &TaskError) -> FailureClass {
    match error {
        TaskError::Retryable(_) => FailureClass::Retryable,
        TaskError::Critical(_) => FailureClass::Critical,
        TaskError::NonCritical { .. } => FailureClass::NonCritical,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: Some(30_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: duration_ms(base_delay),
            max_delay_ms: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = Some(duration_ms(max_delay));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, capped at the max delay.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let mut delay = self.base_delay_ms.saturating_mul(factor);
        if let Some(max) = self.max_delay_ms {
            delay = delay.min(max);
        }
        Duration::from_millis(delay)
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Result of driving one task through its attempts.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, TaskError>,
    pub attempts: u32,
}

pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or
    /// exhausts `max_retries`. `on_retry` fires before each backoff sleep with
    /// the failed attempt number and the delay about to be slept.
    pub async fn execute_with_retry<F, Fut, T, R>(
        &self,
        task_id: &str,
        mut operation: F,
        mut on_retry: R,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
        R: FnMut(u32, Duration, &TaskError),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            if classify(&err) != FailureClass::Retryable || attempt > self.policy.max_retries {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let wait_time = self.policy.next_delay(attempt);
            warn!(
                task_id,
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = duration_ms(wait_time),
                error = %err,
                "task attempt failed, retrying"
            );
            on_retry(attempt, wait_time, &err);
            sleep(wait_time).await;
        }
    }
}
