//! The retry/timeout combinator shared by every verify, send and webhook step.
//!
//! Each try is raced against a timer; an elapsed timer is recorded exactly like
//! a transport error. Every try, successful or not, is appended to the
//! dispatch's attempt log.

use crate::error::TransportError;
use crate::models::{AttemptOutcome, AttemptStage, DeliveryAttempt};
use crate::policy::{Deadline, RetrySchedule};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Parameters for one step against one provider.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    pub provider: &'a str,
    pub stage: AttemptStage,
    pub timeout: Duration,
    pub schedule: RetrySchedule,
}

/// Why a step gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Attempts exhausted, or the last error was not retryable.
    Failed(TransportError),
    /// The dispatch deadline ran out, possibly mid-step.
    DeadlineExceeded(Option<TransportError>),
}

impl StepError {
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::DeadlineExceeded(err) => err.as_ref(),
        }
    }
}

/// Run `operation` under `step`'s timeout and retry schedule.
///
/// Non-retryable errors end the step immediately. A backoff sleep that would
/// overrun the deadline is not started; the step fails with its last error so
/// the caller can move on to the next provider.
pub async fn run_step<T, F, Fut>(
    step: Step<'_>,
    deadline: &Deadline,
    attempts: &mut Vec<DeliveryAttempt>,
    mut operation: F,
) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let max_attempts = step.schedule.max_attempts();
    let mut last_error: Option<TransportError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = step.schedule.backoff.delay(attempt - 1);
            if delay >= deadline.remaining() {
                warn!(
                    provider = %step.provider,
                    stage = %step.stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    remaining_ms = deadline.remaining().as_millis() as u64,
                    "Backoff would overrun the deadline, giving up on provider"
                );
                return Err(match last_error {
                    Some(err) => StepError::Failed(err),
                    None => StepError::DeadlineExceeded(None),
                });
            }
            debug!(
                provider = %step.provider,
                stage = %step.stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }

        let Some(timeout) = deadline.clamp(step.timeout) else {
            return Err(StepError::DeadlineExceeded(last_error));
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let duration = started.elapsed();

        match result {
            Ok(value) => {
                debug!(
                    provider = %step.provider,
                    stage = %step.stage,
                    attempt,
                    elapsed_ms = duration.as_millis() as u64,
                    "Step succeeded"
                );
                attempts.push(DeliveryAttempt {
                    provider: step.provider.to_string(),
                    stage: step.stage,
                    attempt,
                    outcome: AttemptOutcome::Success,
                    duration,
                });
                return Ok(value);
            }
            Err(err) => {
                warn!(
                    provider = %step.provider,
                    stage = %step.stage,
                    attempt,
                    max_attempts,
                    elapsed_ms = duration.as_millis() as u64,
                    error = %err,
                    "Step failed"
                );
                attempts.push(DeliveryAttempt {
                    provider: step.provider.to_string(),
                    stage: step.stage,
                    attempt,
                    outcome: AttemptOutcome::Failure(err.to_string()),
                    duration,
                });

                let retryable = err.is_retryable();
                last_error = Some(err);

                if deadline.is_expired() {
                    return Err(StepError::DeadlineExceeded(last_error));
                }
                if !retryable {
                    break;
                }
            }
        }
    }

    match last_error {
        Some(err) => Err(StepError::Failed(err)),
        None => Err(StepError::DeadlineExceeded(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn step(schedule: RetrySchedule) -> Step<'static> {
        Step {
            provider: "test",
            stage: AttemptStage::Send,
            timeout: Duration::from_secs(5),
            schedule,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures_records_every_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let deadline = Deadline::after(Duration::from_secs(60));
        let mut attempts = Vec::new();

        let schedule = RetrySchedule::with_retries(3, Backoff::Linear(Duration::from_secs(1)));
        let result = run_step(step(schedule), &deadline, &mut attempts, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TransportError::Connection(format!("refused #{}", n + 1)))
                } else {
                    Ok("sent")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("sent"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(attempts.len(), 3);
        assert!(attempts[2].succeeded());
        assert_eq!(attempts[1].error(), Some("connection failed: refused #2"));
        // Linear backoff: 1s then 2s
        assert_eq!(deadline.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recorded_as_failure() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let mut attempts = Vec::new();

        let result: Result<(), _> = run_step(
            step(RetrySchedule::once()),
            &deadline,
            &mut attempts,
            || async {
                std::future::pending::<()>().await;
                Ok(())
            },
        )
        .await;

        assert_eq!(
            result,
            Err(StepError::Failed(TransportError::Timeout(Duration::from_secs(5))))
        );
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let deadline = Deadline::after(Duration::from_secs(60));
        let mut attempts = Vec::new();

        let schedule = RetrySchedule::with_retries(3, Backoff::Fixed(Duration::from_secs(1)));
        let result: Result<(), _> = run_step(step(schedule), &deadline, &mut attempts, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::InvalidMessage("bad recipient".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(StepError::Failed(TransportError::InvalidMessage(_)))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_backoff() {
        let deadline = Deadline::after(Duration::from_secs(4));
        let mut attempts = Vec::new();

        let schedule = RetrySchedule::with_retries(5, Backoff::Linear(Duration::from_secs(3)));
        let result: Result<(), _> = run_step(step(schedule), &deadline, &mut attempts, || async {
            Err(TransportError::Connection("refused".into()))
        })
        .await;

        // 1st try, 3s sleep, 2nd try; the 6s sleep would overrun the deadline
        assert_eq!(attempts.len(), 2);
        assert!(matches!(result, Err(StepError::Failed(TransportError::Connection(_)))));
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_clamped_to_deadline() {
        let deadline = Deadline::after(Duration::from_secs(2));
        let mut attempts = Vec::new();

        let result: Result<(), _> = run_step(
            step(RetrySchedule::once()),
            &deadline,
            &mut attempts,
            || async {
                std::future::pending::<()>().await;
                Ok(())
            },
        )
        .await;

        assert_eq!(
            result,
            Err(StepError::DeadlineExceeded(Some(TransportError::Timeout(
                Duration::from_secs(2)
            ))))
        );
    }
}
