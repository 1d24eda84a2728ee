//! Scheduler — background work with exponential backoff.
//!
//! A [`Task`] runs an async attempt either once (retried until it succeeds)
//! or on a fixed period. Failed attempts are retried after
//! `base * 2^min(failures - 1, max_exponent)`; an attempt may ask for a
//! longer pause with [`TaskError::RetryAfter`], never a shorter one.
//!
//! Cancelling a task prevents future attempts. An attempt already in flight
//! runs to completion.

use std::future::Future;
use std::time::Duration;

use hearth_domain::error::HearthError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Retry delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_exponent: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_exponent: 6,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures
            .saturating_sub(1)
            .min(self.max_exponent)
            .min(31);
        self.base.saturating_mul(1_u32 << exponent)
    }
}

/// How often a task's attempt runs once it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// Stop after the first successful attempt.
    Once,
    /// Run again `period` after every successful attempt.
    Every(Duration),
}

/// Failure of a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("attempt failed")]
    Failed(#[source] HearthError),

    #[error("attempt failed, retry requested after {after:?}")]
    RetryAfter {
        after: Duration,
        #[source]
        source: HearthError,
    },
}

impl From<HearthError> for TaskError {
    fn from(value: HearthError) -> Self {
        Self::Failed(value)
    }
}

/// Handle on a running background task.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct Task {
    name: String,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Task {
    /// Spawn `attempt` on the tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, mode: TaskMode, backoff: Backoff, attempt: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name = name.into();
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run(name.clone(), mode, backoff, cancelled, attempt));
        Self {
            name,
            cancel,
            handle,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prevent any further attempt.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to stop, either by completing a `Once` attempt or
    /// after [`cancel`](Self::cancel).
    pub async fn join(self) {
        let Self { handle, cancel, .. } = self;
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "task join failed");
        }
        drop(cancel);
    }
}

async fn run<F, Fut>(
    name: String,
    mode: TaskMode,
    backoff: Backoff,
    mut cancelled: watch::Receiver<bool>,
    mut attempt: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    let mut failures: u32 = 0;
    loop {
        if *cancelled.borrow() {
            break;
        }
        let delay = match attempt().await {
            Ok(()) => {
                failures = 0;
                match mode {
                    TaskMode::Once => break,
                    TaskMode::Every(period) => period,
                }
            }
            Err(TaskError::Failed(err)) => {
                failures = failures.saturating_add(1);
                let delay = backoff.delay(failures);
                tracing::warn!(task = %name, failures, ?delay, error = %err, "task attempt failed");
                delay
            }
            Err(TaskError::RetryAfter { after, source }) => {
                failures = failures.saturating_add(1);
                let delay = backoff.delay(failures).max(after);
                tracing::warn!(task = %name, failures, ?delay, error = %source, "task attempt failed, retry requested");
                delay
            }
        };
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = cancelled.changed() => break,
        }
    }
    tracing::debug!(task = %name, "task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn recorder() -> (Arc<Mutex<Vec<Instant>>>, Arc<Mutex<Vec<Instant>>>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        (Arc::clone(&attempts), attempts)
    }

    fn gaps(attempts: &[Instant]) -> Vec<Duration> {
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn should_double_delay_up_to_max_exponent() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            max_exponent: 2,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn should_retry_once_task_with_backoff_until_success() {
        let (recorded, attempts) = recorder();
        let task = Task::spawn(
            "flaky",
            TaskMode::Once,
            Backoff::default(),
            move || {
                let recorded = Arc::clone(&recorded);
                async move {
                    let count = {
                        let mut guard = recorded.lock().unwrap();
                        guard.push(Instant::now());
                        guard.len()
                    };
                    if count < 3 {
                        Err(TaskError::Failed(HearthError::backend("offline")))
                    } else {
                        Ok(())
                    }
                }
            },
        );
        task.join().await;

        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            gaps(&attempts),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_extend_delay_when_retry_after_is_longer() {
        let (recorded, attempts) = recorder();
        let task = Task::spawn("rate-limited", TaskMode::Once, Backoff::default(), move || {
            let recorded = Arc::clone(&recorded);
            async move {
                let count = {
                    let mut guard = recorded.lock().unwrap();
                    guard.push(Instant::now());
                    guard.len()
                };
                if count == 1 {
                    Err(TaskError::RetryAfter {
                        after: Duration::from_secs(5),
                        source: HearthError::backend("busy"),
                    })
                } else {
                    Ok(())
                }
            }
        });
        task.join().await;

        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(gaps(&attempts), vec![Duration::from_secs(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_shorten_backoff_when_retry_after_is_shorter() {
        let (recorded, attempts) = recorder();
        let task = Task::spawn("impatient", TaskMode::Once, Backoff::default(), move || {
            let recorded = Arc::clone(&recorded);
            async move {
                let count = {
                    let mut guard = recorded.lock().unwrap();
                    guard.push(Instant::now());
                    guard.len()
                };
                if count == 1 {
                    Err(TaskError::RetryAfter {
                        after: Duration::from_millis(10),
                        source: HearthError::backend("busy"),
                    })
                } else {
                    Ok(())
                }
            }
        });
        task.join().await;

        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(gaps(&attempts), vec![Duration::from_secs(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn should_run_periodic_task_until_cancelled() {
        let (recorded, attempts) = recorder();
        let task = Task::spawn(
            "poll",
            TaskMode::Every(Duration::from_secs(10)),
            Backoff::default(),
            move || {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().unwrap().push(Instant::now());
                    Ok(())
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        task.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(task.is_finished());
        assert_eq!(attempts.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_finish_in_flight_attempt_after_cancel() {
        let (recorded, attempts) = recorder();
        let task = Task::spawn(
            "slow",
            TaskMode::Every(Duration::from_secs(1)),
            Backoff::default(),
            move || {
                let recorded = Arc::clone(&recorded);
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    recorded.lock().unwrap().push(Instant::now());
                    Ok(())
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        task.cancel();
        task.join().await;

        assert_eq!(attempts.lock().unwrap().len(), 1);
    }
}
