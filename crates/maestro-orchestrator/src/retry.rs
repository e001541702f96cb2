use crate::config::AgentSettings;
use crate::events::ProgressReporter;
use crate::executor::{AgentError, AgentExecutor, AgentOutput, TaskInput};
use crate::types::Task;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Exponential backoff between attempts of the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before retry `retry` (0-based): `min(base * 2^retry, max)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        Duration::from_millis(compute_backoff(self, retry))
    }
}

/// Computes the backoff in milliseconds for a 0-based retry index.
pub fn compute_backoff(policy: &RetryPolicy, retry: u32) -> u64 {
    let delay = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(retry));
    delay.min(policy.max_delay_ms)
}

/// Result of running one task to success or final failure.
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<AgentOutput, AgentError>,
    /// Executor invocations made, including the first.
    pub attempts: u32,
    /// Delays slept between attempts, in order.
    pub delays: Vec<Duration>,
}

/// Wraps an [`AgentExecutor`] with a per-attempt timeout and backoff retries
/// for recoverable errors.
#[derive(Clone)]
pub struct RetryingExecutor {
    executor: Arc<dyn AgentExecutor>,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    pub fn new(executor: Arc<dyn AgentExecutor>, policy: RetryPolicy) -> Self {
        Self { executor, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `task` with up to `task.max_retries` retries after the first
    /// attempt. Non-recoverable errors end the loop immediately.
    pub async fn execute(
        &self,
        task: &Task,
        settings: &AgentSettings,
        mut input: TaskInput,
        progress: &ProgressReporter,
    ) -> RetryOutcome {
        let limit = settings.timeout();
        let mut delays = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            input.attempt = attempt;

            let result = match tokio::time::timeout(
                limit,
                self.executor.execute(task, settings, &input, progress),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AgentError::timed_out(limit)),
            };

            let err = match result {
                Ok(output) => {
                    return RetryOutcome {
                        result: Ok(output),
                        attempts: attempt,
                        delays,
                    }
                }
                Err(e) => e,
            };

            let retries_used = attempt - 1;
            if !err.is_recoverable() || retries_used >= task.max_retries {
                warn!(
                    task_id = %task.id,
                    attempt,
                    recoverable = err.is_recoverable(),
                    error = %err,
                    "Task attempt failed, giving up"
                );
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                    delays,
                };
            }

            let delay_ms = compute_backoff(&self.policy, retries_used);
            let delay = Duration::from_millis(delay_ms);
            info!(
                task_id = %task.id,
                attempt,
                delay_ms,
                error = %err,
                "Recoverable error, backing off"
            );
            progress.retrying(attempt, delay, &err.message);
            tokio::time::sleep(delay).await;
            delays.push(delay);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::{EventBus, WorkflowEvent};
    use crate::profiles::default_settings;
    use crate::types::AgentRole;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed script of results, then succeeds.
    struct Scripted {
        script: Mutex<VecDeque<Result<AgentOutput, AgentError>>>,
        calls: Mutex<Vec<u32>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<AgentOutput, AgentError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentExecutor for Scripted {
        async fn execute(
            &self,
            _task: &Task,
            _settings: &AgentSettings,
            input: &TaskInput,
            _progress: &ProgressReporter,
        ) -> Result<AgentOutput, AgentError> {
            self.calls.lock().push(input.attempt);
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| Ok(AgentOutput::new()))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl AgentExecutor for Sleepy {
        async fn execute(
            &self,
            _task: &Task,
            _settings: &AgentSettings,
            _input: &TaskInput,
            _progress: &ProgressReporter,
        ) -> Result<AgentOutput, AgentError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(AgentOutput::new())
        }
    }

    fn reporter(bus: &Arc<EventBus>) -> ProgressReporter {
        ProgressReporter::new(Arc::clone(bus), "wf", "wf:3:be", AgentRole::Be)
    }

    fn task(max_retries: u32) -> Task {
        Task::new("wf:3:be", AgentRole::Be, "implement").with_max_retries(max_retries)
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(compute_backoff(&policy, 0), 1000);
        assert_eq!(compute_backoff(&policy, 1), 2000);
        assert_eq!(compute_backoff(&policy, 3), 8000);
        assert_eq!(compute_backoff(&policy, 4), 10_000);
        assert_eq!(compute_backoff(&policy, 60), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_errors() {
        let exec = Scripted::new(vec![
            Err(AgentError::new("rate limit exceeded")),
            Err(AgentError::new("503 Service Unavailable")),
        ]);
        let retrying = RetryingExecutor::new(exec.clone(), RetryPolicy::default());
        let bus = Arc::new(EventBus::new());
        let retries = Arc::new(Mutex::new(Vec::new()));
        {
            let retries = Arc::clone(&retries);
            bus.subscribe(move |e| {
                if let WorkflowEvent::TaskRetrying { delay_ms, .. } = e {
                    retries.lock().push(*delay_ms);
                }
            });
        }

        let outcome = retrying
            .execute(
                &task(3),
                &default_settings(AgentRole::Be),
                TaskInput::default(),
                &reporter(&bus),
            )
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            outcome.delays,
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(*exec.calls.lock(), vec![1, 2, 3]);
        assert_eq!(*retries.lock(), vec![1000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let exec = Scripted::new(vec![Err(AgentError::fatal("compilation failed"))]);
        let retrying = RetryingExecutor::new(exec.clone(), RetryPolicy::default());
        let bus = Arc::new(EventBus::new());

        let outcome = retrying
            .execute(
                &task(3),
                &default_settings(AgentRole::Be),
                TaskInput::default(),
                &reporter(&bus),
            )
            .await;

        assert_eq!(outcome.result.unwrap_err().message, "compilation failed");
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let exec = Scripted::new(vec![
            Err(AgentError::new("timeout")),
            Err(AgentError::new("timeout")),
            Err(AgentError::new("timeout")),
        ]);
        let retrying = RetryingExecutor::new(exec.clone(), RetryPolicy::new(100, 150));
        let bus = Arc::new(EventBus::new());

        let outcome = retrying
            .execute(
                &task(2),
                &default_settings(AgentRole::Be),
                TaskInput::default(),
                &reporter(&bus),
            )
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            outcome.delays,
            vec![Duration::from_millis(100), Duration::from_millis(150)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recoverable_failure() {
        let retrying = RetryingExecutor::new(Arc::new(Sleepy), RetryPolicy::default());
        let bus = Arc::new(EventBus::new());
        let mut settings = default_settings(AgentRole::Be);
        settings.timeout_secs = 5;

        let outcome = retrying
            .execute(&task(1), &settings, TaskInput::default(), &reporter(&bus))
            .await;

        let err = outcome.result.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "agent execution timed out after 5s");
        assert_eq!(outcome.attempts, 2);
    }
}
