use crate::config::AgentSettings;
use crate::events::ProgressReporter;
use crate::types::{Artifact, Task};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// What an agent produced for a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Named results, consumable by later tasks as inputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// One-line description recorded in the run history.
    #[serde(default)]
    pub summary: Option<String>,
}

impl AgentOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Broad class of an agent failure, inferred from its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    RateLimit,
    Network,
    Authentication,
    Parse,
    Validation,
    Dependency,
    Unknown,
}

impl ErrorCategory {
    /// Classify by case-insensitive substring patterns. Order matters: the
    /// first matching category wins.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let table: [(ErrorCategory, &[&str]); 7] = [
            (
                ErrorCategory::RateLimit,
                &["rate limit", "rate_limit", "ratelimit", "429", "too many requests", "quota"],
            ),
            (
                ErrorCategory::Timeout,
                &["timeout", "timed out", "deadline exceeded", "etimedout"],
            ),
            (
                ErrorCategory::Network,
                &[
                    "econnreset",
                    "econnrefused",
                    "connection reset",
                    "connection refused",
                    "connection closed",
                    "network",
                    "socket hang up",
                    "502",
                    "503",
                    "504",
                    "temporarily unavailable",
                    "overloaded",
                ],
            ),
            (
                ErrorCategory::Authentication,
                &["401", "403", "unauthorized", "forbidden", "api key", "authentication"],
            ),
            (
                ErrorCategory::Parse,
                &["parse", "unexpected token", "deserializ", "malformed"],
            ),
            (
                ErrorCategory::Validation,
                &["invalid", "validation", "missing required", "400", "bad request"],
            ),
            (
                ErrorCategory::Dependency,
                &["dependency", "not found", "no such file", "cannot find", "unresolved"],
            ),
        ];

        table
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// Timeouts, rate limits and transient network failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout | ErrorCategory::RateLimit | ErrorCategory::Network
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Dependency => "dependency",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failed agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct AgentError {
    pub message: String,
    /// Explicit classification from the executor. When unset, the message
    /// patterns decide.
    #[serde(default)]
    pub recoverable: Option<bool>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: None,
            stack_trace: None,
        }
    }

    /// An error the executor knows is worth retrying.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            recoverable: Some(true),
            ..Self::new(message)
        }
    }

    /// An error the executor knows will not go away on retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            recoverable: Some(false),
            ..Self::new(message)
        }
    }

    pub(crate) fn timed_out(limit: Duration) -> Self {
        Self::recoverable(format!(
            "agent execution timed out after {}s",
            limit.as_secs()
        ))
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::classify(&self.message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
            .unwrap_or_else(|| self.category().is_transient())
    }
}

impl From<AgentError> for maestro_core::MaestroError {
    fn from(err: AgentError) -> Self {
        maestro_core::MaestroError::Agent(err.message)
    }
}

/// Everything an executor gets to work on besides the task itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub workflow_id: String,
    pub user_request: String,
    /// The task's declared inputs that exist in the context.
    pub inputs: BTreeMap<String, Value>,
    /// Bounded digest of the shared context.
    pub context_summary: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Performs the actual work of one task, e.g. by prompting a model.
///
/// The engine only looks at success vs. failure, the outputs and artifacts,
/// and whether an error is recoverable.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        settings: &AgentSettings,
        input: &TaskInput,
        progress: &ProgressReporter,
    ) -> Result<AgentOutput, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transient() {
        assert_eq!(
            ErrorCategory::classify("Request timed out"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            ErrorCategory::classify("HTTP 429 Too Many Requests"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorCategory::classify("ECONNRESET while reading"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::classify("503 Service Unavailable"),
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_classify_permanent() {
        assert_eq!(
            ErrorCategory::classify("401 Unauthorized: invalid API key"),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ErrorCategory::classify("failed to parse model response"),
            ErrorCategory::Parse
        );
        assert_eq!(
            ErrorCategory::classify("invalid input schema"),
            ErrorCategory::Validation
        );
        assert_eq!(
            ErrorCategory::classify("module not found"),
            ErrorCategory::Dependency
        );
        assert_eq!(
            ErrorCategory::classify("segfault"),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_recoverable_from_message() {
        assert!(AgentError::new("rate limit exceeded").is_recoverable());
        assert!(AgentError::new("network unreachable").is_recoverable());
        assert!(!AgentError::new("400 Bad Request").is_recoverable());
        assert!(!AgentError::new("compilation failed").is_recoverable());
    }

    #[test]
    fn test_explicit_flag_wins() {
        assert!(!AgentError::fatal("timeout while compiling").is_recoverable());
        assert!(AgentError::recoverable("compilation failed").is_recoverable());
    }

    #[test]
    fn test_timed_out_error() {
        let err = AgentError::timed_out(Duration::from_secs(30));
        assert!(err.is_recoverable());
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(err.to_string(), "agent execution timed out after 30s");
    }

    #[test]
    fn test_into_maestro_error() {
        let err: maestro_core::MaestroError = AgentError::fatal("bad output").into();
        assert_eq!(err.to_string(), "Agent error: bad output");
    }

    #[test]
    fn test_agent_output_builder() {
        let out = AgentOutput::new()
            .with_output("spec", Value::String("done".into()))
            .with_summary("wrote spec");
        assert_eq!(out.outputs.len(), 1);
        assert_eq!(out.summary.as_deref(), Some("wrote spec"));
    }
}
