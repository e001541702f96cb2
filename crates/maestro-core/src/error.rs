use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type for the Maestro engine.
///
/// Each variant corresponds to a layer that can produce errors.
#[derive(Error, Debug)]
pub enum MaestroError {
    /// An error surfaced by an agent executor.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A procedure or task list failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The scheduler cannot make progress (cycle or deadlock). Never retried.
    #[error("Scheduling error: {0}")]
    Scheduling(String),

    /// A task id that is not registered in the graph.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A status change out of a terminal state.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task being updated.
        task_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A task failed terminally and aborted the workflow.
    #[error("Task {task_id} failed: {message}")]
    TaskFailed {
        /// Id of the failed task.
        task_id: String,
        /// Underlying error message.
        message: String,
    },

    /// An error from a persistence collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaestroError {
    /// Returns `true` for errors raised by the scheduler itself.
    pub fn is_scheduling(&self) -> bool {
        matches!(self, MaestroError::Scheduling(_))
    }

    /// The failing task id, when the error identifies one.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            MaestroError::TaskFailed { task_id, .. }
            | MaestroError::InvalidTransition { task_id, .. } => Some(task_id.as_str()),
            MaestroError::TaskNotFound(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_variants() {
        let err = MaestroError::Scheduling("deadlock".to_string());
        assert_eq!(err.to_string(), "Scheduling error: deadlock");
        assert!(err.is_scheduling());

        let err = MaestroError::TaskFailed {
            task_id: "wf:3:fe".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Task wf:3:fe failed: boom");
        assert_eq!(err.task_id(), Some("wf:3:fe"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = MaestroError::InvalidTransition {
            task_id: "t1".to_string(),
            from: "completed".to_string(),
            to: "running".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for task t1: completed -> running"
        );
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: MaestroError = json_err.into();
        assert!(err.to_string().starts_with("JSON error:"));
        assert!(err.task_id().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MaestroError = io_err.into();
        assert_eq!(err.to_string(), "IO error: missing");
    }
}
