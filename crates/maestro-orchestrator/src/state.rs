use crate::context::ExecutionContext;
use crate::types::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Persistable snapshot of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub procedure: String,
    pub status: WorkflowStatus,
    /// Highest step order reached so far.
    pub current_step: u32,
    pub total_steps: usize,
    /// Tasks in plan order.
    pub tasks: Vec<Task>,
    pub context: ExecutionContext,
    #[serde(default)]
    pub critical_path: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn is_finished(&self) -> bool {
        self.status != WorkflowStatus::Running
    }

    /// One line per task, for logs and the CLI.
    pub fn progress_lines(&self) -> Vec<String> {
        self.tasks
            .iter()
            .map(|t| {
                let mut line = format!("[{}] {} {} ({})", t.order, t.agent, t.action, t.status);
                if let Some(err) = &t.error {
                    line.push_str(&format!(": {err}"));
                }
                line
            })
            .collect()
    }
}
