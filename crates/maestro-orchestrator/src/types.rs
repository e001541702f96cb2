use chrono::{DateTime, Utc};
use maestro_core::MaestroError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Role of each agent in a workflow.
///
/// The set is closed: adding a role means extending every exhaustive `match`
/// over it, which the compiler enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Product manager: turns the request into requirements.
    Pm,
    /// Technical architect: designs the technical approach.
    Ta,
    /// UI/UX designer.
    Design,
    /// Frontend engineer.
    Fe,
    /// Backend engineer.
    Be,
    /// Quality assurance: writes and runs tests.
    Qa,
    /// Build, deployment and infrastructure.
    Devops,
}

impl AgentRole {
    /// Every role, in declaration order.
    pub const ALL: [AgentRole; 7] = [
        AgentRole::Pm,
        AgentRole::Ta,
        AgentRole::Design,
        AgentRole::Fe,
        AgentRole::Be,
        AgentRole::Qa,
        AgentRole::Devops,
    ];

    /// Short code used in ids, config keys and procedure files.
    pub fn code(&self) -> &'static str {
        match self {
            AgentRole::Pm => "pm",
            AgentRole::Ta => "ta",
            AgentRole::Design => "design",
            AgentRole::Fe => "fe",
            AgentRole::Be => "be",
            AgentRole::Qa => "qa",
            AgentRole::Devops => "devops",
        }
    }

    /// Human-readable title.
    pub fn title(&self) -> &'static str {
        match self {
            AgentRole::Pm => "Product Manager",
            AgentRole::Ta => "Technical Architect",
            AgentRole::Design => "UI/UX Designer",
            AgentRole::Fe => "Frontend Engineer",
            AgentRole::Be => "Backend Engineer",
            AgentRole::Qa => "QA Engineer",
            AgentRole::Devops => "DevOps Engineer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for AgentRole {
    type Err = MaestroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .iter()
            .copied()
            .find(|role| role.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MaestroError::Validation(format!("unknown agent role '{s}'")))
    }
}

/// Dispatch priority. Only affects ordering within a scheduling round.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Status of a task. `Completed`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether a dependent task may start once a dependency reaches this status.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running | TaskStatus::Skipped) => true,
            (
                TaskStatus::Running,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped,
            ) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Kind of artifact produced by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Code,
    File,
    Document,
    Test,
    Report,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Code => write!(f, "code"),
            ArtifactKind::File => write!(f, "file"),
            ArtifactKind::Document => write!(f, "document"),
            ArtifactKind::Test => write!(f, "test"),
            ArtifactKind::Report => write!(f, "report"),
        }
    }
}

/// An artifact produced by an agent during task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: None,
            content: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// One entry of the chronological run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: AgentRole,
    pub action: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub summary: Option<String>,
}

impl HistoryEntry {
    pub fn new(agent: AgentRole, action: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            agent,
            action: action.into(),
            status,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Builds the stable id of the task for a procedure step.
///
/// Derived only from `(workflow_id, order, role)` so dependency edges can be
/// computed before any task exists.
pub fn task_id(workflow_id: &str, order: u32, role: AgentRole) -> String {
    format!("{workflow_id}:{order}:{role}")
}

/// One scheduled unit of work within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent: AgentRole,
    pub action: String,
    /// Step order this task was built from (1-based).
    pub order: u32,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub priority: Priority,
    pub max_retries: u32,
    pub status: TaskStatus,
    /// Tasks that must be completed (or skipped) before this one is eligible.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tasks this one may run alongside.
    #[serde(default)]
    pub parallel_with: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Executor invocations so far, including retries.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, agent: AgentRole, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent,
            action: action.into(),
            order: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            priority: Priority::default(),
            max_retries: 0,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            parallel_with: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_parallel_with(mut self, ids: Vec<String>) -> Self {
        self.parallel_with = ids;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn with_io(mut self, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies.iter().any(|d| d == id)
    }

    pub fn may_run_alongside(&self, id: &str) -> bool {
        self.parallel_with.iter().any(|p| p == id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("wf:1:pm", AgentRole::Pm, "Write requirements");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.agent, AgentRole::Pm);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.dependencies.is_empty());
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_task_id_is_deterministic() {
        assert_eq!(task_id("wf-1", 3, AgentRole::Fe), "wf-1:3:fe");
        assert_eq!(
            task_id("wf-1", 3, AgentRole::Fe),
            task_id("wf-1", 3, AgentRole::Fe)
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_agent_role_round_trip() {
        for role in AgentRole::ALL {
            let parsed: AgentRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
        assert!("wizard".parse::<AgentRole>().is_err());
        assert_eq!("QA".parse::<AgentRole>().unwrap(), AgentRole::Qa);
    }

    #[test]
    fn test_agent_role_serde_uses_code() {
        let json = serde_json::to_string(&AgentRole::Devops).unwrap();
        assert_eq!(json, "\"devops\"");
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Skipped));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Skipped.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_artifact_builder() {
        let artifact = Artifact::new(ArtifactKind::Code, "login form")
            .with_path("src/login.tsx")
            .with_content("export const Login = () => null;");
        assert_eq!(artifact.kind, ArtifactKind::Code);
        assert_eq!(artifact.path.as_deref(), Some("src/login.tsx"));
        assert!(artifact.content.is_some());
    }

    #[test]
    fn test_task_serialization() {
        let task = Task::new("wf:2:ta", AgentRole::Ta, "Design API")
            .with_dependencies(vec!["wf:1:pm".to_string()])
            .with_priority(Priority::High);
        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
        assert!(parsed.depends_on("wf:1:pm"));
    }
}
