use crate::executor::{AgentError, ErrorCategory};
use crate::types::{AgentRole, Priority, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// `[diagnostics]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Synthesize an incident report when a task fails.
    pub enabled: bool,
    /// Where [`crate::store::FileReportStore`] writes reports, if set.
    pub report_dir: Option<PathBuf>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn from_priority(priority: Priority) -> Self {
        match priority {
            Priority::Low => Severity::Low,
            Priority::Medium => Severity::Medium,
            Priority::High => Severity::High,
            Priority::Critical => Severity::Critical,
        }
    }

    fn bumped(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Structured diagnosis of a failed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub agent: AgentRole,
    /// The failed task as it was when the report was made.
    pub task: Task,
    pub category: ErrorCategory,
    pub error: String,
    pub root_cause: String,
    pub risk: String,
    pub severity: Severity,
    pub prevention: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl IncidentReport {
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# Incident {}\n\n", self.id));
        md.push_str(&format!("- **Severity:** {}\n", self.severity));
        md.push_str(&format!("- **Workflow:** {}\n", self.workflow_id));
        md.push_str(&format!("- **Task:** {} ({})\n", self.task.id, self.task.action));
        md.push_str(&format!("- **Agent:** {}\n", self.agent.title()));
        md.push_str(&format!("- **Category:** {}\n", self.category));
        md.push_str(&format!(
            "- **Time:** {}\n\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        md.push_str("## Error\n\n");
        md.push_str(&format!("```\n{}\n```\n\n", self.error));
        md.push_str("## Root cause\n\n");
        md.push_str(&format!("{}\n\n", self.root_cause));
        md.push_str("## Risk\n\n");
        md.push_str(&format!("{}\n\n", self.risk));
        md.push_str("## Prevention\n\n");
        for item in &self.prevention {
            md.push_str(&format!("- {item}\n"));
        }

        if !self.context.is_empty() {
            md.push_str("\n## Context\n\n");
            for (key, value) in &self.context {
                md.push_str(&format!("- {key}: {value}\n"));
            }
        }

        if let Some(trace) = &self.stack_trace {
            md.push_str("\n## Stack trace\n\n");
            md.push_str(&format!("```\n{trace}\n```\n"));
        }
        md
    }
}

/// What the synthesizer knows about a failure.
#[derive(Debug, Clone)]
pub struct FailureContext<'a> {
    pub workflow_id: &'a str,
    pub procedure: &'a str,
    pub task: &'a Task,
    pub error: &'a AgentError,
    pub total_tasks: usize,
    /// Tasks that can no longer run because this one failed.
    pub blocked_tasks: usize,
    pub on_critical_path: bool,
    pub completed_tasks: usize,
}

/// Rule-based incident synthesis. No I/O, no model calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticSynthesizer;

impl DiagnosticSynthesizer {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(&self, failure: &FailureContext<'_>) -> IncidentReport {
        let category = failure.error.category();
        let task = failure.task;

        let mut severity = Severity::from_priority(task.priority);
        let blocks_half =
            failure.blocked_tasks > 0 && failure.blocked_tasks * 2 >= failure.total_tasks;
        if blocks_half || failure.on_critical_path {
            severity = severity.bumped();
        }

        let mut context = BTreeMap::new();
        context.insert("procedure".into(), json!(failure.procedure));
        context.insert("order".into(), json!(task.order));
        context.insert("attempts".into(), json!(task.attempts));
        context.insert("max_retries".into(), json!(task.max_retries));
        context.insert("total_tasks".into(), json!(failure.total_tasks));
        context.insert("completed_tasks".into(), json!(failure.completed_tasks));
        context.insert("blocked_tasks".into(), json!(failure.blocked_tasks));
        context.insert("on_critical_path".into(), json!(failure.on_critical_path));

        IncidentReport {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            workflow_id: failure.workflow_id.to_string(),
            agent: task.agent,
            task: task.clone(),
            category,
            error: failure.error.message.clone(),
            root_cause: root_cause(category, failure),
            risk: risk(failure),
            severity,
            prevention: prevention(category, task.agent),
            context,
            stack_trace: failure.error.stack_trace.clone(),
        }
    }
}

fn root_cause(category: ErrorCategory, failure: &FailureContext<'_>) -> String {
    let task = failure.task;
    let who = format!("{} task `{}`", task.agent.title(), task.action);
    let attempts = task.attempts.max(1);
    match category {
        ErrorCategory::Timeout => format!(
            "{who} did not finish within its time limit after {attempts} attempt(s)."
        ),
        ErrorCategory::RateLimit => format!(
            "{who} was throttled by the model provider and exhausted its retries ({attempts} attempt(s))."
        ),
        ErrorCategory::Network => format!(
            "{who} lost connectivity to a remote service and did not recover after {attempts} attempt(s)."
        ),
        ErrorCategory::Authentication => {
            format!("{who} was rejected by a remote service due to missing or invalid credentials.")
        }
        ErrorCategory::Parse => {
            format!("{who} produced or received output that could not be parsed.")
        }
        ErrorCategory::Validation => {
            format!("{who} was given or produced data that failed validation.")
        }
        ErrorCategory::Dependency => format!(
            "{who} could not find something it depends on (a module, file or upstream output)."
        ),
        ErrorCategory::Unknown => format!(
            "{who} failed with an unclassified error: {}",
            failure.error.message
        ),
    }
}

fn risk(failure: &FailureContext<'_>) -> String {
    let mut text = if failure.blocked_tasks == 0 {
        format!(
            "No downstream tasks are blocked; {} of {} tasks completed.",
            failure.completed_tasks, failure.total_tasks
        )
    } else {
        format!(
            "{} of {} tasks are blocked and will not run; {} completed before the failure.",
            failure.blocked_tasks, failure.total_tasks, failure.completed_tasks
        )
    };
    if failure.on_critical_path {
        text.push_str(" The task is on the critical path, so the whole request is undelivered.");
    }
    text
}

fn prevention(category: ErrorCategory, agent: AgentRole) -> Vec<String> {
    let mut items: Vec<String> = match category {
        ErrorCategory::Timeout => vec![
            format!("Raise `agents.{agent}.timeout_secs` or split the step into smaller actions."),
            "Check whether the executor is waiting on a hung subprocess or request.".into(),
        ],
        ErrorCategory::RateLimit => vec![
            "Increase `retry.max_delay_ms` so backoff outlasts the provider window.".into(),
            format!("Raise `agents.{agent}.max_retries` or lower concurrency in the procedure."),
        ],
        ErrorCategory::Network => vec![
            "Verify connectivity to the model provider and any project services.".into(),
            format!("Raise `agents.{agent}.max_retries` for flaky networks."),
        ],
        ErrorCategory::Authentication => vec![
            "Check the API key or credentials available to the executor.".into(),
            "Authentication errors are not retried; fix credentials and rerun.".into(),
        ],
        ErrorCategory::Parse => vec![
            "Tighten the agent's system prompt about the expected output format.".into(),
            "Validate executor output before returning it.".into(),
        ],
        ErrorCategory::Validation => vec![
            "Check the step's declared inputs against outputs of earlier steps.".into(),
            "Review the user request for missing or contradictory requirements.".into(),
        ],
        ErrorCategory::Dependency => vec![
            "Make sure earlier steps write the outputs this step reads.".into(),
            "Install missing project dependencies before rerunning.".into(),
        ],
        ErrorCategory::Unknown => vec![
            "Inspect the stack trace and executor logs (`RUST_LOG=debug`).".into(),
        ],
    };
    items.push("Rerun the workflow after addressing the cause.".into());
    items
}
