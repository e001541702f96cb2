//! Multi-agent workflow engine: dependency-aware scheduling, retries with
//! backoff, a bounded shared context and rule-based incident reports.
//!
//! A [`Procedure`] declares ordered steps, each owned by an [`AgentRole`].
//! The [`WorkflowDriver`] turns a procedure plus a user request into a
//! [`TaskGraph`], dispatches ready tasks round by round through an
//! [`AgentExecutor`], and produces a final [`WorkflowState`]. Agent work
//! itself is delegated to the executor implementation.
//!
//! # Main types
//!
//! - [`WorkflowDriver`] — Plans and executes workflows, emitting [`WorkflowEvent`]s.
//! - [`TaskGraph`] — Task registry with readiness, cycle and critical-path queries.
//! - [`ContextStore`] — Size-bounded shared context with automatic summarization.
//! - [`RetryingExecutor`] — Timeout and exponential backoff around an [`AgentExecutor`].
//! - [`DiagnosticSynthesizer`] — Builds an [`IncidentReport`] for a failed task.
//! - [`OrchestratorConfig`] — TOML configuration with per-role overrides.

/// Engine configuration and per-role settings.
pub mod config;
/// Shared execution context and its size limits.
pub mod context;
/// Incident report synthesis.
pub mod diagnostics;
/// Workflow driver: plan, execute, run.
pub mod engine;
/// Lifecycle events and the event bus.
pub mod events;
/// Agent executor trait, outputs and error classification.
pub mod executor;
/// Per-role counters fed by workflow events.
pub mod metrics;
/// Work requests and per-run plans.
pub mod plan;
/// Procedure and step definitions.
pub mod procedure;
/// Built-in procedures.
pub mod procedures;
/// Default settings per agent role.
pub mod profiles;
/// Backoff policy and the retrying executor.
pub mod retry;
/// Workflow snapshots.
pub mod state;
/// Persistence of workflow snapshots and incident reports.
pub mod store;
/// Task registry and scheduling rules.
pub mod task_graph;
/// Shared types (Task, AgentRole, Artifact, etc.).
pub mod types;

pub use config::{AgentOverrides, AgentSettings, OrchestratorConfig};
pub use context::{ContextLimits, ContextStore, ExecutionContext, SummarizedValue};
pub use diagnostics::{
    DiagnosticSynthesizer, DiagnosticsConfig, FailureContext, IncidentReport, Severity,
};
pub use engine::{WorkflowDriver, WorkflowFailure};
pub use events::{EventBus, ProgressPhase, ProgressReporter, WorkflowEvent};
pub use executor::{AgentError, AgentExecutor, AgentOutput, ErrorCategory, TaskInput};
pub use metrics::{AgentMetrics, MetricsCollector};
pub use plan::{WorkRequest, WorkflowPlan};
pub use procedure::{Procedure, Step};
pub use profiles::{default_profiles, default_settings};
pub use retry::{RetryOutcome, RetryPolicy, RetryingExecutor};
pub use state::{WorkflowState, WorkflowStatus};
pub use store::{FileReportStore, FileWorkflowStore, ReportSink, WorkflowStore};
pub use task_graph::TaskGraph;
pub use types::{AgentRole, Artifact, ArtifactKind, HistoryEntry, Priority, Task, TaskStatus};
