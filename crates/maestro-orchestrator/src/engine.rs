use crate::config::{AgentSettings, OrchestratorConfig};
use crate::context::{ContextStore, ExecutionContext};
use crate::diagnostics::{DiagnosticSynthesizer, FailureContext, IncidentReport};
use crate::events::{EventBus, ProgressPhase, ProgressReporter, WorkflowEvent};
use crate::executor::{AgentError, AgentExecutor, TaskInput};
use crate::plan::{WorkRequest, WorkflowPlan};
use crate::retry::RetryingExecutor;
use crate::state::{WorkflowState, WorkflowStatus};
use crate::store::{ReportSink, WorkflowStore};
use crate::task_graph::TaskGraph;
use crate::types::{HistoryEntry, Task, TaskStatus};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use maestro_core::{MaestroError, MaestroResult};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A run that ended in failure, with everything known at that point.
#[derive(Debug, thiserror::Error)]
#[error("workflow {workflow_id} failed: {error}")]
pub struct WorkflowFailure {
    pub workflow_id: String,
    #[source]
    pub error: MaestroError,
    /// Final snapshot with status `failed`.
    pub state: Box<WorkflowState>,
    /// Diagnosis of the first failed task, when a task failure caused the
    /// abort and diagnostics are enabled.
    pub incident: Option<Box<IncidentReport>>,
    /// Every task that failed in the aborting round, in dispatch order.
    pub failed_tasks: Vec<String>,
}

/// Drives a procedure through the scheduler round by round.
///
/// Holds only collaborators; all per-run state lives in the
/// [`WorkflowPlan`] passed to [`execute`](Self::execute), so one driver can
/// run many workflows, concurrently or in sequence.
pub struct WorkflowDriver {
    config: OrchestratorConfig,
    executor: RetryingExecutor,
    events: Arc<EventBus>,
    synthesizer: DiagnosticSynthesizer,
    report_sink: Option<Arc<dyn ReportSink>>,
    state_store: Option<Arc<dyn WorkflowStore>>,
}

/// Mutable bookkeeping of one run.
struct Run {
    workflow_id: String,
    procedure: String,
    graph: TaskGraph,
    context: Arc<ContextStore>,
    critical_path: Vec<String>,
    started_at: DateTime<Utc>,
    clock: Instant,
    current_step: u32,
}

impl Run {
    fn snapshot(&self, status: WorkflowStatus, error: Option<String>) -> WorkflowState {
        WorkflowState {
            id: self.workflow_id.clone(),
            procedure: self.procedure.clone(),
            status,
            current_step: self.current_step,
            total_steps: self.graph.len(),
            tasks: self.graph.snapshot(),
            context: self.context.snapshot(),
            critical_path: self.critical_path.clone(),
            started_at: self.started_at,
            completed_at: (status != WorkflowStatus::Running).then(Utc::now),
            error,
        }
    }

    /// Read-only view handed to the tasks of one round.
    fn round(&self) -> Round<'_> {
        Round {
            workflow_id: &self.workflow_id,
            procedure: &self.procedure,
            graph: &self.graph,
            context: self.context.as_ref(),
            critical_path: &self.critical_path,
        }
    }
}

/// What a task of the current round may read. The graph is not mutated
/// until every task of the round has finished.
struct Round<'a> {
    workflow_id: &'a str,
    procedure: &'a str,
    graph: &'a TaskGraph,
    context: &'a ContextStore,
    critical_path: &'a [String],
}

/// How one dispatched task ended.
struct TaskResult {
    task_id: String,
    attempts: u32,
    result: Result<(), AgentError>,
    incident: Option<Box<IncidentReport>>,
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl WorkflowDriver {
    /// Build a driver. Fails with [`MaestroError::Config`] if `config` does
    /// not pass [`OrchestratorConfig::validate`].
    pub fn new(
        config: OrchestratorConfig,
        executor: Arc<dyn AgentExecutor>,
    ) -> MaestroResult<Self> {
        config.validate()?;
        let executor = RetryingExecutor::new(executor, config.retry.clone());
        Ok(Self {
            config,
            executor,
            events: Arc::new(EventBus::new()),
            synthesizer: DiagnosticSynthesizer::new(),
            report_sink: None,
            state_store: None,
        })
    }

    /// Hand incident reports to `sink` as they are created.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report_sink = Some(sink);
        self
    }

    /// Checkpoint the workflow state to `store` after every round.
    pub fn with_state_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Share an existing event bus instead of the driver's own.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Register an event listener.
    pub fn subscribe(&self, listener: impl Fn(&WorkflowEvent) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    /// Validate the procedure and build the per-run plan.
    pub fn plan(&self, request: &WorkRequest) -> MaestroResult<WorkflowPlan> {
        WorkflowPlan::build(request, &self.config)
    }

    /// Plan and execute in one call.
    pub async fn run(&self, request: WorkRequest) -> Result<WorkflowState, WorkflowFailure> {
        match self.plan(&request) {
            Ok(plan) => self.execute(plan).await,
            Err(error) => Err(self.planning_failed(&request, error)),
        }
    }

    fn planning_failed(&self, request: &WorkRequest, error: MaestroError) -> WorkflowFailure {
        let workflow_id = request
            .workflow_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let project_path = request
            .project_path
            .clone()
            .unwrap_or_else(|| self.config.project_path.clone());
        let now = Utc::now();

        error!(workflow_id = %workflow_id, error = %error, "Workflow planning failed");
        self.events.emit(&WorkflowEvent::WorkflowFailed {
            workflow_id: workflow_id.clone(),
            error: error.to_string(),
        });

        let state = WorkflowState {
            id: workflow_id.clone(),
            procedure: request.procedure.name.clone(),
            status: WorkflowStatus::Failed,
            current_step: 0,
            total_steps: 0,
            tasks: Vec::new(),
            context: ExecutionContext::new(
                workflow_id.clone(),
                request.procedure.name.clone(),
                request.user_request.clone(),
                project_path,
            ),
            critical_path: Vec::new(),
            started_at: now,
            completed_at: Some(now),
            error: Some(error.to_string()),
        };
        WorkflowFailure {
            workflow_id,
            error,
            state: Box::new(state),
            incident: None,
            failed_tasks: Vec::new(),
        }
    }

    /// Execute a plan to completion or first failure.
    ///
    /// Each round dispatches every task the scheduler returns, concurrently,
    /// and waits for all of them. A failure stops further rounds; siblings
    /// already dispatched in the same round still finish.
    pub async fn execute(&self, plan: WorkflowPlan) -> Result<WorkflowState, WorkflowFailure> {
        let WorkflowPlan {
            workflow_id,
            procedure,
            graph,
            context,
            critical_path,
        } = plan;
        let mut run = Run {
            workflow_id,
            procedure,
            graph,
            context,
            critical_path,
            started_at: Utc::now(),
            clock: Instant::now(),
            current_step: 0,
        };

        info!(
            workflow_id = %run.workflow_id,
            procedure = %run.procedure,
            tasks = run.graph.len(),
            "Workflow started"
        );
        self.events.emit(&WorkflowEvent::WorkflowStarted {
            workflow_id: run.workflow_id.clone(),
            procedure: run.procedure.clone(),
            total_tasks: run.graph.len(),
            critical_path: run.critical_path.clone(),
        });

        if run.graph.detect_cycle() {
            let error = MaestroError::Scheduling("dependency cycle detected in task graph".into());
            return Err(self.fail(&run, error, None).await);
        }

        while !run.graph.is_complete() {
            let ready: Vec<Task> = run.graph.next_executable().into_iter().cloned().collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = run
                    .graph
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .map(|t| t.id.as_str())
                    .collect();
                let error = MaestroError::Scheduling(format!(
                    "deadlock: {} pending task(s) cannot be scheduled: {}",
                    stuck.len(),
                    stuck.join(", ")
                ));
                warn!(workflow_id = %run.workflow_id, "Task deadlock detected");
                return Err(self.fail(&run, error, None).await);
            }

            let mut dispatch: Vec<(Task, AgentSettings)> = Vec::new();
            for task in ready {
                let settings = self.config.agent(task.agent);
                let marked = if settings.enabled {
                    run.graph.update_status(&task.id, TaskStatus::Running)
                } else {
                    self.skip(&mut run, &task)
                };
                if let Err(error) = marked {
                    return Err(self.fail(&run, error, None).await);
                }
                run.current_step = run.current_step.max(task.order);
                if !settings.enabled {
                    continue;
                }

                self.events.emit(&WorkflowEvent::TaskStarted {
                    workflow_id: run.workflow_id.clone(),
                    task_id: task.id.clone(),
                    agent: task.agent,
                    action: task.action.clone(),
                });
                if let Some(running) = run.graph.get(&task.id) {
                    dispatch.push((running.clone(), settings));
                }
            }

            if dispatch.is_empty() {
                continue;
            }

            info!(
                workflow_id = %run.workflow_id,
                tasks = dispatch.len(),
                "Dispatching round"
            );
            let round = run.round();
            let results = join_all(
                dispatch
                    .iter()
                    .map(|(task, settings)| self.run_task(&round, task, settings)),
            )
            .await;

            let mut failures = Vec::new();
            for outcome in results {
                if let Some(task) = run.graph.get_mut(&outcome.task_id) {
                    task.attempts = outcome.attempts;
                    if let Err(err) = &outcome.result {
                        task.error = Some(err.message.clone());
                    }
                }
                let status = match &outcome.result {
                    Ok(()) => TaskStatus::Completed,
                    Err(_) => TaskStatus::Failed,
                };
                if let Err(error) = run.graph.update_status(&outcome.task_id, status) {
                    return Err(self.fail(&run, error, None).await);
                }
                if let Err(err) = outcome.result {
                    failures.push((outcome.task_id, err, outcome.incident));
                }
            }

            self.checkpoint(&run.snapshot(WorkflowStatus::Running, None))
                .await;

            if !failures.is_empty() {
                let failed_tasks: Vec<String> =
                    failures.iter().map(|(id, _, _)| id.clone()).collect();
                let mut failures = failures.into_iter();
                let Some((task_id, err, incident)) = failures.next() else {
                    continue;
                };
                let mut message = err.message;
                for (other_id, other_err, _) in failures {
                    message.push_str(&format!("; {other_id} also failed: {}", other_err.message));
                }
                let error = MaestroError::TaskFailed { task_id, message };
                let mut failure = self.fail(&run, error, incident).await;
                failure.failed_tasks = failed_tasks;
                return Err(failure);
            }
        }

        let duration_ms = elapsed_ms(run.clock);
        let state = run.snapshot(WorkflowStatus::Completed, None);
        info!(
            workflow_id = %run.workflow_id,
            duration_ms,
            "Workflow completed"
        );
        self.events.emit(&WorkflowEvent::WorkflowCompleted {
            workflow_id: run.workflow_id.clone(),
            duration_ms,
        });
        self.checkpoint(&state).await;
        Ok(state)
    }

    /// Run one task through the retrying executor and record its result in
    /// the shared context.
    async fn run_task(
        &self,
        round: &Round<'_>,
        task: &Task,
        settings: &AgentSettings,
    ) -> TaskResult {
        let workflow_id = round.workflow_id;
        let context = round.context;
        let started = Instant::now();
        let progress = ProgressReporter::new(
            Arc::clone(&self.events),
            workflow_id,
            task.id.clone(),
            task.agent,
        );
        progress.report(
            ProgressPhase::Starting,
            format!("{} starting: {}", task.agent.title(), task.action),
            Some(0),
        );

        let input = TaskInput {
            workflow_id: workflow_id.to_string(),
            user_request: context.user_request(),
            inputs: context.resolve_inputs(&task.inputs),
            context_summary: context.create_summary(task.agent),
            attempt: 0,
        };

        let outcome = self.executor.execute(task, settings, input, &progress).await;
        let mut incident = None;
        let result = match outcome.result {
            Ok(output) => {
                let mut entry = HistoryEntry::new(task.agent, task.action.clone(), TaskStatus::Completed);
                if let Some(summary) = output.summary {
                    entry = entry.with_summary(summary);
                }
                context.record_outputs(output.outputs, output.artifacts, entry);

                let duration_ms = elapsed_ms(started);
                progress.report(ProgressPhase::Completing, "done", Some(100));
                info!(
                    task_id = %task.id,
                    role = %task.agent,
                    attempts = outcome.attempts,
                    duration_ms,
                    "Task completed"
                );
                self.events.emit(&WorkflowEvent::TaskCompleted {
                    workflow_id: workflow_id.to_string(),
                    task_id: task.id.clone(),
                    agent: task.agent,
                    duration_ms,
                });
                Ok(())
            }
            Err(err) => {
                context.add_history_entry(
                    HistoryEntry::new(task.agent, task.action.clone(), TaskStatus::Failed)
                        .with_summary(err.message.clone()),
                );
                error!(
                    task_id = %task.id,
                    role = %task.agent,
                    attempts = outcome.attempts,
                    error = %err,
                    "Task failed"
                );
                self.events.emit(&WorkflowEvent::TaskFailed {
                    workflow_id: workflow_id.to_string(),
                    task_id: task.id.clone(),
                    agent: task.agent,
                    error: err.message.clone(),
                });

                let mut failed = task.clone();
                failed.status = TaskStatus::Failed;
                failed.attempts = outcome.attempts;
                failed.error = Some(err.message.clone());
                failed.completed_at = Some(Utc::now());
                incident = self.report_incident(round, &failed, &err).await;
                Err(err)
            }
        };

        TaskResult {
            task_id: task.id.clone(),
            attempts: outcome.attempts,
            result,
            incident,
        }
    }

    fn skip(&self, run: &mut Run, task: &Task) -> MaestroResult<()> {
        run.graph.update_status(&task.id, TaskStatus::Skipped)?;
        let reason = format!("agent '{}' is disabled", task.agent);
        info!(task_id = %task.id, role = %task.agent, "Skipping task, agent disabled");
        run.context.add_history_entry(
            HistoryEntry::new(task.agent, task.action.clone(), TaskStatus::Skipped)
                .with_summary(reason.clone()),
        );
        self.events.emit(&WorkflowEvent::TaskSkipped {
            workflow_id: run.workflow_id.clone(),
            task_id: task.id.clone(),
            agent: task.agent,
            reason,
        });
        Ok(())
    }

    /// Diagnose a failed task as soon as its final attempt has failed.
    async fn report_incident(
        &self,
        round: &Round<'_>,
        task: &Task,
        err: &AgentError,
    ) -> Option<Box<IncidentReport>> {
        if !self.config.diagnostics.enabled {
            return None;
        }
        let report = self.synthesizer.synthesize(&FailureContext {
            workflow_id: round.workflow_id,
            procedure: round.procedure,
            task,
            error: err,
            total_tasks: round.graph.len(),
            blocked_tasks: round.graph.downstream_count(&task.id),
            on_critical_path: round.critical_path.iter().any(|id| *id == task.id),
            completed_tasks: round
                .graph
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
        });

        warn!(
            workflow_id = %round.workflow_id,
            task_id = %task.id,
            incident = %report.id,
            severity = %report.severity,
            category = %report.category,
            "Incident report created"
        );
        let report = Box::new(report);
        self.events.emit(&WorkflowEvent::IncidentCreated {
            workflow_id: round.workflow_id.to_string(),
            report: report.clone(),
        });
        if let Some(sink) = &self.report_sink {
            if let Err(e) = sink.submit(&report).await {
                warn!(incident = %report.id, error = %e, "Failed to store incident report");
            }
        }
        Some(report)
    }

    async fn fail(
        &self,
        run: &Run,
        error: MaestroError,
        incident: Option<Box<IncidentReport>>,
    ) -> WorkflowFailure {
        let state = run.snapshot(WorkflowStatus::Failed, Some(error.to_string()));
        error!(
            workflow_id = %run.workflow_id,
            error = %error,
            duration_ms = elapsed_ms(run.clock),
            "Workflow failed"
        );
        self.events.emit(&WorkflowEvent::WorkflowFailed {
            workflow_id: run.workflow_id.clone(),
            error: error.to_string(),
        });
        self.checkpoint(&state).await;
        WorkflowFailure {
            workflow_id: run.workflow_id.clone(),
            error,
            state: Box::new(state),
            incident,
            failed_tasks: Vec::new(),
        }
    }

    async fn checkpoint(&self, state: &WorkflowState) {
        if let Some(store) = &self.state_store {
            if let Err(e) = store.save(state).await {
                warn!(workflow_id = %state.id, error = %e, "Failed to checkpoint workflow state");
            }
        }
    }
}
