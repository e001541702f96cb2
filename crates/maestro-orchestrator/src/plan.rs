use crate::config::OrchestratorConfig;
use crate::context::{ContextStore, ExecutionContext};
use crate::procedure::Procedure;
use crate::task_graph::TaskGraph;
use crate::types::{task_id, Task};
use maestro_core::MaestroResult;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// A user's work request against a procedure.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub procedure: Procedure,
    pub user_request: String,
    /// Defaults to a fresh UUID.
    pub workflow_id: Option<String>,
    /// Defaults to the configured project path.
    pub project_path: Option<PathBuf>,
    /// Extra values seeded into the context's data map.
    pub data: BTreeMap<String, Value>,
}

impl WorkRequest {
    pub fn new(procedure: Procedure, user_request: impl Into<String>) -> Self {
        Self {
            procedure,
            user_request: user_request.into(),
            workflow_id: None,
            project_path: None,
            data: BTreeMap::new(),
        }
    }

    pub fn with_workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Everything one run needs: the task graph, the shared context and the
/// critical path. Built fresh per run and consumed by
/// [`crate::engine::WorkflowDriver::execute`].
pub struct WorkflowPlan {
    pub workflow_id: String,
    pub procedure: String,
    pub graph: TaskGraph,
    pub context: Arc<ContextStore>,
    pub critical_path: Vec<String>,
}

impl WorkflowPlan {
    /// Validate the procedure and build one task per step.
    ///
    /// A task at order N depends on every task at a lower order, except
    /// those whose role the step lists in `parallel_with`.
    pub fn build(request: &WorkRequest, config: &OrchestratorConfig) -> MaestroResult<Self> {
        let procedure = &request.procedure;
        procedure.validate()?;

        let workflow_id = request
            .workflow_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut tasks = Vec::with_capacity(procedure.steps.len());
        for step in &procedure.steps {
            let id = task_id(&workflow_id, step.order, step.agent);
            let dependencies: Vec<String> = procedure
                .steps
                .iter()
                .filter(|earlier| earlier.order < step.order)
                .filter(|earlier| !step.is_parallel_with(earlier.agent))
                .map(|earlier| task_id(&workflow_id, earlier.order, earlier.agent))
                .collect();
            let parallel: Vec<String> = procedure
                .steps
                .iter()
                .filter(|other| {
                    !(other.order == step.order && other.agent == step.agent)
                        && step.is_parallel_with(other.agent)
                })
                .map(|other| task_id(&workflow_id, other.order, other.agent))
                .collect();

            let settings = config.agent(step.agent);
            let task = Task::new(id, step.agent, step.action.clone())
                .with_order(step.order)
                .with_io(step.inputs.clone(), step.outputs.clone())
                .with_dependencies(dependencies)
                .with_parallel_with(parallel)
                .with_priority(step.priority.unwrap_or(settings.priority))
                .with_max_retries(settings.max_retries);
            debug!(
                task_id = %task.id,
                deps = task.dependencies.len(),
                parallel = task.parallel_with.len(),
                "Planned task"
            );
            tasks.push(task);
        }

        let mut graph = TaskGraph::new();
        graph.add_tasks(tasks)?;

        let project_path = request
            .project_path
            .clone()
            .unwrap_or_else(|| config.project_path.clone());
        let mut context = ExecutionContext::new(
            workflow_id.clone(),
            procedure.name.clone(),
            request.user_request.clone(),
            project_path,
        );
        context
            .data
            .insert("request".into(), Value::String(request.user_request.clone()));
        context.data.extend(request.data.clone());
        let store = ContextStore::new(context, config.context.clone());

        Ok(Self::from_parts(
            workflow_id,
            procedure.name.clone(),
            graph,
            Arc::new(store),
        ))
    }

    /// Assemble a plan from a prebuilt graph. The critical path is computed
    /// here.
    pub fn from_parts(
        workflow_id: impl Into<String>,
        procedure: impl Into<String>,
        graph: TaskGraph,
        context: Arc<ContextStore>,
    ) -> Self {
        let critical_path = graph.critical_path();
        Self {
            workflow_id: workflow_id.into(),
            procedure: procedure.into(),
            graph,
            context,
            critical_path,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.graph.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::procedure::Step;
    use crate::procedures;
    use crate::types::{AgentRole, Priority, TaskStatus};
    use maestro_core::MaestroError;

    fn build(procedure: Procedure) -> WorkflowPlan {
        let request = WorkRequest::new(procedure, "add login").with_workflow_id("wf");
        WorkflowPlan::build(&request, &OrchestratorConfig::default()).unwrap()
    }

    #[test]
    fn test_linear_procedure_is_total_order() {
        let plan = build(Procedure::new(
            "linear",
            vec![
                Step::new(1, AgentRole::Pm, "requirements"),
                Step::new(2, AgentRole::Ta, "architecture"),
                Step::new(3, AgentRole::Be, "implement"),
                Step::new(4, AgentRole::Qa, "test"),
            ],
        ));

        let qa = plan.graph.get("wf:4:qa").unwrap();
        assert_eq!(qa.dependencies, vec!["wf:1:pm", "wf:2:ta", "wf:3:be"]);
        assert_eq!(plan.critical_path, vec!["wf:1:pm", "wf:2:ta", "wf:3:be", "wf:4:qa"]);

        // Walk the graph: exactly one ready task at each step.
        let mut graph = plan.graph;
        for _ in 0..4 {
            let ready: Vec<String> = graph.next_executable().iter().map(|t| t.id.clone()).collect();
            assert_eq!(ready.len(), 1);
            graph.update_status(&ready[0], TaskStatus::Running).unwrap();
            graph.update_status(&ready[0], TaskStatus::Completed).unwrap();
        }
        assert!(graph.is_complete());
    }

    #[test]
    fn test_long_linear_procedure_plans_quickly() {
        let roles = [AgentRole::Pm, AgentRole::Ta, AgentRole::Be, AgentRole::Qa];
        let steps: Vec<Step> = (1..=40u32)
            .map(|order| Step::new(order, roles[order as usize % roles.len()], "step"))
            .collect();
        let plan = build(Procedure::new("long", steps));

        assert_eq!(plan.graph.get("wf:40:pm").unwrap().dependencies.len(), 39);
        assert_eq!(plan.critical_path.len(), 40);
        assert_eq!(plan.critical_path.first().unwrap(), "wf:1:ta");
        assert_eq!(plan.critical_path.last().unwrap(), "wf:40:pm");
    }

    #[test]
    fn test_parallel_with_omits_only_that_edge() {
        let plan = build(procedures::feature());

        let be = plan.graph.get("wf:3:be").unwrap();
        assert!(!be.depends_on("wf:2:design"));
        assert!(be.depends_on("wf:1:pm"));
        assert!(be.depends_on("wf:2:ta"));
        assert!(be.may_run_alongside("wf:3:fe"));

        let fe = plan.graph.get("wf:3:fe").unwrap();
        assert!(fe.depends_on("wf:2:design"));
        assert!(fe.depends_on("wf:2:ta"));
    }

    #[test]
    fn test_settings_feed_priority_and_retries() {
        let procedure = Procedure::new(
            "p",
            vec![
                Step::new(1, AgentRole::Qa, "reproduce"),
                Step::new(2, AgentRole::Be, "fix").with_priority(Priority::Critical),
            ],
        );
        let config = OrchestratorConfig::default().with_agent(
            AgentRole::Qa,
            crate::config::AgentOverrides {
                max_retries: Some(7),
                ..Default::default()
            },
        );
        let request = WorkRequest::new(procedure, "fix crash").with_workflow_id("wf");
        let plan = WorkflowPlan::build(&request, &config).unwrap();

        let qa = plan.graph.get("wf:1:qa").unwrap();
        assert_eq!(qa.max_retries, 7);
        assert_eq!(qa.priority, config.agent(AgentRole::Qa).priority);
        assert_eq!(plan.graph.get("wf:2:be").unwrap().priority, Priority::Critical);
    }

    #[test]
    fn test_context_seeded() {
        let request = WorkRequest::new(procedures::bugfix(), "fix crash")
            .with_project_path("/srv/app")
            .with_data("ticket", Value::String("BUG-12".into()));
        let plan = WorkflowPlan::build(&request, &OrchestratorConfig::default()).unwrap();

        assert!(Uuid::parse_str(&plan.workflow_id).is_ok());
        assert_eq!(
            plan.context.get_data("request"),
            Some(Value::String("fix crash".into()))
        );
        assert_eq!(
            plan.context.get_data("ticket"),
            Some(Value::String("BUG-12".into()))
        );
        assert_eq!(plan.context.snapshot().project_path, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_invalid_procedure_rejected() {
        let request = WorkRequest::new(Procedure::new("empty", Vec::new()), "x");
        assert!(matches!(
            WorkflowPlan::build(&request, &OrchestratorConfig::default()),
            Err(MaestroError::Validation(_))
        ));
    }
}
