use crate::events::{EventBus, WorkflowEvent};
use crate::types::AgentRole;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters for one agent role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retries: u64,
    /// Sum of completed task durations.
    pub duration_ms: u64,
}

impl AgentMetrics {
    fn add(&mut self, other: &AgentMetrics) {
        self.started += other.started;
        self.completed += other.completed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.retries += other.retries;
        self.duration_ms += other.duration_ms;
    }
}

/// Tracks per-role task counters by listening to workflow events.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    agents: Arc<RwLock<BTreeMap<AgentRole, AgentMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `bus`. The collector keeps counting for as long as the
    /// bus lives.
    pub fn attach(&self, bus: &EventBus) {
        let collector = self.clone();
        bus.subscribe(move |event| collector.record(event));
    }

    /// Update counters from one event. Events without a role are ignored.
    pub fn record(&self, event: &WorkflowEvent) {
        let mut agents = self.agents.write();
        match event {
            WorkflowEvent::TaskStarted { agent, .. } => {
                agents.entry(*agent).or_default().started += 1;
            }
            WorkflowEvent::TaskCompleted {
                agent, duration_ms, ..
            } => {
                let m = agents.entry(*agent).or_default();
                m.completed += 1;
                m.duration_ms += duration_ms;
            }
            WorkflowEvent::TaskFailed { agent, .. } => {
                agents.entry(*agent).or_default().failed += 1;
            }
            WorkflowEvent::TaskSkipped { agent, .. } => {
                agents.entry(*agent).or_default().skipped += 1;
            }
            WorkflowEvent::TaskRetrying { agent, .. } => {
                agents.entry(*agent).or_default().retries += 1;
            }
            _ => {}
        }
    }

    pub fn get(&self, role: AgentRole) -> AgentMetrics {
        self.agents.read().get(&role).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<AgentRole, AgentMetrics> {
        self.agents.read().clone()
    }

    /// Totals across all roles.
    pub fn aggregate(&self) -> AgentMetrics {
        let mut total = AgentMetrics::default();
        for metrics in self.agents.read().values() {
            total.add(metrics);
        }
        total
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "agents": self.snapshot(),
            "aggregate": self.aggregate(),
        })
    }
}
