use crate::diagnostics::IncidentReport;
use crate::types::AgentRole;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Phase of a running task, as reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Starting,
    Thinking,
    Executing,
    Completing,
}

/// Lifecycle events emitted by the workflow driver, in order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: String,
        procedure: String,
        total_tasks: usize,
        critical_path: Vec<String>,
    },
    TaskStarted {
        workflow_id: String,
        task_id: String,
        agent: AgentRole,
        action: String,
    },
    TaskProgress {
        workflow_id: String,
        task_id: String,
        agent: AgentRole,
        phase: ProgressPhase,
        message: String,
        percent: Option<u8>,
    },
    TaskRetrying {
        workflow_id: String,
        task_id: String,
        agent: AgentRole,
        /// Attempt that just failed (1-based).
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    TaskSkipped {
        workflow_id: String,
        task_id: String,
        agent: AgentRole,
        reason: String,
    },
    TaskCompleted {
        workflow_id: String,
        task_id: String,
        agent: AgentRole,
        duration_ms: u64,
    },
    TaskFailed {
        workflow_id: String,
        task_id: String,
        agent: AgentRole,
        error: String,
    },
    IncidentCreated {
        workflow_id: String,
        report: Box<IncidentReport>,
    },
    WorkflowCompleted {
        workflow_id: String,
        duration_ms: u64,
    },
    WorkflowFailed {
        workflow_id: String,
        error: String,
    },
}

impl WorkflowEvent {
    /// Stable event name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::TaskStarted { .. } => "task_started",
            WorkflowEvent::TaskProgress { .. } => "task_progress",
            WorkflowEvent::TaskRetrying { .. } => "task_retrying",
            WorkflowEvent::TaskSkipped { .. } => "task_skipped",
            WorkflowEvent::TaskCompleted { .. } => "task_completed",
            WorkflowEvent::TaskFailed { .. } => "task_failed",
            WorkflowEvent::IncidentCreated { .. } => "incident_created",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::TaskStarted { task_id, .. }
            | WorkflowEvent::TaskProgress { task_id, .. }
            | WorkflowEvent::TaskRetrying { task_id, .. }
            | WorkflowEvent::TaskSkipped { task_id, .. }
            | WorkflowEvent::TaskCompleted { task_id, .. }
            | WorkflowEvent::TaskFailed { task_id, .. } => Some(task_id.as_str()),
            WorkflowEvent::IncidentCreated { report, .. } => Some(report.task.id.as_str()),
            _ => None,
        }
    }
}

/// A synchronous event callback.
pub type EventListener = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Fan-out of workflow events to registered listeners.
///
/// Listeners run synchronously in registration order. A listener that panics
/// is logged and skipped; the remaining listeners and the run continue.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&WorkflowEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn emit(&self, event: &WorkflowEvent) {
        // Snapshot so a listener may subscribe without deadlocking.
        let listeners: Vec<EventListener> = self.listeners.read().clone();
        for (index, listener) in listeners.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = index, event = event.name(), "Event listener panicked");
            }
        }
    }
}

/// Handle given to executors for reporting progress on one task.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: Arc<EventBus>,
    workflow_id: String,
    task_id: String,
    agent: AgentRole,
}

impl ProgressReporter {
    pub fn new(
        bus: Arc<EventBus>,
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        agent: AgentRole,
    ) -> Self {
        Self {
            bus,
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            agent,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Emit a progress event. Percentages above 100 are clamped.
    pub fn report(&self, phase: ProgressPhase, message: impl Into<String>, percent: Option<u8>) {
        self.bus.emit(&WorkflowEvent::TaskProgress {
            workflow_id: self.workflow_id.clone(),
            task_id: self.task_id.clone(),
            agent: self.agent,
            phase,
            message: message.into(),
            percent: percent.map(|p| p.min(100)),
        });
    }

    pub fn thinking(&self, message: impl Into<String>) {
        self.report(ProgressPhase::Thinking, message, None);
    }

    pub fn executing(&self, message: impl Into<String>, percent: Option<u8>) {
        self.report(ProgressPhase::Executing, message, percent);
    }

    pub(crate) fn retrying(&self, attempt: u32, delay: Duration, error: &str) {
        self.bus.emit(&WorkflowEvent::TaskRetrying {
            workflow_id: self.workflow_id.clone(),
            task_id: self.task_id.clone(),
            agent: self.agent,
            attempt,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn completed(task_id: &str) -> WorkflowEvent {
        WorkflowEvent::TaskCompleted {
            workflow_id: "wf".into(),
            task_id: task_id.into(),
            agent: AgentRole::Be,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_listeners_called_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            bus.subscribe(move |e| log.lock().push(format!("{i}:{}", e.name())));
        }
        bus.emit(&completed("t1"));
        assert_eq!(
            *log.lock(),
            vec!["0:task_completed", "1:task_completed", "2:task_completed"]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0));
        bus.subscribe(|_| panic!("listener bug"));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |_| *seen.lock() += 1);
        }
        bus.emit(&completed("t1"));
        bus.emit(&completed("t2"));
        assert_eq!(*seen.lock(), 2);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn test_progress_reporter_clamps_percent() {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            bus.subscribe(move |e| events.lock().push(e.clone()));
        }
        let progress = ProgressReporter::new(Arc::clone(&bus), "wf", "wf:1:pm", AgentRole::Pm);
        progress.executing("halfway", Some(250));
        progress.thinking("pondering");

        let events = events.lock();
        assert_eq!(events.len(), 2);
        match &events[0] {
            WorkflowEvent::TaskProgress { phase, percent, .. } => {
                assert_eq!(*phase, ProgressPhase::Executing);
                assert_eq!(*percent, Some(100));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1].task_id(), Some("wf:1:pm"));
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_value(completed("t9")).unwrap();
        assert_eq!(json["type"], "task_completed");
        assert_eq!(json["agent"], "be");
    }
}
