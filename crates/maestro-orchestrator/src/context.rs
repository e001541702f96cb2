use crate::types::{AgentRole, Artifact, HistoryEntry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Size bounds for the shared context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    /// Total serialized size that triggers summarization.
    pub max_total_bytes: usize,
    /// Individual data/output values above this size get summarized.
    pub max_value_bytes: usize,
    /// Characters kept in a summarized value's preview.
    pub preview_chars: usize,
    /// History entries kept after summarization.
    pub history_limit: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: 100_000,
            max_value_bytes: 10_000,
            preview_chars: 500,
            history_limit: 20,
        }
    }
}

/// Replacement for a value that grew past [`ContextLimits::max_value_bytes`].
/// The original payload is gone for the rest of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizedValue {
    pub summarized: bool,
    pub original_length: usize,
    pub preview: String,
}

impl SummarizedValue {
    fn of(value: &Value, preview_chars: usize) -> Self {
        let text = value_text(value);
        Self {
            summarized: true,
            original_length: text.chars().count(),
            preview: text.chars().take(preview_chars).collect(),
        }
    }

    /// Parse a stored value back into a summary, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_summarized(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

fn is_summarized(value: &Value) -> bool {
    value.get("summarized").and_then(Value::as_bool) == Some(true)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn serialized_len<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

fn abbreviate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

/// Shared state of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub procedure: String,
    pub user_request: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: impl Into<String>,
        procedure: impl Into<String>,
        user_request: impl Into<String>,
        project_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            procedure: procedure.into(),
            user_request: user_request.into(),
            project_path: project_path.into(),
            data: BTreeMap::new(),
            outputs: BTreeMap::new(),
            artifacts: Vec::new(),
            history: Vec::new(),
        }
    }
}

/// Size-bounded, lock-protected store around an [`ExecutionContext`].
///
/// All mutations go through a single write lock, so the size check after each
/// write always sees a consistent snapshot even when tasks of the same round
/// finish concurrently.
pub struct ContextStore {
    inner: RwLock<ExecutionContext>,
    limits: ContextLimits,
}

impl ContextStore {
    pub fn new(context: ExecutionContext, limits: ContextLimits) -> Self {
        Self {
            inner: RwLock::new(context),
            limits,
        }
    }

    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    pub fn workflow_id(&self) -> String {
        self.inner.read().workflow_id.clone()
    }

    pub fn user_request(&self) -> String {
        self.inner.read().user_request.clone()
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.mutate(|ctx| {
            ctx.data.insert(key.into(), value);
        });
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.inner.read().data.get(key).cloned()
    }

    pub fn set_output(&self, key: impl Into<String>, value: Value) {
        self.mutate(|ctx| {
            ctx.outputs.insert(key.into(), value);
        });
    }

    pub fn get_output(&self, key: &str) -> Option<Value> {
        self.inner.read().outputs.get(key).cloned()
    }

    pub fn add_artifact(&self, artifact: Artifact) {
        self.mutate(|ctx| ctx.artifacts.push(artifact));
    }

    pub fn add_history_entry(&self, entry: HistoryEntry) {
        self.mutate(|ctx| ctx.history.push(entry));
    }

    /// Record a finished task's outputs and artifacts in one locked update.
    pub fn record_outputs(
        &self,
        outputs: BTreeMap<String, Value>,
        artifacts: Vec<Artifact>,
        entry: HistoryEntry,
    ) {
        self.mutate(|ctx| {
            ctx.outputs.extend(outputs);
            ctx.artifacts.extend(artifacts);
            ctx.history.push(entry);
        });
    }

    /// Resolve named inputs: outputs first, then data.
    pub fn resolve_inputs(&self, names: &[String]) -> BTreeMap<String, Value> {
        let ctx = self.inner.read();
        names
            .iter()
            .filter_map(|name| {
                ctx.outputs
                    .get(name)
                    .or_else(|| ctx.data.get(name))
                    .map(|v| (name.clone(), v.clone()))
            })
            .collect()
    }

    pub fn snapshot(&self) -> ExecutionContext {
        self.inner.read().clone()
    }

    /// Current serialized size in bytes.
    pub fn size(&self) -> usize {
        serialized_len(&*self.inner.read())
    }

    fn mutate(&self, f: impl FnOnce(&mut ExecutionContext)) {
        let mut ctx = self.inner.write();
        f(&mut ctx);
        summarize_if_needed(&mut ctx, &self.limits);
    }

    /// Human-readable digest handed to the next agent as its context.
    pub fn create_summary(&self, for_role: AgentRole) -> String {
        let ctx = self.inner.read();
        let mut out = String::new();

        out.push_str(&format!("# Context for {}\n\n", for_role.title()));
        out.push_str(&format!("Procedure: {}\n", ctx.procedure));
        out.push_str(&format!("Request: {}\n", ctx.user_request));

        out.push_str("\n## Outputs\n");
        if ctx.outputs.is_empty() {
            out.push_str("(none yet)\n");
        }
        for (key, value) in &ctx.outputs {
            out.push_str(&format!("- {key}: {}\n", abbreviate(&value_text(value), 100)));
        }

        out.push_str("\n## Recent history\n");
        let skip = ctx.history.len().saturating_sub(5);
        for entry in ctx.history.iter().skip(skip) {
            out.push_str(&format!(
                "- [{}] {} {} -> {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.agent,
                entry.action,
                entry.status
            ));
            if let Some(summary) = &entry.summary {
                out.push_str(&format!(": {}", abbreviate(summary, 100)));
            }
            out.push('\n');
        }

        out.push_str("\n## Artifacts\n");
        if ctx.artifacts.is_empty() {
            out.push_str("(none)\n");
        }
        for artifact in &ctx.artifacts {
            match &artifact.path {
                Some(path) => {
                    out.push_str(&format!("- [{}] {} ({path})\n", artifact.kind, artifact.name))
                }
                None => out.push_str(&format!("- [{}] {}\n", artifact.kind, artifact.name)),
            }
        }
        out
    }
}

/// Summarize oversize values and trim history when the whole context is over
/// budget. Artifacts are never touched. Returns whether anything changed.
fn summarize_if_needed(ctx: &mut ExecutionContext, limits: &ContextLimits) -> bool {
    let before = serialized_len(ctx);
    if before <= limits.max_total_bytes {
        return false;
    }

    let mut changed = false;
    for value in ctx.data.values_mut().chain(ctx.outputs.values_mut()) {
        if !is_summarized(value) && serialized_len(value) > limits.max_value_bytes {
            let summary = SummarizedValue::of(value, limits.preview_chars);
            *value = serde_json::to_value(summary).unwrap_or(Value::Null);
            changed = true;
        }
    }

    if ctx.history.len() > limits.history_limit {
        let excess = ctx.history.len() - limits.history_limit;
        ctx.history.drain(..excess);
        changed = true;
    }

    let after = serialized_len(ctx);
    if after > limits.max_total_bytes {
        warn!(
            workflow_id = %ctx.workflow_id,
            before,
            after,
            limit = limits.max_total_bytes,
            "Context still over budget after summarization"
        );
    } else {
        debug!(workflow_id = %ctx.workflow_id, before, after, "Context summarized");
    }
    changed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{ArtifactKind, TaskStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> ContextStore {
        store_with(ContextLimits::default())
    }

    fn store_with(limits: ContextLimits) -> ContextStore {
        ContextStore::new(
            ExecutionContext::new("wf-1", "feature", "Add login page", "/tmp/project"),
            limits,
        )
    }

    #[test]
    fn test_data_and_outputs_accessors() {
        let store = store();
        store.set_data("branch", json!("feature/login"));
        store.set_output("requirements", json!({"stories": 3}));
        assert_eq!(store.get_data("branch"), Some(json!("feature/login")));
        assert_eq!(store.get_output("requirements"), Some(json!({"stories": 3})));
        assert!(store.get_output("missing").is_none());
        assert_eq!(store.workflow_id(), "wf-1");
        assert_eq!(store.user_request(), "Add login page");
    }

    #[test]
    fn test_small_values_not_summarized() {
        let store = store();
        store.set_output("small", json!("x".repeat(20_000)));
        // Over the per-value bound but the context as a whole is within budget.
        assert_eq!(store.get_output("small"), Some(json!("x".repeat(20_000))));
    }

    #[test]
    fn test_oversize_output_is_summarized() {
        let store = store();
        let big = "a".repeat(150_000);
        store.set_output("code", json!(big));

        let value = store.get_output("code").unwrap();
        assert_eq!(value["summarized"], json!(true));
        assert_eq!(value["originalLength"], json!(150_000));
        assert_eq!(value["preview"].as_str().unwrap().len(), 500);

        let summary = SummarizedValue::from_value(&value).unwrap();
        assert_eq!(summary.original_length, 150_000);
        assert!(store.size() <= store.limits().max_total_bytes);
    }

    #[test]
    fn test_summarization_is_per_value() {
        let store = store_with(ContextLimits {
            max_total_bytes: 2_000,
            max_value_bytes: 500,
            preview_chars: 50,
            history_limit: 20,
        });
        store.set_output("keep", json!("short"));
        store.set_data("note", json!("also short"));
        store.set_output("huge", json!("z".repeat(3_000)));

        assert_eq!(store.get_output("keep"), Some(json!("short")));
        assert_eq!(store.get_data("note"), Some(json!("also short")));
        assert!(SummarizedValue::from_value(&store.get_output("huge").unwrap()).is_some());
    }

    #[test]
    fn test_history_truncated_under_pressure() {
        let store = store_with(ContextLimits {
            max_total_bytes: 1_000,
            max_value_bytes: 500,
            preview_chars: 100,
            history_limit: 20,
        });
        for i in 0..60 {
            store.add_history_entry(
                HistoryEntry::new(AgentRole::Be, format!("step {i}"), TaskStatus::Completed)
                    .with_summary("did a thing"),
            );
        }
        let ctx = store.snapshot();
        assert_eq!(ctx.history.len(), 20);
        assert_eq!(ctx.history.last().unwrap().action, "step 59");
    }

    #[test]
    fn test_artifacts_never_dropped() {
        let store = store_with(ContextLimits {
            max_total_bytes: 1_000,
            max_value_bytes: 200,
            preview_chars: 20,
            history_limit: 2,
        });
        for i in 0..10 {
            store.add_artifact(
                Artifact::new(ArtifactKind::Code, format!("file{i}"))
                    .with_content("y".repeat(300)),
            );
        }
        assert_eq!(store.snapshot().artifacts.len(), 10);
    }

    #[test]
    fn test_resolve_inputs_prefers_outputs() {
        let store = store();
        store.set_data("request", json!("from data"));
        store.set_data("spec", json!("stale"));
        store.set_output("spec", json!("fresh"));

        let inputs = store.resolve_inputs(&[
            "request".to_string(),
            "spec".to_string(),
            "absent".to_string(),
        ]);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs["spec"], json!("fresh"));
        assert_eq!(inputs["request"], json!("from data"));
    }

    #[test]
    fn test_create_summary_contents() {
        let store = store();
        store.set_output("requirements", json!("r".repeat(300)));
        store.add_artifact(Artifact::new(ArtifactKind::Document, "PRD").with_path("docs/prd.md"));
        for i in 0..8 {
            store.add_history_entry(HistoryEntry::new(
                AgentRole::Pm,
                format!("action {i}"),
                TaskStatus::Completed,
            ));
        }

        let summary = store.create_summary(AgentRole::Ta);
        assert!(summary.contains("Technical Architect"));
        assert!(summary.contains("Procedure: feature"));
        assert!(summary.contains("Request: Add login page"));
        assert!(summary.contains(&format!("requirements: {}...", "r".repeat(100))));
        assert!(!summary.contains(&"r".repeat(101)));
        assert!(summary.contains("[document] PRD (docs/prd.md)"));
        assert!(summary.contains("action 7"));
        assert!(summary.contains("action 3"));
        assert!(!summary.contains("action 2"));
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(store_with(ContextLimits {
            max_total_bytes: 50_000,
            max_value_bytes: 1_000,
            preview_chars: 10,
            history_limit: 20,
        }));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..20 {
                        store.set_output(format!("k{i}-{j}"), json!("v".repeat(2_000)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let ctx = store.snapshot();
        assert_eq!(ctx.outputs.len(), 160);
        assert!(store.size() <= 50_000);
    }

    #[test]
    fn test_context_serialization_round_trip() {
        let store = store();
        store.set_output("spec", json!({"a": [1, 2, 3]}));
        store.add_artifact(Artifact::new(ArtifactKind::Test, "login tests"));
        store.add_history_entry(HistoryEntry::new(AgentRole::Qa, "test", TaskStatus::Failed));
        let ctx = store.snapshot();
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
