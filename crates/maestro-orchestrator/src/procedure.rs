use crate::types::{AgentRole, Priority};
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One step of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position. Steps sharing an order may overlap if declared parallel.
    pub order: u32,
    pub agent: AgentRole,
    pub action: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Roles this step may run alongside. Removes the dependency edge from
    /// any earlier step with one of these roles.
    #[serde(default)]
    pub parallel_with: Vec<AgentRole>,
    /// Overrides the agent's configured priority.
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl Step {
    pub fn new(order: u32, agent: AgentRole, action: impl Into<String>) -> Self {
        Self {
            order,
            agent,
            action: action.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parallel_with: Vec::new(),
            priority: None,
        }
    }

    pub fn reads(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn writes(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn parallel_with(mut self, roles: &[AgentRole]) -> Self {
        self.parallel_with = roles.to_vec();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn is_parallel_with(&self, role: AgentRole) -> bool {
        self.parallel_with.contains(&role)
    }
}

/// A named, versioned list of steps: the template for one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Roles the procedure needs. Empty means "whatever the steps use".
    #[serde(default)]
    pub required_agents: Vec<AgentRole>,
    pub steps: Vec<Step>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Procedure {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            required_agents: Vec::new(),
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_required_agents(mut self, roles: Vec<AgentRole>) -> Self {
        self.required_agents = roles;
        self
    }

    /// Parse a procedure from TOML and validate it.
    pub fn from_toml_str(input: &str) -> MaestroResult<Self> {
        let procedure: Procedure = toml::from_str(input)
            .map_err(|e| MaestroError::Config(format!("invalid procedure file: {e}")))?;
        procedure.validate()?;
        Ok(procedure)
    }

    /// Load and validate a procedure file.
    pub fn load(path: impl AsRef<Path>) -> MaestroResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            MaestroError::Config(msg) => {
                MaestroError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Roles actually used by the steps, in first-use order.
    pub fn agents(&self) -> Vec<AgentRole> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .map(|s| s.agent)
            .filter(|role| seen.insert(*role))
            .collect()
    }

    /// Steps grouped by order, ascending.
    pub fn stages(&self) -> BTreeMap<u32, Vec<&Step>> {
        let mut stages: BTreeMap<u32, Vec<&Step>> = BTreeMap::new();
        for step in &self.steps {
            stages.entry(step.order).or_default().push(step);
        }
        stages
    }

    /// Check structural rules before any task is built.
    ///
    /// Two steps sharing an order must be declared parallel by at least one
    /// side; otherwise no order between them can be inferred.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.name.trim().is_empty() {
            return Err(MaestroError::Validation(
                "procedure name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(MaestroError::Validation(format!(
                "procedure '{}' has no steps",
                self.name
            )));
        }

        let mut keys = HashSet::new();
        for step in &self.steps {
            if step.order == 0 {
                return Err(MaestroError::Validation(format!(
                    "step '{}' ({}) has order 0; orders start at 1",
                    step.action, step.agent
                )));
            }
            if !keys.insert((step.order, step.agent)) {
                return Err(MaestroError::Validation(format!(
                    "agent '{}' appears twice at order {}",
                    step.agent, step.order
                )));
            }
            if step.is_parallel_with(step.agent) {
                return Err(MaestroError::Validation(format!(
                    "step at order {} lists its own role '{}' in parallel_with",
                    step.order, step.agent
                )));
            }
            if !self.required_agents.is_empty() && !self.required_agents.contains(&step.agent) {
                return Err(MaestroError::Validation(format!(
                    "step at order {} uses agent '{}' which is not in required_agents",
                    step.order, step.agent
                )));
            }
        }

        for (order, steps) in self.stages() {
            for (i, a) in steps.iter().enumerate() {
                for b in steps.iter().skip(i + 1) {
                    if !a.is_parallel_with(b.agent) && !b.is_parallel_with(a.agent) {
                        return Err(MaestroError::Validation(format!(
                            "steps '{}' and '{}' share order {order} but neither is declared \
                             parallel with the other",
                            a.agent, b.agent
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
