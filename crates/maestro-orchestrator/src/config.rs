use crate::context::ContextLimits;
use crate::diagnostics::DiagnosticsConfig;
use crate::profiles::default_settings;
use crate::retry::RetryPolicy;
use crate::types::{AgentRole, Priority};
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved settings for one agent role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub role: AgentRole,
    pub enabled: bool,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Retries after the first attempt, for recoverable errors only.
    pub max_retries: u32,
    /// Per-attempt limit handed to the executor and enforced around it.
    pub timeout_secs: u64,
    pub priority: Priority,
    pub system_prompt: String,
}

impl AgentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Per-role overrides as written in the config file. Unset fields fall back
/// to the role's profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl AgentOverrides {
    fn apply(&self, mut base: AgentSettings) -> AgentSettings {
        if let Some(enabled) = self.enabled {
            base.enabled = enabled;
        }
        if let Some(model) = &self.model {
            base.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            base.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            base.max_tokens = max_tokens;
        }
        if let Some(max_retries) = self.max_retries {
            base.max_retries = max_retries;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            base.timeout_secs = timeout_secs;
        }
        if let Some(priority) = self.priority {
            base.priority = priority;
        }
        if let Some(prompt) = &self.system_prompt {
            base.system_prompt = prompt.clone();
        }
        base
    }
}

/// Engine configuration, usually loaded from `maestro.toml`.
///
/// ```toml
/// project_path = "."
///
/// [agents.design]
/// enabled = false
///
/// [agents.be]
/// max_retries = 5
/// timeout_secs = 900
///
/// [retry]
/// base_delay_ms = 1000
/// max_delay_ms = 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_project_path")]
    pub project_path: PathBuf,
    #[serde(default)]
    pub agents: BTreeMap<AgentRole, AgentOverrides>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub context: ContextLimits,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

fn default_project_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_path: default_project_path(),
            agents: BTreeMap::new(),
            retry: RetryPolicy::default(),
            context: ContextLimits::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML config.
    pub fn from_toml_str(input: &str) -> MaestroResult<Self> {
        let config: OrchestratorConfig = toml::from_str(input)
            .map_err(|e| MaestroError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> MaestroResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Resolved settings for a role: profile defaults plus overrides.
    pub fn agent(&self, role: AgentRole) -> AgentSettings {
        let base = default_settings(role);
        match self.agents.get(&role) {
            Some(overrides) => overrides.apply(base),
            None => base,
        }
    }

    pub fn is_enabled(&self, role: AgentRole) -> bool {
        self.agent(role).enabled
    }

    /// Builder helper: disable a role.
    pub fn with_disabled(mut self, role: AgentRole) -> Self {
        self.agents.entry(role).or_default().enabled = Some(false);
        self
    }

    /// Builder helper: replace one role's overrides.
    pub fn with_agent(mut self, role: AgentRole, overrides: AgentOverrides) -> Self {
        self.agents.insert(role, overrides);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_context_limits(mut self, limits: ContextLimits) -> Self {
        self.context = limits;
        self
    }

    pub fn validate(&self) -> MaestroResult<()> {
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(MaestroError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.context.max_value_bytes > self.context.max_total_bytes {
            return Err(MaestroError::Config(format!(
                "context.max_value_bytes ({}) exceeds context.max_total_bytes ({})",
                self.context.max_value_bytes, self.context.max_total_bytes
            )));
        }
        for role in AgentRole::ALL {
            let settings = self.agent(role);
            if settings.timeout_secs == 0 {
                return Err(MaestroError::Config(format!(
                    "agents.{role}.timeout_secs must be greater than zero"
                )));
            }
            if !(0.0..=2.0).contains(&settings.temperature) {
                return Err(MaestroError::Config(format!(
                    "agents.{role}.temperature must be within 0.0..=2.0"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_to_profiles() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        for role in AgentRole::ALL {
            assert_eq!(config.agent(role), default_settings(role));
        }
    }

    #[test]
    fn test_overrides_apply() {
        let raw = r#"
            [agents.design]
            enabled = false

            [agents.be]
            max_retries = 5
            timeout_secs = 900
            priority = "critical"
        "#;
        let config = OrchestratorConfig::from_toml_str(raw).unwrap();
        assert!(!config.is_enabled(AgentRole::Design));
        assert!(config.is_enabled(AgentRole::Fe));

        let be = config.agent(AgentRole::Be);
        assert_eq!(be.max_retries, 5);
        assert_eq!(be.timeout(), Duration::from_secs(900));
        assert_eq!(be.priority, Priority::Critical);
        assert_eq!(be.model, default_settings(AgentRole::Be).model);
    }

    #[test]
    fn test_retry_and_context_sections() {
        let raw = r#"
            project_path = "/srv/app"

            [retry]
            base_delay_ms = 200
            max_delay_ms = 800

            [context]
            max_total_bytes = 5000
            max_value_bytes = 1000
        "#;
        let config = OrchestratorConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.project_path, PathBuf::from("/srv/app"));
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.context.max_value_bytes, 1000);
        assert_eq!(config.context.history_limit, ContextLimits::default().history_limit);
    }

    #[test]
    fn test_invalid_retry_rejected() {
        let raw = r#"
            [retry]
            base_delay_ms = 5000
            max_delay_ms = 100
        "#;
        assert!(matches!(
            OrchestratorConfig::from_toml_str(raw),
            Err(MaestroError::Config(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let raw = r#"
            [agents.qa]
            timeout_secs = 0
        "#;
        assert!(OrchestratorConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let raw = r#"
            [agents.wizard]
            enabled = false
        "#;
        assert!(OrchestratorConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(tmp.path().join("absent.toml")).unwrap();
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_with_disabled_builder() {
        let config = OrchestratorConfig::default().with_disabled(AgentRole::Devops);
        assert!(!config.is_enabled(AgentRole::Devops));
        assert!(config.is_enabled(AgentRole::Pm));
    }
}
