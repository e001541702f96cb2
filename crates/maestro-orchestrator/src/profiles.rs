use crate::config::AgentSettings;
use crate::types::{AgentRole, Priority};

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default settings for every role, in [`AgentRole::ALL`] order.
pub fn default_profiles() -> Vec<AgentSettings> {
    AgentRole::ALL.iter().map(|r| default_settings(*r)).collect()
}

/// Default settings for one role.
///
/// Exhaustive over [`AgentRole`], so a new role does not compile until it
/// gets a profile here.
pub fn default_settings(role: AgentRole) -> AgentSettings {
    let (temperature, timeout_secs, priority, system_prompt) = match role {
        AgentRole::Pm => (0.4, 300, Priority::High, PM_PROMPT),
        AgentRole::Ta => (0.3, 300, Priority::High, TA_PROMPT),
        AgentRole::Design => (0.6, 300, Priority::Medium, DESIGN_PROMPT),
        AgentRole::Fe => (0.2, 600, Priority::Medium, FE_PROMPT),
        AgentRole::Be => (0.2, 600, Priority::Medium, BE_PROMPT),
        AgentRole::Qa => (0.2, 600, Priority::High, QA_PROMPT),
        AgentRole::Devops => (0.2, 300, Priority::Low, DEVOPS_PROMPT),
    };

    AgentSettings {
        role,
        enabled: true,
        model: DEFAULT_MODEL.to_string(),
        temperature,
        max_tokens: 8192,
        max_retries: 3,
        timeout_secs,
        priority,
        system_prompt: system_prompt.to_string(),
    }
}

const PM_PROMPT: &str = "\
You are the Product Manager agent. Turn the user's request into clear, \
testable requirements with acceptance criteria and explicit scope limits.";

const TA_PROMPT: &str = "\
You are the Technical Architect agent. Design the technical approach: \
components, interfaces, data model changes and risks. Follow the existing \
project conventions.";

const DESIGN_PROMPT: &str = "\
You are the UI/UX Designer agent. Describe screens, interaction flows and \
component states for the requirements you are given.";

const FE_PROMPT: &str = "\
You are the Frontend Engineer agent. Implement the user interface from the \
requirements, architecture and designs. Output code with file paths.";

const BE_PROMPT: &str = "\
You are the Backend Engineer agent. Implement server-side changes from the \
requirements and architecture. Output code with file paths.";

const QA_PROMPT: &str = "\
You are the QA Engineer agent. Write tests covering happy paths, edge cases \
and error conditions, run them, and report results.";

const DEVOPS_PROMPT: &str = "\
You are the DevOps Engineer agent. Prepare build, configuration and \
deployment changes needed to ship the work.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles_count() {
        assert_eq!(default_profiles().len(), AgentRole::ALL.len());
    }

    #[test]
    fn test_profiles_match_roles() {
        for (profile, role) in default_profiles().iter().zip(AgentRole::ALL) {
            assert_eq!(profile.role, role);
            assert!(profile.enabled);
        }
    }

    #[test]
    fn test_engineers_low_temperature() {
        assert!(default_settings(AgentRole::Be).temperature <= 0.3);
        assert!(default_settings(AgentRole::Fe).temperature <= 0.3);
    }

    #[test]
    fn test_profiles_have_system_prompts() {
        for profile in default_profiles() {
            assert!(!profile.system_prompt.is_empty());
            assert!(profile.timeout_secs > 0);
        }
    }
}
