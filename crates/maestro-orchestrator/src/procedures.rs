use crate::procedure::{Procedure, Step};
use crate::types::{AgentRole, Priority};

/// Built-in procedures shipped with the engine.
pub fn builtin() -> Vec<Procedure> {
    vec![feature(), bugfix(), refactor()]
}

/// Look up a built-in procedure by name.
pub fn by_name(name: &str) -> Option<Procedure> {
    builtin().into_iter().find(|p| p.name == name)
}

/// New feature: requirements, design and architecture in parallel, then
/// frontend and backend in parallel, then QA and release.
pub fn feature() -> Procedure {
    use AgentRole::*;
    Procedure::new(
        "feature",
        vec![
            Step::new(1, Pm, "Analyze the request and write requirements")
                .reads(&["request"])
                .writes(&["requirements"])
                .with_priority(Priority::High),
            Step::new(2, Ta, "Design the technical architecture")
                .reads(&["requirements"])
                .writes(&["architecture"])
                .parallel_with(&[Design]),
            Step::new(2, Design, "Produce UI/UX designs")
                .reads(&["requirements"])
                .writes(&["designs"])
                .parallel_with(&[Ta]),
            Step::new(3, Be, "Implement backend changes")
                .reads(&["requirements", "architecture"])
                .writes(&["backend_code"])
                .parallel_with(&[Fe, Design]),
            Step::new(3, Fe, "Implement frontend changes")
                .reads(&["requirements", "architecture", "designs"])
                .writes(&["frontend_code"])
                .parallel_with(&[Be]),
            Step::new(4, Qa, "Write and run tests")
                .reads(&["requirements", "backend_code", "frontend_code"])
                .writes(&["test_report"])
                .with_priority(Priority::High),
            Step::new(5, Devops, "Prepare deployment")
                .reads(&["backend_code", "frontend_code", "test_report"])
                .writes(&["deployment_plan"]),
        ],
    )
    .with_description("Implement a new feature end to end")
    .with_required_agents(vec![Pm, Ta, Design, Be, Fe, Qa, Devops])
}

/// Bug fix: reproduce, diagnose, fix, verify.
pub fn bugfix() -> Procedure {
    use AgentRole::*;
    Procedure::new(
        "bugfix",
        vec![
            Step::new(1, Qa, "Reproduce the bug")
                .reads(&["request"])
                .writes(&["reproduction"])
                .with_priority(Priority::High),
            Step::new(2, Ta, "Identify the root cause")
                .reads(&["reproduction"])
                .writes(&["root_cause"])
                .with_priority(Priority::High),
            Step::new(3, Be, "Implement the fix")
                .reads(&["root_cause"])
                .writes(&["fix"])
                .with_priority(Priority::Critical),
            Step::new(4, Qa, "Verify the fix and add regression tests")
                .reads(&["reproduction", "fix"])
                .writes(&["verification"]),
        ],
    )
    .with_description("Diagnose and fix a defect")
    .with_required_agents(vec![Qa, Ta, Be])
}

/// Refactor: plan, restructure backend and frontend, verify behavior.
pub fn refactor() -> Procedure {
    use AgentRole::*;
    Procedure::new(
        "refactor",
        vec![
            Step::new(1, Ta, "Analyze the code and plan the refactor")
                .reads(&["request"])
                .writes(&["refactor_plan"]),
            Step::new(2, Be, "Refactor backend code")
                .reads(&["refactor_plan"])
                .writes(&["backend_code"])
                .parallel_with(&[Fe]),
            Step::new(2, Fe, "Refactor frontend code")
                .reads(&["refactor_plan"])
                .writes(&["frontend_code"])
                .parallel_with(&[Be]),
            Step::new(3, Qa, "Verify behavior is unchanged")
                .reads(&["refactor_plan", "backend_code", "frontend_code"])
                .writes(&["test_report"])
                .with_priority(Priority::High),
        ],
    )
    .with_description("Restructure code without changing behavior")
    .with_required_agents(vec![Ta, Be, Fe, Qa])
}
