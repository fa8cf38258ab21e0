//! Dependency graph helpers over a research plan.

use std::collections::{HashMap, HashSet, VecDeque};

use shared_types::ResearchPlan;

use crate::actors::conductor::protocol::ConductorError;

/// Reject plans with duplicate ids, unknown dependencies or dependency cycles.
pub fn validate_plan(plan: &ResearchPlan) -> Result<(), ConductorError> {
    let mut seen = HashSet::new();
    for step in &plan.steps {
        if step.id.trim().is_empty() {
            return Err(ConductorError::InvalidRequest(
                "step id cannot be empty".to_string(),
            ));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(ConductorError::InvalidRequest(format!(
                "duplicate step id: {}",
                step.id
            )));
        }
    }

    for step in &plan.steps {
        for dep in &step.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(ConductorError::InvalidRequest(format!(
                    "step {} depends on unknown step {dep}",
                    step.id
                )));
            }
        }
    }

    let cyclic = cyclic_steps(plan);
    if !cyclic.is_empty() {
        return Err(ConductorError::InvalidRequest(format!(
            "dependency cycle between steps: {}",
            cyclic.join(", ")
        )));
    }

    Ok(())
}

/// Steps that can never become executable because they sit on (or behind) a cycle.
///
/// Kahn's algorithm: whatever is left with a non-zero in-degree is cyclic or
/// blocked by a cycle. Unknown dependency ids are ignored here.
pub fn cyclic_steps(plan: &ResearchPlan) -> Vec<String> {
    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in &plan.steps {
        in_degree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                continue;
            }
            *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
            forward
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut resolved = HashSet::new();

    while let Some(id) = queue.pop_front() {
        resolved.insert(id);
        if let Some(children) = forward.get(id) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    plan.steps
        .iter()
        .filter(|step| !resolved.contains(step.id.as_str()))
        .map(|step| step.id.clone())
        .collect()
}

/// Every step that transitively depends on `step_id`, in BFS order.
pub fn transitive_dependents(plan: &ResearchPlan, step_id: &str) -> Vec<String> {
    let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &plan.steps {
        for dep in &step.dependencies {
            forward
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::from([step_id]);
    let mut queue: VecDeque<&str> = VecDeque::from([step_id]);
    let mut dependents = Vec::new();

    while let Some(current) = queue.pop_front() {
        if let Some(children) = forward.get(current) {
            for child in children {
                if visited.insert(*child) {
                    dependents.push(child.to_string());
                    queue.push_back(*child);
                }
            }
        }
    }

    dependents
}
