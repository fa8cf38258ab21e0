//! Research-id keyed state store
//!
//! Read paths (status polling, aggregation) clone snapshots out of the map while
//! the owning `ResearchConductorActor` is the only writer for its research id.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::{Issue, OrchestrationPhase, ProgressMetrics, ResearchPlan, StepExecution, StepResult};
use std::sync::Arc;

use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::state::OrchestrationState;

/// Optional write-behind hook, called with a snapshot after each successful mutation.
pub trait StatePersistenceHook: Send + Sync {
    fn persist(&self, state: &OrchestrationState) -> Result<(), ConductorError>;
    fn remove(&self, research_id: &str) -> Result<(), ConductorError>;
}

pub type SharedPersistenceHook = Arc<dyn StatePersistenceHook>;

#[derive(Default)]
pub struct StateStore {
    states: DashMap<String, OrchestrationState>,
    hook: Option<SharedPersistenceHook>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("states", &self.states.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: SharedPersistenceHook) -> Self {
        Self {
            states: DashMap::new(),
            hook: Some(hook),
        }
    }

    pub fn initialize(
        &self,
        research_id: &str,
        plan: ResearchPlan,
    ) -> Result<OrchestrationState, ConductorError> {
        let state = OrchestrationState::new(research_id, plan)?;
        match self.states.entry(research_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ConductorError::DuplicateResearch(research_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(state.clone());
            }
        }
        tracing::info!(
            research_id = %research_id,
            total_steps = state.progress().total_steps,
            "Initialized orchestration state"
        );
        self.persist(&state);
        Ok(state)
    }

    // =========================================================================
    // Read-only accessors: absent ids yield None
    // =========================================================================

    pub fn get_state(&self, research_id: &str) -> Option<OrchestrationState> {
        self.states.get(research_id).map(|entry| entry.value().clone())
    }

    pub fn get_progress(&self, research_id: &str) -> Option<ProgressMetrics> {
        self.states
            .get(research_id)
            .map(|entry| entry.value().progress().clone())
    }

    pub fn contains(&self, research_id: &str) -> bool {
        self.states.contains_key(research_id)
    }

    pub fn research_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.states.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    // =========================================================================
    // Mutators: absent ids fail with NotFound
    // =========================================================================

    /// Run `f` against the state under its entry lock, persisting on success.
    pub fn update<T>(
        &self,
        research_id: &str,
        f: impl FnOnce(&mut OrchestrationState) -> Result<T, ConductorError>,
    ) -> Result<T, ConductorError> {
        let (value, snapshot) = {
            let mut entry = self
                .states
                .get_mut(research_id)
                .ok_or_else(|| ConductorError::NotFound(format!("research {research_id}")))?;
            let value = f(entry.value_mut())?;
            let snapshot = self.hook.as_ref().map(|_| entry.value().clone());
            (value, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.persist(&snapshot);
        }
        Ok(value)
    }

    pub fn update_phase(
        &self,
        research_id: &str,
        phase: OrchestrationPhase,
    ) -> Result<bool, ConductorError> {
        self.update(research_id, |state| Ok(state.update_phase(phase)))
    }

    pub fn add_active_step(
        &self,
        research_id: &str,
        execution: StepExecution,
    ) -> Result<(), ConductorError> {
        self.update(research_id, |state| state.add_active_step(execution))
    }

    pub fn complete_step(
        &self,
        research_id: &str,
        step_id: &str,
        result: StepResult,
    ) -> Result<ProgressMetrics, ConductorError> {
        self.update(research_id, |state| {
            state.complete_step(step_id, result)?;
            Ok(state.progress().clone())
        })
    }

    pub fn fail_step(&self, research_id: &str, step_id: &str) -> Result<(), ConductorError> {
        self.update(research_id, |state| state.fail_step(step_id))
    }

    pub fn add_issue(&self, research_id: &str, issue: Issue) -> Result<String, ConductorError> {
        self.update(research_id, |state| Ok(state.add_issue(issue)))
    }

    pub fn resolve_issue(
        &self,
        research_id: &str,
        issue_id: &str,
        resolution: &str,
    ) -> Result<Issue, ConductorError> {
        self.update(research_id, |state| {
            state.resolve_issue(issue_id, resolution).cloned()
        })
    }

    /// Drop completed states whose last update is older than `max_age_hours`.
    pub fn cleanup(&self, max_age_hours: f64) -> Vec<String> {
        let now = Utc::now();
        let mut removed = Vec::new();
        self.states.retain(|research_id, state| {
            if state.is_expired(max_age_hours, now) {
                removed.push(research_id.clone());
                false
            } else {
                true
            }
        });
        removed.sort();
        for research_id in &removed {
            self.forget(research_id);
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), max_age_hours, "Cleaned up completed research states");
        }
        removed
    }

    pub fn remove(&self, research_id: &str) -> Option<OrchestrationState> {
        let removed = self.states.remove(research_id).map(|(_, state)| state);
        if removed.is_some() {
            self.forget(research_id);
        }
        removed
    }

    fn persist(&self, state: &OrchestrationState) {
        if let Some(hook) = &self.hook {
            if let Err(e) = hook.persist(state) {
                tracing::warn!(
                    research_id = %state.research_id(),
                    error = %e,
                    "State persistence hook failed"
                );
            }
        }
    }

    fn forget(&self, research_id: &str) {
        if let Some(hook) = &self.hook {
            if let Err(e) = hook.remove(research_id) {
                tracing::warn!(research_id = %research_id, error = %e, "State removal hook failed");
            }
        }
    }
}
