//! Orchestration state for one research id
//!
//! `OrchestrationState` is the sole unit of mutation. Fields are private so every
//! write goes through a method that keeps the invariants:
//! - a step is either active or completed, never both
//! - at most one execution exists per step id
//! - progress is recomputed after every change to completed steps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{
    ExecutionStatus, Issue, OrchestrationPhase, ProgressMetrics, ProgressUpdate, ResearchPlan,
    StepExecution, StepResult,
};
use std::collections::BTreeMap;

use super::graph::validate_plan;
use super::protocol::ConductorError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationState {
    research_id: String,
    plan: ResearchPlan,
    current_phase: OrchestrationPhase,
    active_steps: BTreeMap<String, StepExecution>,
    completed_steps: BTreeMap<String, StepResult>,
    issues: Vec<Issue>,
    progress: ProgressMetrics,
    cancelled: bool,
    started_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl OrchestrationState {
    /// Create a new state in `planning` phase after validating the plan
    pub fn new(research_id: impl Into<String>, plan: ResearchPlan) -> Result<Self, ConductorError> {
        validate_plan(&plan)?;
        let now = Utc::now();
        let mut state = Self {
            research_id: research_id.into(),
            plan,
            current_phase: OrchestrationPhase::Planning,
            active_steps: BTreeMap::new(),
            completed_steps: BTreeMap::new(),
            issues: Vec::new(),
            progress: ProgressMetrics::default(),
            cancelled: false,
            started_at: now,
            last_updated: now,
        };
        state.recompute_progress();
        Ok(state)
    }

    // =========================================================================
    // Read accessors
    // =========================================================================

    pub fn research_id(&self) -> &str {
        &self.research_id
    }

    pub fn plan(&self) -> &ResearchPlan {
        &self.plan
    }

    pub fn current_phase(&self) -> OrchestrationPhase {
        self.current_phase
    }

    pub fn active_steps(&self) -> &BTreeMap<String, StepExecution> {
        &self.active_steps
    }

    pub fn active_step(&self, step_id: &str) -> Option<&StepExecution> {
        self.active_steps.get(step_id)
    }

    pub fn completed_steps(&self) -> &BTreeMap<String, StepResult> {
        &self.completed_steps
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_steps.contains_key(step_id)
    }

    /// Completed results in plan order
    pub fn completed_results(&self) -> Vec<StepResult> {
        self.plan
            .steps
            .iter()
            .filter_map(|step| self.completed_steps.get(&step.id).cloned())
            .collect()
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn open_issues(&self) -> Vec<&Issue> {
        self.issues.iter().filter(|issue| issue.is_open()).collect()
    }

    pub fn progress(&self) -> &ProgressMetrics {
        &self.progress
    }

    pub fn running_count(&self) -> usize {
        self.active_steps
            .values()
            .filter(|execution| execution.is_running())
            .count()
    }

    /// Research reached `completed`; no further results or phase changes are accepted
    pub fn is_finalized(&self) -> bool {
        self.current_phase == OrchestrationPhase::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Plan steps that are neither active nor completed
    pub fn untouched_step_ids(&self) -> Vec<String> {
        self.plan
            .steps
            .iter()
            .filter(|step| {
                !self.active_steps.contains_key(&step.id)
                    && !self.completed_steps.contains_key(&step.id)
            })
            .map(|step| step.id.clone())
            .collect()
    }

    pub fn all_steps_completed(&self) -> bool {
        !self.plan.steps.is_empty() && self.completed_steps.len() == self.plan.steps.len()
    }

    /// Completed states older than `max_age_hours` are eligible for cleanup
    pub fn is_expired(&self, max_age_hours: f64, now: DateTime<Utc>) -> bool {
        if self.current_phase != OrchestrationPhase::Completed {
            return false;
        }
        let age_ms = (now - self.last_updated).num_milliseconds() as f64;
        age_ms >= max_age_hours * 3_600_000.0
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Returns true when the phase actually changed. `completed` is terminal.
    pub fn update_phase(&mut self, phase: OrchestrationPhase) -> bool {
        if self.current_phase == phase || self.is_finalized() {
            return false;
        }
        self.current_phase = phase;
        self.touch();
        true
    }

    /// Insert or replace the execution for a step.
    ///
    /// Calling twice with the same step id replaces the earlier record.
    pub fn add_active_step(&mut self, execution: StepExecution) -> Result<(), ConductorError> {
        if self.plan.step(&execution.step_id).is_none() {
            return Err(ConductorError::NotFound(format!(
                "step {} in research {}",
                execution.step_id, self.research_id
            )));
        }
        if self.completed_steps.contains_key(&execution.step_id) {
            return Err(ConductorError::InvalidRequest(format!(
                "step {} already completed",
                execution.step_id
            )));
        }
        self.active_steps
            .insert(execution.step_id.clone(), execution);
        self.touch();
        Ok(())
    }

    /// Append a progress update to a running execution
    pub fn record_progress(
        &mut self,
        step_id: &str,
        update: ProgressUpdate,
    ) -> Result<(), ConductorError> {
        let execution = self.active_execution_mut(step_id)?;
        execution.updated_at = update.timestamp;
        execution.progress_updates.push(update);
        self.touch();
        Ok(())
    }

    /// Move a step from active to completed.
    ///
    /// Calling twice with the same step id replaces the stored result.
    pub fn complete_step(
        &mut self,
        step_id: &str,
        result: StepResult,
    ) -> Result<(), ConductorError> {
        if self.plan.step(step_id).is_none() {
            return Err(ConductorError::NotFound(format!(
                "step {step_id} in research {}",
                self.research_id
            )));
        }
        self.active_steps.remove(step_id);
        self.completed_steps.insert(step_id.to_string(), result);
        self.recompute_progress();
        self.touch();
        Ok(())
    }

    /// Mark an active execution failed; it stays in the active map so the step
    /// is neither re-delegated automatically nor counted as completed.
    pub fn fail_step(&mut self, step_id: &str) -> Result<(), ConductorError> {
        let execution = self.active_execution_mut(step_id)?;
        let now = Utc::now();
        execution.status = ExecutionStatus::Failed;
        execution.updated_at = now;
        execution.completed_at = Some(now);
        self.touch();
        Ok(())
    }

    /// Mark the research cancelled and every in-flight execution `cancelled`.
    ///
    /// Returns the ids of executions that were cancelled.
    pub fn cancel_running(&mut self) -> Vec<String> {
        self.cancelled = true;
        self.cancel_in_flight()
    }

    /// Mark every pending or running execution `cancelled` without closing the
    /// research to further reads; used when the research is finalized.
    pub fn cancel_in_flight(&mut self) -> Vec<String> {
        let now = Utc::now();
        let mut cancelled = Vec::new();
        for execution in self.active_steps.values_mut() {
            if execution.is_in_flight() {
                execution.status = ExecutionStatus::Cancelled;
                execution.updated_at = now;
                execution.completed_at = Some(now);
                cancelled.push(execution.step_id.clone());
            }
        }
        self.touch();
        cancelled
    }

    pub fn add_issue(&mut self, issue: Issue) -> String {
        let id = issue.id.clone();
        if let Some(existing) = self.issues.iter_mut().find(|i| i.id == id) {
            *existing = issue;
        } else {
            self.issues.push(issue);
        }
        self.touch();
        id
    }

    pub fn resolve_issue(
        &mut self,
        issue_id: &str,
        resolution: impl Into<String>,
    ) -> Result<&Issue, ConductorError> {
        let issue = self
            .issues
            .iter_mut()
            .find(|issue| issue.id == issue_id)
            .ok_or_else(|| ConductorError::NotFound(format!("issue {issue_id}")))?;
        issue.resolution = Some(resolution.into());
        issue.resolved_at = Some(Utc::now());
        self.last_updated = Utc::now();
        Ok(&*issue)
    }

    /// Replace the plan, keeping results and executions whose step ids survive
    pub fn replan(&mut self, plan: ResearchPlan) -> Result<(), ConductorError> {
        if self.is_finalized() {
            return Err(ConductorError::InvalidRequest(format!(
                "research {} is already completed",
                self.research_id
            )));
        }
        validate_plan(&plan)?;
        self.completed_steps
            .retain(|step_id, _| plan.step(step_id).is_some());
        self.active_steps
            .retain(|step_id, _| plan.step(step_id).is_some());
        self.plan = plan;
        self.recompute_progress();
        self.touch();
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn active_execution_mut(&mut self, step_id: &str) -> Result<&mut StepExecution, ConductorError> {
        self.active_steps
            .get_mut(step_id)
            .ok_or_else(|| ConductorError::NotFound(format!("active step {step_id}")))
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    fn recompute_progress(&mut self) {
        let total_steps = self.plan.steps.len();
        let completed_steps = self.completed_steps.len();

        let qualities: Vec<f64> = self
            .completed_steps
            .values()
            .map(|result| result.quality_score)
            .filter(|q| q.is_finite())
            .collect();
        let overall_confidence = if qualities.is_empty() {
            0.0
        } else {
            qualities.iter().sum::<f64>() / qualities.len() as f64
        };

        let durations: Vec<f64> = self
            .completed_steps
            .values()
            .map(|result| result.processing_time_ms)
            .filter(|t| t.is_finite() && *t >= 0.0)
            .collect();
        let remaining = total_steps.saturating_sub(completed_steps);
        let estimated_time_remaining_ms = if durations.is_empty() {
            None
        } else {
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            Some((mean * remaining as f64).round() as u64)
        };

        self.progress = ProgressMetrics {
            completed_steps,
            total_steps,
            estimated_time_remaining_ms,
            overall_confidence,
        };
    }
}
