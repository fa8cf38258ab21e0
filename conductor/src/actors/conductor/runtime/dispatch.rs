use ractor::ActorRef;
use shared_types::{
    AgentId, ExecutionStatus, OrchestrationPhase, ProgressUpdate, ResearchStep, StepExecution,
    WorkerType,
};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::actors::conductor::actor::{ResearchConductorActor, ResearchConductorState};
use crate::actors::conductor::{
    delegator::{self, DelegationRequest},
    events,
    protocol::{ConductorError, ConductorMsg},
    state::OrchestrationState,
    workers::{self, StreamEvent},
};

impl ResearchConductorActor {
    /// Explicit delegation; an empty id list means every step in the plan.
    pub(crate) fn handle_delegate(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        step_ids: Vec<String>,
    ) -> Result<Vec<StepExecution>, ConductorError> {
        let snapshot = state
            .store
            .get_state(&state.research_id)
            .ok_or_else(|| ConductorError::NotFound(format!("research {}", state.research_id)))?;
        if snapshot.is_cancelled() {
            return Err(ConductorError::Cancelled(state.research_id.clone()));
        }
        if snapshot.is_finalized() {
            return Err(ConductorError::InvalidRequest(format!(
                "research {} is already completed",
                state.research_id
            )));
        }

        let plan = snapshot.plan();
        let steps: Vec<&ResearchStep> = if step_ids.is_empty() {
            plan.steps.iter().collect()
        } else {
            step_ids
                .iter()
                .map(|id| {
                    plan.step(id)
                        .ok_or_else(|| ConductorError::NotFound(format!("step {id}")))
                })
                .collect::<Result<_, _>>()?
        };

        Ok(self.delegate_steps(myself, state, &snapshot, &steps))
    }

    /// Delegate plan steps nobody has touched yet whose dependencies are done.
    pub(crate) fn dispatch_ready(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
    ) -> Vec<StepExecution> {
        let Some(snapshot) = state.store.get_state(&state.research_id) else {
            return Vec::new();
        };
        if snapshot.is_cancelled() || snapshot.is_finalized() {
            return Vec::new();
        }
        let untouched = snapshot.untouched_step_ids();
        let steps: Vec<&ResearchStep> = untouched
            .iter()
            .filter_map(|id| snapshot.plan().step(id))
            .collect();
        if steps.is_empty() {
            return Vec::new();
        }
        self.delegate_steps(myself, state, &snapshot, &steps)
    }

    fn delegate_steps(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        snapshot: &OrchestrationState,
        steps: &[&ResearchStep],
    ) -> Vec<StepExecution> {
        let batch = delegator::plan_batch(steps, snapshot, &state.config);

        for skipped in batch.skipped {
            match skipped.issue {
                Some(issue) => self.raise_issue(state, issue),
                None => tracing::debug!(
                    research_id = %state.research_id,
                    step_id = %skipped.step_id,
                    "Skipping non-delegatable step"
                ),
            }
        }
        if !batch.waiting.is_empty() {
            tracing::debug!(
                research_id = %state.research_id,
                waiting = ?batch.waiting,
                "Steps waiting on dependencies"
            );
        }
        if batch.delegations.is_empty() {
            return Vec::new();
        }
        if snapshot.current_phase() == OrchestrationPhase::Planning {
            self.enter_phase(state, OrchestrationPhase::Execution);
        }

        let mut created = Vec::with_capacity(batch.delegations.len());
        for planned in batch.delegations {
            let execution = StepExecution::new(
                planned.request.step_id.clone(),
                AgentId::for_worker(planned.worker_type).0,
            );
            match self.start_execution(myself, state, planned.worker_type, planned.request, execution)
            {
                Ok(execution) => created.push(execution),
                Err(e) => tracing::warn!(
                    research_id = %state.research_id,
                    error = %e,
                    "Failed to start step execution"
                ),
            }
        }

        tracing::info!(
            research_id = %state.research_id,
            delegated = created.len(),
            "Delegation batch dispatched"
        );
        created
    }

    /// Record the execution as running and fire the transport call without awaiting it.
    pub(crate) fn start_execution(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        worker_type: WorkerType,
        request: DelegationRequest,
        mut execution: StepExecution,
    ) -> Result<StepExecution, ConductorError> {
        let now = chrono::Utc::now();
        execution.attempt += 1;
        execution.status = ExecutionStatus::Running;
        execution.updated_at = now;
        execution.completed_at = None;
        state
            .store
            .add_active_step(&state.research_id, execution.clone())?;
        state.abort_timer(&execution.step_id);

        events::emit_step_started(
            &state.events,
            &state.research_id,
            &execution.step_id,
            &execution.agent_id,
            execution.attempt,
        );
        tracing::info!(
            research_id = %state.research_id,
            step_id = %execution.step_id,
            worker_type = %worker_type,
            task_type = request.task_type.as_str(),
            attempt = execution.attempt,
            timeout_ms = request.timeout,
            "Delegating step"
        );

        let step_id = execution.step_id.clone();
        let attempt = execution.attempt;
        let progress = if state.config.streaming && state.transport.supports_streaming() {
            let (tx, rx) = mpsc::unbounded_channel();
            spawn_progress_forwarder(myself.clone(), step_id.clone(), attempt, rx);
            Some(tx)
        } else {
            None
        };

        let transport = state.transport.clone();
        let conductor = myself.clone();
        tokio::spawn(async move {
            let outcome = workers::call_worker(transport, worker_type, request, progress).await;
            if conductor
                .send_message(ConductorMsg::StepFinished {
                    step_id: step_id.clone(),
                    attempt,
                    outcome,
                })
                .is_err()
            {
                tracing::debug!(step_id = %step_id, "Conductor gone before step finished");
            }
        });

        Ok(execution)
    }

    /// Re-dispatch a pending execution produced by a retry or fallback decision.
    pub(crate) fn redispatch(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        snapshot: &OrchestrationState,
        execution: StepExecution,
    ) -> Result<StepExecution, ConductorError> {
        let step = snapshot
            .plan()
            .step(&execution.step_id)
            .ok_or_else(|| ConductorError::NotFound(format!("step {}", execution.step_id)))?;
        let worker_type = AgentId(execution.agent_id.clone())
            .worker_type()
            .filter(WorkerType::is_delegatable)
            .or_else(|| step.worker_type())
            .ok_or_else(|| {
                ConductorError::InvalidRequest(format!(
                    "step {} has no delegatable worker type",
                    step.id
                ))
            })?;
        let strategy = execution
            .fallback_strategy
            .as_deref()
            .filter(|s| !s.starts_with("alternate-worker:"));
        let request = delegator::build_request(
            step,
            worker_type,
            &snapshot.plan().topic,
            strategy,
            &state.config,
        );
        self.start_execution(myself, state, worker_type, request, execution)
    }

    pub(crate) fn handle_retry_due(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        step_id: String,
        attempt: u32,
    ) {
        state.retry_timers.remove(&step_id);
        let Some(snapshot) = state.store.get_state(&state.research_id) else {
            return;
        };
        if snapshot.is_cancelled() || snapshot.is_finalized() {
            tracing::debug!(
                research_id = %state.research_id,
                step_id = %step_id,
                "Ignoring retry timer for closed research"
            );
            return;
        }
        let Some(execution) = snapshot.active_step(&step_id).cloned() else {
            return;
        };
        if execution.status != ExecutionStatus::Pending || execution.attempt != attempt {
            tracing::debug!(
                research_id = %state.research_id,
                step_id = %step_id,
                attempt,
                "Ignoring stale retry timer"
            );
            return;
        }

        if let Err(e) = self.redispatch(myself, state, &snapshot, execution) {
            tracing::warn!(
                research_id = %state.research_id,
                step_id = %step_id,
                error = %e,
                "Retry dispatch failed"
            );
        }
    }

    /// Fire `RetryDue` after `delay_ms`; replaces any earlier timer for the step.
    pub(crate) fn schedule_retry(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        step_id: &str,
        attempt: u32,
        delay_ms: u64,
    ) {
        let conductor = myself.clone();
        let timer_step = step_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let _ = conductor.send_message(ConductorMsg::RetryDue {
                step_id: timer_step,
                attempt,
            });
        });
        if let Some(previous) = state.retry_timers.insert(step_id.to_string(), handle) {
            previous.abort();
        }
    }
}

fn spawn_progress_forwarder(
    conductor: ActorRef<ConductorMsg>,
    step_id: String,
    attempt: u32,
    mut rx: mpsc::UnboundedReceiver<StreamEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let update = ProgressUpdate {
                timestamp: chrono::Utc::now(),
                message: event.message,
                progress: event.progress,
            };
            if conductor
                .send_message(ConductorMsg::StepProgress {
                    step_id: step_id.clone(),
                    attempt,
                    update,
                })
                .is_err()
            {
                break;
            }
        }
    });
}
