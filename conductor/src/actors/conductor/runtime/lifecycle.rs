use ractor::ActorRef;
use shared_types::{OrchestrationPhase, ResearchPlan};

use crate::actors::conductor::actor::{ResearchConductorActor, ResearchConductorState};
use crate::actors::conductor::{
    events,
    protocol::{ConductorError, ConductorMsg},
};

impl ResearchConductorActor {
    /// Stop accepting delegations and cancel every in-flight execution.
    ///
    /// Transport calls are asked to cancel but not awaited to completion; their
    /// late results are discarded because the execution is no longer running.
    pub(crate) async fn handle_cancel(&self, state: &mut ResearchConductorState) -> Vec<String> {
        state.abort_all_timers();
        let cancelled = match state
            .store
            .update(&state.research_id, |s| Ok(s.cancel_running()))
        {
            Ok(cancelled) => cancelled,
            Err(e) => {
                tracing::warn!(research_id = %state.research_id, error = %e, "Cancel failed");
                return Vec::new();
            }
        };

        for step_id in &cancelled {
            if !state.transport.cancel(step_id).await {
                tracing::debug!(
                    research_id = %state.research_id,
                    step_id = %step_id,
                    "Transport did not acknowledge cancellation"
                );
            }
        }

        tracing::info!(
            research_id = %state.research_id,
            cancelled = cancelled.len(),
            "Research cancelled"
        );
        events::emit_research_cancelled(&state.events, &state.research_id, &cancelled);
        cancelled
    }

    pub(crate) fn handle_replan(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        plan: ResearchPlan,
    ) -> Result<(), ConductorError> {
        let (all_done, phase) = state.store.update(&state.research_id, |s| {
            if s.is_cancelled() {
                return Err(ConductorError::Cancelled(s.research_id().to_string()));
            }
            s.replan(plan)?;
            Ok((s.all_steps_completed(), s.current_phase()))
        })?;

        let live: Vec<String> = state
            .store
            .get_state(&state.research_id)
            .map(|s| s.active_steps().keys().cloned().collect())
            .unwrap_or_default();
        let orphaned: Vec<String> = state
            .retry_timers
            .keys()
            .filter(|step_id| !live.contains(step_id))
            .cloned()
            .collect();
        for step_id in orphaned {
            state.abort_timer(&step_id);
        }

        tracing::info!(research_id = %state.research_id, "Research plan replaced");

        if all_done {
            self.enter_phase(state, OrchestrationPhase::Synthesis);
        } else if matches!(
            phase,
            OrchestrationPhase::Execution | OrchestrationPhase::Synthesis
        ) {
            self.enter_phase(state, OrchestrationPhase::Execution);
            if state.config.auto_advance {
                self.dispatch_ready(myself, state);
            }
        }
        Ok(())
    }

    /// Move to `completed`; in-flight executions are cancelled and any result
    /// arriving afterwards is discarded.
    pub(crate) async fn handle_finalize(
        &self,
        state: &mut ResearchConductorState,
    ) -> Result<(), ConductorError> {
        state.abort_all_timers();
        let abandoned = state.store.update(&state.research_id, |s| {
            Ok(if s.is_finalized() {
                Vec::new()
            } else {
                s.cancel_in_flight()
            })
        })?;
        for step_id in &abandoned {
            if !state.transport.cancel(step_id).await {
                tracing::debug!(
                    research_id = %state.research_id,
                    step_id = %step_id,
                    "Transport did not acknowledge cancellation"
                );
            }
        }
        if !abandoned.is_empty() {
            tracing::info!(
                research_id = %state.research_id,
                abandoned = ?abandoned,
                "Cancelled in-flight steps on finalize"
            );
        }
        self.enter_phase(state, OrchestrationPhase::Completed);
        Ok(())
    }
}
