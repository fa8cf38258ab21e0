use ractor::ActorRef;
use shared_types::{OrchestrationPhase, ProgressUpdate, StepResult};

use crate::actors::conductor::actor::{ResearchConductorActor, ResearchConductorState};
use crate::actors::conductor::{
    events,
    protocol::{ConductorMsg, StepOutcome},
};

impl ResearchConductorActor {
    pub(crate) fn handle_step_finished(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        step_id: String,
        attempt: u32,
        outcome: StepOutcome,
    ) {
        let Some(snapshot) = state.store.get_state(&state.research_id) else {
            tracing::debug!(
                research_id = %state.research_id,
                step_id = %step_id,
                "Ignoring step result for removed research"
            );
            return;
        };
        if snapshot.is_finalized() {
            tracing::debug!(
                research_id = %state.research_id,
                step_id = %step_id,
                attempt,
                "Discarding step result for completed research"
            );
            return;
        }

        let live = snapshot
            .active_step(&step_id)
            .map(|execution| execution.is_running() && execution.attempt == attempt)
            .unwrap_or(false);
        if !live {
            tracing::warn!(
                research_id = %state.research_id,
                step_id = %step_id,
                attempt,
                "Discarding late step result"
            );
            return;
        }

        match outcome {
            StepOutcome::Completed(result) => self.complete_step(myself, state, &step_id, result),
            StepOutcome::Failed(failure) => {
                self.recover_step(myself, state, &snapshot, &step_id, failure)
            }
        }
    }

    fn complete_step(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        step_id: &str,
        result: StepResult,
    ) {
        let status = result.status;
        let progress = match state.store.complete_step(&state.research_id, step_id, result) {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(
                    research_id = %state.research_id,
                    step_id = %step_id,
                    error = %e,
                    "Failed to record step completion"
                );
                return;
            }
        };

        tracing::info!(
            research_id = %state.research_id,
            step_id = %step_id,
            status = ?status,
            completed = progress.completed_steps,
            total = progress.total_steps,
            "Step completed"
        );
        events::emit_step_completed(
            &state.events,
            &state.research_id,
            step_id,
            status,
            progress.clone(),
        );

        if progress.total_steps > 0 && progress.completed_steps == progress.total_steps {
            self.enter_phase(state, OrchestrationPhase::Synthesis);
        } else if state.config.auto_advance {
            self.dispatch_ready(myself, state);
        }
    }

    pub(crate) fn handle_step_progress(
        &self,
        state: &mut ResearchConductorState,
        step_id: String,
        attempt: u32,
        update: ProgressUpdate,
    ) {
        let message = update.message.clone();
        let fraction = update.progress;
        let recorded = state.store.update(&state.research_id, |s| {
            let live = s
                .active_step(&step_id)
                .map(|execution| execution.is_running() && execution.attempt == attempt)
                .unwrap_or(false);
            if live {
                s.record_progress(&step_id, update)?;
            }
            Ok(live)
        });

        match recorded {
            Ok(true) => events::emit_step_progress(
                &state.events,
                &state.research_id,
                &step_id,
                &message,
                fraction,
            ),
            Ok(false) => tracing::debug!(
                research_id = %state.research_id,
                step_id = %step_id,
                "Dropping progress for stale attempt"
            ),
            Err(e) => tracing::debug!(
                research_id = %state.research_id,
                step_id = %step_id,
                error = %e,
                "Dropping progress update"
            ),
        }
    }

    /// Move to `phase` if it differs from the current one; emits `phase.changed`.
    pub(crate) fn enter_phase(&self, state: &mut ResearchConductorState, phase: OrchestrationPhase) {
        let changed = state.store.update(&state.research_id, |s| {
            let from = s.current_phase();
            Ok(s.update_phase(phase).then_some(from))
        });
        match changed {
            Ok(Some(from)) => {
                tracing::info!(
                    research_id = %state.research_id,
                    from = from.as_str(),
                    to = phase.as_str(),
                    "Research phase changed"
                );
                events::emit_phase_changed(&state.events, &state.research_id, from, phase);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                research_id = %state.research_id,
                error = %e,
                "Failed to change research phase"
            ),
        }
    }
}
