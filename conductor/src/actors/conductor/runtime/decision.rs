use ractor::ActorRef;
use shared_types::OrchestrationPhase;

use crate::actors::conductor::actor::{ResearchConductorActor, ResearchConductorState};
use crate::actors::conductor::{
    events,
    policy::{
        fallback_decision, parse_decision, NextAction, OracleMessage, OrchestrationDecision,
        StateSummary,
    },
    protocol::ConductorMsg,
};

impl ResearchConductorActor {
    /// Ask the oracle for next actions and apply them. Oracle failures never surface.
    pub(crate) async fn handle_consult(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        messages: Vec<OracleMessage>,
    ) -> OrchestrationDecision {
        let Some(snapshot) = state.store.get_state(&state.research_id) else {
            return fallback_decision();
        };

        let decision = match state.oracle.clone() {
            None => {
                tracing::debug!(
                    research_id = %state.research_id,
                    "No decision oracle configured; using fallback decision"
                );
                fallback_decision()
            }
            Some(oracle) => {
                let summary = StateSummary::from_state(&snapshot);
                match oracle.propose(&summary, &messages).await {
                    Ok(text) => parse_decision(&text),
                    Err(e) => {
                        tracing::warn!(
                            research_id = %state.research_id,
                            error = %e,
                            "Decision oracle failed; using fallback decision"
                        );
                        fallback_decision()
                    }
                }
            }
        };

        tracing::info!(
            research_id = %state.research_id,
            fallback = decision.is_fallback,
            actions = decision.next_actions.len(),
            "Orchestration decision received"
        );
        self.apply_decision(myself, state, &decision).await;
        decision
    }

    pub(crate) async fn apply_decision(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        decision: &OrchestrationDecision,
    ) {
        for action in &decision.next_actions {
            match action {
                NextAction::DelegateSteps { step_ids } => {
                    let result = if step_ids.is_empty() {
                        Ok(self.dispatch_ready(myself, state))
                    } else {
                        self.handle_delegate(myself, state, step_ids.clone())
                    };
                    if let Err(e) = result {
                        tracing::warn!(
                            research_id = %state.research_id,
                            error = %e,
                            "Oracle delegation rejected"
                        );
                    }
                }
                NextAction::MonitorProgress => {
                    if let Some(progress) = state.store.get_progress(&state.research_id) {
                        tracing::info!(
                            research_id = %state.research_id,
                            completed = progress.completed_steps,
                            total = progress.total_steps,
                            confidence = progress.overall_confidence,
                            "Monitoring research progress"
                        );
                    }
                }
                NextAction::StartSynthesis => {
                    self.enter_phase(state, OrchestrationPhase::Synthesis);
                }
                NextAction::ResolveIssue {
                    issue_id,
                    resolution,
                } => match state
                    .store
                    .resolve_issue(&state.research_id, issue_id, resolution)
                {
                    Ok(issue) => {
                        tracing::info!(
                            research_id = %state.research_id,
                            issue_id = %issue_id,
                            "Issue resolved"
                        );
                        events::emit_issue_resolved(&state.events, &state.research_id, &issue);
                    }
                    Err(e) => tracing::warn!(
                        research_id = %state.research_id,
                        issue_id = %issue_id,
                        error = %e,
                        "Could not resolve issue"
                    ),
                },
                NextAction::CancelResearch => {
                    self.handle_cancel(state).await;
                }
                NextAction::Unknown { label } => {
                    tracing::warn!(
                        research_id = %state.research_id,
                        action = %label,
                        "Ignoring unknown orchestration action"
                    );
                }
            }
        }
    }
}
