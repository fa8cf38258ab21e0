use ractor::ActorRef;
use shared_types::{Issue, IssueSeverity, IssueType};

use crate::actors::conductor::actor::{ResearchConductorActor, ResearchConductorState};
use crate::actors::conductor::{
    events,
    graph::transitive_dependents,
    protocol::ConductorMsg,
    recovery::{handle_step_failure, RecoveryAction, RecoveryDecision},
    state::OrchestrationState,
    workers::TransportFailure,
};

impl ResearchConductorActor {
    pub(crate) fn recover_step(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        snapshot: &OrchestrationState,
        step_id: &str,
        failure: TransportFailure,
    ) {
        let decision =
            match handle_step_failure(snapshot, step_id, &failure, &state.config.recovery) {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(
                        research_id = %state.research_id,
                        step_id = %step_id,
                        error = %e,
                        "Recovery policy could not evaluate failure"
                    );
                    return;
                }
            };

        tracing::warn!(
            research_id = %state.research_id,
            step_id = %step_id,
            failure = %failure,
            class = ?decision.class,
            action = ?decision.action,
            delay_ms = decision.delay_ms,
            "Step failed"
        );
        events::emit_step_failed(
            &state.events,
            &state.research_id,
            step_id,
            &failure.to_string(),
            action_label(decision.action),
        );

        self.apply_recovery(myself, state, snapshot, step_id, decision);
    }

    pub(crate) fn apply_recovery(
        &self,
        myself: &ActorRef<ConductorMsg>,
        state: &mut ResearchConductorState,
        snapshot: &OrchestrationState,
        step_id: &str,
        decision: RecoveryDecision,
    ) {
        let RecoveryDecision {
            action,
            delay_ms,
            new_execution,
            issue,
            ..
        } = decision;
        let issue_affected = issue
            .as_ref()
            .map(|issue| issue.affected_steps.clone())
            .unwrap_or_default();
        if let Some(issue) = issue {
            self.raise_issue(state, issue);
        }

        match (action, new_execution) {
            (RecoveryAction::Retry | RecoveryAction::Fallback, Some(execution)) => {
                let attempt = execution.attempt;
                if let Err(e) = state.store.add_active_step(&state.research_id, execution) {
                    tracing::warn!(
                        research_id = %state.research_id,
                        step_id = %step_id,
                        error = %e,
                        "Failed to record replacement execution"
                    );
                    return;
                }
                self.schedule_retry(myself, state, step_id, attempt, delay_ms);
            }
            (RecoveryAction::Retry | RecoveryAction::Fallback, None) => {
                tracing::error!(
                    research_id = %state.research_id,
                    step_id = %step_id,
                    "Recovery decision carried no replacement execution"
                );
            }
            (RecoveryAction::Escalate | RecoveryAction::Abort, _) => {
                if let Err(e) = state.store.fail_step(&state.research_id, step_id) {
                    tracing::warn!(
                        research_id = %state.research_id,
                        step_id = %step_id,
                        error = %e,
                        "Failed to mark step failed"
                    );
                }

                let blocked: Vec<String> = transitive_dependents(snapshot.plan(), step_id)
                    .into_iter()
                    .filter(|dep| !issue_affected.contains(dep))
                    .collect();
                if !blocked.is_empty() {
                    self.raise_issue(
                        state,
                        Issue::new(
                            IssueType::DependencyBlocked,
                            IssueSeverity::Medium,
                            format!(
                                "{} step(s) blocked by failed step {step_id}",
                                blocked.len()
                            ),
                            blocked,
                        ),
                    );
                }
            }
        }
    }

    pub(crate) fn raise_issue(&self, state: &mut ResearchConductorState, issue: Issue) {
        match state.store.add_issue(&state.research_id, issue.clone()) {
            Ok(_) => {
                match issue.severity {
                    IssueSeverity::High | IssueSeverity::Critical => tracing::error!(
                        research_id = %state.research_id,
                        issue_id = %issue.id,
                        severity = ?issue.severity,
                        description = %issue.description,
                        "Issue raised"
                    ),
                    IssueSeverity::Low | IssueSeverity::Medium => tracing::warn!(
                        research_id = %state.research_id,
                        issue_id = %issue.id,
                        severity = ?issue.severity,
                        description = %issue.description,
                        "Issue raised"
                    ),
                }
                events::emit_issue_raised(&state.events, &state.research_id, &issue);
            }
            Err(e) => tracing::warn!(
                research_id = %state.research_id,
                error = %e,
                "Failed to record issue"
            ),
        }
    }
}

fn action_label(action: RecoveryAction) -> &'static str {
    match action {
        RecoveryAction::Retry => "retry",
        RecoveryAction::Fallback => "fallback",
        RecoveryAction::Escalate => "escalate",
        RecoveryAction::Abort => "abort",
    }
}
