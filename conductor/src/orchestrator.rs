//! ResearchOrchestrator - entry point owning the state store and per-research actors
//!
//! Every mutation of a research's state is routed through that research's
//! `ResearchConductorActor`; status, aggregation and synthesis read snapshots
//! from the store directly.

use dashmap::DashMap;
use ractor::{Actor, ActorRef};
use shared_types::{
    OrchestrationPhase, ProgressMetrics, ResearchPlan, ResearchResult, StepExecution,
    SynthesisResult,
};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::actors::conductor::{
    events, ConductorError, ConductorEvent, ConductorMsg, EventSink, OracleMessage,
    OrchestrationDecision, OrchestrationState, ResearchConductorActor,
    ResearchConductorArguments, SharedAgentTransport, SharedDecisionOracle, StateStore,
};
use crate::config::ConductorConfig;
use crate::research::{self, IntegrityReport};

#[derive(Clone)]
pub struct ResearchOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    store: Arc<StateStore>,
    actors: DashMap<String, ActorRef<ConductorMsg>>,
    transport: SharedAgentTransport,
    oracle: Option<SharedDecisionOracle>,
    events: EventSink,
    config: Arc<ConductorConfig>,
}

impl ResearchOrchestrator {
    pub fn new(transport: SharedAgentTransport, config: ConductorConfig) -> Self {
        Self::build(Arc::new(StateStore::new()), transport, None, config)
    }

    pub fn with_oracle(
        transport: SharedAgentTransport,
        oracle: SharedDecisionOracle,
        config: ConductorConfig,
    ) -> Self {
        Self::build(Arc::new(StateStore::new()), transport, Some(oracle), config)
    }

    /// Use an existing store, e.g. one carrying a persistence hook.
    pub fn build(
        store: Arc<StateStore>,
        transport: SharedAgentTransport,
        oracle: Option<SharedDecisionOracle>,
        config: ConductorConfig,
    ) -> Self {
        let events = EventSink::new(config.event_capacity);
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                actors: DashMap::new(),
                transport,
                oracle,
                events,
                config: Arc::new(config),
            }),
        }
    }

    pub fn store(&self) -> Arc<StateStore> {
        self.inner.store.clone()
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize state for `research_id` and spawn its conductor actor.
    ///
    /// Nothing is delegated until `delegate` or an oracle decision asks for it.
    pub async fn start_research(
        &self,
        research_id: &str,
        plan: ResearchPlan,
    ) -> Result<OrchestrationState, ConductorError> {
        let state = self.inner.store.initialize(research_id, plan)?;

        let args = ResearchConductorArguments {
            research_id: research_id.to_string(),
            store: self.inner.store.clone(),
            transport: self.inner.transport.clone(),
            oracle: self.inner.oracle.clone(),
            events: self.inner.events.clone(),
            config: self.inner.config.clone(),
        };
        match Actor::spawn(None, ResearchConductorActor, args).await {
            Ok((actor, _handle)) => {
                self.inner.actors.insert(research_id.to_string(), actor);
            }
            Err(e) => {
                self.inner.store.remove(research_id);
                tracing::error!(research_id = %research_id, error = %e, "Failed to spawn conductor actor");
                return Err(ConductorError::ActorUnavailable(e.to_string()));
            }
        }

        tracing::info!(
            research_id = %research_id,
            topic = %state.plan().topic,
            "Research started"
        );
        Ok(state)
    }

    fn actor(&self, research_id: &str) -> Result<ActorRef<ConductorMsg>, ConductorError> {
        if let Some(actor) = self.inner.actors.get(research_id) {
            return Ok(actor.value().clone());
        }
        if self.inner.store.contains(research_id) {
            Err(ConductorError::ActorUnavailable(format!(
                "no conductor running for research {research_id}"
            )))
        } else {
            Err(ConductorError::NotFound(format!("research {research_id}")))
        }
    }

    /// Delegate the given steps, or every ready step when `step_ids` is empty.
    pub async fn delegate(
        &self,
        research_id: &str,
        step_ids: Vec<String>,
    ) -> Result<Vec<StepExecution>, ConductorError> {
        let actor = self.actor(research_id)?;
        ractor::call!(actor, |reply| ConductorMsg::Delegate { step_ids, reply })
            .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))?
    }

    pub async fn consult_oracle(
        &self,
        research_id: &str,
        messages: Vec<OracleMessage>,
    ) -> Result<OrchestrationDecision, ConductorError> {
        let actor = self.actor(research_id)?;
        ractor::call!(actor, |reply| ConductorMsg::Consult { messages, reply })
            .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))
    }

    /// Delegate every newly executable step without waiting for the batch.
    ///
    /// Useful when auto-advance is off and the caller drives the research.
    pub fn advance(&self, research_id: &str) -> Result<(), ConductorError> {
        let actor = self.actor(research_id)?;
        actor
            .send_message(ConductorMsg::DispatchReady)
            .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))
    }

    /// Apply a decision produced outside the conductor, e.g. by a caller-side oracle.
    pub fn apply_decision(
        &self,
        research_id: &str,
        decision: OrchestrationDecision,
    ) -> Result<(), ConductorError> {
        let actor = self.actor(research_id)?;
        actor
            .send_message(ConductorMsg::ApplyDecision { decision })
            .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))
    }

    /// Cancel a research; returns the step ids whose executions were cancelled.
    pub async fn cancel(&self, research_id: &str) -> Result<Vec<String>, ConductorError> {
        let actor = self.actor(research_id)?;
        ractor::call!(actor, |reply| ConductorMsg::Cancel { reply })
            .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))
    }

    pub async fn replan(&self, research_id: &str, plan: ResearchPlan) -> Result<(), ConductorError> {
        let actor = self.actor(research_id)?;
        ractor::call!(actor, |reply| ConductorMsg::Replan { plan, reply })
            .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))?
    }

    // ========================================================================
    // Read paths
    // ========================================================================

    pub fn get_state(&self, research_id: &str) -> Option<OrchestrationState> {
        self.inner.store.get_state(research_id)
    }

    pub fn get_progress(&self, research_id: &str) -> Option<ProgressMetrics> {
        self.inner.store.get_progress(research_id)
    }

    pub fn aggregate(&self, research_id: &str) -> Result<ResearchResult, ConductorError> {
        let state = self.snapshot(research_id)?;
        Ok(research::aggregate(
            research_id,
            state.plan(),
            &state.completed_results(),
        ))
    }

    pub fn validate(&self, research_id: &str) -> Result<IntegrityReport, ConductorError> {
        let result = self.aggregate(research_id)?;
        Ok(research::validate_integrity(&result))
    }

    /// Build the report from completed results and mark the research `completed`.
    pub async fn synthesize(&self, research_id: &str) -> Result<SynthesisResult, ConductorError> {
        let state = self.snapshot(research_id)?;
        let report = research::synthesize(research_id, state.plan(), &state.completed_results());

        match self.actor(research_id) {
            Ok(actor) => ractor::call!(actor, |reply| ConductorMsg::Finalize { reply })
                .map_err(|e| ConductorError::ActorUnavailable(e.to_string()))??,
            Err(ConductorError::ActorUnavailable(_)) => {
                let from = state.current_phase();
                if self
                    .inner
                    .store
                    .update_phase(research_id, OrchestrationPhase::Completed)?
                {
                    events::emit_phase_changed(
                        &self.inner.events,
                        research_id,
                        from,
                        OrchestrationPhase::Completed,
                    );
                }
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    fn snapshot(&self, research_id: &str) -> Result<OrchestrationState, ConductorError> {
        self.inner
            .store
            .get_state(research_id)
            .ok_or_else(|| ConductorError::NotFound(format!("research {research_id}")))
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Remove completed researches older than `max_age_hours` and stop their actors.
    pub fn cleanup(&self, max_age_hours: f64) -> Vec<String> {
        let removed = self.inner.store.cleanup(max_age_hours);
        for research_id in &removed {
            if let Some((_, actor)) = self.inner.actors.remove(research_id) {
                actor.stop(Some("research cleaned up".to_string()));
            }
        }
        if !removed.is_empty() {
            tracing::debug!(stopped = removed.len(), "Stopped conductors of cleaned up research");
        }
        removed
    }

    /// Stop every conductor actor. State stays in the store.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.inner.actors.iter().map(|e| e.key().clone()).collect();
        for research_id in ids {
            if let Some((_, actor)) = self.inner.actors.remove(&research_id) {
                actor.stop(Some("orchestrator shutdown".to_string()));
            }
        }
        tracing::info!("Research orchestrator shut down");
    }
}
