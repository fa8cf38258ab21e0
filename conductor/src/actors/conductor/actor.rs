//! ResearchConductorActor - single writer for one research id
//!
//! The ResearchConductorActor is responsible for:
//! - Delegating executable plan steps to workers (fan-out via spawned tasks)
//! - Handling worker results as they arrive, in any order (fan-in via messages)
//! - Applying recovery decisions, including cancellable retry timers
//! - Applying oracle decisions
//! - Emitting lifecycle events

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::actors::conductor::{
    events::EventSink,
    policy::SharedDecisionOracle,
    protocol::ConductorMsg,
    store::StateStore,
    workers::SharedAgentTransport,
};
use crate::config::ConductorConfig;

/// ResearchConductorActor - per-research orchestration actor
#[derive(Debug, Default)]
pub struct ResearchConductorActor;

/// Arguments for spawning ResearchConductorActor
#[derive(Clone)]
pub struct ResearchConductorArguments {
    /// Research id this actor owns; the state must already be initialized in `store`
    pub research_id: String,
    pub store: Arc<StateStore>,
    pub transport: SharedAgentTransport,
    /// Optional decision oracle; without one every consult yields the fallback decision
    pub oracle: Option<SharedDecisionOracle>,
    pub events: EventSink,
    pub config: Arc<ConductorConfig>,
}

/// Internal state for ResearchConductorActor
pub struct ResearchConductorState {
    pub(crate) research_id: String,
    pub(crate) store: Arc<StateStore>,
    pub(crate) transport: SharedAgentTransport,
    pub(crate) oracle: Option<SharedDecisionOracle>,
    pub(crate) events: EventSink,
    pub(crate) config: Arc<ConductorConfig>,
    /// Scheduled retries keyed by step id
    pub(crate) retry_timers: HashMap<String, JoinHandle<()>>,
}

impl ResearchConductorState {
    pub(crate) fn abort_timer(&mut self, step_id: &str) {
        if let Some(handle) = self.retry_timers.remove(step_id) {
            handle.abort();
        }
    }

    pub(crate) fn abort_all_timers(&mut self) {
        for (_, handle) in self.retry_timers.drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Actor for ResearchConductorActor {
    type Msg = ConductorMsg;
    type State = ResearchConductorState;
    type Arguments = ResearchConductorArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        if !args.store.contains(&args.research_id) {
            return Err(ActorProcessingErr::from(format!(
                "research {} is not initialized",
                args.research_id
            )));
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            research_id = %args.research_id,
            "ResearchConductorActor starting"
        );

        Ok(ResearchConductorState {
            research_id: args.research_id,
            store: args.store,
            transport: args.transport,
            oracle: args.oracle,
            events: args.events,
            config: args.config,
            retry_timers: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ConductorMsg::Delegate { step_ids, reply } => {
                let result = self.handle_delegate(&myself, state, step_ids);
                let _ = reply.send(result);
            }
            ConductorMsg::DispatchReady => {
                self.dispatch_ready(&myself, state);
            }
            ConductorMsg::StepFinished {
                step_id,
                attempt,
                outcome,
            } => {
                self.handle_step_finished(&myself, state, step_id, attempt, outcome);
            }
            ConductorMsg::StepProgress {
                step_id,
                attempt,
                update,
            } => {
                self.handle_step_progress(state, step_id, attempt, update);
            }
            ConductorMsg::RetryDue { step_id, attempt } => {
                self.handle_retry_due(&myself, state, step_id, attempt);
            }
            ConductorMsg::Consult { messages, reply } => {
                let decision = self.handle_consult(&myself, state, messages).await;
                let _ = reply.send(decision);
            }
            ConductorMsg::ApplyDecision { decision } => {
                self.apply_decision(&myself, state, &decision).await;
            }
            ConductorMsg::Replan { plan, reply } => {
                let result = self.handle_replan(&myself, state, plan);
                let _ = reply.send(result);
            }
            ConductorMsg::Cancel { reply } => {
                let cancelled = self.handle_cancel(state).await;
                let _ = reply.send(cancelled);
            }
            ConductorMsg::Finalize { reply } => {
                let result = self.handle_finalize(state).await;
                let _ = reply.send(result);
            }
            ConductorMsg::GetState { reply } => {
                let _ = reply.send(state.store.get_state(&state.research_id));
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.abort_all_timers();
        tracing::info!(
            actor_id = %myself.get_id(),
            research_id = %state.research_id,
            "ResearchConductorActor stopped"
        );
        Ok(())
    }
}
