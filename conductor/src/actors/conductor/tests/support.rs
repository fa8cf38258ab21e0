use async_trait::async_trait;
use ractor::{Actor, ActorRef};
use serde_json::{json, Value};
use shared_types::{ResearchMethodology, ResearchPlan, ResearchStep, WorkerType};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::actors::conductor::{
    delegator::DelegationRequest, AgentTransport, ConductorMsg, EventSink, OrchestrationState,
    ResearchConductorActor, ResearchConductorArguments, SharedDecisionOracle, StateStore,
    StreamEvent, TransportFailure,
};
use crate::config::ConductorConfig;

/// Scripted reply for one transport call
pub(crate) enum Reply {
    Ok(Value),
    Fail(TransportFailure),
    /// Succeed with the default payload after a delay
    Delayed(u64),
    /// Never answer; only the request timeout ends the call
    Hang,
}

/// Transport double: replies are scripted per step id, unscripted calls succeed.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(WorkerType, DelegationRequest)>>,
    cancelled: Mutex<Vec<String>>,
    streaming: bool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn streaming() -> Arc<Self> {
        Arc::new(Self {
            streaming: true,
            ..Self::default()
        })
    }

    pub(crate) fn script(&self, step_id: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.to_string(), replies.into());
    }

    pub(crate) fn calls(&self) -> Vec<(WorkerType, DelegationRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, step_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, request)| request.step_id == step_id)
            .count()
    }

    pub(crate) fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn next_reply(&self, worker_type: WorkerType, request: &DelegationRequest) -> Option<Reply> {
        self.calls
            .lock()
            .unwrap()
            .push((worker_type, request.clone()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&request.step_id)
            .and_then(VecDeque::pop_front)
    }
}

pub(crate) fn success_payload(step_id: &str) -> Value {
    json!({
        "stepId": step_id,
        "status": "success",
        "data": {"findings": [{"claim": format!("Finding reported by {step_id}"), "confidence": 0.7}]},
        "sources": [{"url": format!("https://example.org/{step_id}"), "title": step_id, "type": "web"}],
        "qualityScore": 0.8,
        "processingTime": 100
    })
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn send(
        &self,
        worker_type: WorkerType,
        request: &DelegationRequest,
    ) -> Result<Value, TransportFailure> {
        match self.next_reply(worker_type, request) {
            None => Ok(success_payload(&request.step_id)),
            Some(Reply::Ok(value)) => Ok(value),
            Some(Reply::Fail(failure)) => Err(failure),
            Some(Reply::Delayed(ms)) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(success_payload(&request.step_id))
            }
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                Err(TransportFailure::message("unreachable"))
            }
        }
    }

    async fn cancel(&self, step_id: &str) -> bool {
        self.cancelled.lock().unwrap().push(step_id.to_string());
        true
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn send_stream(
        &self,
        worker_type: WorkerType,
        request: &DelegationRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Value, TransportFailure> {
        let _ = events.send(StreamEvent {
            message: format!("searching for {}", request.step_id),
            progress: Some(0.5),
        });
        // let the forwarder deliver progress before the final result
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.send(worker_type, request).await
    }
}

pub(crate) fn step(id: &str, agent_type: &str, deps: &[&str], priority: i32) -> ResearchStep {
    ResearchStep {
        id: id.to_string(),
        description: format!("Search for {id}"),
        agent_type: agent_type.to_string(),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        priority,
        fallback_strategies: Vec::new(),
        timeout_ms: None,
    }
}

pub(crate) fn plan(steps: Vec<ResearchStep>) -> ResearchPlan {
    ResearchPlan {
        topic: "Heat pump adoption".to_string(),
        objectives: vec!["Assess heat pump adoption".to_string()],
        methodology: ResearchMethodology::default(),
        steps,
    }
}

/// Config with millisecond backoff so retry paths finish quickly.
pub(crate) fn fast_config() -> ConductorConfig {
    let mut config = ConductorConfig::default();
    config.recovery.backoff_base_ms = 5;
    config.recovery.backoff_cap_ms = 20;
    config
}

pub(crate) struct TestConductor {
    pub(crate) conductor: ActorRef<ConductorMsg>,
    pub(crate) store: Arc<StateStore>,
    pub(crate) events: EventSink,
}

pub(crate) async fn setup_test_conductor(
    research_plan: ResearchPlan,
    transport: Arc<ScriptedTransport>,
    oracle: Option<SharedDecisionOracle>,
    config: ConductorConfig,
) -> TestConductor {
    let store = Arc::new(StateStore::new());
    store.initialize("research-1", research_plan).unwrap();
    let events = EventSink::new(64);

    let args = ResearchConductorArguments {
        research_id: "research-1".to_string(),
        store: store.clone(),
        transport,
        oracle,
        events: events.clone(),
        config: Arc::new(config),
    };
    let (conductor, _handle) = Actor::spawn(None, ResearchConductorActor, args)
        .await
        .unwrap();
    TestConductor {
        conductor,
        store,
        events,
    }
}

/// Poll the store until `check` holds or two seconds pass.
pub(crate) async fn wait_for(
    store: &StateStore,
    check: impl Fn(&OrchestrationState) -> bool,
) -> bool {
    for _ in 0..200 {
        if let Some(state) = store.get_state("research-1") {
            if check(&state) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
