use async_trait::async_trait;
use ractor::{call, Actor};
use shared_types::{ExecutionStatus, OrchestrationPhase};
use std::sync::Arc;

use crate::actors::conductor::{
    policy::{NextAction, StateSummary},
    ConductorError, ConductorMsg, DecisionOracle, EventSink, OracleMessage,
    ResearchConductorActor, ResearchConductorArguments, SharedDecisionOracle, StateStore,
};
use crate::config::ConductorConfig;

use super::support::{plan, setup_test_conductor, step, wait_for, ScriptedTransport};

struct FixedOracle {
    reply: Result<String, ConductorError>,
}

#[async_trait]
impl DecisionOracle for FixedOracle {
    async fn propose(
        &self,
        summary: &StateSummary,
        _messages: &[OracleMessage],
    ) -> Result<String, ConductorError> {
        assert_eq!(summary.research_id, "research-1");
        self.reply.clone()
    }
}

fn manual_config() -> ConductorConfig {
    ConductorConfig {
        auto_advance: false,
        ..ConductorConfig::default()
    }
}

#[tokio::test]
async fn test_conductor_requires_initialized_research() {
    let args = ResearchConductorArguments {
        research_id: "missing".to_string(),
        store: Arc::new(StateStore::new()),
        transport: ScriptedTransport::new(),
        oracle: None,
        events: EventSink::new(8),
        config: Arc::new(ConductorConfig::default()),
    };
    assert!(Actor::spawn(None, ResearchConductorActor, args).await.is_err());
}

#[tokio::test]
async fn test_get_state_snapshot() {
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        ScriptedTransport::new(),
        None,
        manual_config(),
    )
    .await;

    let state = call!(t.conductor, |reply| ConductorMsg::GetState { reply })
        .unwrap()
        .unwrap();
    assert_eq!(state.research_id(), "research-1");
    assert_eq!(state.current_phase(), OrchestrationPhase::Planning);
    assert_eq!(state.progress().total_steps, 1);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_delegate_orders_by_priority_and_gates_dependencies() {
    let transport = ScriptedTransport::new();
    let t = setup_test_conductor(
        plan(vec![
            step("a", "web-research", &[], 1),
            step("b", "academic-research", &[], 5),
            step("c", "news-research", &["a"], 9),
        ]),
        transport.clone(),
        None,
        manual_config(),
    )
    .await;

    let executions = call!(t.conductor, |reply| ConductorMsg::Delegate {
        step_ids: Vec::new(),
        reply,
    })
    .unwrap()
    .unwrap();
    let ids: Vec<&str> = executions.iter().map(|e| e.step_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Running && e.attempt == 1));

    assert!(wait_for(&t.store, |s| s.completed_steps().len() == 2).await);
    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(state.current_phase(), OrchestrationPhase::Execution);
    assert!(state.active_step("c").is_none());
    assert!(!state.is_completed("c"));
    assert_eq!(transport.calls_for("c"), 0);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_delegate_unknown_step_is_not_found() {
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        ScriptedTransport::new(),
        None,
        manual_config(),
    )
    .await;

    let result = call!(t.conductor, |reply| ConductorMsg::Delegate {
        step_ids: vec!["nope".to_string()],
        reply,
    })
    .unwrap();
    assert!(matches!(result, Err(ConductorError::NotFound(_))));

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_consult_without_oracle_returns_fallback() {
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        ScriptedTransport::new(),
        None,
        manual_config(),
    )
    .await;

    let decision = call!(t.conductor, |reply| ConductorMsg::Consult {
        messages: vec![OracleMessage::user("what next?")],
        reply,
    })
    .unwrap();
    assert!(decision.is_fallback);
    assert_eq!(decision.next_actions, vec![NextAction::MonitorProgress]);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_oracle_error_falls_back() {
    let oracle: SharedDecisionOracle = Arc::new(FixedOracle {
        reply: Err(ConductorError::OracleError("model overloaded".to_string())),
    });
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        ScriptedTransport::new(),
        Some(oracle),
        manual_config(),
    )
    .await;

    let decision = call!(t.conductor, |reply| ConductorMsg::Consult {
        messages: Vec::new(),
        reply,
    })
    .unwrap();
    assert!(decision.is_fallback);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_oracle_decision_is_applied() {
    let oracle: SharedDecisionOracle = Arc::new(FixedOracle {
        reply: Ok("Plan follows.\n```json\n{\"currentPhase\": \"execution\", \"nextActions\": [{\"action\": \"delegate-steps\", \"stepIds\": [\"a\"]}, {\"action\": \"reticulate\"}]}\n```".to_string()),
    });
    let transport = ScriptedTransport::new();
    let t = setup_test_conductor(
        plan(vec![
            step("a", "web-research", &[], 1),
            step("b", "academic-research", &[], 1),
        ]),
        transport.clone(),
        Some(oracle),
        manual_config(),
    )
    .await;

    let decision = call!(t.conductor, |reply| ConductorMsg::Consult {
        messages: vec![OracleMessage::user("start")],
        reply,
    })
    .unwrap();
    assert!(!decision.is_fallback);
    assert_eq!(decision.next_actions.len(), 2);
    assert!(matches!(decision.next_actions[1], NextAction::Unknown { .. }));

    assert!(wait_for(&t.store, |s| s.is_completed("a")).await);
    assert_eq!(transport.calls_for("b"), 0);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_delegate_after_cancel_is_rejected() {
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        ScriptedTransport::new(),
        None,
        manual_config(),
    )
    .await;

    let cancelled = call!(t.conductor, |reply| ConductorMsg::Cancel { reply }).unwrap();
    assert!(cancelled.is_empty());

    let result = call!(t.conductor, |reply| ConductorMsg::Delegate {
        step_ids: Vec::new(),
        reply,
    })
    .unwrap();
    assert!(matches!(result, Err(ConductorError::Cancelled(_))));

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_replan_rejects_cyclic_plan() {
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        ScriptedTransport::new(),
        None,
        manual_config(),
    )
    .await;

    let cyclic = plan(vec![
        step("a", "web-research", &["b"], 1),
        step("b", "web-research", &["a"], 1),
    ]);
    let result = call!(t.conductor, |reply| ConductorMsg::Replan {
        plan: cyclic,
        reply,
    })
    .unwrap();
    assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));

    t.conductor.stop(None);
}
