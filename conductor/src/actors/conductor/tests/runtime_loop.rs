use ractor::call;
use shared_types::{ExecutionStatus, IssueSeverity, IssueType, OrchestrationPhase, WorkerType};
use std::time::Duration;

use crate::actors::conductor::{ConductorError, ConductorEvent, ConductorMsg, TransportFailure};

use super::support::{
    fast_config, plan, setup_test_conductor, step, wait_for, Reply, ScriptedTransport,
};

async fn delegate_all(conductor: &ractor::ActorRef<ConductorMsg>) {
    call!(conductor, |reply| ConductorMsg::Delegate {
        step_ids: Vec::new(),
        reply,
    })
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_auto_advance_runs_chain_to_synthesis() {
    let transport = ScriptedTransport::new();
    let t = setup_test_conductor(
        plan(vec![
            step("a", "web-research", &[], 1),
            step("b", "academic-research", &["a"], 1),
            step("c", "data-analysis", &["a", "b"], 1),
        ]),
        transport.clone(),
        None,
        fast_config(),
    )
    .await;
    let mut rx = t.events.subscribe();

    delegate_all(&t.conductor).await;
    assert!(
        wait_for(&t.store, |s| s.current_phase() == OrchestrationPhase::Synthesis).await
    );

    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(state.progress().completed_steps, 3);
    assert!(state.active_steps().is_empty());
    assert!((state.progress().overall_confidence - 0.8).abs() < 1e-9);

    let data_request = transport
        .calls()
        .into_iter()
        .find(|(_, r)| r.step_id == "c")
        .map(|(_, r)| r)
        .unwrap();
    assert_eq!(data_request.parameters["dataSources"], serde_json::json!(["a", "b"]));

    let mut saw_synthesis = false;
    while let Ok(event) = rx.try_recv() {
        if let ConductorEvent::PhaseChanged { to, .. } = event {
            saw_synthesis |= to == OrchestrationPhase::Synthesis;
        }
    }
    assert!(saw_synthesis);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_temporary_failure_is_retried() {
    let transport = ScriptedTransport::new();
    transport.script(
        "a",
        vec![Reply::Fail(TransportFailure::named("ECONNRESET", "socket hang up"))],
    );
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        transport.clone(),
        None,
        fast_config(),
    )
    .await;

    delegate_all(&t.conductor).await;
    assert!(wait_for(&t.store, |s| s.is_completed("a")).await);
    assert_eq!(transport.calls_for("a"), 2);
    assert!(t.store.get_state("research-1").unwrap().issues().is_empty());

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_critical_failure_escalates_and_blocks_dependents() {
    let transport = ScriptedTransport::new();
    transport.script("a", vec![Reply::Fail(TransportFailure::http(401, "unauthorized"))]);
    let t = setup_test_conductor(
        plan(vec![
            step("a", "web-research", &[], 1),
            step("b", "news-research", &["a"], 1),
        ]),
        transport.clone(),
        None,
        fast_config(),
    )
    .await;

    delegate_all(&t.conductor).await;
    assert!(wait_for(&t.store, |s| !s.issues().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = t.store.get_state("research-1").unwrap();
    let issue = &state.issues()[0];
    assert_eq!(issue.severity, IssueSeverity::High);
    assert_eq!(issue.affected_steps, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(state.active_step("a").unwrap().status, ExecutionStatus::Failed);
    assert!(state.active_step("b").is_none());
    assert_eq!(transport.calls_for("a"), 1);
    assert_eq!(transport.calls_for("b"), 0);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_timeouts_exhaust_retries_then_abort() {
    let transport = ScriptedTransport::new();
    transport.script("a", (0..4).map(|_| Reply::Hang).collect());
    let mut slow = step("a", "web-research", &[], 1);
    slow.timeout_ms = Some(30);
    let t = setup_test_conductor(plan(vec![slow]), transport.clone(), None, fast_config()).await;

    delegate_all(&t.conductor).await;
    assert!(
        wait_for(&t.store, |s| s
            .active_step("a")
            .map(|e| e.status == ExecutionStatus::Failed)
            .unwrap_or(false))
        .await
    );

    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(transport.calls_for("a"), 4);
    let issue = state.issues().last().unwrap();
    assert_eq!(issue.severity, IssueSeverity::Low);
    assert_eq!(issue.issue_type, IssueType::Timeout);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_cancel_discards_late_results() {
    let transport = ScriptedTransport::new();
    transport.script("a", vec![Reply::Delayed(150)]);
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        transport.clone(),
        None,
        fast_config(),
    )
    .await;

    delegate_all(&t.conductor).await;
    let cancelled = call!(t.conductor, |reply| ConductorMsg::Cancel { reply }).unwrap();
    assert_eq!(cancelled, vec!["a".to_string()]);
    assert_eq!(transport.cancelled(), vec!["a".to_string()]);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let state = t.store.get_state("research-1").unwrap();
    assert!(!state.is_completed("a"));
    assert_eq!(state.active_step("a").unwrap().status, ExecutionStatus::Cancelled);
    assert!(state.is_cancelled());

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_finalize_discards_late_completion() {
    let transport = ScriptedTransport::new();
    transport.script("a", vec![Reply::Delayed(150)]);
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        transport.clone(),
        None,
        fast_config(),
    )
    .await;

    delegate_all(&t.conductor).await;
    call!(t.conductor, |reply| ConductorMsg::Finalize { reply })
        .unwrap()
        .unwrap();
    assert_eq!(transport.cancelled(), vec!["a".to_string()]);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(state.current_phase(), OrchestrationPhase::Completed);
    assert!(!state.is_completed("a"));
    assert_eq!(state.active_step("a").unwrap().status, ExecutionStatus::Cancelled);
    assert!(!state.is_cancelled());
    assert_eq!(t.store.cleanup(0.0), vec!["research-1".to_string()]);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_finalize_stops_retries_of_late_failures() {
    let transport = ScriptedTransport::new();
    transport.script("a", vec![Reply::Hang, Reply::Ok(serde_json::json!({"status": "success"}))]);
    let mut slow = step("a", "web-research", &[], 1);
    slow.timeout_ms = Some(40);
    let t = setup_test_conductor(plan(vec![slow]), transport.clone(), None, fast_config()).await;

    delegate_all(&t.conductor).await;
    call!(t.conductor, |reply| ConductorMsg::Finalize { reply })
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(state.current_phase(), OrchestrationPhase::Completed);
    assert_eq!(transport.calls_for("a"), 1);
    assert!(state.issues().is_empty());

    let again = call!(t.conductor, |reply| ConductorMsg::Delegate {
        step_ids: Vec::new(),
        reply,
    })
    .unwrap();
    assert!(matches!(again, Err(ConductorError::InvalidRequest(_))));

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_streaming_progress_is_published() {
    let transport = ScriptedTransport::streaming();
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        transport,
        None,
        fast_config(),
    )
    .await;
    let mut rx = t.events.subscribe();

    delegate_all(&t.conductor).await;
    assert!(wait_for(&t.store, |s| s.is_completed("a")).await);

    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ConductorEvent::StepProgress { message, .. } = event {
            progress.push(message);
        }
    }
    assert_eq!(progress, vec!["searching for a".to_string()]);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_unavailable_worker_falls_back_to_alternate() {
    let transport = ScriptedTransport::new();
    transport.script("a", vec![Reply::Fail(TransportFailure::http(503, "service unavailable"))]);
    let t = setup_test_conductor(
        plan(vec![step("a", "web-research", &[], 1)]),
        transport.clone(),
        None,
        fast_config(),
    )
    .await;

    delegate_all(&t.conductor).await;
    assert!(wait_for(&t.store, |s| s.is_completed("a")).await);

    let workers: Vec<WorkerType> = transport.calls().into_iter().map(|(w, _)| w).collect();
    assert_eq!(workers, vec![WorkerType::WebResearch, WorkerType::AcademicResearch]);
    let state = t.store.get_state("research-1").unwrap();
    let issue = &state.issues()[0];
    assert_eq!(issue.severity, IssueSeverity::Medium);
    assert!(issue.resolution.as_deref().unwrap().contains("academic-research"));

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_fallback_strategy_after_exhausted_retries() {
    let transport = ScriptedTransport::new();
    transport.script(
        "a",
        (0..4)
            .map(|_| Reply::Fail(TransportFailure::named("ECONNREFUSED", "connection refused")))
            .collect(),
    );
    let mut flaky = step("a", "web-research", &[], 1);
    flaky.fallback_strategies = vec!["broaden-scope".to_string()];
    let t = setup_test_conductor(plan(vec![flaky]), transport.clone(), None, fast_config()).await;

    delegate_all(&t.conductor).await;
    assert!(wait_for(&t.store, |s| s.is_completed("a")).await);

    let calls = transport.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls[3].1.parameters.get("fallbackStrategy").is_none());
    assert_eq!(calls[4].1.parameters["fallbackStrategy"], "broaden-scope");
    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(state.issues().len(), 1);
    assert_eq!(state.issues()[0].severity, IssueSeverity::Medium);

    t.conductor.stop(None);
}

#[tokio::test]
async fn test_data_quality_failure_escalates() {
    let transport = ScriptedTransport::new();
    transport.script(
        "a",
        vec![Reply::Fail(TransportFailure::http(400, "invalid query format"))],
    );
    let mut flaky = step("a", "web-research", &[], 1);
    flaky.description = "Summarize market reports".to_string();
    let t = setup_test_conductor(plan(vec![flaky]), transport.clone(), None, fast_config()).await;

    delegate_all(&t.conductor).await;
    assert!(wait_for(&t.store, |s| !s.issues().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = t.store.get_state("research-1").unwrap();
    assert_eq!(state.issues()[0].issue_type, IssueType::DataQuality);
    assert_eq!(state.active_step("a").unwrap().status, ExecutionStatus::Failed);
    assert_eq!(transport.calls_for("a"), 1);

    t.conductor.stop(None);
}
