//! Failure classification and recovery decisions
//!
//! `handle_step_failure` reads the current state and returns a `RecoveryDecision`;
//! it never mutates state. The actor runtime applies the decision.

use serde::{Deserialize, Serialize};
use shared_types::{
    AgentId, ExecutionStatus, Issue, IssueSeverity, IssueType, ResearchStep, StepExecution,
    WorkerType,
};

use crate::actors::conductor::graph::transitive_dependents;
use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::state::OrchestrationState;
use crate::actors::conductor::workers::{FailureCode, TransportFailure};
use crate::config::RecoveryConfig;

const NETWORK_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EPIPE",
    "EAI_AGAIN",
    "ECONNABORTED",
    "ESOCKETTIMEDOUT",
];

const NETWORK_PHRASES: &[&str] = &["timeout", "timed out", "network", "connection reset"];

const REPARAMETERIZABLE: &[&str] = &["search", "query", "filter"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    Temporary,
    RateLimit,
    AgentUnavailable,
    DataQuality,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryAction {
    Retry,
    Fallback,
    Escalate,
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryDecision {
    pub action: RecoveryAction,
    pub class: FailureClass,
    /// Delay before the new execution is dispatched
    pub delay_ms: u64,
    /// Replacement execution for retry and fallback
    pub new_execution: Option<StepExecution>,
    pub issue: Option<Issue>,
}

/// First match wins: network signals, rate limit, unavailable, data quality, auth.
pub fn classify_failure(failure: &TransportFailure) -> FailureClass {
    let message = failure.message.to_lowercase();
    if failure.code.is_none() && message.trim().is_empty() {
        return FailureClass::Unknown;
    }
    let http = match &failure.code {
        Some(FailureCode::Http(status)) => Some(*status),
        _ => None,
    };

    if is_network_signal(failure) {
        FailureClass::Temporary
    } else if http == Some(429) || message.contains("rate limit") {
        FailureClass::RateLimit
    } else if http == Some(503) || message.contains("unavailable") {
        FailureClass::AgentUnavailable
    } else if ["invalid", "data", "format"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        FailureClass::DataQuality
    } else if matches!(http, Some(401) | Some(403)) {
        FailureClass::Critical
    } else {
        FailureClass::Temporary
    }
}

/// `min(1000 * 2^retry_count, 30000)` with the default config
pub fn calculate_backoff_delay(retry_count: u32) -> u64 {
    let config = RecoveryConfig::default();
    backoff_delay(retry_count, &config)
}

pub fn backoff_delay(retry_count: u32, config: &RecoveryConfig) -> u64 {
    let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    config
        .backoff_base_ms
        .saturating_mul(factor)
        .min(config.backoff_cap_ms)
}

pub fn retry_ceiling(class: FailureClass, config: &RecoveryConfig) -> u32 {
    match class {
        FailureClass::Temporary => config.temporary_retries,
        FailureClass::RateLimit => config.rate_limit_retries,
        FailureClass::AgentUnavailable => config.agent_unavailable_retries,
        FailureClass::DataQuality => config.data_quality_retries,
        FailureClass::Critical => config.critical_retries,
        FailureClass::Unknown => config.unknown_retries,
    }
}

pub fn issue_type_for(class: FailureClass, failure: &TransportFailure) -> IssueType {
    match class {
        FailureClass::Temporary if is_timeout_signal(failure) => IssueType::Timeout,
        FailureClass::RateLimit => IssueType::ResourceExhausted,
        FailureClass::DataQuality => IssueType::DataQuality,
        _ => IssueType::AgentFailure,
    }
}

/// Decide how to recover from a failed attempt of `step_id`.
pub fn handle_step_failure(
    state: &OrchestrationState,
    step_id: &str,
    failure: &TransportFailure,
    config: &RecoveryConfig,
) -> Result<RecoveryDecision, ConductorError> {
    let step = state
        .plan()
        .step(step_id)
        .ok_or_else(|| ConductorError::NotFound(format!("step {step_id}")))?;
    let execution = state
        .active_step(step_id)
        .ok_or_else(|| ConductorError::NotFound(format!("active step {step_id}")))?;

    let class = classify_failure(failure);
    let ceiling = retry_ceiling(class, config);
    let under_ceiling = execution.retry_count < ceiling;
    let issue_type = issue_type_for(class, failure);

    tracing::debug!(
        research_id = %state.research_id(),
        step_id = %step_id,
        class = ?class,
        retry_count = execution.retry_count,
        ceiling,
        "Classified step failure"
    );

    let decision = match class {
        FailureClass::Critical => {
            let mut affected = vec![step_id.to_string()];
            affected.extend(transitive_dependents(state.plan(), step_id));
            escalate(
                class,
                Issue::new(
                    IssueType::AgentFailure,
                    IssueSeverity::High,
                    format!("Critical failure on step {step_id}: {failure}"),
                    affected,
                ),
            )
        }
        FailureClass::Temporary | FailureClass::RateLimit | FailureClass::Unknown => {
            if under_ceiling {
                retry(class, execution, backoff_delay(execution.retry_count, config))
            } else {
                exhausted(state, step, execution, class, issue_type, failure, config)
            }
        }
        FailureClass::AgentUnavailable => {
            if under_ceiling {
                match alternate_worker(state, step, execution, config) {
                    Some(alternate) => {
                        let mut next = next_execution(execution);
                        next.agent_id = AgentId::for_worker(alternate).0;
                        next.fallback_strategy = Some(format!("alternate-worker:{alternate}"));
                        RecoveryDecision {
                            action: RecoveryAction::Fallback,
                            class,
                            delay_ms: 0,
                            new_execution: Some(next),
                            issue: Some(
                                Issue::new(
                                    IssueType::AgentFailure,
                                    IssueSeverity::Medium,
                                    format!("Worker unavailable for step {step_id}: {failure}"),
                                    vec![step_id.to_string()],
                                )
                                .with_resolution(format!("re-delegated to {alternate}")),
                            ),
                        }
                    }
                    None => escalate(
                        class,
                        Issue::new(
                            IssueType::AgentFailure,
                            IssueSeverity::High,
                            format!(
                                "Worker unavailable for step {step_id} and no alternate worker is free: {failure}"
                            ),
                            vec![step_id.to_string()],
                        ),
                    ),
                }
            } else {
                escalate(
                    class,
                    Issue::new(
                        IssueType::AgentFailure,
                        IssueSeverity::High,
                        format!("Worker still unavailable for step {step_id} after {} retries", execution.retry_count),
                        vec![step_id.to_string()],
                    ),
                )
            }
        }
        FailureClass::DataQuality => {
            let description = step.description.to_lowercase();
            let reparameterizable = REPARAMETERIZABLE
                .iter()
                .any(|needle| description.contains(needle));
            if under_ceiling && reparameterizable {
                retry(class, execution, 0)
            } else {
                escalate(
                    class,
                    Issue::new(
                        IssueType::DataQuality,
                        IssueSeverity::Medium,
                        format!("Data quality failure on step {step_id}: {failure}"),
                        vec![step_id.to_string()],
                    ),
                )
            }
        }
    };

    Ok(decision)
}

fn exhausted(
    state: &OrchestrationState,
    step: &ResearchStep,
    execution: &StepExecution,
    class: FailureClass,
    issue_type: IssueType,
    failure: &TransportFailure,
    config: &RecoveryConfig,
) -> RecoveryDecision {
    if let Some(strategy) = next_fallback_strategy(step, execution) {
        let mut next = next_execution(execution);
        next.retry_count = 0;
        next.fallback_strategy = Some(strategy.clone());
        return RecoveryDecision {
            action: RecoveryAction::Fallback,
            class,
            delay_ms: 0,
            new_execution: Some(next),
            issue: Some(
                Issue::new(
                    issue_type,
                    IssueSeverity::Medium,
                    format!(
                        "Retries exhausted for step {} after {} attempts: {failure}",
                        step.id, execution.retry_count
                    ),
                    vec![step.id.clone()],
                )
                .with_resolution(format!("fallback strategy '{strategy}' applied")),
            ),
        };
    }

    let dependents = transitive_dependents(state.plan(), &step.id);
    if step.priority >= config.high_priority_threshold
        && dependents.len() > config.critical_dependents_threshold
    {
        let count = dependents.len();
        let mut affected = vec![step.id.clone()];
        affected.extend(dependents);
        return escalate(
            class,
            Issue::new(
                issue_type,
                IssueSeverity::Critical,
                format!("Critical-path step {} failed after exhausting retries: {failure}", step.id),
                affected,
            )
            .with_resolution(format!(
                "escalated: step blocks {count} dependent steps"
            )),
        );
    }

    RecoveryDecision {
        action: RecoveryAction::Abort,
        class,
        delay_ms: 0,
        new_execution: None,
        issue: Some(Issue::new(
            issue_type,
            IssueSeverity::Low,
            format!("Step {} aborted after exhausting retries: {failure}", step.id),
            vec![step.id.clone()],
        )),
    }
}

fn retry(class: FailureClass, execution: &StepExecution, delay_ms: u64) -> RecoveryDecision {
    RecoveryDecision {
        action: RecoveryAction::Retry,
        class,
        delay_ms,
        new_execution: Some(next_execution(execution)),
        issue: None,
    }
}

fn escalate(class: FailureClass, issue: Issue) -> RecoveryDecision {
    RecoveryDecision {
        action: RecoveryAction::Escalate,
        class,
        delay_ms: 0,
        new_execution: None,
        issue: Some(issue),
    }
}

/// Pending copy of an execution carrying its attempt counter forward
fn next_execution(execution: &StepExecution) -> StepExecution {
    let mut next = StepExecution::new(execution.step_id.clone(), execution.agent_id.clone());
    next.status = ExecutionStatus::Pending;
    next.retry_count = execution.retry_count + 1;
    next.attempt = execution.attempt;
    next.fallback_strategy = execution.fallback_strategy.clone();
    next.progress_updates = execution.progress_updates.clone();
    next.started_at = execution.started_at;
    next
}

fn next_fallback_strategy(step: &ResearchStep, execution: &StepExecution) -> Option<String> {
    let next_index = match &execution.fallback_strategy {
        Some(current) => step
            .fallback_strategies
            .iter()
            .position(|s| s == current)
            .map(|i| i + 1)
            .unwrap_or(0),
        None => 0,
    };
    step.fallback_strategies.get(next_index).cloned()
}

fn alternate_worker(
    state: &OrchestrationState,
    step: &ResearchStep,
    execution: &StepExecution,
    config: &RecoveryConfig,
) -> Option<WorkerType> {
    let current = AgentId(execution.agent_id.clone())
        .worker_type()
        .or_else(|| step.worker_type());
    WorkerType::DELEGATABLE.into_iter().find(|candidate| {
        if Some(*candidate) == current || step.worker_type() == Some(*candidate) {
            return false;
        }
        let usage = state
            .plan()
            .steps
            .iter()
            .filter(|s| s.worker_type() == Some(*candidate))
            .count();
        usage < config.max_alternate_usage
    })
}

fn is_network_signal(failure: &TransportFailure) -> bool {
    let code_matches = match &failure.code {
        Some(FailureCode::Named(name)) => NETWORK_CODES
            .iter()
            .any(|code| code.eq_ignore_ascii_case(name)),
        Some(FailureCode::Http(status)) => matches!(status, 408 | 504),
        None => false,
    };
    let message = failure.message.to_lowercase();
    code_matches || NETWORK_PHRASES.iter().any(|phrase| message.contains(phrase))
}

fn is_timeout_signal(failure: &TransportFailure) -> bool {
    let message = failure.message.to_lowercase();
    let code = match &failure.code {
        Some(FailureCode::Named(name)) => {
            name.eq_ignore_ascii_case("ETIMEDOUT") || name.eq_ignore_ascii_case("ESOCKETTIMEDOUT")
        }
        Some(FailureCode::Http(status)) => matches!(status, 408 | 504),
        None => false,
    };
    code || message.contains("timeout") || message.contains("timed out")
}
