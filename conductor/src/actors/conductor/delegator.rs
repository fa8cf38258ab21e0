//! Delegation planning
//!
//! Turns plan steps into transport-agnostic `DelegationRequest`s. This half is
//! pure: it reads an `OrchestrationState` and never mutates it. The actor runtime
//! records executions and performs the fan-out.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_types::{
    Issue, IssueSeverity, IssueType, ResearchStep, WorkerType,
};
use std::collections::HashSet;

use crate::actors::conductor::graph::cyclic_steps;
use crate::actors::conductor::state::OrchestrationState;
use crate::config::ConductorConfig;

/// Concrete task a worker is asked to perform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    FactChecking,
    SourceDiscovery,
    WebSearch,
    LiteratureReview,
    CitationAnalysis,
    AcademicSearch,
    TrendMonitoring,
    EventTracking,
    NewsSearch,
    Visualization,
    StatisticalAnalysis,
    DataProcessing,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FactChecking => "fact-checking",
            TaskType::SourceDiscovery => "source-discovery",
            TaskType::WebSearch => "web-search",
            TaskType::LiteratureReview => "literature-review",
            TaskType::CitationAnalysis => "citation-analysis",
            TaskType::AcademicSearch => "academic-search",
            TaskType::TrendMonitoring => "trend-monitoring",
            TaskType::EventTracking => "event-tracking",
            TaskType::NewsSearch => "news-search",
            TaskType::Visualization => "visualization",
            TaskType::StatisticalAnalysis => "statistical-analysis",
            TaskType::DataProcessing => "data-processing",
        }
    }
}

/// Request handed to the agent transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    pub step_id: String,
    pub task_type: TaskType,
    pub parameters: Value,
    pub priority: i32,
    /// Milliseconds
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDelegation {
    pub worker_type: WorkerType,
    pub request: DelegationRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStep {
    pub step_id: String,
    /// None for silently skipped pseudo-type steps
    pub issue: Option<Issue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationBatch {
    /// In dispatch order: descending priority, plan order for ties
    pub delegations: Vec<PlannedDelegation>,
    pub skipped: Vec<SkippedStep>,
    /// Steps held back until their dependencies complete
    pub waiting: Vec<String>,
}

/// Steps whose dependencies are all completed and that are not already owned by
/// an in-flight execution or completed, sorted by descending priority.
pub fn executable_steps<'a>(
    steps: &[&'a ResearchStep],
    state: &OrchestrationState,
) -> Vec<&'a ResearchStep> {
    let mut ready: Vec<&ResearchStep> = steps
        .iter()
        .copied()
        .filter(|step| !state.is_completed(&step.id))
        .filter(|step| {
            state
                .active_step(&step.id)
                .map(|execution| !execution.is_in_flight())
                .unwrap_or(true)
        })
        .filter(|step| step.dependencies.iter().all(|dep| state.is_completed(dep)))
        .collect();
    // sort_by is stable, so ties keep plan order
    ready.sort_by(|a, b| b.priority.cmp(&a.priority));
    ready
}

/// Pick a concrete task from the worker type and description keywords.
pub fn infer_task_type(worker_type: WorkerType, description: &str) -> TaskType {
    let text = description.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| text.contains(needle));
    match worker_type {
        WorkerType::AcademicResearch => {
            if has(&["review", "literature"]) {
                TaskType::LiteratureReview
            } else if has(&["citation"]) {
                TaskType::CitationAnalysis
            } else {
                TaskType::AcademicSearch
            }
        }
        WorkerType::NewsResearch => {
            if has(&["trend"]) {
                TaskType::TrendMonitoring
            } else if has(&["event", "timeline"]) {
                TaskType::EventTracking
            } else {
                TaskType::NewsSearch
            }
        }
        WorkerType::DataAnalysis => {
            if has(&["chart", "visual", "graph"]) {
                TaskType::Visualization
            } else if has(&["statistic", "correlation"]) {
                TaskType::StatisticalAnalysis
            } else {
                TaskType::DataProcessing
            }
        }
        WorkerType::WebResearch | WorkerType::Planning | WorkerType::Orchestrator => {
            if has(&["fact", "verify"]) {
                TaskType::FactChecking
            } else if has(&["source"]) {
                TaskType::SourceDiscovery
            } else {
                TaskType::WebSearch
            }
        }
    }
}

/// Build the worker-specific request for one step.
pub fn build_request(
    step: &ResearchStep,
    worker_type: WorkerType,
    topic: &str,
    fallback_strategy: Option<&str>,
    config: &ConductorConfig,
) -> DelegationRequest {
    let query = if step.description.trim().is_empty() {
        topic.to_string()
    } else {
        format!("{topic}: {}", step.description.trim())
    };

    let mut parameters = match worker_type {
        WorkerType::AcademicResearch => json!({
            "query": query,
            "databases": config.academic_databases,
            "peerReviewedOnly": config.academic_peer_reviewed_only,
        }),
        WorkerType::NewsResearch => {
            let to = Utc::now();
            let from = to - Duration::days(config.news_window_days);
            json!({
                "query": query,
                "dateRange": {"from": from.to_rfc3339(), "to": to.to_rfc3339()},
                "maxArticles": config.news_max_articles,
            })
        }
        WorkerType::DataAnalysis => json!({
            "objective": query,
            "chartTypes": config.chart_types,
            "dataSources": step.dependencies,
        }),
        WorkerType::WebResearch | WorkerType::Planning | WorkerType::Orchestrator => json!({
            "query": query,
            "maxResults": config.web_max_results,
        }),
    };
    if let (Some(strategy), Some(obj)) = (fallback_strategy, parameters.as_object_mut()) {
        obj.insert("fallbackStrategy".to_string(), Value::String(strategy.to_string()));
    }

    DelegationRequest {
        step_id: step.id.clone(),
        task_type: infer_task_type(worker_type, &step.description),
        parameters,
        priority: step.priority,
        timeout: step
            .timeout_ms
            .unwrap_or_else(|| config.timeouts.for_worker(worker_type)),
    }
}

/// Plan one delegation batch for the given steps.
///
/// Malformed steps (unknown worker type, cyclic dependency) are skipped with a
/// low-severity issue so the rest of the batch still goes out.
pub fn plan_batch(
    steps: &[&ResearchStep],
    state: &OrchestrationState,
    config: &ConductorConfig,
) -> DelegationBatch {
    let mut batch = DelegationBatch::default();
    let cyclic: HashSet<String> = cyclic_steps(state.plan()).into_iter().collect();

    let mut candidates = Vec::new();
    for step in steps.iter().copied() {
        if cyclic.contains(&step.id) || step.dependencies.iter().any(|dep| dep == &step.id) {
            batch.skipped.push(SkippedStep {
                step_id: step.id.clone(),
                issue: Some(Issue::new(
                    IssueType::DependencyBlocked,
                    IssueSeverity::Low,
                    format!("Step {} has a cyclic dependency and was skipped", step.id),
                    vec![step.id.clone()],
                )),
            });
            continue;
        }
        match step.worker_type() {
            None => batch.skipped.push(SkippedStep {
                step_id: step.id.clone(),
                issue: Some(Issue::new(
                    IssueType::AgentFailure,
                    IssueSeverity::Low,
                    format!(
                        "Step {} targets unknown worker type '{}' and was skipped",
                        step.id, step.agent_type
                    ),
                    vec![step.id.clone()],
                )),
            }),
            Some(worker_type) if !worker_type.is_delegatable() => {
                batch.skipped.push(SkippedStep {
                    step_id: step.id.clone(),
                    issue: None,
                })
            }
            Some(_) => candidates.push(step),
        }
    }

    let ready = executable_steps(&candidates, state);
    let ready_ids: HashSet<&str> = ready.iter().map(|step| step.id.as_str()).collect();
    batch.waiting = candidates
        .iter()
        .filter(|step| !ready_ids.contains(step.id.as_str()))
        .filter(|step| !state.is_completed(&step.id))
        .filter(|step| !step.dependencies.iter().all(|dep| state.is_completed(dep)))
        .map(|step| step.id.clone())
        .collect();

    for step in ready {
        // checked above; candidates only hold delegatable worker types
        let Some(worker_type) = step.worker_type() else {
            continue;
        };
        let request = build_request(step, worker_type, &state.plan().topic, None, config);
        batch.delegations.push(PlannedDelegation {
            worker_type,
            request,
        });
    }

    batch
}
