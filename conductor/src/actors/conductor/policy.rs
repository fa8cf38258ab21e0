//! Decision oracle port and decision decoding.
//!
//! The oracle is an opaque async function returning free text. Decoding is
//! defensive: anything unparsable becomes the fixed fallback decision, and
//! unknown action labels decode to `NextAction::Unknown`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared_types::{Issue, OrchestrationPhase, ProgressMetrics};
use std::sync::Arc;

use crate::actors::conductor::protocol::ConductorError;
use crate::actors::conductor::state::OrchestrationState;

pub type SharedDecisionOracle = Arc<dyn DecisionOracle>;

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn propose(
        &self,
        summary: &StateSummary,
        messages: &[OracleMessage],
    ) -> Result<String, ConductorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleMessage {
    pub role: String,
    pub content: String,
}

impl OracleMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Structured view of one research handed to the oracle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSummary {
    pub research_id: String,
    pub topic: String,
    pub objectives: Vec<String>,
    pub current_phase: OrchestrationPhase,
    pub progress: ProgressMetrics,
    pub pending_steps: Vec<String>,
    pub active_steps: Vec<String>,
    pub completed_steps: Vec<String>,
    pub open_issues: Vec<Issue>,
}

impl StateSummary {
    pub fn from_state(state: &OrchestrationState) -> Self {
        Self {
            research_id: state.research_id().to_string(),
            topic: state.plan().topic.clone(),
            objectives: state.plan().objectives.clone(),
            current_phase: state.current_phase(),
            progress: state.progress().clone(),
            pending_steps: state.untouched_step_ids(),
            active_steps: state.active_steps().keys().cloned().collect(),
            completed_steps: state.completed_steps().keys().cloned().collect(),
            open_issues: state.open_issues().into_iter().cloned().collect(),
        }
    }
}

// ============================================================================
// Decision
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum NextAction {
    DelegateSteps {
        /// Empty means every ready step
        step_ids: Vec<String>,
    },
    MonitorProgress,
    StartSynthesis,
    ResolveIssue {
        issue_id: String,
        resolution: String,
    },
    CancelResearch,
    Unknown {
        label: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionMetrics {
    pub completed_steps: usize,
    pub total_steps: usize,
    pub estimated_time_remaining: f64,
    pub overall_confidence: f64,
    pub quality_score: f64,
}

impl Default for DecisionMetrics {
    fn default() -> Self {
        Self {
            completed_steps: 0,
            total_steps: 0,
            estimated_time_remaining: 0.0,
            overall_confidence: 0.0,
            quality_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationDecision {
    pub current_phase: Option<OrchestrationPhase>,
    pub next_actions: Vec<NextAction>,
    pub active_tasks: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub issues: Vec<String>,
    pub progress_metrics: DecisionMetrics,
    /// True when this is the substituted fallback, not oracle output
    pub is_fallback: bool,
}

/// Fixed decision used whenever oracle output cannot be decoded.
pub fn fallback_decision() -> OrchestrationDecision {
    OrchestrationDecision {
        current_phase: Some(OrchestrationPhase::Execution),
        next_actions: vec![NextAction::MonitorProgress],
        active_tasks: Vec::new(),
        completed_tasks: Vec::new(),
        issues: Vec::new(),
        progress_metrics: DecisionMetrics::default(),
        is_fallback: true,
    }
}

/// Decode oracle text; never fails.
pub fn parse_decision(text: &str) -> OrchestrationDecision {
    match extract_json_object(text) {
        Some(Value::Object(obj)) => decode_decision(&obj),
        _ => {
            tracing::warn!(
                preview = %text.chars().take(120).collect::<String>(),
                "Oracle output is not a JSON object; using fallback decision"
            );
            fallback_decision()
        }
    }
}

/// Accept bare JSON, fenced JSON, or JSON embedded in prose (outermost braces).
fn extract_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn decode_decision(obj: &Map<String, Value>) -> OrchestrationDecision {
    let current_phase = field(obj, &["currentPhase", "current_phase", "phase"])
        .and_then(Value::as_str)
        .and_then(parse_phase);

    let next_actions = field(obj, &["nextActions", "next_actions", "actions"])
        .and_then(Value::as_array)
        .map(|items| items.iter().map(decode_action).collect())
        .unwrap_or_default();

    let metrics = field(obj, &["progressMetrics", "progress_metrics"])
        .and_then(Value::as_object)
        .map(decode_metrics)
        .unwrap_or_default();

    OrchestrationDecision {
        current_phase,
        next_actions,
        active_tasks: string_list(field(obj, &["activeTasks", "active_tasks"])),
        completed_tasks: string_list(field(obj, &["completedTasks", "completed_tasks"])),
        issues: string_list(field(obj, &["issues"])),
        progress_metrics: metrics,
        is_fallback: false,
    }
}

fn decode_action(raw: &Value) -> NextAction {
    let (label, obj) = match raw {
        Value::String(label) => (label.clone(), None),
        Value::Object(obj) => (
            field(obj, &["action", "type", "name"])
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(obj),
        ),
        other => (other.to_string(), None),
    };

    let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
    match normalized.as_str() {
        "delegate-steps" | "delegate" | "delegate-tasks" => NextAction::DelegateSteps {
            step_ids: string_list(
                obj.and_then(|o| field(o, &["stepIds", "step_ids", "steps", "targets"])),
            ),
        },
        "monitor-progress" | "monitor" => NextAction::MonitorProgress,
        "start-synthesis" | "synthesize" | "synthesis" => NextAction::StartSynthesis,
        "resolve-issue" => {
            let issue_id = obj
                .and_then(|o| field(o, &["issueId", "issue_id", "id"]))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if issue_id.is_empty() {
                return NextAction::Unknown { label };
            }
            NextAction::ResolveIssue {
                issue_id,
                resolution: obj
                    .and_then(|o| field(o, &["resolution", "note"]))
                    .and_then(Value::as_str)
                    .unwrap_or("resolved by orchestration decision")
                    .to_string(),
            }
        }
        "cancel-research" | "cancel" => NextAction::CancelResearch,
        _ => NextAction::Unknown { label },
    }
}

fn decode_metrics(obj: &Map<String, Value>) -> DecisionMetrics {
    let num = |keys: &[&str]| field(obj, keys).and_then(Value::as_f64);
    DecisionMetrics {
        completed_steps: num(&["completedSteps", "completed_steps"]).unwrap_or(0.0).max(0.0) as usize,
        total_steps: num(&["totalSteps", "total_steps"]).unwrap_or(0.0).max(0.0) as usize,
        estimated_time_remaining: num(&["estimatedTimeRemaining", "estimated_time_remaining"])
            .unwrap_or(0.0),
        overall_confidence: num(&["overallConfidence", "overall_confidence"]).unwrap_or(0.0),
        quality_score: num(&["qualityScore", "quality_score"]).unwrap_or(0.0),
    }
}

fn parse_phase(raw: &str) -> Option<OrchestrationPhase> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "planning" => Some(OrchestrationPhase::Planning),
        "execution" | "executing" => Some(OrchestrationPhase::Execution),
        "synthesis" | "synthesizing" => Some(OrchestrationPhase::Synthesis),
        "completed" | "complete" | "done" => Some(OrchestrationPhase::Completed),
        _ => None,
    }
}

fn string_list(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => field(o, &["id", "stepId", "description"])
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}
