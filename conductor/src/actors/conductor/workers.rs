//! Worker call adapters for delegated research steps.
//!
//! The wire transport itself lives outside the core; the conductor only sees the
//! `AgentTransport` port. Responses come back in several shapes and are folded
//! into a `StepResult` by `normalize_response`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared_types::{SourceCitation, SourceType, StepResult, StepResultStatus, WorkerType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::actors::conductor::delegator::DelegationRequest;
use crate::actors::conductor::protocol::StepOutcome;

pub type SharedAgentTransport = Arc<dyn AgentTransport>;

/// Port to the remote specialist workers.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(
        &self,
        worker_type: WorkerType,
        request: &DelegationRequest,
    ) -> Result<Value, TransportFailure>;

    /// Best-effort cancellation of an in-flight request
    async fn cancel(&self, step_id: &str) -> bool;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Streaming variant; progress events go to `events`, the final payload is returned.
    async fn send_stream(
        &self,
        worker_type: WorkerType,
        request: &DelegationRequest,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<Value, TransportFailure> {
        drop(events);
        self.send(worker_type, request).await
    }
}

/// Progressive update from a streaming worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub message: String,
    #[serde(default)]
    pub progress: Option<f64>,
}

// ============================================================================
// Failures
// ============================================================================

/// HTTP status or a named transport error code such as `ECONNRESET`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FailureCode {
    Http(u16),
    Named(String),
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCode::Http(status) => write!(f, "{status}"),
            FailureCode::Named(name) => f.write_str(name),
        }
    }
}

/// Recoverable transport-level failure; data for the recovery policy, not a propagated error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TransportFailure {
    #[serde(default)]
    pub code: Option<FailureCode>,
    #[serde(default)]
    pub message: String,
}

impl TransportFailure {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(FailureCode::Http(status)),
            message: message.into(),
        }
    }

    pub fn named(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(FailureCode::Named(code.into())),
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::named("ETIMEDOUT", format!("request timed out after {timeout_ms}ms"))
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, self.message.is_empty()) {
            (Some(code), false) => write!(f, "[{code}] {}", self.message),
            (Some(code), true) => write!(f, "[{code}]"),
            (None, false) => f.write_str(&self.message),
            (None, true) => f.write_str("unknown transport failure"),
        }
    }
}

impl std::error::Error for TransportFailure {}

// ============================================================================
// Dispatch
// ============================================================================

/// Call one worker under the request timeout and normalize whatever comes back.
pub async fn call_worker(
    transport: SharedAgentTransport,
    worker_type: WorkerType,
    request: DelegationRequest,
    progress: Option<mpsc::UnboundedSender<StreamEvent>>,
) -> StepOutcome {
    let started = Instant::now();
    let timeout = Duration::from_millis(request.timeout);
    let call = async {
        match progress {
            Some(events) => transport.send_stream(worker_type, &request, events).await,
            None => transport.send(worker_type, &request).await,
        }
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(raw)) => {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            StepOutcome::Completed(normalize_response(
                &request.step_id,
                worker_type,
                raw,
                elapsed_ms,
            ))
        }
        Ok(Err(failure)) => StepOutcome::Failed(failure),
        Err(_) => StepOutcome::Failed(TransportFailure::timeout(request.timeout)),
    }
}

// ============================================================================
// Response normalization
// ============================================================================

/// Shape detected in a worker response, in precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    StepResult,
    Synthesis,
    RawStatus,
    Unrecognized,
}

/// Precedence: step-result object, synthesis object, raw status object, anything else.
pub fn detect_shape(raw: &Value) -> ResponseShape {
    let Some(obj) = raw.as_object() else {
        return ResponseShape::Unrecognized;
    };
    let has_status = obj.get("status").map(Value::is_string).unwrap_or(false);
    if has_status && (obj.contains_key("stepId") || obj.contains_key("step_id")) {
        ResponseShape::StepResult
    } else if obj.contains_key("synthesis")
        || (obj.contains_key("summary") && obj.contains_key("findings"))
    {
        ResponseShape::Synthesis
    } else if has_status {
        ResponseShape::RawStatus
    } else {
        ResponseShape::Unrecognized
    }
}

/// Fold a heterogeneous worker response into a `StepResult`.
///
/// A missing processing time is filled from `elapsed_ms`; a missing quality
/// score stays NaN.
pub fn normalize_response(
    step_id: &str,
    worker_type: WorkerType,
    raw: Value,
    elapsed_ms: f64,
) -> StepResult {
    let shape = detect_shape(&raw);
    let mut result = match (shape, raw.as_object()) {
        (ResponseShape::StepResult, Some(obj)) => {
            let status = obj
                .get("status")
                .and_then(Value::as_str)
                .and_then(parse_result_status)
                .unwrap_or(StepResultStatus::Success);
            let mut result = StepResult::new(step_id, status);
            result.data = first_of(obj, &["data", "result", "output"])
                .cloned()
                .unwrap_or(Value::Null);
            fill_common(&mut result, obj);
            result
        }
        (ResponseShape::Synthesis, Some(obj)) => {
            let mut result = StepResult::new(step_id, StepResultStatus::Success);
            result.data = match obj.get("synthesis") {
                Some(inner @ Value::Object(_)) => inner.clone(),
                _ => raw.clone(),
            };
            fill_common(&mut result, obj);
            if result.quality_score.is_nan() {
                if let Some(confidence) = number(obj, &["confidence", "overallConfidence"]) {
                    result.quality_score = confidence;
                }
            }
            result
        }
        (ResponseShape::RawStatus, Some(obj)) => {
            let status = obj
                .get("status")
                .and_then(Value::as_str)
                .and_then(parse_result_status)
                .unwrap_or(StepResultStatus::Success);
            let mut result = StepResult::new(step_id, status);
            result.data = obj.get("data").cloned().unwrap_or_else(|| raw.clone());
            fill_common(&mut result, obj);
            result
        }
        _ => {
            let mut result = StepResult::new(step_id, StepResultStatus::Success);
            result.data = raw.clone();
            result
        }
    };

    if result.processing_time_ms.is_nan() && !has_processing_time(&raw) {
        result.processing_time_ms = elapsed_ms;
    }
    result.agent_type.get_or_insert(worker_type);
    tracing::debug!(step_id = %step_id, shape = ?shape, "Normalized worker response");
    result
}

pub fn parse_result_status(raw: &str) -> Option<StepResultStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "success" | "succeeded" | "completed" | "complete" | "ok" | "done" => {
            Some(StepResultStatus::Success)
        }
        "partial" | "partial_success" | "partial-success" => Some(StepResultStatus::Partial),
        "failure" | "failed" | "error" => Some(StepResultStatus::Failure),
        _ => None,
    }
}

/// Lenient source list decoding; entries without a url or title are dropped.
pub fn parse_sources(raw: &Value) -> Vec<SourceCitation> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            if let Some(url) = item.as_str() {
                return Some(SourceCitation {
                    title: url.to_string(),
                    url: url.to_string(),
                    source_type: SourceType::Web,
                    credibility_score: 0.5,
                    accessed_at: Utc::now(),
                });
            }
            let obj = item.as_object()?;
            let url = text(obj, &["url", "link", "href"]).unwrap_or_default();
            let title = text(obj, &["title", "name"]).unwrap_or_default();
            if url.is_empty() && title.is_empty() {
                return None;
            }
            let source_type = text(obj, &["type", "sourceType", "source_type"])
                .and_then(|t| serde_json::from_value(Value::String(t.to_ascii_lowercase())).ok())
                .unwrap_or(SourceType::Other);
            let accessed_at = text(obj, &["accessedAt", "accessed_at"])
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            Some(SourceCitation {
                title: if title.is_empty() { url.clone() } else { title },
                url,
                source_type,
                credibility_score: number(obj, &["credibilityScore", "credibility_score", "credibility"])
                    .unwrap_or(0.5),
                accessed_at,
            })
        })
        .collect()
}

fn fill_common(result: &mut StepResult, obj: &Map<String, Value>) {
    if let Some(sources) = first_of(obj, &["sources", "citations"]) {
        result.sources = parse_sources(sources);
    }
    if let Some(quality) = first_of(obj, &["qualityScore", "quality_score"]) {
        result.quality_score = quality.as_f64().unwrap_or(f64::NAN);
    }
    if let Some(time) = first_of(obj, &["processingTime", "processing_time", "processing_time_ms"]) {
        result.processing_time_ms = time.as_f64().unwrap_or(f64::NAN);
    }
    if let Some(Value::Array(issues)) = obj.get("issues") {
        result.issues = issues
            .iter()
            .filter_map(|issue| match issue {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => text(o, &["description", "message"]),
                _ => None,
            })
            .collect();
    }
    if let Some(dimension) = text(obj, &["dimension"]) {
        result.dimension = Some(dimension);
    }
    if let Some(agent_type) = text(obj, &["agentType", "agent_type"]).and_then(|t| WorkerType::parse(&t)) {
        result.agent_type = Some(agent_type);
    }
}

fn has_processing_time(raw: &Value) -> bool {
    raw.as_object()
        .map(|obj| first_of(obj, &["processingTime", "processing_time", "processing_time_ms"]).is_some())
        .unwrap_or(false)
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_of(obj, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    first_of(obj, keys).and_then(Value::as_f64)
}
