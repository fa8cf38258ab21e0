//! Shared research orchestration types
//!
//! These types are used by:
//! - The conductor runtime (state store, delegator, recovery, aggregation)
//! - Transport and notification adapters living outside the core
//!
//! Serializable with serde for JSON snapshots and event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a concrete worker instance a step was assigned to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AgentId(pub String);

impl AgentId {
    /// Allocate a fresh agent id scoped to a worker type, e.g. `news-research:6f1c...`
    pub fn for_worker(worker_type: WorkerType) -> Self {
        Self(format!("{}:{}", worker_type.as_str(), uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Worker type prefix of this id, if it carries one.
    pub fn worker_type(&self) -> Option<WorkerType> {
        self.0.split(':').next().and_then(WorkerType::parse)
    }
}

/// Specialist worker families a step can target.
///
/// `Planning` and `Orchestrator` are pseudo-types: steps carrying them are
/// handled inside the conductor and never delegated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerType {
    WebResearch,
    AcademicResearch,
    NewsResearch,
    DataAnalysis,
    Planning,
    Orchestrator,
}

impl WorkerType {
    /// Worker types that can receive delegated requests, in fallback search order.
    pub const DELEGATABLE: [WorkerType; 4] = [
        WorkerType::WebResearch,
        WorkerType::AcademicResearch,
        WorkerType::NewsResearch,
        WorkerType::DataAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerType::WebResearch => "web-research",
            WorkerType::AcademicResearch => "academic-research",
            WorkerType::NewsResearch => "news-research",
            WorkerType::DataAnalysis => "data-analysis",
            WorkerType::Planning => "planning",
            WorkerType::Orchestrator => "orchestrator",
        }
    }

    /// Lenient parse accepting kebab, snake and short aliases (`web`, `academic`...).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "web-research" | "web" | "web-search" => Some(WorkerType::WebResearch),
            "academic-research" | "academic" | "academic-search" => {
                Some(WorkerType::AcademicResearch)
            }
            "news-research" | "news" | "news-search" => Some(WorkerType::NewsResearch),
            "data-analysis" | "data" | "analysis" => Some(WorkerType::DataAnalysis),
            "planning" | "planner" => Some(WorkerType::Planning),
            "orchestrator" | "orchestrator-internal" | "conductor" => {
                Some(WorkerType::Orchestrator)
            }
            _ => None,
        }
    }

    pub fn is_delegatable(&self) -> bool {
        !matches!(self, WorkerType::Planning | WorkerType::Orchestrator)
    }
}

impl std::fmt::Display for WorkerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResearchMethodology {
    pub approach: String,
    #[serde(default)]
    pub phases: Vec<String>,
}

/// One schedulable unit of research work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchStep {
    /// Unique within a plan
    pub id: String,
    pub description: String,
    /// Raw worker type label as written in the plan; may be malformed
    pub agent_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Higher runs sooner
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub fallback_strategies: Vec<String>,
    /// Per-step override of the worker-type default timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ResearchStep {
    pub fn worker_type(&self) -> Option<WorkerType> {
        WorkerType::parse(&self.agent_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchPlan {
    pub topic: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub methodology: ResearchMethodology,
    pub steps: Vec<ResearchStep>,
}

impl ResearchPlan {
    pub fn step(&self, step_id: &str) -> Option<&ResearchStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// Position of a step in plan order (used for stable tie-breaking).
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == step_id)
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Fraction in [0, 1] when the worker reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// Runtime record of one step's attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepExecution {
    pub step_id: String,
    pub agent_id: String,
    pub status: ExecutionStatus,
    pub retry_count: u32,
    /// Monotonic dispatch counter; results tagged with an older attempt are stale
    #[serde(default)]
    pub attempt: u32,
    /// Fallback strategy label currently applied, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<String>,
    #[serde(default)]
    pub progress_updates: Vec<ProgressUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(step_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            status: ExecutionStatus::Pending,
            retry_count: 0,
            attempt: 0,
            fallback_strategy: None,
            progress_updates: Vec::new(),
            result: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// In-flight means a worker call or a scheduled retry still owns the step.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Pending | ExecutionStatus::Running
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationPhase {
    #[default]
    Planning,
    Execution,
    Synthesis,
    Completed,
}

impl OrchestrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationPhase::Planning => "planning",
            OrchestrationPhase::Execution => "execution",
            OrchestrationPhase::Synthesis => "synthesis",
            OrchestrationPhase::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProgressMetrics {
    pub completed_steps: usize,
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
    pub overall_confidence: f64,
}

impl ProgressMetrics {
    pub fn fraction_complete(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepResultStatus {
    Success,
    Partial,
    Failure,
}

fn nan() -> f64 {
    f64::NAN
}

/// JSON has no NaN; `null` round-trips back into NaN so degenerate scores survive snapshots.
fn nullable_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepResultStatus,
    /// Opaque worker payload
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub sources: Vec<SourceCitation>,
    /// In [0, 1]; NaN when the worker did not report one
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub quality_score: f64,
    /// Milliseconds; NaN when unknown
    #[serde(default = "nan", deserialize_with = "nullable_f64")]
    pub processing_time_ms: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    /// Subject-area tag used to section the synthesis report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    /// Worker type that produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<WorkerType>,
}

impl StepResult {
    pub fn new(step_id: impl Into<String>, status: StepResultStatus) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            data: serde_json::Value::Null,
            sources: Vec::new(),
            quality_score: f64::NAN,
            processing_time_ms: f64::NAN,
            issues: Vec::new(),
            dimension: None,
            agent_type: None,
        }
    }

    pub fn dimension_or_default(&self) -> &str {
        self.dimension
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_DIMENSION)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Web,
    Academic,
    Government,
    News,
    Database,
    #[serde(other)]
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Web => "web",
            SourceType::Academic => "academic",
            SourceType::Government => "government",
            SourceType::News => "news",
            SourceType::Database => "database",
            SourceType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCitation {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub credibility_score: f64,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Factual,
    Analytical,
    Speculative,
}

impl FindingCategory {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "factual" | "fact" => Some(FindingCategory::Factual),
            "analytical" | "analysis" => Some(FindingCategory::Analytical),
            "speculative" | "speculation" => Some(FindingCategory::Speculative),
            _ => None,
        }
    }
}

/// Extracted claim; `sources` index into the owning result's source list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub claim: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<usize>,
    pub category: FindingCategory,
}

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    AgentFailure,
    DataQuality,
    DependencyBlocked,
    ResourceExhausted,
    Timeout,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub description: String,
    pub affected_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn new(
        issue_type: IssueType,
        severity: IssueSeverity,
        description: impl Into<String>,
        affected_steps: Vec<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            issue_type,
            severity,
            description: description.into(),
            affected_steps,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

// ============================================================================
// Derived snapshots
// ============================================================================

/// Consolidated output of an aggregation pass. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchResult {
    pub research_id: String,
    pub topic: String,
    pub findings: Vec<Finding>,
    /// Deduplicated; `Finding::sources` index into this list
    pub sources: Vec<SourceCitation>,
    pub confidence: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub processing_time_ms: f64,
    pub total_steps: usize,
    pub successful_steps: usize,
    pub partial_steps: usize,
    pub failed_steps: usize,
    pub agent_types: Vec<WorkerType>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStatus {
    Confirmed,
    PartiallyConfirmed,
    Unconfirmed,
    Contradicted,
}

impl ValidationStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            ValidationStatus::Confirmed => "✓",
            ValidationStatus::PartiallyConfirmed => "◐",
            ValidationStatus::Unconfirmed => "○",
            ValidationStatus::Contradicted => "✗",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatedFinding {
    pub finding: Finding,
    pub dimension: String,
    pub step_id: String,
    pub status: ValidationStatus,
    pub consensus_level: f64,
    pub adjusted_confidence: f64,
    pub supporting_sources: usize,
    pub relevant_sources: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSection {
    pub title: String,
    pub dimension: String,
    pub content: String,
    pub findings: Vec<ValidatedFinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodologySummary {
    pub approach: String,
    pub source_types: Vec<SourceType>,
    pub agent_types: Vec<WorkerType>,
    pub total_sources: usize,
    pub total_results: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectiveVerdict {
    NoRelevantFindings,
    WellSupported,
    ModeratelySupported,
    LimitedEvidence,
}

impl ObjectiveVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectiveVerdict::NoRelevantFindings => "No relevant findings",
            ObjectiveVerdict::WellSupported => "Well supported",
            ObjectiveVerdict::ModeratelySupported => "Moderately supported",
            ObjectiveVerdict::LimitedEvidence => "Limited evidence",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectiveConclusion {
    pub objective: String,
    pub keyword: Option<String>,
    pub verdict: ObjectiveVerdict,
    pub relevant_findings: usize,
}

/// Structured narrative report. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisResult {
    pub research_id: String,
    pub topic: String,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    pub methodology: MethodologySummary,
    pub conclusions: Vec<ObjectiveConclusion>,
    pub overall_confidence: f64,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_DIMENSION: &str = "general";

/// Event topics
pub const EVENT_TOPIC_RESEARCH_PHASE_CHANGED: &str = "research.phase.changed";
pub const EVENT_TOPIC_RESEARCH_STEP_STARTED: &str = "research.step.started";
pub const EVENT_TOPIC_RESEARCH_STEP_PROGRESS: &str = "research.step.progress";
pub const EVENT_TOPIC_RESEARCH_STEP_COMPLETED: &str = "research.step.completed";
pub const EVENT_TOPIC_RESEARCH_STEP_FAILED: &str = "research.step.failed";
pub const EVENT_TOPIC_RESEARCH_ISSUE_RAISED: &str = "research.issue.raised";
pub const EVENT_TOPIC_RESEARCH_ISSUE_RESOLVED: &str = "research.issue.resolved";
pub const EVENT_TOPIC_RESEARCH_CANCELLED: &str = "research.cancelled";

// ============================================================================
// Tests
// ============================================================================
