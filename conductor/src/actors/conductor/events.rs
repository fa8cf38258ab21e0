//! Research lifecycle event emission
//!
//! Events are published on a broadcast channel for an external relay to forward.
//! The core keeps no subscriber list; publishing with nobody listening is fine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{Issue, OrchestrationPhase, ProgressMetrics, StepResultStatus};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorEvent {
    PhaseChanged {
        event_id: String,
        research_id: String,
        from: OrchestrationPhase,
        to: OrchestrationPhase,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        event_id: String,
        research_id: String,
        step_id: String,
        agent_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    StepProgress {
        event_id: String,
        research_id: String,
        step_id: String,
        message: String,
        progress: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        event_id: String,
        research_id: String,
        step_id: String,
        status: StepResultStatus,
        progress: ProgressMetrics,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        event_id: String,
        research_id: String,
        step_id: String,
        error: String,
        recovery_action: String,
        timestamp: DateTime<Utc>,
    },
    IssueRaised {
        event_id: String,
        research_id: String,
        issue: Issue,
        timestamp: DateTime<Utc>,
    },
    IssueResolved {
        event_id: String,
        research_id: String,
        issue: Issue,
        timestamp: DateTime<Utc>,
    },
    ResearchCancelled {
        event_id: String,
        research_id: String,
        cancelled_steps: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ConductorEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            ConductorEvent::PhaseChanged { .. } => shared_types::EVENT_TOPIC_RESEARCH_PHASE_CHANGED,
            ConductorEvent::StepStarted { .. } => shared_types::EVENT_TOPIC_RESEARCH_STEP_STARTED,
            ConductorEvent::StepProgress { .. } => shared_types::EVENT_TOPIC_RESEARCH_STEP_PROGRESS,
            ConductorEvent::StepCompleted { .. } => {
                shared_types::EVENT_TOPIC_RESEARCH_STEP_COMPLETED
            }
            ConductorEvent::StepFailed { .. } => shared_types::EVENT_TOPIC_RESEARCH_STEP_FAILED,
            ConductorEvent::IssueRaised { .. } => shared_types::EVENT_TOPIC_RESEARCH_ISSUE_RAISED,
            ConductorEvent::IssueResolved { .. } => {
                shared_types::EVENT_TOPIC_RESEARCH_ISSUE_RESOLVED
            }
            ConductorEvent::ResearchCancelled { .. } => shared_types::EVENT_TOPIC_RESEARCH_CANCELLED,
        }
    }

    pub fn research_id(&self) -> &str {
        match self {
            ConductorEvent::PhaseChanged { research_id, .. }
            | ConductorEvent::StepStarted { research_id, .. }
            | ConductorEvent::StepProgress { research_id, .. }
            | ConductorEvent::StepCompleted { research_id, .. }
            | ConductorEvent::StepFailed { research_id, .. }
            | ConductorEvent::IssueRaised { research_id, .. }
            | ConductorEvent::IssueResolved { research_id, .. }
            | ConductorEvent::ResearchCancelled { research_id, .. } => research_id,
        }
    }
}

/// Cloneable publishing handle
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ConductorEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConductorEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ConductorEvent) {
        tracing::debug!(
            topic = event.topic(),
            research_id = %event.research_id(),
            "Publishing conductor event"
        );
        // no receivers is not an error
        let _ = self.tx.send(event);
    }
}

fn event_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn emit_phase_changed(
    sink: &EventSink,
    research_id: &str,
    from: OrchestrationPhase,
    to: OrchestrationPhase,
) {
    sink.publish(ConductorEvent::PhaseChanged {
        event_id: event_id(),
        research_id: research_id.to_string(),
        from,
        to,
        timestamp: Utc::now(),
    });
}

pub fn emit_step_started(sink: &EventSink, research_id: &str, step_id: &str, agent_id: &str, attempt: u32) {
    sink.publish(ConductorEvent::StepStarted {
        event_id: event_id(),
        research_id: research_id.to_string(),
        step_id: step_id.to_string(),
        agent_id: agent_id.to_string(),
        attempt,
        timestamp: Utc::now(),
    });
}

pub fn emit_step_progress(
    sink: &EventSink,
    research_id: &str,
    step_id: &str,
    message: &str,
    progress: Option<f64>,
) {
    sink.publish(ConductorEvent::StepProgress {
        event_id: event_id(),
        research_id: research_id.to_string(),
        step_id: step_id.to_string(),
        message: message.to_string(),
        progress,
        timestamp: Utc::now(),
    });
}

pub fn emit_step_completed(
    sink: &EventSink,
    research_id: &str,
    step_id: &str,
    status: StepResultStatus,
    progress: ProgressMetrics,
) {
    sink.publish(ConductorEvent::StepCompleted {
        event_id: event_id(),
        research_id: research_id.to_string(),
        step_id: step_id.to_string(),
        status,
        progress,
        timestamp: Utc::now(),
    });
}

pub fn emit_step_failed(
    sink: &EventSink,
    research_id: &str,
    step_id: &str,
    error: &str,
    recovery_action: &str,
) {
    sink.publish(ConductorEvent::StepFailed {
        event_id: event_id(),
        research_id: research_id.to_string(),
        step_id: step_id.to_string(),
        error: error.to_string(),
        recovery_action: recovery_action.to_string(),
        timestamp: Utc::now(),
    });
}

pub fn emit_issue_raised(sink: &EventSink, research_id: &str, issue: &Issue) {
    sink.publish(ConductorEvent::IssueRaised {
        event_id: event_id(),
        research_id: research_id.to_string(),
        issue: issue.clone(),
        timestamp: Utc::now(),
    });
}

pub fn emit_issue_resolved(sink: &EventSink, research_id: &str, issue: &Issue) {
    sink.publish(ConductorEvent::IssueResolved {
        event_id: event_id(),
        research_id: research_id.to_string(),
        issue: issue.clone(),
        timestamp: Utc::now(),
    });
}

pub fn emit_research_cancelled(sink: &EventSink, research_id: &str, cancelled_steps: &[String]) {
    sink.publish(ConductorEvent::ResearchCancelled {
        event_id: event_id(),
        research_id: research_id.to_string(),
        cancelled_steps: cancelled_steps.to_vec(),
        timestamp: Utc::now(),
    });
}
