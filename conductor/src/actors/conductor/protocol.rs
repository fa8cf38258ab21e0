//! ResearchConductorActor internal message protocol
//!
//! Defines the messages that can be sent to a per-research conductor actor and
//! the error types used throughout the conductor system.

use ractor::RpcReplyPort;
use shared_types::{ProgressUpdate, ResearchPlan, StepExecution, StepResult};

use crate::actors::conductor::policy::{OracleMessage, OrchestrationDecision};
use crate::actors::conductor::state::OrchestrationState;
use crate::actors::conductor::workers::TransportFailure;

/// Messages handled by ResearchConductorActor
#[derive(Debug)]
pub enum ConductorMsg {
    /// Delegate plan steps; an empty id list delegates every executable step
    Delegate {
        step_ids: Vec<String>,
        reply: RpcReplyPort<Result<Vec<StepExecution>, ConductorError>>,
    },
    /// Delegate whatever became executable since the last batch
    DispatchReady,
    /// A transport call for one attempt of a step returned
    StepFinished {
        step_id: String,
        attempt: u32,
        outcome: StepOutcome,
    },
    /// Streaming progress for one attempt of a step
    StepProgress {
        step_id: String,
        attempt: u32,
        update: ProgressUpdate,
    },
    /// A scheduled retry timer fired
    RetryDue { step_id: String, attempt: u32 },
    /// Ask the decision oracle for next actions and apply them
    Consult {
        messages: Vec<OracleMessage>,
        reply: RpcReplyPort<OrchestrationDecision>,
    },
    /// Apply an already-decoded oracle decision
    ApplyDecision { decision: OrchestrationDecision },
    /// Replace the plan while execution is running
    Replan {
        plan: ResearchPlan,
        reply: RpcReplyPort<Result<(), ConductorError>>,
    },
    /// Stop accepting delegations and cancel running executions
    Cancel { reply: RpcReplyPort<Vec<String>> },
    /// Mark the research `completed` once its report has been produced.
    Finalize {
        reply: RpcReplyPort<Result<(), ConductorError>>,
    },
    /// Snapshot of the owned state
    GetState {
        reply: RpcReplyPort<Option<OrchestrationState>>,
    },
}

/// Outcome of one transport call, already normalized
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed(StepResult),
    Failed(TransportFailure),
}

/// Errors that can occur in the conductor
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConductorError {
    /// Research id, step or issue not found
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid request parameters or plan
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Research id already initialized
    #[error("research already exists: {0}")]
    DuplicateResearch(String),
    /// Owning actor is gone or refused the call
    #[error("actor unavailable: {0}")]
    ActorUnavailable(String),
    /// Decision oracle call failed
    #[error("oracle error: {0}")]
    OracleError(String),
    /// Research was cancelled and accepts no further delegations
    #[error("research cancelled: {0}")]
    Cancelled(String),
    /// Persistence hook rejected a snapshot
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ConductorError {
    pub fn code(&self) -> &'static str {
        match self {
            ConductorError::NotFound(_) => "NOT_FOUND",
            ConductorError::InvalidRequest(_) => "INVALID_REQUEST",
            ConductorError::DuplicateResearch(_) => "DUPLICATE_RESEARCH",
            ConductorError::ActorUnavailable(_) => "ACTOR_UNAVAILABLE",
            ConductorError::OracleError(_) => "ORACLE_ERROR",
            ConductorError::Cancelled(_) => "CANCELLED",
            ConductorError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}
