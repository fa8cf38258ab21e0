//! Conductor - research orchestration core
//!
//! Decomposed research plans are delegated to specialist workers (web,
//! academic, news, data analysis) through an `AgentTransport`. Failures are
//! classified and recovered, progress is tracked per research id, and
//! completed step results are aggregated and synthesized into a report.
//!
//! One `ResearchConductorActor` per research id is the single writer of that
//! research's `OrchestrationState`; `ResearchOrchestrator` is the entry point.

pub mod actors;
pub mod config;
pub mod observability;
pub mod orchestrator;
pub mod research;

pub use actors::conductor::{
    AgentTransport, ConductorError, ConductorEvent, DecisionOracle, EventSink, OracleMessage,
    OrchestrationDecision, OrchestrationState, SharedAgentTransport, SharedDecisionOracle,
    StateStore, StreamEvent, TransportFailure,
};
pub use config::ConductorConfig;
pub use orchestrator::ResearchOrchestrator;
