//! ResearchConductorActor - orchestrates one research across specialist workers
//!
//! One actor per research id is the single writer of that id's
//! `OrchestrationState`. It:
//! - Delegates executable steps in priority order (fan-out to spawned transport calls)
//! - Handles results as they arrive, in any order, discarding late ones
//! - Classifies failures and applies recovery decisions (retry, fallback, escalate, abort)
//! - Applies decisions proposed by an optional decision oracle
//! - Publishes lifecycle events on a broadcast channel
//!
//! ## Phases
//!
//! ```text
//! Planning → Execution → Synthesis → Completed
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ractor::Actor;
//! use conductor::actors::conductor::{ResearchConductorActor, ResearchConductorArguments};
//!
//! store.initialize("research-1", plan)?;
//! let args = ResearchConductorArguments {
//!     research_id: "research-1".to_string(),
//!     store,
//!     transport,
//!     oracle: None,
//!     events,
//!     config,
//! };
//! let (conductor_ref, _handle) = Actor::spawn(None, ResearchConductorActor, args).await?;
//! ```

pub mod actor;
pub mod delegator;
pub mod events;
pub mod graph;
pub mod policy;
pub mod protocol;
pub mod recovery;
mod runtime;
pub mod state;
pub mod store;
pub mod workers;

#[cfg(test)]
mod tests;

pub use actor::{ResearchConductorActor, ResearchConductorArguments, ResearchConductorState};
pub use events::{ConductorEvent, EventSink};
pub use policy::{DecisionOracle, OracleMessage, OrchestrationDecision, SharedDecisionOracle};
pub use protocol::{ConductorError, ConductorMsg, StepOutcome};
pub use state::OrchestrationState;
pub use store::{StatePersistenceHook, StateStore};
pub use workers::{AgentTransport, SharedAgentTransport, StreamEvent, TransportFailure};
