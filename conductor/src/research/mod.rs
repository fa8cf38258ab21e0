//! Research output processing: finding extraction, aggregation, synthesis.
//!
//! Everything here is a pure function of completed step results and the plan;
//! nothing reads or writes the state store.

pub mod aggregator;
pub mod findings;
pub mod synthesis;
pub mod text;

pub use aggregator::{
    aggregate, calculate_confidence, consolidate_findings, deduplicate_sources,
    validate_integrity, IntegrityIssue, IntegrityReport,
};
pub use findings::extract_findings;
pub use synthesis::{cross_validate, render_markdown, synthesize};
