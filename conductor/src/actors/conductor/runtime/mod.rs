//! `impl ResearchConductorActor` blocks split by concern.

mod completion;
mod decision;
mod dispatch;
mod lifecycle;
mod recovery;
