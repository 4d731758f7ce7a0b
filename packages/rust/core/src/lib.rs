//! Core orchestration for nbci.
//!
//! Ties change detection, notebook preprocessing, source archiving and remote
//! submission into the `run` workflow, plus the single-notebook local
//! execution used inside the build container and the result report.

pub mod archive;
pub mod execute;
pub mod pipeline;
pub mod remote;
pub mod report;
