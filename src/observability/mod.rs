//! Observability
//!
//! Run-scoped artifact directories and the JSON run summary.

pub mod artifacts;
pub mod report;

pub use artifacts::ArtifactsDir;
pub use report::RunReport;
