//! Run orchestration.
//!
//! Core wires the components into the three entry flows: a kernel-specific
//! run on the host (`kernel_run`), the in-guest supervisor plus phases
//! (`guest`), and host-only phases (`host`). Each flow leaves a summary in
//! its artifacts directory.

pub mod guest;
pub mod host;
pub mod kernel_run;

use crate::observability::RunReport;
use crate::types::{AggregateResult, PhaseOutcome};
use std::io::{self, Write};
use std::path::PathBuf;

/// What a finished flow leaves behind
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub artifacts: PathBuf,
    pub report: RunReport,
    pub result: AggregateResult,
    pub exit_code: i32,
}

impl RunSummary {
    /// One line per phase, then the verdict
    pub fn print(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out)?;
        for record in &self.result.records {
            match &record.outcome {
                PhaseOutcome::Skipped { reason } => writeln!(
                    out,
                    "  {:<4} {} ({})",
                    record.outcome.label(),
                    record.phase.name,
                    reason
                )?,
                outcome => writeln!(out, "  {:<4} {}", outcome.label(), record.phase.name)?,
            }
        }
        let verdict = if self.exit_code == 0 { "PASSED" } else { "FAILED" };
        writeln!(out, "{} (exit {})", verdict, self.exit_code)?;
        writeln!(out, "Artifacts: {}", self.artifacts.display())
    }
}
