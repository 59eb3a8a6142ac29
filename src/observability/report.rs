use crate::types::{
    AggregateResult, Architecture, EnvironmentKind, HarnessError, PhaseRecord, Result,
    SessionState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Host-side summary of one run
pub const SUMMARY_FILE: &str = "summary.json";
/// Summary the guest leaves for the host to merge
pub const GUEST_SUMMARY_FILE: &str = "guest-summary.json";

/// Machine-readable record of a run, written next to the phase logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub kernel_release: Option<String>,
    pub architecture: Option<Architecture>,
    pub environment: Option<EnvironmentKind>,
    pub vm_state: Option<SessionState>,
    pub vm_exit_code: Option<i32>,
    pub phases: Vec<PhaseRecord>,
    pub exit_code: Option<i32>,
}

impl RunReport {
    pub fn start(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            kernel_release: None,
            architecture: None,
            environment: None,
            vm_state: None,
            vm_exit_code: None,
            phases: Vec::new(),
            exit_code: None,
        }
    }

    pub fn finish(&mut self, result: &AggregateResult, exit_code: i32) {
        self.phases = result.records.clone();
        self.exit_code = Some(exit_code);
        self.finished_at = Some(Utc::now());
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HarnessError::Process(format!("Failed to serialize report: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            HarnessError::Process(format!("Malformed report {}: {}", path.display(), e))
        })
    }
}
