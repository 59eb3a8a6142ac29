//! In-guest workload smoke test.
//!
//! Start the workload, wait for readiness, provoke activity, stop it, and
//! check it recorded something. The supervisor owns the workload process and
//! always reaches the shutdown wait, on success and on readiness failure.

use crate::config::config::HarnessConfig;
use crate::exec::readiness::{wait_until_ready, HealthProbe, PollBudget, ReadinessOutcome};
use crate::exec::workload::{ShutdownOutcome, WorkloadProcess, WorkloadSpec};
use crate::kernel::process::{CommandRunner, CommandSpec};
use crate::phase::tail::{head_lines, tail_lines};
use crate::types::{HarnessError, ReadinessState, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::thread;

const PREVIEW_LINES: usize = 5;
const PREVIEW_LINE_BYTES: usize = 512;
const LOG_DUMP_LINES: usize = 50;

/// What the workload left in its output artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCheck {
    NonEmpty { bytes: u64, preview: Vec<String> },
    Empty,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub readiness: ReadinessState,
    pub readiness_attempts: u32,
    pub shutdown: ShutdownOutcome,
    pub output_artifact: PathBuf,
    pub output: OutputCheck,
}

pub struct GuestSupervisor<'a> {
    config: &'a HarnessConfig,
    artifacts: PathBuf,
    probe: &'a dyn HealthProbe,
    runner: &'a dyn CommandRunner,
}

impl<'a> GuestSupervisor<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        artifacts: impl Into<PathBuf>,
        probe: &'a dyn HealthProbe,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            artifacts: artifacts.into(),
            probe,
            runner,
        }
    }

    pub fn run(&self) -> Result<SupervisorReport> {
        let workload = &self.config.workload;
        let spec = WorkloadSpec::from_config(self.config, &self.artifacts);
        if !spec.binary.is_file() {
            return Err(HarnessError::precondition_missing(
                "Workload binary",
                &spec.binary,
            ));
        }

        let mut process = WorkloadProcess::spawn(&spec)?;
        let budget = PollBudget::for_workload(workload);
        let readiness = wait_until_ready(self.probe, budget, || process.poll_exit());

        let readiness_attempts = match readiness {
            ReadinessOutcome::Ready { attempts } => {
                process.readiness = ReadinessState::Ready;
                attempts
            }
            ReadinessOutcome::TimedOut { attempts } => {
                process.readiness = ReadinessState::TimedOut;
                dump_logs(&process);
                // A workload that never served must not outlive the smoke test
                if process.terminate_gracefully(workload.shutdown_grace())
                    == ShutdownOutcome::Abandoned
                {
                    if let Err(e) = process.kill() {
                        warn!("Failed to kill workload {}: {}", process.pid, e);
                    }
                }
                return Err(HarnessError::ReadinessTimeout { attempts });
            }
            ReadinessOutcome::Exited { exit_code, .. } => {
                process.readiness = ReadinessState::TimedOut;
                dump_logs(&process);
                return Err(HarnessError::WorkloadExited { exit_code });
            }
        };

        thread::sleep(workload.settle_delay());
        self.trigger_activity();

        thread::sleep(workload.shutdown_delay());
        let shutdown = process.terminate_gracefully(workload.shutdown_grace());

        let output = inspect_output(&process.output_artifact);
        match &output {
            OutputCheck::NonEmpty { bytes, preview } => {
                info!(
                    "Workload recorded {} bytes in {}",
                    bytes,
                    process.output_artifact.display()
                );
                for line in preview {
                    info!("  {}", line);
                }
            }
            OutputCheck::Empty | OutputCheck::Missing => {
                if workload.require_output {
                    return Err(HarnessError::Process(format!(
                        "Workload recorded nothing in {}",
                        process.output_artifact.display()
                    )));
                }
                warn!(
                    "Workload output {} is {}; kernel may lack the traced hooks",
                    process.output_artifact.display(),
                    if output == OutputCheck::Empty { "empty" } else { "missing" }
                );
            }
        }

        Ok(SupervisorReport {
            readiness: process.readiness,
            readiness_attempts,
            shutdown,
            output_artifact: process.output_artifact.clone(),
            output,
        })
    }

    /// Best effort: a failing trigger is only a warning
    fn trigger_activity(&self) {
        let triggers = &self.config.workload.triggers;
        if triggers.is_empty() {
            warn!("No trigger actions configured");
            return;
        }
        let log = self.artifacts.join("triggers.log");
        for trigger in triggers {
            match self.runner.run(&CommandSpec::shell(trigger.clone()), Some(&log)) {
                Ok(outcome) if outcome.success() => debug!("Trigger ok: {}", trigger),
                Ok(outcome) => warn!(
                    "Trigger '{}' exited with {:?}",
                    trigger, outcome.exit_code
                ),
                Err(e) => warn!("Trigger '{}' did not run: {}", trigger, e),
            }
        }
    }
}

fn inspect_output(path: &Path) -> OutputCheck {
    let bytes = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return OutputCheck::Missing,
    };
    if bytes == 0 {
        return OutputCheck::Empty;
    }
    let preview = head_lines(path, PREVIEW_LINES, PREVIEW_LINE_BYTES).unwrap_or_else(|e| {
        warn!("Failed to read {}: {}", path.display(), e);
        Vec::new()
    });
    OutputCheck::NonEmpty { bytes, preview }
}

fn dump_logs(process: &WorkloadProcess) {
    for path in [&process.log_path, &process.console_log] {
        match tail_lines(path, LOG_DUMP_LINES) {
            Ok(lines) => {
                eprintln!("---- {} (last {} lines) ----", path.display(), lines.len());
                for line in lines {
                    eprintln!("{}", line);
                }
            }
            Err(e) => eprintln!("---- {} unavailable: {} ----", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::readiness::testing::CountingProbe;
    use crate::kernel::process::testing::ScriptedRunner;
    use crate::kernel::signal;
    use std::os::unix::fs::PermissionsExt;

    /// Workspace with a workload script; `on_output` runs with `$out` set
    /// to the output artifact path
    fn setup(on_output: &str) -> (tempfile::TempDir, HarnessConfig) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("work");
        let artifacts = workspace.join("artifacts");
        std::fs::create_dir_all(workspace.join("bin")).unwrap();
        std::fs::create_dir_all(&artifacts).unwrap();

        let script = format!(
            "#!/bin/sh\n\
             echo $$ > {pid}\n\
             for a in \"$@\"; do case \"$a\" in json:*) out=\"${{a#json:}}\";; esac; done\n\
             {on_output}\n\
             exec sleep 30\n",
            pid = workspace.join("workload.pid").display(),
            on_output = on_output,
        );
        let binary = workspace.join("bin/workload");
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = HarnessConfig::default();
        config.artifacts_dir = artifacts;
        config.workspace = workspace;
        config.workload.readiness_attempts = 5;
        config.workload.readiness_cadence_ms = 50;
        // Long enough for the script to write its pid and output
        config.workload.settle_delay_ms = 300;
        config.workload.shutdown_delay_ms = 10;
        config.workload.shutdown_grace_ms = 5000;
        (dir, config)
    }

    fn workload_pid(config: &HarnessConfig) -> u32 {
        std::fs::read_to_string(config.workspace.join("workload.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    #[test]
    fn records_output_and_stops_workload() {
        let (_dir, config) = setup("echo '{\"event\":\"open\"}' > \"$out\"");
        let probe = CountingProbe::ready_on(2);
        let runner = ScriptedRunner::default();

        let report = GuestSupervisor::new(&config, &config.artifacts_dir, &probe, &runner)
            .run()
            .unwrap();

        assert_eq!(report.readiness, ReadinessState::Ready);
        assert_eq!(report.readiness_attempts, 2);
        assert!(matches!(report.shutdown, ShutdownOutcome::Exited { .. }));
        match &report.output {
            OutputCheck::NonEmpty { preview, .. } => {
                assert_eq!(preview, &vec!["{\"event\":\"open\"}".to_string()])
            }
            other => panic!("unexpected output check {:?}", other),
        }
        assert_eq!(runner.calls.borrow().len(), config.workload.triggers.len());
    }

    #[test]
    fn empty_output_is_tolerated() {
        let (_dir, config) = setup(": > \"$out\"");
        let probe = CountingProbe::ready_on(1);
        let runner = ScriptedRunner::failing("passwd", 1);

        let report = GuestSupervisor::new(&config, &config.artifacts_dir, &probe, &runner)
            .run()
            .unwrap();
        assert_eq!(report.output, OutputCheck::Empty);
    }

    #[test]
    fn empty_output_fails_when_required() {
        let (_dir, mut config) = setup(": > \"$out\"");
        config.workload.require_output = true;
        let probe = CountingProbe::ready_on(1);
        let runner = ScriptedRunner::default();

        let err = GuestSupervisor::new(&config, &config.artifacts_dir, &probe, &runner)
            .run()
            .unwrap_err();
        assert!(matches!(err, HarnessError::Process(_)));
    }

    #[test]
    fn readiness_timeout_leaves_no_running_workload() {
        let (_dir, config) = setup(":");
        let probe = CountingProbe::never();
        let runner = ScriptedRunner::default();

        let err = GuestSupervisor::new(&config, &config.artifacts_dir, &probe, &runner)
            .run()
            .unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { attempts: 5 }));
        assert_eq!(probe.calls.get(), 5);
        assert!(!signal::process_alive(workload_pid(&config)));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn readiness_timeout_kills_a_workload_ignoring_sigterm() {
        let (_dir, mut config) = setup("trap '' TERM\nwhile :; do sleep 1; done");
        config.workload.shutdown_grace_ms = 500;
        let probe = CountingProbe::never();
        let runner = ScriptedRunner::default();

        let err = GuestSupervisor::new(&config, &config.artifacts_dir, &probe, &runner)
            .run()
            .unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { attempts: 5 }));
        assert!(!signal::process_alive(workload_pid(&config)));
    }

    #[test]
    fn missing_binary_is_a_precondition_failure() {
        let (_dir, mut config) = setup(":");
        config.workload.binary = PathBuf::from("bin/absent");
        let probe = CountingProbe::ready_on(1);
        let runner = ScriptedRunner::default();

        let err = GuestSupervisor::new(&config, &config.artifacts_dir, &probe, &runner)
            .run()
            .unwrap_err();
        assert!(matches!(err, HarnessError::Precondition(_)));
        assert_eq!(probe.calls.get(), 0);
    }
}
