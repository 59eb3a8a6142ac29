//! In-guest entry point.
//!
//! The workload smoke test is the first phase; configured guest phases
//! follow through the same aggregator the host uses. Outcomes land in the
//! guest summary, which the host merges after the VM exits.

use crate::config::config::HarnessConfig;
use crate::core::RunSummary;
use crate::exec::{GuestSupervisor, HealthProbe, OutputCheck, SupervisorReport};
use crate::kernel::host;
use crate::kernel::process::CommandRunner;
use crate::observability::report::GUEST_SUMMARY_FILE;
use crate::observability::{ArtifactsDir, RunReport};
use crate::phase::{DependencyProbe, PhaseAggregator};
use crate::types::{
    AggregateResult, Architecture, HarnessError, PhaseOutcome, Result, TestPhase,
    EXIT_PRECONDITION,
};
use log::{error, info};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const SMOKE_PHASE: &str = "workload-smoke";

pub struct GuestRun<'a> {
    config: &'a HarnessConfig,
    runner: &'a dyn CommandRunner,
    health: &'a dyn HealthProbe,
    dependencies: &'a dyn DependencyProbe,
}

impl<'a> GuestRun<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        runner: &'a dyn CommandRunner,
        health: &'a dyn HealthProbe,
        dependencies: &'a dyn DependencyProbe,
    ) -> Self {
        Self {
            config,
            runner,
            health,
            dependencies,
        }
    }

    pub fn execute(&self, artifacts: &Path, out: &mut dyn Write) -> Result<RunSummary> {
        let artifacts = ArtifactsDir::at(artifacts)?;
        let mut report = RunReport::start(artifacts.run_id());
        report.kernel_release = host::running_release().ok();
        report.architecture = Some(Architecture::host());

        let mut result = AggregateResult::default();
        let smoke = TestPhase {
            name: SMOKE_PHASE.to_string(),
            command: self.config.workload_binary().display().to_string(),
            log_path: artifacts.file(&format!("{}.log", SMOKE_PHASE)),
        };
        writeln!(out, "==> {}", smoke.name)?;

        let supervisor =
            GuestSupervisor::new(self.config, artifacts.path(), self.health, self.runner);
        let outcome = match supervisor.run() {
            Ok(smoke_report) => {
                fs::write(&smoke.log_path, describe(&smoke_report))?;
                surface_output(&smoke_report, out)?;
                PhaseOutcome::Passed
            }
            Err(e) if e.exit_code() == EXIT_PRECONDITION => return Err(e),
            Err(e) => {
                error!("Workload smoke test failed: {}", e);
                fs::write(&smoke.log_path, format!("{}\n", e))?;
                PhaseOutcome::Failed {
                    exit_code: workload_exit(&e),
                }
            }
        };
        writeln!(out, "{} {}", outcome.label(), smoke.name)?;
        result.push(smoke, outcome);

        PhaseAggregator::new(self.runner, self.dependencies, artifacts.path())
            .workdir(&self.config.workspace)
            .isolated_env(&self.config.isolated_env)
            .excerpt_lines(self.config.excerpt_lines())
            .run_into(&mut result, &self.config.guest_phases, out)?;

        let exit_code = result.exit_code();
        report.finish(&result, exit_code);
        report.write(&artifacts.file(GUEST_SUMMARY_FILE))?;
        info!("Guest phases finished with exit code {}", exit_code);

        Ok(RunSummary {
            artifacts: artifacts.path().to_path_buf(),
            report,
            result,
            exit_code,
        })
    }
}

fn workload_exit(error: &HarnessError) -> Option<i32> {
    match error {
        HarnessError::WorkloadExited { exit_code } => *exit_code,
        _ => None,
    }
}

/// Preview of what the workload recorded, or a warning when it recorded nothing
fn surface_output(report: &SupervisorReport, out: &mut dyn Write) -> Result<()> {
    match &report.output {
        OutputCheck::NonEmpty { bytes, preview } => {
            writeln!(
                out,
                "    {} bytes in {}",
                bytes,
                report.output_artifact.display()
            )?;
            for line in preview {
                writeln!(out, "    | {}", line)?;
            }
        }
        OutputCheck::Empty | OutputCheck::Missing => {
            let state = if report.output == OutputCheck::Empty {
                "empty"
            } else {
                "missing"
            };
            writeln!(
                out,
                "WARN workload output {} is {}; the kernel may lack the traced hooks",
                report.output_artifact.display(),
                state
            )?;
        }
    }
    Ok(())
}

fn describe(report: &SupervisorReport) -> String {
    let mut text = format!(
        "readiness: {:?} after {} attempt(s)\nshutdown: {:?}\n",
        report.readiness, report.readiness_attempts, report.shutdown
    );
    match &report.output {
        OutputCheck::NonEmpty { bytes, preview } => {
            text.push_str(&format!(
                "output: {} bytes in {}\n",
                bytes,
                report.output_artifact.display()
            ));
            for line in preview {
                text.push_str(line);
                text.push('\n');
            }
        }
        OutputCheck::Empty => text.push_str("output: empty\n"),
        OutputCheck::Missing => text.push_str("output: missing\n"),
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::PhaseConfig;
    use crate::exec::readiness::testing::CountingProbe;
    use crate::kernel::process::testing::ScriptedRunner;
    use crate::phase::CommandDependencyProbe;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn setup() -> (tempfile::TempDir, HarnessConfig) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("work");
        fs::create_dir_all(workspace.join("bin")).unwrap();

        let binary = workspace.join("bin/workload");
        fs::write(
            &binary,
            "#!/bin/sh\n\
             for a in \"$@\"; do case \"$a\" in json:*) out=\"${a#json:}\";; esac; done\n\
             echo '{\"event\":\"exec\"}' > \"$out\"\n\
             exec sleep 30\n",
        )
        .unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = HarnessConfig::default();
        config.artifacts_dir = workspace.join("artifacts");
        config.workspace = workspace;
        config.workload.readiness_attempts = 3;
        config.workload.readiness_cadence_ms = 50;
        config.workload.settle_delay_ms = 200;
        config.workload.shutdown_delay_ms = 10;
        config.guest_phases = vec![
            PhaseConfig::new("unit", "true"),
            PhaseConfig::new("e2e", "exit 2"),
        ];
        (dir, config)
    }

    #[test]
    fn smoke_test_is_the_first_phase() {
        let (_dir, config) = setup();
        let runner = ScriptedRunner::failing("exit 2", 2);
        let dependencies = CommandDependencyProbe::new(&runner);
        let health = CountingProbe::ready_on(1);
        let mut out = Vec::new();

        let summary = GuestRun::new(&config, &runner, &health, &dependencies)
            .execute(&config.artifacts_dir, &mut out)
            .unwrap();

        let names: Vec<&str> = summary
            .result
            .records
            .iter()
            .map(|r| r.phase.name.as_str())
            .collect();
        assert_eq!(names, vec![SMOKE_PHASE, "unit", "e2e"]);
        assert_eq!(summary.result.records[0].outcome, PhaseOutcome::Passed);
        assert_eq!(summary.exit_code, 1);

        let written = RunReport::read(&config.artifacts_dir.join(GUEST_SUMMARY_FILE)).unwrap();
        assert_eq!(written.phases, summary.result.records);
        let smoke_log =
            fs::read_to_string(config.artifacts_dir.join("workload-smoke.log")).unwrap();
        assert!(smoke_log.contains("{\"event\":\"exec\"}"));
        assert!(smoke_log.contains("readiness: Ready"));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("    | {\"event\":\"exec\"}"));
        assert!(text.contains("PASS workload-smoke"));
        assert!(!text.contains("WARN"));
    }

    #[test]
    fn empty_output_passes_with_a_warning() {
        let (_dir, mut config) = setup();
        fs::write(
            config.workspace.join("bin/workload"),
            "#!/bin/sh\n\
             for a in \"$@\"; do case \"$a\" in json:*) out=\"${a#json:}\";; esac; done\n\
             : > \"$out\"\n\
             exec sleep 30\n",
        )
        .unwrap();
        config.guest_phases.clear();
        let runner = ScriptedRunner::default();
        let dependencies = CommandDependencyProbe::new(&runner);
        let health = CountingProbe::ready_on(1);
        let mut out = Vec::new();

        let summary = GuestRun::new(&config, &runner, &health, &dependencies)
            .execute(&config.artifacts_dir, &mut out)
            .unwrap();

        assert_eq!(summary.exit_code, 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("WARN workload output"));
        assert!(text.contains("is empty"));
        assert!(text.contains("PASS workload-smoke"));
    }

    #[test]
    fn readiness_failure_still_runs_guest_phases() {
        let (_dir, mut config) = setup();
        config.guest_phases = vec![PhaseConfig::new("unit", "true")];
        let runner = ScriptedRunner::default();
        let dependencies = CommandDependencyProbe::new(&runner);
        let health = CountingProbe::never();
        let mut out = Vec::new();

        let summary = GuestRun::new(&config, &runner, &health, &dependencies)
            .execute(&config.artifacts_dir, &mut out)
            .unwrap();

        assert_eq!(
            summary.result.outcomes(),
            vec![&PhaseOutcome::Failed { exit_code: None }, &PhaseOutcome::Passed]
        );
        assert_eq!(summary.exit_code, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("FAIL workload-smoke"));
    }

    #[test]
    fn missing_workload_aborts_before_any_phase() {
        let (_dir, mut config) = setup();
        config.workload.binary = PathBuf::from("bin/absent");
        let runner = ScriptedRunner::default();
        let dependencies = CommandDependencyProbe::new(&runner);
        let health = CountingProbe::ready_on(1);
        let mut out = Vec::new();

        let err = GuestRun::new(&config, &runner, &health, &dependencies)
            .execute(&config.artifacts_dir, &mut out)
            .unwrap_err();
        assert_eq!(err.exit_code(), EXIT_PRECONDITION);
        assert!(runner.calls.borrow().is_empty());
        assert!(!config.artifacts_dir.join(GUEST_SUMMARY_FILE).exists());
    }
}
