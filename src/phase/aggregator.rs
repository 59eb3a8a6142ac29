use crate::config::config::{DependencyConfig, PhaseConfig};
use crate::config::env::IsolatedEnv;
use crate::kernel::process::{CommandRunner, CommandSpec};
use crate::phase::tail::tail_lines;
use crate::types::{AggregateResult, PhaseOutcome, Result, TestPhase};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Decides whether a gated phase's external dependency is present
pub trait DependencyProbe {
    fn available(&self, dependency: &DependencyConfig) -> bool;
}

/// Dependency is available when its probe command exits zero
pub struct CommandDependencyProbe<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CommandDependencyProbe<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

impl DependencyProbe for CommandDependencyProbe<'_> {
    fn available(&self, dependency: &DependencyConfig) -> bool {
        match self
            .runner
            .run(&CommandSpec::shell(dependency.probe.clone()), None)
        {
            Ok(outcome) => outcome.success(),
            Err(e) => {
                warn!("Probe for {} did not run: {}", dependency.name, e);
                false
            }
        }
    }
}

/// Runs phases in order, one log each, and folds their outcomes
pub struct PhaseAggregator<'a> {
    runner: &'a dyn CommandRunner,
    probe: &'a dyn DependencyProbe,
    artifacts: PathBuf,
    workdir: Option<PathBuf>,
    isolated_env: IsolatedEnv,
    excerpt_lines: usize,
}

impl<'a> PhaseAggregator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        probe: &'a dyn DependencyProbe,
        artifacts: impl Into<PathBuf>,
    ) -> Self {
        let artifacts = artifacts.into();
        Self {
            runner,
            probe,
            isolated_env: IsolatedEnv::default().rooted_at(&artifacts),
            artifacts,
            workdir: None,
            excerpt_lines: 80,
        }
    }

    /// Working directory for phase commands
    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Environment for phases marked `isolated_env`; relative paths resolve
    /// against the artifacts directory
    pub fn isolated_env(mut self, env: &IsolatedEnv) -> Self {
        self.isolated_env = env.rooted_at(&self.artifacts);
        self
    }

    pub fn excerpt_lines(mut self, lines: usize) -> Self {
        self.excerpt_lines = lines.clamp(50, 100);
        self
    }

    pub fn log_path(&self, phase: &str) -> PathBuf {
        self.artifacts.join(format!("{}.log", phase))
    }

    pub fn run(&self, phases: &[PhaseConfig], out: &mut dyn Write) -> Result<AggregateResult> {
        let mut result = AggregateResult::default();
        self.run_into(&mut result, phases, out)?;
        Ok(result)
    }

    /// Run every phase and append its record to `result`.
    ///
    /// A phase's outcome comes from its exit status alone; whatever happens,
    /// the next phase still runs.
    pub fn run_into(
        &self,
        result: &mut AggregateResult,
        phases: &[PhaseConfig],
        out: &mut dyn Write,
    ) -> Result<()> {
        fs::create_dir_all(&self.artifacts)?;

        for config in phases {
            let phase = TestPhase {
                name: config.name.clone(),
                command: config.command.clone(),
                log_path: self.log_path(&config.name),
            };

            if let Some(dependency) = &config.requires {
                if !self.probe.available(dependency) {
                    let reason = format!("{} unavailable", dependency.name);
                    info!("Skipping phase {}: {}", phase.name, reason);
                    writeln!(out, "SKIP {} ({})", phase.name, reason)?;
                    result.push(phase, PhaseOutcome::Skipped { reason });
                    continue;
                }
            }

            writeln!(out, "==> {}", phase.name)?;
            let start = Instant::now();
            let outcome = self.execute(config, &phase.log_path);
            writeln!(
                out,
                "{} {} ({:.1}s)",
                outcome.label(),
                phase.name,
                start.elapsed().as_secs_f64()
            )?;

            if outcome.is_failed() {
                warn!("Phase {} failed: {:?}", phase.name, outcome);
                self.echo_excerpt(&phase.log_path, out)?;
            }
            result.push(phase, outcome);
        }

        Ok(())
    }

    fn execute(&self, config: &PhaseConfig, log_path: &Path) -> PhaseOutcome {
        // Each run starts a fresh log
        if let Err(e) = fs::File::create(log_path) {
            warn!("Failed to create {}: {}", log_path.display(), e);
        }

        let mut spec = CommandSpec::shell(config.command.clone());
        if let Some(dir) = &self.workdir {
            spec = spec.current_dir(dir);
        }
        if config.isolated_env {
            if let Err(e) = self.isolated_env.prepare() {
                warn!("Failed to prepare isolated environment: {}", e);
            }
            spec = spec.envs(self.isolated_env.variables());
        }

        match self.runner.run(&spec, Some(log_path)) {
            Ok(outcome) if outcome.success() => PhaseOutcome::Passed,
            Ok(outcome) => PhaseOutcome::Failed {
                exit_code: outcome.exit_code,
            },
            Err(e) => {
                append_line(log_path, &format!("kerncheck: {}", e));
                PhaseOutcome::Failed { exit_code: None }
            }
        }
    }

    fn echo_excerpt(&self, log_path: &Path, out: &mut dyn Write) -> Result<()> {
        match tail_lines(log_path, self.excerpt_lines) {
            Ok(lines) => {
                writeln!(
                    out,
                    "---- last {} lines of {} ----",
                    lines.len(),
                    log_path.display()
                )?;
                for line in lines {
                    writeln!(out, "{}", line)?;
                }
                writeln!(out, "----")?;
            }
            Err(e) => writeln!(out, "---- {} unreadable: {} ----", log_path.display(), e)?,
        }
        Ok(())
    }
}

fn append_line(path: &Path, line: &str) {
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| writeln!(file, "{}", line));
    if let Err(e) = written {
        warn!("Failed to write {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process::{CommandOutcome, SystemRunner};
    use crate::types::HarnessError;

    struct Absent;

    impl DependencyProbe for Absent {
        fn available(&self, _dependency: &DependencyConfig) -> bool {
            false
        }
    }

    struct Unstartable;

    impl CommandRunner for Unstartable {
        fn run(&self, spec: &CommandSpec, _log: Option<&Path>) -> Result<CommandOutcome> {
            Err(HarnessError::Process(format!("cannot start {}", spec.program)))
        }
    }

    #[test]
    fn failure_in_middle_does_not_stop_later_phases() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner;
        let probe = CommandDependencyProbe::new(&runner);
        let aggregator = PhaseAggregator::new(&runner, &probe, dir.path());
        let phases = vec![
            PhaseConfig::new("unit", "echo unit ok"),
            PhaseConfig::new("integration", "echo boom; exit 2"),
            PhaseConfig::new("lint", "true"),
        ];

        let mut out = Vec::new();
        let result = aggregator.run(&phases, &mut out).unwrap();

        assert_eq!(result.records.len(), 3);
        assert_eq!(
            result.outcomes(),
            vec![
                &PhaseOutcome::Passed,
                &PhaseOutcome::Failed { exit_code: Some(2) },
                &PhaseOutcome::Passed
            ]
        );
        assert_eq!(result.exit_code(), 1);

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("FAIL integration"));
        assert!(printed.contains("boom"));
        assert_eq!(
            fs::read_to_string(dir.path().join("unit.log")).unwrap(),
            "unit ok\n"
        );
    }

    #[test]
    fn absent_dependency_skips_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner;
        let aggregator = PhaseAggregator::new(&runner, &Absent, dir.path());
        let phases = vec![
            PhaseConfig::new("unit", "true"),
            PhaseConfig::new("containers", "false").requiring("docker", "docker info"),
        ];

        let result = aggregator.run(&phases, &mut std::io::sink()).unwrap();
        assert!(result.passed());
        assert!(matches!(
            result.records[1].outcome,
            PhaseOutcome::Skipped { .. }
        ));
        assert!(!dir.path().join("containers.log").exists());
    }

    #[test]
    fn present_dependency_runs_gated_phase() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner;
        let probe = CommandDependencyProbe::new(&runner);
        let aggregator = PhaseAggregator::new(&runner, &probe, dir.path());
        let phases = vec![PhaseConfig::new("gated", "exit 1").requiring("shell", "true")];

        let result = aggregator.run(&phases, &mut std::io::sink()).unwrap();
        assert_eq!(result.failed_phases(), vec!["gated"]);
    }

    #[test]
    fn isolated_phase_sees_only_its_own_home() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner;
        let probe = CommandDependencyProbe::new(&runner);
        let aggregator = PhaseAggregator::new(&runner, &probe, dir.path());
        let phases = vec![
            PhaseConfig::new("build", "echo \"$HOME $GOPROXY\"").isolated(),
            PhaseConfig::new("plain", "echo \"${GOPROXY:-unset}\""),
        ];

        let result = aggregator.run(&phases, &mut std::io::sink()).unwrap();
        assert!(result.passed());

        let build = fs::read_to_string(dir.path().join("build.log")).unwrap();
        let home = dir.path().join("isolated/home");
        assert_eq!(build.trim(), format!("{} off", home.display()));
        assert!(home.is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("plain.log")).unwrap().trim(),
            std::env::var("GOPROXY").unwrap_or_else(|_| "unset".to_string())
        );
    }

    #[test]
    fn unstartable_phase_counts_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = PhaseAggregator::new(&Unstartable, &Absent, dir.path());
        let mut out = Vec::new();
        let result = aggregator
            .run(&[PhaseConfig::new("unit", "true")], &mut out)
            .unwrap();

        assert_eq!(
            result.records[0].outcome,
            PhaseOutcome::Failed { exit_code: None }
        );
        let log = fs::read_to_string(dir.path().join("unit.log")).unwrap();
        assert!(log.contains("cannot start sh"));
    }

    #[test]
    fn excerpt_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemRunner;
        let probe = CommandDependencyProbe::new(&runner);
        let aggregator = PhaseAggregator::new(&runner, &probe, dir.path()).excerpt_lines(10);
        let phases = vec![PhaseConfig::new(
            "noisy",
            "i=0; while [ $i -lt 300 ]; do echo line $i; i=$((i+1)); done; exit 1",
        )];

        let mut out = Vec::new();
        aggregator.run(&phases, &mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("last 50 lines"));
        assert!(printed.contains("line 299"));
        assert!(!printed.contains("line 249\n"));
    }
}
