//! Host-only run: the configured phases, no VM.

use crate::config::config::HarnessConfig;
use crate::core::RunSummary;
use crate::kernel::process::CommandRunner;
use crate::observability::report::SUMMARY_FILE;
use crate::observability::{ArtifactsDir, RunReport};
use crate::phase::{DependencyProbe, PhaseAggregator};
use crate::types::{Architecture, Result};
use std::io::Write;
use std::path::Path;

/// Run `config.phases` on the host.
///
/// Without an explicit directory, artifacts go to a fresh run directory
/// under `config.artifacts_dir`.
pub fn run_phases(
    config: &HarnessConfig,
    runner: &dyn CommandRunner,
    dependencies: &dyn DependencyProbe,
    artifacts: Option<&Path>,
    out: &mut dyn Write,
) -> Result<RunSummary> {
    let artifacts = match artifacts {
        Some(dir) => ArtifactsDir::at(dir)?,
        None => ArtifactsDir::create(&config.artifacts_dir)?,
    };
    let mut report = RunReport::start(artifacts.run_id());
    report.architecture = Some(Architecture::host());

    let result = PhaseAggregator::new(runner, dependencies, artifacts.path())
        .workdir(&config.workspace)
        .isolated_env(&config.isolated_env)
        .excerpt_lines(config.excerpt_lines())
        .run(&config.phases, out)?;

    let exit_code = result.exit_code();
    report.finish(&result, exit_code);
    report.write(&artifacts.file(SUMMARY_FILE))?;

    Ok(RunSummary {
        artifacts: artifacts.path().to_path_buf(),
        report,
        result,
        exit_code,
    })
}
