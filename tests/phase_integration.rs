//! Integration tests for host-only phase runs
//!
//! Phases run through a real shell so exit-status classification, per-phase
//! logs, and inline excerpts are exercised end to end.

use kerncheck::config::config::{HarnessConfig, PhaseConfig};
use kerncheck::core::host::run_phases;
use kerncheck::kernel::process::SystemRunner;
use kerncheck::observability::report::SUMMARY_FILE;
use kerncheck::observability::RunReport;
use kerncheck::phase::CommandDependencyProbe;
use kerncheck::PhaseOutcome;
use std::fs;

fn config_in(dir: &std::path::Path, phases: Vec<PhaseConfig>) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.workspace = dir.to_path_buf();
    config.artifacts_dir = dir.join("artifacts");
    config.phases = phases;
    config.validate().unwrap();
    config
}

#[test]
fn test_failed_phase_does_not_stop_later_phases() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(
        dir.path(),
        vec![
            PhaseConfig::new("unit", "echo unit ok"),
            PhaseConfig::new("integration", "echo boom >&2; exit 3"),
            PhaseConfig::new("lint", "touch lint-ran"),
        ],
    );
    let runner = SystemRunner;
    let probe = CommandDependencyProbe::new(&runner);
    let mut out = Vec::new();

    let summary = run_phases(&config, &runner, &probe, None, &mut out).unwrap();

    assert_eq!(
        summary.result.outcomes(),
        vec![
            &PhaseOutcome::Passed,
            &PhaseOutcome::Failed { exit_code: Some(3) },
            &PhaseOutcome::Passed,
        ]
    );
    assert_eq!(summary.exit_code, 1);
    // Phases run from the workspace
    assert!(dir.path().join("lint-ran").exists());

    // Each phase has its own log; the failure is echoed inline
    let unit_log = fs::read_to_string(summary.artifacts.join("unit.log")).unwrap();
    assert!(unit_log.contains("unit ok"));
    let failed_log = fs::read_to_string(summary.artifacts.join("integration.log")).unwrap();
    assert!(failed_log.contains("boom"));
    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("boom"));

    let report = RunReport::read(&summary.artifacts.join(SUMMARY_FILE)).unwrap();
    assert_eq!(report.phases.len(), 3);
    assert_eq!(report.exit_code, Some(1));
}

#[test]
fn test_gated_phase_skips_when_dependency_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(
        dir.path(),
        vec![
            PhaseConfig::new("unit", "true"),
            PhaseConfig::new("cross", "exit 1").requiring("cross-toolchain", "false"),
        ],
    );
    let runner = SystemRunner;
    let probe = CommandDependencyProbe::new(&runner);
    let mut out = Vec::new();

    let summary = run_phases(&config, &runner, &probe, None, &mut out).unwrap();

    assert_eq!(summary.exit_code, 0);
    assert!(matches!(
        summary.result.records[1].outcome,
        PhaseOutcome::Skipped { .. }
    ));
    assert!(!summary.artifacts.join("cross.log").exists());
}

#[test]
fn test_isolated_phase_sees_only_its_own_home() {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = dir.path().join("explicit");
    let config = config_in(
        dir.path(),
        vec![
            PhaseConfig::new("build", "echo \"$HOME $CARGO_NET_OFFLINE\"").isolated(),
            PhaseConfig::new("plain", "echo \"home=$HOME\""),
        ],
    );
    let runner = SystemRunner;
    let probe = CommandDependencyProbe::new(&runner);
    let mut out = Vec::new();

    let summary = run_phases(&config, &runner, &probe, Some(&artifacts), &mut out).unwrap();
    assert_eq!(summary.artifacts, artifacts);
    assert_eq!(summary.exit_code, 0);

    let build_log = fs::read_to_string(artifacts.join("build.log")).unwrap();
    let home = artifacts.join("isolated/home");
    assert!(build_log.contains(&format!("{} true", home.display())));
    assert!(home.is_dir());

    let plain_log = fs::read_to_string(artifacts.join("plain.log")).unwrap();
    assert!(plain_log.starts_with("home="));
    assert!(!plain_log.contains(&home.display().to_string()));
}
