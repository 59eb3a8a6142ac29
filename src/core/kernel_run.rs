//! Kernel-specific run on the host: resolve, provision, boot, collect.
//!
//! Preconditions are checked before anything is created on disk. The guest
//! re-enters this binary (`kerncheck guest`) with the effective
//! configuration saved into the run's artifacts directory, and leaves its
//! phase outcomes there for the host to merge.

use crate::config::config::HarnessConfig;
use crate::core::RunSummary;
use crate::kernel::mount::Mounter;
use crate::kernel::process::CommandRunner;
use crate::observability::report::{GUEST_SUMMARY_FILE, SUMMARY_FILE};
use crate::observability::{ArtifactsDir, RunReport};
use crate::provision::EnvironmentProvisioner;
use crate::resolve::KernelResolver;
use crate::types::{
    AggregateResult, Architecture, GuestEnvironment, HarnessError, KernelSpec, OutputIntegrity,
    Result, SessionState, VmResources, EXIT_FAILED,
};
use crate::vm::{LaunchInvocation, VmLauncher, VmSession};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Effective configuration handed to the guest
pub const GUEST_CONFIG_FILE: &str = "kerncheck.json";

#[derive(Debug, Clone)]
pub struct KernelRunRequest {
    pub kernel: KernelSpec,
    pub resources: VmResources,
    pub dry_run: bool,
}

impl KernelRunRequest {
    /// Request with the configured VM resources
    pub fn new(kernel: KernelSpec, config: &HarnessConfig) -> Self {
        Self {
            kernel,
            resources: VmResources {
                memory: config.vm.memory.clone(),
                vcpu_count: config.vm.cpus,
            },
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum KernelRunOutcome {
    /// Nothing was booted; the invocation is informational only
    DryRun { invocation: LaunchInvocation },
    Completed(RunSummary),
}

pub struct KernelRun<'a> {
    config: &'a HarnessConfig,
    mounter: &'a dyn Mounter,
    runner: &'a dyn CommandRunner,
    launcher: VmLauncher,
}

impl<'a> KernelRun<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        mounter: &'a dyn Mounter,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            mounter,
            runner,
            launcher: VmLauncher::new(config.vm.clone()),
        }
    }

    pub fn with_launcher(mut self, launcher: VmLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn execute(&self, request: &KernelRunRequest) -> Result<KernelRunOutcome> {
        let arch = request.kernel.architecture;

        let binary = self.config.workload_binary();
        if !binary.is_file() {
            return Err(HarnessError::precondition_missing("Workload binary", &binary));
        }
        let harness = self.guest_harness(arch)?;

        let kernel = KernelResolver::from_config(self.config, arch)?.resolve(&request.kernel)?;
        let provisioner = EnvironmentProvisioner::new(self.config, self.mounter, self.runner);
        let planned = provisioner.plan(&kernel, arch);
        ensure_guest_writable(&planned, &self.config.artifacts_dir)?;

        if request.dry_run {
            let artifacts = self.config.artifacts_dir.join("<run-id>");
            let session = VmSession::new(
                kernel,
                planned,
                guest_command(&harness, &artifacts, &artifacts.join(GUEST_CONFIG_FILE)),
                request.resources.clone(),
                arch,
            );
            return Ok(KernelRunOutcome::DryRun {
                invocation: self.launcher.dry_run(&session),
            });
        }

        let artifacts = ArtifactsDir::create(&self.config.artifacts_dir)?;
        let mut report = RunReport::start(artifacts.run_id());
        report.kernel_release = Some(kernel.release.clone());
        report.architecture = Some(arch);

        let environment = provisioner.provision(&kernel, arch)?;
        report.environment = Some(environment.kind());

        let guest_config = artifacts.file(GUEST_CONFIG_FILE);
        self.config.save(&guest_config)?;

        let mut session = VmSession::new(
            kernel,
            environment,
            guest_command(&harness, artifacts.path(), &guest_config),
            request.resources.clone(),
            arch,
        );
        let outcome = self.launcher.launch(&mut session)?;
        report.vm_state = Some(outcome.state);
        report.vm_exit_code = outcome.exit_code;
        if outcome.integrity() != OutputIntegrity::Complete {
            warn!("Guest console capture is {}", outcome.integrity());
        }

        let result = merge_guest_summary(&artifacts.file(GUEST_SUMMARY_FILE));
        let exit_code = match (outcome.state, outcome.exit_code) {
            (SessionState::Completed, Some(code)) => code,
            (state, _) => {
                warn!("Guest did not complete: {:?}", state);
                EXIT_FAILED
            }
        };

        report.finish(&result, exit_code);
        report.write(&artifacts.file(SUMMARY_FILE))?;
        info!("Run {} finished with exit code {}", artifacts.run_id(), exit_code);

        Ok(KernelRunOutcome::Completed(RunSummary {
            artifacts: artifacts.path().to_path_buf(),
            report,
            result,
            exit_code,
        }))
    }

    /// Binary the guest runs. Native guests see the host filesystem, so the
    /// running executable works; foreign guests need a harness built for them.
    fn guest_harness(&self, arch: Architecture) -> Result<PathBuf> {
        let harness = match &self.config.workload.guest_harness {
            Some(path) => self.config.in_workspace(path),
            None if arch.is_native() => std::env::current_exe()?,
            None => {
                return Err(HarnessError::Config(format!(
                    "workload.guest_harness must name a {} build of kerncheck",
                    arch
                )))
            }
        };
        if !harness.is_file() {
            return Err(HarnessError::precondition_missing("Guest harness", &harness));
        }
        Ok(harness)
    }
}

pub fn guest_command(harness: &Path, artifacts: &Path, config: &Path) -> Vec<String> {
    vec![
        harness.display().to_string(),
        "guest".to_string(),
        "--artifacts".to_string(),
        artifacts.display().to_string(),
        "--config".to_string(),
        config.display().to_string(),
    ]
}

fn ensure_guest_writable(environment: &GuestEnvironment, artifacts: &Path) -> Result<()> {
    if environment
        .rw_dirs()
        .iter()
        .any(|dir| artifacts.starts_with(dir))
    {
        return Ok(());
    }
    Err(HarnessError::Config(format!(
        "Artifacts directory {} is not writable inside the guest (shared: {:?})",
        artifacts.display(),
        environment.rw_dirs()
    )))
}

/// Phase records the guest left behind; a missing or unreadable summary
/// yields no records
fn merge_guest_summary(path: &Path) -> AggregateResult {
    let mut result = AggregateResult::default();
    if !path.is_file() {
        warn!("Guest left no summary at {}", path.display());
        return result;
    }
    match RunReport::read(path) {
        Ok(guest) => result.records = guest.phases,
        Err(e) => warn!("Ignoring guest summary: {}", e),
    }
    result
}
