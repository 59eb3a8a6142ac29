use crate::config::config::{HarnessConfig, WorkloadConfig};
use crate::kernel::signal;
use crate::types::{HarnessError, ReadinessState, Result};
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Console output of the workload process (its own log goes to `log_file`)
pub const CONSOLE_LOG: &str = "workload-console.log";

/// Command line for one workload run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub binary: PathBuf,
    pub output_artifact: PathBuf,
    pub log_path: PathBuf,
    pub console_log: PathBuf,
    pub args: Vec<String>,
}

impl WorkloadSpec {
    /// Build the workload invocation writing into `artifacts`
    pub fn from_config(config: &HarnessConfig, artifacts: &Path) -> Self {
        let workload: &WorkloadConfig = &config.workload;
        let flags = &workload.flags;
        let output_artifact = artifacts.join(&workload.output_file);
        let log_path = artifacts.join(&workload.log_file);

        let mut args = vec![
            flags.output.clone(),
            format!("{}:{}", workload.output_format, output_artifact.display()),
            flags.enrichment.clone(),
            workload.enrichment.clone(),
            flags.log_file.clone(),
            log_path.display().to_string(),
            flags.health_listen.clone(),
            format!("127.0.0.1:{}", workload.health_port),
            flags.policy.clone(),
            config.in_workspace(&workload.policy).display().to_string(),
        ];
        args.extend(workload.extra_args.iter().cloned());

        Self {
            binary: config.workload_binary(),
            output_artifact,
            log_path,
            console_log: artifacts.join(CONSOLE_LOG),
            args,
        }
    }
}

/// How the supervisor's shutdown request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited within the grace period after SIGTERM
    Exited { exit_code: Option<i32> },
    /// Had already exited before shutdown was requested
    AlreadyExited { exit_code: Option<i32> },
    /// Still running after the grace period; left alone
    Abandoned,
}

/// The running workload, owned by the supervisor
#[derive(Debug)]
pub struct WorkloadProcess {
    child: Child,
    pub pid: u32,
    pub readiness: ReadinessState,
    pub output_artifact: PathBuf,
    pub log_path: PathBuf,
    pub console_log: PathBuf,
    exited: Option<Option<i32>>,
}

impl WorkloadProcess {
    /// Start the workload in the background
    pub fn spawn(spec: &WorkloadSpec) -> Result<Self> {
        let console = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.console_log)?;
        let console_err = console.try_clone()?;

        let child = Command::new(&spec.binary)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(console))
            .stderr(Stdio::from(console_err))
            .spawn()
            .map_err(|e| {
                HarnessError::Process(format!(
                    "Failed to start workload {}: {}",
                    spec.binary.display(),
                    e
                ))
            })?;

        let pid = child.id();
        info!("Started workload {} (pid {})", spec.binary.display(), pid);
        Ok(Self {
            child,
            pid,
            readiness: ReadinessState::Starting,
            output_artifact: spec.output_artifact.clone(),
            log_path: spec.log_path.clone(),
            console_log: spec.console_log.clone(),
            exited: None,
        })
    }

    /// Exit code if the workload has exited (`Some(None)` when killed by a signal)
    pub fn poll_exit(&mut self) -> Option<Option<i32>> {
        if self.exited.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Workload {} exited: {}", self.pid, status);
                    self.exited = Some(status.code());
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to poll workload {}: {}", self.pid, e),
            }
        }
        self.exited
    }

    /// SIGTERM, then wait at most `grace` for the exit. Never force-kills.
    pub fn terminate_gracefully(&mut self, grace: Duration) -> ShutdownOutcome {
        if let Some(exit_code) = self.poll_exit() {
            return ShutdownOutcome::AlreadyExited { exit_code };
        }

        if let Err(e) = signal::send_terminate(self.pid) {
            warn!("{}", e);
        }

        let deadline = Instant::now() + grace;
        loop {
            if let Some(exit_code) = self.poll_exit() {
                info!("Workload {} stopped (exit code {:?})", self.pid, exit_code);
                return ShutdownOutcome::Exited { exit_code };
            }
            if Instant::now() >= deadline {
                warn!(
                    "Workload {} still running {}ms after SIGTERM; abandoning it",
                    self.pid,
                    grace.as_millis()
                );
                return ShutdownOutcome::Abandoned;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// SIGKILL and reap. Only for a workload that never became ready; a
    /// workload that was serving gets `terminate_gracefully` alone.
    pub fn kill(&mut self) -> Result<Option<i32>> {
        if let Some(exit_code) = self.poll_exit() {
            return Ok(exit_code);
        }
        signal::send(self.pid, Signal::SIGKILL)?;
        let status = self.child.wait()?;
        warn!("Workload {} killed ({})", self.pid, status);
        self.exited = Some(status.code());
        Ok(status.code())
    }
}
