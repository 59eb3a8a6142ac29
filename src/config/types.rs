/// Core types and structures for the kerncheck system
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// All executed phases passed
pub const EXIT_PASSED: i32 = 0;
/// At least one executed phase failed
pub const EXIT_FAILED: i32 = 1;
/// Missing workload binary or kernel artifact (EX_NOINPUT)
pub const EXIT_PRECONDITION: i32 = 66;
/// Base image fetch or emulation helper unavailable (EX_UNAVAILABLE)
pub const EXIT_PROVISION: i32 = 69;
/// Invalid configuration (EX_CONFIG)
pub const EXIT_CONFIG: i32 = 78;

/// Guest CPU architecture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    X86_64,
    Aarch64,
}

impl Architecture {
    /// Architecture of the machine running the harness
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Architecture::Aarch64
        } else {
            Architecture::X86_64
        }
    }

    pub fn is_native(self) -> bool {
        self == Self::host()
    }

    /// Name used by QEMU and virtme-ng (`qemu-system-<name>`)
    pub fn qemu_name(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
        }
    }

    /// Debian/Ubuntu package architecture name
    pub fn debian_name(self) -> &'static str {
        match self {
            Architecture::X86_64 => "amd64",
            Architecture::Aarch64 => "arm64",
        }
    }

    /// Static user-mode emulator binary for running this architecture's programs
    pub fn emulation_helper_name(self) -> String {
        format!("qemu-{}-static", self.qemu_name())
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.qemu_name())
    }
}

impl FromStr for Architecture {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "x86_64" | "amd64" | "x86-64" => Ok(Architecture::X86_64),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            other => Err(HarnessError::Config(format!(
                "Unsupported architecture: {}",
                other
            ))),
        }
    }
}

/// Requested kernel: a version token plus the architecture it targets
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Symbolic prefix (`v6.12`), literal release (`6.12.3-generic`) or `host`
    pub version_token: String,
    pub architecture: Architecture,
}

impl KernelSpec {
    pub fn new(version_token: impl Into<String>, architecture: Architecture) -> Self {
        Self {
            version_token: version_token.into(),
            architecture,
        }
    }
}

/// Concrete installed kernel selected for a run
///
/// Both paths are verified to exist before a value is handed out, and the
/// value is never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedKernel {
    pub release: String,
    pub image_path: PathBuf,
    pub modules_path: PathBuf,
}

/// Guest filesystem strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Native,
    CrossArch,
}

impl EnvironmentKind {
    pub fn for_arch(arch: Architecture) -> Self {
        if arch.is_native() {
            EnvironmentKind::Native
        } else {
            EnvironmentKind::CrossArch
        }
    }
}

/// Host filesystem reused as the guest root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeEnvironment {
    /// Directories exposed read-write at identical guest paths
    pub rw_dirs: Vec<PathBuf>,
}

/// Synthesized foreign-architecture root filesystem
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossArchEnvironment {
    pub base_image_id: String,
    pub root: PathBuf,
    /// Release whose module tree was injected into `root`
    pub injected_modules: String,
    pub emulation_helper_path: PathBuf,
    /// Mount point inside `root` where the workspace is bound
    pub scratch_mount: PathBuf,
    pub dns_config: PathBuf,
    /// Extra guest devices (QEMU `-device` values)
    pub devices: Vec<String>,
    /// Host directories exposed read-write inside the guest
    pub rw_dirs: Vec<PathBuf>,
}

/// Provisioned guest execution environment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuestEnvironment {
    Native(NativeEnvironment),
    CrossArch(CrossArchEnvironment),
}

impl GuestEnvironment {
    pub fn kind(&self) -> EnvironmentKind {
        match self {
            GuestEnvironment::Native(_) => EnvironmentKind::Native,
            GuestEnvironment::CrossArch(_) => EnvironmentKind::CrossArch,
        }
    }

    pub fn rw_dirs(&self) -> &[PathBuf] {
        match self {
            GuestEnvironment::Native(env) => &env.rw_dirs,
            GuestEnvironment::CrossArch(env) => &env.rw_dirs,
        }
    }

    /// Check the environment is consistent with the kernel it will boot
    pub fn check_kernel(&self, kernel: &ResolvedKernel) -> Result<()> {
        if let GuestEnvironment::CrossArch(env) = self {
            if env.injected_modules != kernel.release {
                return Err(HarnessError::Provision(format!(
                    "root {} carries modules for {} but kernel is {}",
                    env.root.display(),
                    env.injected_modules,
                    kernel.release
                )));
            }
        }
        Ok(())
    }
}

/// Memory and vCPU limits applied to a guest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmResources {
    /// Size string understood by the VM front-end (`2G`, `512M`)
    pub memory: String,
    pub vcpu_count: u32,
}

impl Default for VmResources {
    fn default() -> Self {
        Self {
            memory: "2G".to_string(),
            vcpu_count: 2,
        }
    }
}

/// VM session lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Provisioning,
    Booting,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::TimedOut | SessionState::Failed
        )
    }

    /// Legal forward transitions; every non-terminal state may fail
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Provisioning, Booting) => true,
            (Booting, Running) => true,
            (Running, Completed) | (Running, TimedOut) => true,
            (Booting, TimedOut) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One independently scored test-suite invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPhase {
    pub name: String,
    pub command: String,
    pub log_path: PathBuf,
}

/// Phase outcome, classified strictly from the phase's exit status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Passed,
    Failed { exit_code: Option<i32> },
    Skipped { reason: String },
}

impl PhaseOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, PhaseOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PhaseOutcome::Passed => "PASS",
            PhaseOutcome::Failed { .. } => "FAIL",
            PhaseOutcome::Skipped { .. } => "SKIP",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: TestPhase,
    pub outcome: PhaseOutcome,
}

/// Ordered phase outcomes of one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub records: Vec<PhaseRecord>,
}

impl AggregateResult {
    pub fn push(&mut self, phase: TestPhase, outcome: PhaseOutcome) {
        self.records.push(PhaseRecord { phase, outcome });
    }

    /// Fails iff at least one executed phase failed; skips never fail a run
    pub fn passed(&self) -> bool {
        !self.records.iter().any(|r| r.outcome.is_failed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            EXIT_PASSED
        } else {
            EXIT_FAILED
        }
    }

    pub fn failed_phases(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.outcome.is_failed())
            .map(|r| r.phase.name.as_str())
            .collect()
    }

    pub fn outcomes(&self) -> Vec<&PhaseOutcome> {
        self.records.iter().map(|r| &r.outcome).collect()
    }
}

/// Workload readiness as observed by the supervisor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Starting,
    Ready,
    TimedOut,
}

/// Completeness of captured process output
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    /// Stream read to EOF within limits
    #[default]
    Complete,
    /// Stream exceeded the capture limit; tail discarded
    TruncatedByLimit,
    /// Read failed before EOF
    ReadError,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

/// Custom error types for kerncheck
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No installed kernel matches '{token}' for {arch}")]
    KernelNotFound { token: String, arch: Architecture },

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Base image fetch failed: {0}")]
    Fetch(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Illegal session transition {from:?} -> {to:?}")]
    SessionTransition { from: SessionState, to: SessionState },

    #[error("Workload not ready after {attempts} health checks")]
    ReadinessTimeout { attempts: u32 },

    #[error("Workload exited before becoming ready (exit code {exit_code:?})")]
    WorkloadExited { exit_code: Option<i32> },
}

impl HarnessError {
    pub fn precondition_missing(what: &str, path: &Path) -> Self {
        HarnessError::Precondition(format!("{} not found: {}", what, path.display()))
    }

    /// Process exit code for a run aborted by this error
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Precondition(_) | HarnessError::KernelNotFound { .. } => {
                EXIT_PRECONDITION
            }
            HarnessError::Provision(_) | HarnessError::Fetch(_) => EXIT_PROVISION,
            HarnessError::Config(_) => EXIT_CONFIG,
            _ => EXIT_FAILED,
        }
    }
}

impl From<nix::errno::Errno> for HarnessError {
    fn from(err: nix::errno::Errno) -> Self {
        HarnessError::Process(format!("System call failed: {}", err))
    }
}

/// Result type alias for kerncheck operations
pub type Result<T> = std::result::Result<T, HarnessError>;
