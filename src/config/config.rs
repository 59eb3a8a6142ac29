/// Configuration loading from kerncheck.json
use crate::config::env::IsolatedEnv;
use crate::types::{Architecture, HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "kerncheck.json";

/// Where installed kernels for one architecture live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelRoots {
    /// Directory holding `vmlinuz-<release>` images
    pub image_dir: PathBuf,
    /// Directory holding `<release>/` module trees
    pub modules_dir: PathBuf,
}

impl Default for KernelRoots {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("/boot"),
            modules_dir: PathBuf::from("/lib/modules"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Roots for host-architecture kernels
    pub native: KernelRoots,
    /// Roots for foreign-architecture kernels, keyed by architecture
    pub foreign: HashMap<Architecture, KernelRoots>,
}

impl KernelConfig {
    /// Host roots hold host-architecture images only, so a foreign
    /// architecture must be configured explicitly
    pub fn roots_for(&self, arch: Architecture) -> Result<&KernelRoots> {
        if arch.is_native() {
            return Ok(&self.native);
        }
        self.foreign.get(&arch).ok_or_else(|| {
            HarnessError::Config(format!(
                "No kernel roots configured for {} (kernels.foreign.{})",
                arch, arch
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// VM front-end program (virtme-ng)
    pub launcher: String,
    pub memory: String,
    pub cpus: u32,
    /// Wall-clock bound on a whole VM session
    pub boot_timeout_secs: u64,
    pub kvm_device: PathBuf,
    /// Extra arguments appended to every launch
    pub extra_args: Vec<String>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            launcher: "vng".to_string(),
            memory: "2G".to_string(),
            cpus: 2,
            boot_timeout_secs: 1800,
            kvm_device: PathBuf::from("/dev/kvm"),
            extra_args: Vec::new(),
        }
    }
}

/// Minimal distribution tarball used as a foreign root filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImageConfig {
    /// Cache identity; a changed id forces a fresh extraction
    pub id: String,
    /// `https://` URL or local path of a gzip tarball
    pub source: String,
    /// Expected SHA-256 of the tarball, hex encoded
    #[serde(default)]
    pub sha256: Option<String>,
}

impl BaseImageConfig {
    fn ubuntu_base(arch: Architecture) -> Self {
        let name = format!("ubuntu-base-24.04.1-base-{}", arch.debian_name());
        Self {
            source: format!(
                "https://cdimage.ubuntu.com/ubuntu-base/releases/24.04/release/{}.tar.gz",
                name
            ),
            id: name,
            sha256: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossArchConfig {
    pub base_images: HashMap<Architecture, BaseImageConfig>,
    /// Package install run inside the chroot (network client + trust store)
    pub install_command: String,
    /// Directories searched for `qemu-<arch>-static`
    pub helper_search_dirs: Vec<PathBuf>,
    /// Static busybox binaries per architecture
    pub init_helpers: HashMap<Architecture, PathBuf>,
    pub nameserver: String,
}

impl Default for CrossArchConfig {
    fn default() -> Self {
        let base_images = [Architecture::X86_64, Architecture::Aarch64]
            .into_iter()
            .map(|arch| (arch, BaseImageConfig::ubuntu_base(arch)))
            .collect();
        Self {
            base_images,
            install_command: "apt-get update && DEBIAN_FRONTEND=noninteractive \
                              apt-get install -y --no-install-recommends curl ca-certificates"
                .to_string(),
            helper_search_dirs: vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/usr/local/bin"),
            ],
            init_helpers: HashMap::new(),
            nameserver: "1.1.1.1".to_string(),
        }
    }
}

/// Flag names accepted by the workload binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadFlags {
    pub output: String,
    pub enrichment: String,
    pub log_file: String,
    pub health_listen: String,
    pub policy: String,
}

impl Default for WorkloadFlags {
    fn default() -> Self {
        Self {
            output: "--output".to_string(),
            enrichment: "--enrichment".to_string(),
            log_file: "--log-file".to_string(),
            health_listen: "--health-listen".to_string(),
            policy: "--policy".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Pre-built workload, relative to the workspace
    pub binary: PathBuf,
    /// Harness binary for the guest architecture; defaults to this executable
    pub guest_harness: Option<PathBuf>,
    /// Policy file, relative to the workspace
    pub policy: PathBuf,
    pub output_format: String,
    /// Output artifact file name inside the artifacts dir
    pub output_file: String,
    pub log_file: String,
    pub enrichment: String,
    pub health_port: u16,
    pub health_path: String,
    pub flags: WorkloadFlags,
    pub extra_args: Vec<String>,
    pub readiness_attempts: u32,
    pub readiness_cadence_ms: u64,
    pub settle_delay_ms: u64,
    pub shutdown_delay_ms: u64,
    /// How long to wait for exit after the termination signal
    pub shutdown_grace_ms: u64,
    /// Shell commands run after readiness to produce observable activity
    pub triggers: Vec<String>,
    /// Treat an empty output artifact as a failure instead of a warning
    pub require_output: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("bin/workload"),
            guest_harness: None,
            policy: PathBuf::from("policy.yaml"),
            output_format: "json".to_string(),
            output_file: "workload-events.json".to_string(),
            log_file: "workload.log".to_string(),
            enrichment: "none".to_string(),
            health_port: 6789,
            health_path: "/healthz".to_string(),
            flags: WorkloadFlags::default(),
            extra_args: Vec::new(),
            readiness_attempts: 60,
            readiness_cadence_ms: 1000,
            settle_delay_ms: 2000,
            shutdown_delay_ms: 2000,
            shutdown_grace_ms: 10_000,
            triggers: vec![
                "cat /etc/passwd > /dev/null".to_string(),
                "ls /proc/self/fd > /dev/null".to_string(),
            ],
            require_output: false,
        }
    }
}

impl WorkloadConfig {
    pub fn readiness_cadence(&self) -> Duration {
        Duration::from_millis(self.readiness_cadence_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// External dependency a phase needs (e.g. a container runtime)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub name: String,
    /// Shell command whose zero exit means the dependency is available
    pub probe: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub requires: Option<DependencyConfig>,
    /// Run with the isolated home/cache/offline environment
    #[serde(default)]
    pub isolated_env: bool,
}

impl PhaseConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            requires: None,
            isolated_env: false,
        }
    }

    pub fn requiring(mut self, name: impl Into<String>, probe: impl Into<String>) -> Self {
        self.requires = Some(DependencyConfig {
            name: name.into(),
            probe: probe.into(),
        });
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolated_env = true;
        self
    }
}

/// Full kerncheck.json structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory bound read-write at the same path inside the guest
    pub workspace: PathBuf,
    /// Root for run-scoped artifact directories
    pub artifacts_dir: PathBuf,
    /// Cache for synthesized root filesystems
    pub cache_dir: PathBuf,
    pub kernels: KernelConfig,
    pub vm: VmConfig,
    pub cross_arch: CrossArchConfig,
    pub workload: WorkloadConfig,
    /// Host-only phases
    pub phases: Vec<PhaseConfig>,
    /// Phases run inside the guest after the workload smoke test
    pub guest_phases: Vec<PhaseConfig>,
    pub isolated_env: IsolatedEnv,
    /// Log lines echoed inline for a failed phase (clamped to 50..=100)
    pub excerpt_lines: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let cache_dir = std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
            .unwrap_or_else(|| workspace.join(".cache"))
            .join("kerncheck");
        Self {
            artifacts_dir: workspace.join("artifacts"),
            workspace,
            cache_dir,
            kernels: KernelConfig::default(),
            vm: VmConfig::default(),
            cross_arch: CrossArchConfig::default(),
            workload: WorkloadConfig::default(),
            phases: Vec::new(),
            guest_phases: Vec::new(),
            isolated_env: IsolatedEnv::default(),
            excerpt_lines: 80,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: HarnessConfig = serde_json::from_str(&content).map_err(|e| {
            HarnessError::Config(format!(
                "Failed to parse config JSON {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    /// Load ./kerncheck.json if present, built-in defaults otherwise
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| HarnessError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !config_path.exists() {
            log::info!("{} not found, using built-in defaults", DEFAULT_CONFIG_FILE);
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_phases("phases", &self.phases)?;
        validate_phases("guest_phases", &self.guest_phases)?;
        if self.guest_phases.iter().any(|p| p.name == "workload-smoke") {
            return Err(HarnessError::Config(
                "guest_phases: 'workload-smoke' is reserved for the workload smoke test"
                    .to_string(),
            ));
        }

        if self.vm.cpus == 0 {
            return Err(HarnessError::Config("vm.cpus must be at least 1".to_string()));
        }
        if self.workload.readiness_attempts == 0 {
            return Err(HarnessError::Config(
                "workload.readiness_attempts must be at least 1".to_string(),
            ));
        }
        if self.workload.output_file.is_empty() || self.workload.output_file.contains('/') {
            return Err(HarnessError::Config(format!(
                "workload.output_file must be a plain file name: '{}'",
                self.workload.output_file
            )));
        }
        Ok(())
    }

    /// Absolute path of a workspace-relative path
    pub fn in_workspace(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    pub fn workload_binary(&self) -> PathBuf {
        self.in_workspace(&self.workload.binary)
    }

    pub fn excerpt_lines(&self) -> usize {
        self.excerpt_lines.clamp(50, 100)
    }
}

fn is_safe_phase_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn validate_phases(section: &str, phases: &[PhaseConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for phase in phases {
        if !is_safe_phase_name(&phase.name) {
            return Err(HarnessError::Config(format!(
                "{}: invalid phase name '{}' (use letters, digits, '.', '_', '-')",
                section, phase.name
            )));
        }
        if !seen.insert(phase.name.as_str()) {
            return Err(HarnessError::Config(format!(
                "{}: duplicate phase name '{}'",
                section, phase.name
            )));
        }
        if phase.command.trim().is_empty() {
            return Err(HarnessError::Config(format!(
                "{}: phase '{}' has an empty command",
                section, phase.name
            )));
        }
    }

    let gated: Vec<&str> = phases
        .iter()
        .filter(|p| p.requires.is_some())
        .map(|p| p.name.as_str())
        .collect();
    if gated.len() > 1 {
        return Err(HarnessError::Config(format!(
            "{}: only one phase may declare a dependency gate, found: {}",
            section,
            gated.join(", ")
        )));
    }
    Ok(())
}
