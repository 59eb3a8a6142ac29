use crate::config::config::VmConfig;
use crate::kernel::host;
use crate::types::{
    Architecture, GuestEnvironment, OutputIntegrity, Result, SessionState,
};
use crate::utils::output::{CapturedOutput, OutputCollector, OutputLimits};
use crate::vm::session::VmSession;
use log::{error, info, warn};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// CPU virtualization mode for a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceleration {
    Kvm,
    /// Software emulation
    Tcg,
}

impl Acceleration {
    /// Hardware acceleration only when the guest runs the host's instruction set
    pub fn select(arch: Architecture, kvm_device: &Path) -> Self {
        if arch.is_native() && host::kvm_available(kvm_device) {
            Acceleration::Kvm
        } else {
            Acceleration::Tcg
        }
    }
}

/// Fully rendered front-end command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchInvocation {
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for LaunchInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote `s` for a POSIX shell, leaving plain words untouched
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=,@%+".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// How a boot ended
#[derive(Debug, Clone)]
pub struct VmOutcome {
    /// Always terminal
    pub state: SessionState,
    /// Guest command exit status, when the front-end exited on its own
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub elapsed: Duration,
}

impl VmOutcome {
    pub fn passed(&self) -> bool {
        self.state == SessionState::Completed && self.exit_code == Some(0)
    }

    pub fn integrity(&self) -> OutputIntegrity {
        self.output.integrity()
    }
}

/// Boots guests through the virtme-ng front-end
pub struct VmLauncher {
    config: VmConfig,
    timeout: Duration,
    limits: OutputLimits,
    echo: bool,
}

impl VmLauncher {
    pub fn new(config: VmConfig) -> Self {
        let timeout = Duration::from_secs(config.boot_timeout_secs);
        Self {
            config,
            timeout,
            limits: OutputLimits::default(),
            echo: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Capture guest output without mirroring it to the terminal
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn acceleration(&self, arch: Architecture) -> Acceleration {
        Acceleration::select(arch, &self.config.kvm_device)
    }

    pub fn invocation(&self, session: &VmSession) -> LaunchInvocation {
        let mut args = vec![
            "--run".to_string(),
            session.kernel.image_path.display().to_string(),
            "--arch".to_string(),
            session.architecture.qemu_name().to_string(),
            "--memory".to_string(),
            session.resources.memory.clone(),
            "--cpus".to_string(),
            session.resources.vcpu_count.to_string(),
        ];

        for dir in session.environment.rw_dirs() {
            args.push("--rwdir".to_string());
            args.push(dir.display().to_string());
        }

        if let GuestEnvironment::CrossArch(env) = &session.environment {
            args.push("--root".to_string());
            args.push(env.root.display().to_string());
            if !env.devices.is_empty() {
                let opts: Vec<String> = env
                    .devices
                    .iter()
                    .map(|device| format!("-device {}", device))
                    .collect();
                args.push("--qemu-opts".to_string());
                args.push(opts.join(" "));
            }
        }

        if self.acceleration(session.architecture) == Acceleration::Tcg {
            args.push("--disable-kvm".to_string());
        }

        args.extend(self.config.extra_args.iter().cloned());

        let guest_command: Vec<String> = session
            .guest_command
            .iter()
            .map(|part| shell_quote(part))
            .collect();
        args.push("--exec".to_string());
        args.push(guest_command.join(" "));

        LaunchInvocation {
            program: self.config.launcher.clone(),
            args,
        }
    }

    /// Render the invocation without booting anything
    pub fn dry_run(&self, session: &VmSession) -> LaunchInvocation {
        self.invocation(session)
    }

    /// Boot the guest and run it to a terminal state.
    ///
    /// Exceeding the session timeout kills the front-end. Errors are reserved
    /// for illegal session transitions; boot problems surface as `Failed` or
    /// `TimedOut` outcomes.
    pub fn launch(&self, session: &mut VmSession) -> Result<VmOutcome> {
        let invocation = self.invocation(session);
        let start = Instant::now();
        session.advance(SessionState::Booting)?;
        info!(
            "Booting {} ({}, {:?}): {}",
            session.kernel.release,
            session.architecture,
            self.acceleration(session.architecture),
            invocation
        );

        let mut child = match invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start {}: {}", invocation.program, e);
                session.advance(SessionState::Failed)?;
                return Ok(VmOutcome {
                    state: SessionState::Failed,
                    exit_code: None,
                    output: CapturedOutput::default(),
                    elapsed: start.elapsed(),
                });
            }
        };

        let capture = OutputCollector::new(self.limits.clone()).start(
            child.stdout.take(),
            child.stderr.take(),
            self.echo,
        );
        session.advance(SessionState::Running)?;

        let deadline = start + self.timeout;
        let (state, exit_code) = loop {
            match child.try_wait() {
                Ok(Some(status)) => break (SessionState::Completed, status.code()),
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "Guest exceeded {}s, killing {}",
                        self.timeout.as_secs(),
                        invocation.program
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    break (SessionState::TimedOut, None);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    error!("Failed to poll {}: {}", invocation.program, e);
                    let _ = child.kill();
                    let _ = child.wait();
                    break (SessionState::Failed, None);
                }
            }
        };

        session.advance(state)?;
        let output = capture.finish();
        if output.integrity() != OutputIntegrity::Complete {
            warn!("Guest output capture {}", output.integrity());
        }

        let elapsed = start.elapsed();
        info!(
            "Guest finished: {:?}, exit code {:?}, {:.1}s",
            state,
            exit_code,
            elapsed.as_secs_f64()
        );
        Ok(VmOutcome {
            state,
            exit_code,
            output,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrossArchEnvironment, NativeEnvironment, ResolvedKernel, VmResources};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn kernel() -> ResolvedKernel {
        ResolvedKernel {
            release: "6.12.3-y".to_string(),
            image_path: PathBuf::from("/boot/vmlinuz-6.12.3-y"),
            modules_path: PathBuf::from("/lib/modules/6.12.3-y"),
        }
    }

    fn foreign() -> Architecture {
        match Architecture::host() {
            Architecture::X86_64 => Architecture::Aarch64,
            Architecture::Aarch64 => Architecture::X86_64,
        }
    }

    fn native_session(command: &[&str]) -> VmSession {
        VmSession::new(
            kernel(),
            GuestEnvironment::Native(NativeEnvironment {
                rw_dirs: vec![PathBuf::from("/srv/work")],
            }),
            command.iter().map(|s| s.to_string()).collect(),
            VmResources::default(),
            Architecture::host(),
        )
    }

    fn fake_front_end(dir: &Path, body: &str) -> VmConfig {
        let script = dir.join("vng");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        VmConfig {
            launcher: script.display().to_string(),
            kvm_device: PathBuf::from("/nonexistent/kvm"),
            ..VmConfig::default()
        }
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("/srv/work"), "/srv/work");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn native_invocation_binds_workspace() {
        let launcher = VmLauncher::new(VmConfig {
            kvm_device: PathBuf::from("/nonexistent/kvm"),
            ..VmConfig::default()
        });
        let inv = launcher.invocation(&native_session(&["kerncheck", "guest", "--artifacts", "/srv/work/a b"]));

        assert_eq!(inv.program, "vng");
        assert_eq!(&inv.args[..2], &["--run", "/boot/vmlinuz-6.12.3-y"]);
        let rw = inv.args.iter().position(|a| a == "--rwdir").unwrap();
        assert_eq!(inv.args[rw + 1], "/srv/work");
        assert!(!inv.args.contains(&"--root".to_string()));
        // No KVM device: software emulation even for the host arch
        assert!(inv.args.contains(&"--disable-kvm".to_string()));
        assert_eq!(
            inv.args.last().unwrap(),
            "kerncheck guest --artifacts '/srv/work/a b'"
        );
    }

    #[test]
    fn cross_arch_invocation_uses_root_and_entropy_device() {
        let session = VmSession::new(
            kernel(),
            GuestEnvironment::CrossArch(CrossArchEnvironment {
                base_image_id: "base".to_string(),
                root: PathBuf::from("/cache/rootfs"),
                injected_modules: "6.12.3-y".to_string(),
                emulation_helper_path: PathBuf::from("/usr/bin/qemu-static"),
                scratch_mount: PathBuf::from("/cache/rootfs/srv/work"),
                dns_config: PathBuf::from("/cache/rootfs/etc/resolv.conf"),
                devices: vec!["virtio-rng-pci".to_string()],
                rw_dirs: vec![PathBuf::from("/srv/work")],
            }),
            vec!["true".to_string()],
            VmResources {
                memory: "4G".to_string(),
                vcpu_count: 4,
            },
            foreign(),
        );
        let launcher = VmLauncher::new(VmConfig::default());
        assert_eq!(launcher.acceleration(foreign()), Acceleration::Tcg);

        let rendered = launcher.dry_run(&session).to_string();
        assert!(rendered.contains("--root /cache/rootfs"));
        assert!(rendered.contains("--qemu-opts '-device virtio-rng-pci'"));
        assert!(rendered.contains("--memory 4G --cpus 4"));
        assert!(rendered.contains(&format!("--arch {}", foreign().qemu_name())));
        assert!(rendered.contains("--disable-kvm"));
    }

    #[test]
    fn propagates_guest_exit_status_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = VmLauncher::new(fake_front_end(dir.path(), "echo booted; exit 3")).quiet();
        let mut session = native_session(&["true"]);

        let outcome = launcher.launch(&mut session).unwrap();
        assert_eq!(outcome.state, SessionState::Completed);
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.passed());
        assert_eq!(outcome.output.stdout, b"booted\n");
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn hung_guest_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = VmLauncher::new(fake_front_end(dir.path(), "exec sleep 30"))
            .with_timeout(Duration::from_millis(300))
            .quiet();
        let mut session = native_session(&["true"]);

        let outcome = launcher.launch(&mut session).unwrap();
        assert_eq!(outcome.state, SessionState::TimedOut);
        assert!(outcome.elapsed < Duration::from_secs(10));
        assert_eq!(session.state(), SessionState::TimedOut);
    }

    #[test]
    fn missing_front_end_fails_session() {
        let launcher = VmLauncher::new(VmConfig {
            launcher: "/nonexistent/vng".to_string(),
            ..VmConfig::default()
        })
        .quiet();
        let mut session = native_session(&["true"]);

        let outcome = launcher.launch(&mut session).unwrap();
        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(session.state(), SessionState::Failed);
    }
}
