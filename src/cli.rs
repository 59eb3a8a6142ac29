use crate::config::config::HarnessConfig;
use crate::core::guest::GuestRun;
use crate::core::host::run_phases;
use crate::core::kernel_run::{KernelRun, KernelRunOutcome, KernelRunRequest};
use crate::exec::HttpHealthProbe;
use crate::kernel::host;
use crate::kernel::mount::NixMounter;
use crate::kernel::process::SystemRunner;
use crate::phase::CommandDependencyProbe;
use crate::provision::EnvironmentProvisioner;
use crate::resolve::KernelResolver;
use crate::types::{Architecture, HarnessError, KernelSpec, EXIT_FAILED, EXIT_PASSED};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a kernel in a VM and run the workload and guest phases inside it
    Run {
        /// Kernel version: symbolic (v6.12), literal release, or "host"
        #[arg(long)]
        kernel: String,
        /// Guest architecture (defaults to the host's)
        #[arg(long)]
        arch: Option<Architecture>,
        /// Configuration file (defaults to ./kerncheck.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Guest memory, e.g. 2G
        #[arg(long)]
        memory: Option<String>,
        /// Guest vCPU count
        #[arg(long)]
        cpus: Option<u32>,
        /// Print the VM invocation without booting
        #[arg(long)]
        dry_run: bool,
    },
    /// Guest entry point: workload smoke test, then guest phases
    Guest {
        /// Artifacts directory shared with the host
        #[arg(long)]
        artifacts: PathBuf,
        /// Configuration file (defaults to ./kerncheck.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the host-only phases
    Phases {
        /// Configuration file (defaults to ./kerncheck.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write logs here instead of a fresh run directory
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    /// Show which installed kernel a version token selects
    Resolve {
        /// Kernel version: symbolic (v6.12), literal release, or "host"
        #[arg(long, required_unless_present = "list")]
        kernel: Option<String>,
        /// Kernel architecture (defaults to the host's)
        #[arg(long)]
        arch: Option<Architecture>,
        /// List installed releases, lowest precedence first
        #[arg(long)]
        list: bool,
        /// Configuration file (defaults to ./kerncheck.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Build or refresh the guest environment without booting
    Provision {
        /// Kernel version: symbolic (v6.12), literal release, or "host"
        #[arg(long)]
        kernel: String,
        /// Guest architecture
        #[arg(long)]
        arch: Architecture,
        /// Configuration file (defaults to ./kerncheck.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Exit status for an error that ended the run
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<HarnessError>()
        .map(HarnessError::exit_code)
        .unwrap_or(EXIT_FAILED)
}

/// Parse arguments and run; returns the process exit status
pub fn run() -> Result<i32> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            kernel,
            arch,
            config,
            memory,
            cpus,
            dry_run,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(memory) = memory {
                config.vm.memory = memory;
            }
            if let Some(cpus) = cpus {
                config.vm.cpus = cpus;
            }
            config.validate()?;

            let arch = arch.unwrap_or_else(Architecture::host);
            if !dry_run && !arch.is_native() && !host::is_root() {
                eprintln!("Warning: building a {} root needs bind mounts and chroot", arch);
                eprintln!("  Run as root, or provision the root beforehand as root");
            }

            let mut request = KernelRunRequest::new(KernelSpec::new(kernel, arch), &config);
            request.dry_run = dry_run;

            let mounter = NixMounter;
            let runner = SystemRunner;
            match KernelRun::new(&config, &mounter, &runner).execute(&request)? {
                KernelRunOutcome::DryRun { invocation } => {
                    eprintln!("Dry run, nothing booted:");
                    println!("{}", invocation);
                    Ok(EXIT_PASSED)
                }
                KernelRunOutcome::Completed(summary) => {
                    summary.print(&mut io::stdout())?;
                    Ok(summary.exit_code)
                }
            }
        }
        Commands::Guest { artifacts, config } => {
            let config = load_config(config.as_deref())?;
            let runner = SystemRunner;
            let health = HttpHealthProbe::for_workload(&config.workload)?;
            let dependencies = CommandDependencyProbe::new(&runner);

            eprintln!("Guest kernel {}", host::running_release().unwrap_or_default());
            let summary = GuestRun::new(&config, &runner, &health, &dependencies)
                .execute(&artifacts, &mut io::stdout())?;
            summary.print(&mut io::stdout())?;
            Ok(summary.exit_code)
        }
        Commands::Phases { config, artifacts } => {
            let config = load_config(config.as_deref())?;
            let runner = SystemRunner;
            let dependencies = CommandDependencyProbe::new(&runner);

            let summary = run_phases(
                &config,
                &runner,
                &dependencies,
                artifacts.as_deref(),
                &mut io::stdout(),
            )?;
            summary.print(&mut io::stdout())?;
            Ok(summary.exit_code)
        }
        Commands::Resolve {
            kernel,
            arch,
            list,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let arch = arch.unwrap_or_else(Architecture::host);
            let resolver = KernelResolver::from_config(&config, arch)?;

            if list {
                for release in resolver.installed_releases()? {
                    println!("{}", release);
                }
            }
            if let Some(token) = kernel {
                let resolved = resolver.resolve(&KernelSpec::new(token, arch))?;
                println!(
                    "{}\t{}\t{}",
                    resolved.release,
                    resolved.image_path.display(),
                    resolved.modules_path.display()
                );
            }
            Ok(EXIT_PASSED)
        }
        Commands::Provision {
            kernel,
            arch,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            if !arch.is_native() && !host::is_root() {
                eprintln!("Warning: not running as root; bind mounts will likely fail");
            }

            let kernel = KernelResolver::from_config(&config, arch)?
                .resolve(&KernelSpec::new(kernel, arch))?;
            let mounter = NixMounter;
            let runner = SystemRunner;
            let environment =
                EnvironmentProvisioner::new(&config, &mounter, &runner).provision(&kernel, arch)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&environment)
                    .context("Failed to serialize environment")?
            );
            Ok(EXIT_PASSED)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let config = HarnessConfig::load(path)?;
    log::debug!("Workspace {}", config.workspace.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "kerncheck", "run", "--kernel", "v6.12", "--arch", "arm64", "--cpus", "4", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                kernel,
                arch,
                cpus,
                dry_run,
                ..
            } => {
                assert_eq!(kernel, "v6.12");
                assert_eq!(arch, Some(Architecture::Aarch64));
                assert_eq!(cpus, Some(4));
                assert!(dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn resolve_needs_kernel_or_list() {
        assert!(Cli::try_parse_from(["kerncheck", "resolve"]).is_err());
        assert!(Cli::try_parse_from(["kerncheck", "resolve", "--list"]).is_ok());
    }

    #[test]
    fn harness_errors_keep_their_exit_code() {
        let err = anyhow::Error::from(HarnessError::Config("bad".to_string()));
        assert_eq!(exit_code_for(&err), crate::types::EXIT_CONFIG);
        let wrapped = anyhow::Error::from(HarnessError::Config("bad".to_string())).context("loading");
        assert_eq!(exit_code_for(&wrapped), crate::types::EXIT_CONFIG);
        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), EXIT_FAILED);
    }
}
