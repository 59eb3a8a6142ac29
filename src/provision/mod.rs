//! Guest environment provisioning
//!
//! - `native`: host root filesystem reuse
//! - `cross_arch`: foreign root filesystem synthesis pipeline
//! - `base_image`: base tarball fetch, verification, extraction
//! - `modules`: non-destructive module tree injection

pub mod base_image;
pub mod cross_arch;
pub mod modules;
pub mod native;

use crate::config::config::HarnessConfig;
use crate::kernel::mount::Mounter;
use crate::kernel::process::CommandRunner;
use crate::types::{
    Architecture, EnvironmentKind, GuestEnvironment, NativeEnvironment, ResolvedKernel, Result,
};
use cross_arch::CrossArchPipeline;
use log::info;

/// Builds the guest environment for a resolved kernel
pub struct EnvironmentProvisioner<'a> {
    config: &'a HarnessConfig,
    mounter: &'a dyn Mounter,
    runner: &'a dyn CommandRunner,
}

impl<'a> EnvironmentProvisioner<'a> {
    pub fn new(
        config: &'a HarnessConfig,
        mounter: &'a dyn Mounter,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            mounter,
            runner,
        }
    }

    pub fn provision(&self, kernel: &ResolvedKernel, arch: Architecture) -> Result<GuestEnvironment> {
        let environment = match EnvironmentKind::for_arch(arch) {
            EnvironmentKind::Native => GuestEnvironment::Native(self.native()),
            EnvironmentKind::CrossArch => GuestEnvironment::CrossArch(
                CrossArchPipeline::new(self.config, self.mounter, self.runner).build(kernel, arch)?,
            ),
        };

        environment.check_kernel(kernel)?;
        info!("Provisioned {:?} environment for {}", environment.kind(), kernel.release);
        Ok(environment)
    }

    /// The environment `provision` would produce, without building anything
    pub fn plan(&self, kernel: &ResolvedKernel, arch: Architecture) -> GuestEnvironment {
        match EnvironmentKind::for_arch(arch) {
            EnvironmentKind::Native => GuestEnvironment::Native(self.native()),
            EnvironmentKind::CrossArch => GuestEnvironment::CrossArch(
                CrossArchPipeline::new(self.config, self.mounter, self.runner).planned(kernel, arch),
            ),
        }
    }

    fn native(&self) -> NativeEnvironment {
        let candidates = [self.config.workspace.clone(), self.config.artifacts_dir.clone()];
        native::native_environment(&candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mount::testing::RecordingMounter;
    use crate::kernel::process::testing::ScriptedRunner;
    use std::path::PathBuf;

    #[test]
    fn native_arch_needs_no_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::default();
        config.workspace = dir.path().join("work");
        config.artifacts_dir = dir.path().join("work/artifacts");
        config.cache_dir = dir.path().join("cache");

        let mounter = RecordingMounter::default();
        let runner = ScriptedRunner::default();
        let kernel = ResolvedKernel {
            release: "6.12.3-y".to_string(),
            image_path: PathBuf::from("/boot/vmlinuz-6.12.3-y"),
            modules_path: PathBuf::from("/lib/modules/6.12.3-y"),
        };

        let env = EnvironmentProvisioner::new(&config, &mounter, &runner)
            .provision(&kernel, Architecture::host())
            .unwrap();
        assert_eq!(env.kind(), EnvironmentKind::Native);
        assert_eq!(env.rw_dirs(), &[config.workspace.clone()]);
        assert!(mounter.ops.borrow().is_empty());
        assert!(runner.calls.borrow().is_empty());
        assert!(!config.cache_dir.exists());
    }
}
