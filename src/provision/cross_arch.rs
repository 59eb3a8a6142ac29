/// Foreign-architecture root filesystem synthesis
///
/// Steps run in a fixed order. Only the base image and the emulation helper
/// are fatal; everything after them logs and carries on so a degraded root
/// can still be booted.
use crate::config::config::HarnessConfig;
use crate::kernel::mount::{with_binds, Mounter, HOST_FILESYSTEMS};
use crate::kernel::process::{CommandRunner, CommandSpec};
use crate::provision::base_image::ensure_base;
use crate::provision::modules::inject_modules;
use crate::types::{Architecture, CrossArchEnvironment, HarnessError, ResolvedKernel, Result};
use log::{info, warn};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Marker written once the package install inside the root succeeded
pub const TOOLING_MARKER: &str = ".kerncheck-tooling";

/// Hardware entropy source; early boot in a fresh root otherwise stalls on getrandom
pub const ENTROPY_DEVICE: &str = "virtio-rng-pci";

pub struct CrossArchPipeline<'a> {
    config: &'a HarnessConfig,
    mounter: &'a dyn Mounter,
    runner: &'a dyn CommandRunner,
}

impl<'a> CrossArchPipeline<'a> {
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

    pub fn root_for(&self, arch: Architecture) -> PathBuf {
        self.config.cache_dir.join(format!("rootfs-{}", arch))
    }

    /// The environment `build` would produce, computed without touching disk
    pub fn planned(&self, kernel: &ResolvedKernel, arch: Architecture) -> CrossArchEnvironment {
        let root = self.root_for(arch);
        let base_image_id = self
            .config
            .cross_arch
            .base_images
            .get(&arch)
            .map(|image| image.id.clone())
            .unwrap_or_default();
        let emulation_helper_path = self
            .find_emulation_helper(arch)
            .unwrap_or_else(|_| PathBuf::from(arch.emulation_helper_name()));
        CrossArchEnvironment {
            base_image_id,
            scratch_mount: root.join(strip_root(&self.config.workspace)),
            dns_config: root.join("etc/resolv.conf"),
            root,
            injected_modules: kernel.release.clone(),
            emulation_helper_path,
            devices: vec![ENTROPY_DEVICE.to_string()],
            rw_dirs: vec![self.config.workspace.clone()],
        }
    }

    pub fn build(&self, kernel: &ResolvedKernel, arch: Architecture) -> Result<CrossArchEnvironment> {
        let root = self.root_for(arch);
        info!("Provisioning {} root at {}", arch, root.display());

        // 1. Base image (fatal)
        let image = self.config.cross_arch.base_images.get(&arch).ok_or_else(|| {
            HarnessError::Provision(format!("No base image configured for {}", arch))
        })?;
        ensure_base(&root, image, self.mounter)?;

        // 2. Emulation helper (presence fatal) and guest tooling
        let helper = self.find_emulation_helper(arch)?;
        self.install_helper(&helper, &root);
        self.install_tooling(&root, arch);

        // 3. Modules for the resolved release
        let report = inject_modules(
            &kernel.modules_path,
            &root.join("lib/modules").join(&kernel.release),
        );
        info!(
            "Injected modules for {}: {} copied, {} already present",
            kernel.release, report.copied, report.skipped
        );

        // 4. Init helper
        self.install_init_helper(&root, arch);

        // 5. Workspace mount point
        let scratch_mount = root.join(strip_root(&self.config.workspace));
        if let Err(e) = fs::create_dir_all(&scratch_mount) {
            warn!(
                "Failed to create workspace mount point {}: {}",
                scratch_mount.display(),
                e
            );
        }

        // 6. Static name resolution
        let dns_config = root.join("etc/resolv.conf");
        if let Err(e) = write_resolv_conf(&dns_config, &self.config.cross_arch.nameserver) {
            warn!("Failed to write {}: {}", dns_config.display(), e);
        }

        // 7. Entropy device
        let devices = vec![ENTROPY_DEVICE.to_string()];

        Ok(CrossArchEnvironment {
            base_image_id: image.id.clone(),
            root,
            injected_modules: kernel.release.clone(),
            emulation_helper_path: helper,
            scratch_mount,
            dns_config,
            devices,
            rw_dirs: vec![self.config.workspace.clone()],
        })
    }

    fn find_emulation_helper(&self, arch: Architecture) -> Result<PathBuf> {
        let name = arch.emulation_helper_name();
        self.config
            .cross_arch
            .helper_search_dirs
            .iter()
            .map(|dir| dir.join(&name))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                HarnessError::Provision(format!(
                    "{} not found in {:?}; install qemu-user-static",
                    name, self.config.cross_arch.helper_search_dirs
                ))
            })
    }

    /// Copy the helper into the root so chrooted foreign binaries can run
    fn install_helper(&self, helper: &Path, root: &Path) {
        let Some(name) = helper.file_name() else { return };
        let target = root.join("usr/bin").join(name);
        if target.exists() {
            return;
        }
        let copied = fs::create_dir_all(root.join("usr/bin"))
            .and_then(|_| fs::copy(helper, &target).map(|_| ()));
        if let Err(e) = copied {
            warn!("Failed to copy {} into root: {}", helper.display(), e);
        }
    }

    fn install_tooling(&self, root: &Path, arch: Architecture) {
        let marker = root.join(TOOLING_MARKER);
        if marker.exists() {
            info!("Guest tooling already installed in {}", root.display());
            return;
        }

        let binds: Vec<(PathBuf, PathBuf)> = HOST_FILESYSTEMS
            .iter()
            .map(|name| (Path::new("/").join(name), root.join(name)))
            .collect();
        let install = CommandSpec::new("chroot")
            .arg(root.display().to_string())
            .args(["/bin/sh", "-c"])
            .arg(self.config.cross_arch.install_command.clone());
        let log = self.config.cache_dir.join(format!("tooling-{}.log", arch));

        match with_binds(self.mounter, &binds, || self.runner.run(&install, Some(&log))) {
            Ok(Ok(outcome)) if outcome.success() => {
                if let Err(e) = fs::write(&marker, b"") {
                    warn!("Failed to write {}: {}", marker.display(), e);
                }
                info!("Installed guest tooling in {}", root.display());
            }
            Ok(Ok(outcome)) => warn!(
                "Guest tooling install exited with {:?}, see {}",
                outcome.exit_code,
                log.display()
            ),
            Ok(Err(e)) => warn!("Guest tooling install did not run: {}", e),
            Err(e) => warn!("Skipping guest tooling install: {}", e),
        }
    }

    fn install_init_helper(&self, root: &Path, arch: Architecture) {
        let target = root.join("bin/busybox");
        if target.exists() {
            return;
        }
        let Some(source) = self.config.cross_arch.init_helpers.get(&arch) else {
            warn!("No static busybox configured for {}; guest init may be limited", arch);
            return;
        };

        let installed = fs::create_dir_all(root.join("bin"))
            .and_then(|_| fs::copy(source, &target))
            .and_then(|_| fs::set_permissions(&target, fs::Permissions::from_mode(0o755)));
        if let Err(e) = installed {
            warn!("Failed to install {}: {}", target.display(), e);
        }
    }
}

/// `/srv/work` -> `srv/work`, for joining under a root
fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

fn write_resolv_conf(path: &Path, nameserver: &str) -> std::io::Result<()> {
    // Base images ship resolv.conf as a link into /run; replace rather than follow it
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("nameserver {}\n", nameserver))
}
