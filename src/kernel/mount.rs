/// Scoped bind mounts for chroot-based provisioning
///
/// Every bind recorded in a [`MountLedger`] is released in strict reverse
/// order, on the success path and on every failure path of the enclosing step.
use crate::config::types::{HarnessError, Result};
use log::{debug, info, warn};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Host filesystems bound into a root while commands run chrooted in it
pub const HOST_FILESYSTEMS: [&str; 3] = ["dev", "proc", "sys"];

/// Mount operations used by provisioning
pub trait Mounter {
    /// Recursively bind `source` onto `target`
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// Real mounts via mount(2)/umount2(2)
#[derive(Debug, Default, Clone, Copy)]
pub struct NixMounter;

impl Mounter for NixMounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        use nix::mount::{mount, MsFlags};

        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| {
            HarnessError::Mount(format!(
                "bind {} -> {} failed: {}",
                source.display(),
                target.display(),
                e
            ))
        })
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        use nix::mount::{umount2, MntFlags};

        // Lazy detach: recursive binds of /dev and /sys carry submounts.
        umount2(target, MntFlags::MNT_DETACH).map_err(|e| {
            HarnessError::Mount(format!("umount {} failed: {}", target.display(), e))
        })
    }
}

/// Ledger of active binds; releases in reverse creation order
pub struct MountLedger<'a> {
    mounter: &'a dyn Mounter,
    active: Vec<PathBuf>,
}

impl<'a> MountLedger<'a> {
    pub fn new(mounter: &'a dyn Mounter) -> Self {
        Self {
            mounter,
            active: Vec::new(),
        }
    }

    /// Bind and record; the target directory is created if missing
    pub fn bind(&mut self, source: &Path, target: &Path) -> Result<()> {
        fs::create_dir_all(target).map_err(|e| {
            HarnessError::Mount(format!(
                "Failed to create mount point {}: {}",
                target.display(),
                e
            ))
        })?;
        self.mounter.bind(source, target)?;
        debug!("Bound {} -> {}", source.display(), target.display());
        self.active.push(target.to_path_buf());
        Ok(())
    }

    pub fn active(&self) -> &[PathBuf] {
        &self.active
    }

    /// Release every recorded bind, newest first.
    ///
    /// A failed unmount is logged and the remaining binds are still released.
    /// Returns the failures.
    pub fn release_all(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        while let Some(target) = self.active.pop() {
            match self.mounter.unmount(&target) {
                Ok(()) => debug!("Released {}", target.display()),
                Err(e) => {
                    warn!("{}", e);
                    errors.push(e.to_string());
                }
            }
        }
        errors
    }
}

impl Drop for MountLedger<'_> {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            warn!(
                "Releasing {} bind(s) left active at scope exit",
                self.active.len()
            );
            self.release_all();
        }
    }
}

/// Run `body` with every `(source, target)` bind active.
///
/// Binds are acquired in order. If one fails, the ones already acquired are
/// released and the error is returned without running `body`. Otherwise all
/// binds are released after `body` returns, whatever it returned.
pub fn with_binds<T>(
    mounter: &dyn Mounter,
    binds: &[(PathBuf, PathBuf)],
    body: impl FnOnce() -> T,
) -> Result<T> {
    let mut ledger = MountLedger::new(mounter);

    for (source, target) in binds {
        if let Err(e) = ledger.bind(source, target) {
            let release_errors = ledger.release_all();
            if !release_errors.is_empty() {
                warn!(
                    "{} unmount(s) failed while unwinding partial binds",
                    release_errors.len()
                );
            }
            return Err(e);
        }
    }

    let value = body();

    let release_errors = ledger.release_all();
    if release_errors.is_empty() {
        info!("Released {} bind mount(s)", binds.len());
    } else {
        warn!(
            "{} of {} bind mount(s) failed to release",
            release_errors.len(),
            binds.len()
        );
    }
    Ok(value)
}

/// Detach host filesystems left bound under `root` by a run that was killed
/// before its ledger could release them.
///
/// Unmounting a directory that is not a mount point fails; that is logged
/// and ignored. Any child still on a different device than `root` afterwards
/// is an error, and `root` must not be removed.
pub fn release_stale_binds(mounter: &dyn Mounter, root: &Path) -> Result<()> {
    let root_dev = match fs::symlink_metadata(root) {
        Ok(meta) => meta.dev(),
        Err(_) => return Ok(()),
    };

    for name in HOST_FILESYSTEMS.iter().rev() {
        let target = root.join(name);
        if fs::symlink_metadata(&target).is_err() {
            continue;
        }
        if let Err(e) = mounter.unmount(&target) {
            debug!("{}", e);
        }
        if let Ok(meta) = fs::symlink_metadata(&target) {
            if meta.dev() != root_dev {
                return Err(HarnessError::Mount(format!(
                    "{} is still a mount point",
                    target.display()
                )));
            }
        }
    }
    Ok(())
}
