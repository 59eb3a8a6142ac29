use crate::config::config::{HarnessConfig, KernelRoots};
use crate::kernel::host;
use crate::resolve::version::{matches_prefix, VersionKey, VersionToken};
use crate::types::{Architecture, HarnessError, KernelSpec, ResolvedKernel, Result};
use log::{debug, info};
use std::fs::File;
use std::path::{Path, PathBuf};

const IMAGE_PREFIX: &str = "vmlinuz-";

/// Maps a kernel version token to an installed, bootable release
#[derive(Debug, Clone)]
pub struct KernelResolver {
    image_dir: PathBuf,
    modules_dir: PathBuf,
}

impl KernelResolver {
    pub fn new(image_dir: impl Into<PathBuf>, modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            modules_dir: modules_dir.into(),
        }
    }

    pub fn from_roots(roots: &KernelRoots) -> Self {
        Self::new(&roots.image_dir, &roots.modules_dir)
    }

    pub fn from_config(config: &HarnessConfig, arch: Architecture) -> Result<Self> {
        Ok(Self::from_roots(config.kernels.roots_for(arch)?))
    }

    pub fn image_path(&self, release: &str) -> PathBuf {
        self.image_dir.join(format!("{}{}", IMAGE_PREFIX, release))
    }

    pub fn modules_path(&self, release: &str) -> PathBuf {
        self.modules_dir.join(release)
    }

    /// Releases with an installed image, lowest precedence first.
    ///
    /// A missing image directory means nothing is installed.
    pub fn installed_releases(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.image_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut releases = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(release) = name.strip_prefix(IMAGE_PREFIX) {
                // vmlinuz-<release>.old and similar backups are not bootable candidates
                if !release.is_empty() && !release.ends_with(".old") {
                    releases.push(release.to_string());
                }
            }
        }

        releases.sort_by_key(|r| VersionKey::new(r));
        Ok(releases)
    }

    /// Resolve `spec` to a release whose image and module tree both exist.
    ///
    /// A symbolic token selects the greatest matching release. Literal and
    /// `host` tokens name the release directly. Nothing is retried.
    pub fn resolve(&self, spec: &KernelSpec) -> Result<ResolvedKernel> {
        let release = match VersionToken::parse(&spec.version_token) {
            VersionToken::Host => {
                if !spec.architecture.is_native() {
                    return Err(HarnessError::Config(format!(
                        "'host' kernel cannot boot a {} guest on a {} host",
                        spec.architecture,
                        Architecture::host()
                    )));
                }
                host::running_release()?
            }
            VersionToken::Literal(release) => release,
            VersionToken::Symbolic(prefix) => {
                let candidates: Vec<String> = self
                    .installed_releases()?
                    .into_iter()
                    .filter(|release| matches_prefix(&prefix, release))
                    .collect();
                debug!(
                    "Kernel candidates for {}: {:?}",
                    spec.version_token, candidates
                );
                // Sorted ascending, so the last one wins
                candidates
                    .into_iter()
                    .last()
                    .ok_or_else(|| HarnessError::KernelNotFound {
                        token: spec.version_token.clone(),
                        arch: spec.architecture,
                    })?
            }
        };

        let kernel = self.verify(&release)?;
        info!(
            "Resolved {} ({}) to {}",
            spec.version_token, spec.architecture, kernel.release
        );
        Ok(kernel)
    }

    /// Check both artifacts of `release` before handing it out
    pub fn verify(&self, release: &str) -> Result<ResolvedKernel> {
        let image_path = self.image_path(release);
        let modules_path = self.modules_path(release);

        if !image_path.is_file() {
            return Err(HarnessError::precondition_missing("Kernel image", &image_path));
        }
        File::open(&image_path).map_err(|e| {
            HarnessError::Precondition(format!(
                "Kernel image {} is not readable: {}",
                image_path.display(),
                e
            ))
        })?;
        if !is_readable_dir(&modules_path) {
            return Err(HarnessError::precondition_missing(
                "Kernel modules directory",
                &modules_path,
            ));
        }

        Ok(ResolvedKernel {
            release: release.to_string(),
            image_path,
            modules_path,
        })
    }
}

fn is_readable_dir(path: &Path) -> bool {
    path.is_dir() && std::fs::read_dir(path).is_ok()
}
