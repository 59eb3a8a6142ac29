/// Run-scoped artifact directories
///
/// Every run writes into its own `<base>/<run-id>` directory so concurrent or
/// repeated runs never overwrite each other's logs. Directories are kept
/// after the run; `<base>/latest` points at the newest one.
use crate::types::{HarnessError, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const LATEST_LINK: &str = "latest";

#[derive(Debug, Clone)]
pub struct ArtifactsDir {
    run_id: String,
    dir: PathBuf,
}

impl ArtifactsDir {
    /// Create a fresh run directory under `base`
    pub fn create(base: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let dir = base.join(&run_id);
        fs::create_dir_all(&dir).map_err(|e| {
            HarnessError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create artifacts directory {}: {}", dir.display(), e),
            ))
        })?;

        let latest = base.join(LATEST_LINK);
        if fs::symlink_metadata(&latest).is_ok() {
            let _ = fs::remove_file(&latest);
        }
        if let Err(e) = std::os::unix::fs::symlink(&run_id, &latest) {
            warn!("Failed to update {}: {}", latest.display(), e);
        }

        debug!("Artifacts for run {} in {}", run_id, dir.display());
        Ok(Self { run_id, dir })
    }

    /// Use an existing directory as given (the guest writes into the
    /// directory its host created)
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            run_id: Uuid::new_v4().to_string(),
            dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}
