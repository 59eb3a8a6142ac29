use log::{debug, warn};
use std::fs;
use std::path::Path;

/// Counts from a non-destructive module tree copy
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InjectReport {
    pub copied: usize,
    /// Already present in the target; left untouched
    pub skipped: usize,
    pub failed: usize,
}

/// Copy the module tree at `source` into `target`, never overwriting.
///
/// Existing entries are skipped and per-entry failures are logged and
/// counted, so a partial tree still boots whatever it could carry.
pub fn inject_modules(source: &Path, target: &Path) -> InjectReport {
    let mut report = InjectReport::default();
    copy_tree(source, target, &mut report);
    if report.failed > 0 {
        warn!(
            "Module injection into {} incomplete: {} entries failed",
            target.display(),
            report.failed
        );
    }
    debug!("Module injection: {:?}", report);
    report
}

fn copy_tree(source: &Path, target: &Path, report: &mut InjectReport) {
    if let Err(e) = fs::create_dir_all(target) {
        warn!("Failed to create {}: {}", target.display(), e);
        report.failed += 1;
        return;
    }

    let entries = match fs::read_dir(source) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {}: {}", source.display(), e);
            report.failed += 1;
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read entry in {}: {}", source.display(), e);
                report.failed += 1;
                continue;
            }
        };
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());

        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to stat {}: {}", source_path.display(), e);
                report.failed += 1;
                continue;
            }
        };

        if file_type.is_dir() {
            copy_tree(&source_path, &target_path, report);
            continue;
        }

        // symlink_metadata: a dangling link in the target still counts as present
        if fs::symlink_metadata(&target_path).is_ok() {
            report.skipped += 1;
            continue;
        }

        let copied = if file_type.is_symlink() {
            fs::read_link(&source_path)
                .and_then(|link| std::os::unix::fs::symlink(link, &target_path))
        } else {
            fs::copy(&source_path, &target_path).map(|_| ())
        };
        match copied {
            Ok(()) => report.copied += 1,
            Err(e) => {
                warn!(
                    "Failed to copy {} -> {}: {}",
                    source_path.display(),
                    target_path.display(),
                    e
                );
                report.failed += 1;
            }
        }
    }
}
