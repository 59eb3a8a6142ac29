use crate::types::NativeEnvironment;
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Host temporary roots; never exposed read-write to a guest sharing the host root
fn temp_roots() -> Vec<PathBuf> {
    let mut roots = vec![
        PathBuf::from("/tmp"),
        PathBuf::from("/var/tmp"),
        PathBuf::from("/dev/shm"),
    ];
    let env_tmp = std::env::temp_dir();
    if !roots.contains(&env_tmp) {
        roots.push(env_tmp);
    }
    roots
}

/// A directory is unsafe if it is a temp root or contains one (`/`, `/var`)
fn exposes_temp_root(dir: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| root.starts_with(dir))
}

/// Native guest: host root filesystem, with `candidates` bound read-write
/// at identical paths. Directories nested in an earlier one are dropped.
pub fn native_environment(candidates: &[PathBuf]) -> NativeEnvironment {
    let roots = temp_roots();
    let mut rw_dirs: Vec<PathBuf> = Vec::new();

    for dir in candidates {
        if exposes_temp_root(dir, &roots) {
            warn!(
                "Refusing to expose {} read-write: it covers a host temporary directory",
                dir.display()
            );
            continue;
        }
        if rw_dirs.iter().any(|kept| dir.starts_with(kept)) {
            debug!("{} already covered by an earlier rw dir", dir.display());
            continue;
        }
        rw_dirs.push(dir.clone());
    }

    NativeEnvironment { rw_dirs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_roots_are_never_rw() {
        let env = native_environment(&[
            PathBuf::from("/tmp"),
            PathBuf::from("/var"),
            PathBuf::from("/"),
            PathBuf::from("/srv/work"),
        ]);
        assert_eq!(env.rw_dirs, vec![PathBuf::from("/srv/work")]);
    }

    #[test]
    fn nested_dirs_collapse_into_parent() {
        let env = native_environment(&[
            PathBuf::from("/srv/work"),
            PathBuf::from("/srv/work/artifacts"),
            PathBuf::from("/srv/out"),
        ]);
        assert_eq!(
            env.rw_dirs,
            vec![PathBuf::from("/srv/work"), PathBuf::from("/srv/out")]
        );
    }

    #[test]
    fn subdirectory_of_tmp_is_allowed() {
        let env = native_environment(&[PathBuf::from("/tmp/kerncheck-work")]);
        assert_eq!(env.rw_dirs.len(), 1);
    }
}
