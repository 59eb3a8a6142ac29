//! Integration tests for kernel resolution
//!
//! These tests lay out kernel images and module trees the way a distribution
//! installs them and resolve tokens through the public API.

use kerncheck::resolve::KernelResolver;
use kerncheck::{Architecture, HarnessError, KernelSpec, EXIT_PRECONDITION};
use std::fs;
use std::path::Path;

fn install(root: &Path, release: &str) {
    fs::create_dir_all(root.join("boot")).unwrap();
    fs::write(root.join("boot").join(format!("vmlinuz-{}", release)), b"image").unwrap();
    fs::create_dir_all(root.join("lib/modules").join(release).join("kernel")).unwrap();
}

fn resolver(root: &Path) -> KernelResolver {
    KernelResolver::new(root.join("boot"), root.join("lib/modules"))
}

fn spec(token: &str) -> KernelSpec {
    KernelSpec::new(token, Architecture::host())
}

#[test]
fn test_symbolic_token_selects_greatest_release() {
    let dir = tempfile::tempdir().unwrap();
    for release in ["6.1.9-generic", "6.12.0-x", "6.12.3-y", "6.13.1-z"] {
        install(dir.path(), release);
    }

    let kernel = resolver(dir.path()).resolve(&spec("v6.12")).unwrap();
    assert_eq!(kernel.release, "6.12.3-y");
    assert_eq!(kernel.image_path, dir.path().join("boot/vmlinuz-6.12.3-y"));
    assert_eq!(kernel.modules_path, dir.path().join("lib/modules/6.12.3-y"));

    // 6.1.9 shares a textual prefix with 6.12 but not a version component
    let kernel = resolver(dir.path()).resolve(&spec("v6.1")).unwrap();
    assert_eq!(kernel.release, "6.1.9-generic");
}

#[test]
fn test_unmatched_token_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "6.12.3-y");

    let err = resolver(dir.path()).resolve(&spec("v5.15")).unwrap_err();
    assert!(matches!(err, HarnessError::KernelNotFound { .. }));
    assert_eq!(err.exit_code(), EXIT_PRECONDITION);
}

#[test]
fn test_missing_artifacts_fail_as_preconditions() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "6.12.3-y");
    install(dir.path(), "6.12.4-y");

    // Image without a module tree
    fs::remove_dir_all(dir.path().join("lib/modules/6.12.3-y")).unwrap();
    let err = resolver(dir.path()).resolve(&spec("6.12.3-y")).unwrap_err();
    assert_eq!(err.exit_code(), EXIT_PRECONDITION);

    // Literal release with no image at all
    let err = resolver(dir.path()).resolve(&spec("6.12.9-y")).unwrap_err();
    assert_eq!(err.exit_code(), EXIT_PRECONDITION);

    // The intact release is unaffected
    assert!(resolver(dir.path()).resolve(&spec("6.12.4-y")).is_ok());
}

#[test]
fn test_listing_is_ordered_and_skips_backups() {
    let dir = tempfile::tempdir().unwrap();
    for release in ["6.12.10-a", "6.12.9-a", "6.8.0-a"] {
        install(dir.path(), release);
    }
    fs::write(dir.path().join("boot/vmlinuz-6.12.10-a.old"), b"image").unwrap();

    let releases = resolver(dir.path()).installed_releases().unwrap();
    assert_eq!(releases, vec!["6.8.0-a", "6.12.9-a", "6.12.10-a"]);
}
