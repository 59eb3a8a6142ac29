//! Facts about the host the harness runs on.

use crate::config::types::{HarnessError, Result};
use std::path::Path;

/// Release of the running kernel (`uname -r`)
pub fn running_release() -> Result<String> {
    let uts = nix::sys::utsname::uname()
        .map_err(|e| HarnessError::Process(format!("uname failed: {}", e)))?;
    Ok(uts.release().to_string_lossy().into_owned())
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Hardware acceleration is usable when the KVM device node exists
pub fn kvm_available(kvm_device: &Path) -> bool {
    kvm_device.exists()
}
