//! Signal delivery to supervised children.

use crate::config::types::{HarnessError, Result};
use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Ask `pid` to exit with SIGTERM.
///
/// A process that is already gone is not an error.
pub fn send_terminate(pid: u32) -> Result<()> {
    send(pid, Signal::SIGTERM)
}

pub fn send(pid: u32, signal: Signal) -> Result<()> {
    let target = to_pid(pid)?;
    match kill(target, signal) {
        Ok(()) => {
            debug!("Sent {} to {}", signal, pid);
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!("{} not delivered, {} already exited", signal, pid);
            Ok(())
        }
        Err(e) => Err(HarnessError::Process(format!(
            "Failed to send {} to {}: {}",
            signal, pid, e
        ))),
    }
}

/// Liveness probe via the null signal
pub fn process_alive(pid: u32) -> bool {
    match to_pid(pid) {
        Ok(target) => !matches!(kill(target, None), Err(Errno::ESRCH)),
        Err(_) => false,
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    // pid 0 and negatives address process groups
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(HarnessError::Process(format!("Invalid pid: {}", pid))),
    }
}
