//! Guest boot
//!
//! - `session`: VM session lifecycle and transition checks
//! - `launcher`: front-end invocation, acceleration choice, bounded run

pub mod launcher;
pub mod session;

pub use launcher::{Acceleration, LaunchInvocation, VmLauncher, VmOutcome};
pub use session::VmSession;
