//! Workload execution control
//!
//! Runs inside the guest. The supervisor owns the workload process for its
//! whole life: spawn, readiness polling, triggers, graceful shutdown.

pub mod readiness;
pub mod supervisor;
pub mod workload;

pub use readiness::{HealthProbe, HttpHealthProbe, PollBudget};
pub use supervisor::{GuestSupervisor, OutputCheck, SupervisorReport};
