//! kerncheck: kernel compatibility harness for a kernel-tracing workload
//! Boots target kernels in lightweight VMs and runs the workload plus independent test phases inside them
//!
//! # Architecture
//!
//! The crate follows the run's control flow, leaf-first:
//!
//! ## Host Primitives ([`kernel`])
//! - [`kernel::mount`]: Bind mounts with reverse-order release
//! - [`kernel::process`]: Command execution behind a runner trait
//! - [`kernel::signal`]: Signal delivery and liveness checks
//! - [`kernel::host`]: Running release, privilege, KVM availability
//!
//! ## Kernel Resolution ([`resolve`])
//! - [`resolve::resolver`]: Version token to installed release
//! - [`resolve::version`]: Release ordering and prefix matching
//!
//! ## Guest Environments ([`provision`])
//! - [`provision::native`]: Host filesystem reuse
//! - [`provision::cross_arch`]: Foreign root filesystem synthesis
//! - [`provision::base_image`]: Base tarball fetch and extraction
//! - [`provision::modules`]: Kernel module injection
//!
//! ## Virtual Machines ([`vm`])
//! - [`vm::launcher`]: virtme-ng invocation, acceleration, session bound
//! - [`vm::session`]: Session lifecycle
//!
//! ## Guest Execution ([`exec`])
//! - [`exec::supervisor`]: Workload smoke test protocol
//! - [`exec::readiness`]: Bounded health polling
//! - [`exec::workload`]: Workload process ownership and graceful stop
//!
//! ## Test Phases ([`phase`])
//! - [`phase::aggregator`]: Sequential phases, one verdict
//! - [`phase::tail`]: Log excerpts
//!
//! ## Observability ([`observability`])
//! - [`observability::artifacts`]: Run-scoped artifact directories
//! - [`observability::report`]: JSON run summary
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: Configuration loading and validation
//! - [`config::env`]: Isolated phase environment
//! - [`config::types`]: Shared type definitions and closed enums
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Bounded output collection
//!
//! # Design Principles
//!
//! 1. **Preconditions first** - Missing artifacts fail before anything boots
//! 2. **Isolated phases** - A phase's verdict is its exit status alone
//! 3. **Scoped host state** - Every mount is released, in reverse order
//! 4. **Bounded waits** - Every wait has an attempt budget or deadline

// Host Primitives
pub mod kernel;

// Kernel Resolution
pub mod resolve;

// Guest Environments
pub mod provision;

// Virtual Machines
pub mod vm;

// Guest Execution
pub mod exec;

// Test Phases
pub mod phase;

// Run orchestration
pub mod core;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the kerncheck binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;

pub mod types {
    pub use crate::config::types::*;
}
