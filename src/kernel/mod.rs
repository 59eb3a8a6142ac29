//! Thin wrappers around host Linux primitives.
//!
//! Mounts, signals, and child-process execution live here so the
//! orchestration layers above can be exercised with fakes.
//! Dependency direction: host -> signal -> process -> mount

pub mod host;
pub mod mount;
pub mod process;
pub mod signal;
