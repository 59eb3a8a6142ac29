//! Kernel resolution
//!
//! - `version`: token classification and natural release ordering
//! - `resolver`: installed-kernel enumeration and artifact verification

pub mod resolver;
pub mod version;

pub use resolver::KernelResolver;
