//! Configuration
//!
//! Run configuration, the isolated phase environment, and shared types.

pub mod config;
pub mod env;
pub mod types;
