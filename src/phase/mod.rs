//! Multi-phase test running
//!
//! - `aggregator`: sequential phases, dependency gating, single verdict
//! - `tail`: bounded log excerpts

pub mod aggregator;
pub mod tail;

pub use aggregator::{CommandDependencyProbe, DependencyProbe, PhaseAggregator};
