//! Cluster settings: the change kind carried by the `nomad` binaries
//!
//! - [`change`]: `ClusterConfig` and `ConfigChange`
//! - [`applicator`]: per-server validation and application
//! - [`shrink`]: decider refusing to shrink a committed resource

pub mod applicator;
pub mod change;
pub mod shrink;

pub use applicator::SettingsApplicator;
pub use change::{ClusterConfig, ConfigChange};
pub use shrink::ResourceShrinkDecider;
