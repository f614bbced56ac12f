//! Ops commands for cluster management

pub mod recover;
pub mod verify;

pub use recover::{change_log, recover_cluster};
pub use verify::{verify_cluster, verify_with, VerifyReport};
