//! Protocol value types exchanged between clients and servers
//!
//! - [`change`]: the pluggable change contract (`NomadChange`, `ChangeApplicator`)
//! - [`record`]: persisted change records
//! - [`messages`]: prepare / commit / rollback / takeover
//! - [`responses`]: discovery snapshots and accept/reject answers

pub mod change;
pub mod messages;
pub mod record;
pub mod responses;

pub use change::{ChangeApplicator, NomadChange, PotentialApplication};
pub use messages::{
    CommitMessage, MessageKind, Mutation, MutativeMessage, PrepareMessage, RollbackMessage,
    TakeoverMessage,
};
pub use record::{ChangeRecord, ChangeRequestState};
pub use responses::{
    AcceptRejectResponse, ChangeDetails, ChangeSummary, DiscoverResponse, NomadMode,
    RejectionReason,
};
