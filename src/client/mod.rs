//! Client side of the protocol
//!
//! - [`transport`]: how an endpoint is reached
//! - [`http_transport`], [`local_transport`]: the two transports
//! - [`sender`]: concurrent per-phase fan-out
//! - [`decider`]: consistency analysis and go/no-go policy
//! - [`events`]: run events and receivers
//! - [`process`]: the orchestrator

pub mod decider;
pub mod events;
pub mod http_transport;
pub mod local_transport;
pub mod process;
pub mod sender;
pub mod transport;

pub use decider::{
    analyze_consistency, ClusterConsistency, CommitDecision, DefaultDecider, Discovered,
    NomadDecider, RecoveryDecision, Resolution,
};
pub use events::{AbortReason, NomadEvent, Outcome, ResultsReceiver, TracingReceiver};
pub use http_transport::HttpTransport;
pub use local_transport::{Fault, LocalTransport};
pub use process::{ClusterView, NomadClientProcess};
pub use sender::{DiscoveryRound, MessageSender, PhaseResult};
pub use transport::NomadTransport;
