//! Ordered event stream produced by a client run
//!
//! A run reports everything it does as [`NomadEvent`]s pushed into a
//! [`ResultsReceiver`]. Receivers are append-only sinks: collect into a
//! `Vec`, forward over a channel, or mirror to `tracing`.

use crate::protocol::{DiscoverResponse, NomadChange};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Why a run stopped before sending any prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortReason {
    /// An endpoint could not be discovered
    DiscoverFailed,
    /// One change is committed on some endpoints and rolled back on others
    Inconsistent,
    /// Endpoints hold different committed changes at the same version
    Partitioned,
    /// Committed heads differ without a direct conflict
    Desynchronized,
    /// Another client mutated the cluster during this run
    OtherClientInProgress,
    /// A takeover could not be delivered to every endpoint
    TakeoverFailed,
    /// The cluster is not accepting and this run may not recover it
    ClusterNotAccepting,
    /// Recovery found no prepared change
    NothingToRecover,
    /// A forced commit was requested for a change not prepared everywhere
    RecoveryRefused,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbortReason::DiscoverFailed => "discovery failed",
            AbortReason::Inconsistent => "cluster configuration is inconsistent",
            AbortReason::Partitioned => "cluster configuration is partitioned",
            AbortReason::Desynchronized => "cluster configuration is desynchronized",
            AbortReason::OtherClientInProgress => "another client is in progress",
            AbortReason::TakeoverFailed => "takeover failed",
            AbortReason::ClusterNotAccepting => "cluster is not accepting changes",
            AbortReason::NothingToRecover => "nothing to recover",
            AbortReason::RecoveryRefused => "forced commit refused",
        };
        f.write_str(s)
    }
}

/// Final verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Committed,
    RolledBack,
    Aborted(AbortReason),
    /// Commit or rollback reached only part of the cluster
    Ambiguous,
}

impl Outcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Committed => write!(f, "committed"),
            Outcome::RolledBack => write!(f, "rolled back"),
            Outcome::Aborted(reason) => write!(f, "aborted: {}", reason),
            Outcome::Ambiguous => write!(f, "cannot decide over commit or rollback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NomadEvent<C: NomadChange> {
    StartDiscovery {
        endpoints: Vec<String>,
    },
    /// Second discovery round after a takeover
    DiscoverRepeated,
    Discovered {
        endpoint: String,
        response: Box<DiscoverResponse<C>>,
    },
    DiscoverFail {
        endpoint: String,
        reason: String,
    },
    /// Endpoint holds a change prepared by someone else
    DiscoverOtherClient {
        endpoint: String,
        change_id: Uuid,
        host: Option<String>,
        user: Option<String>,
    },
    DiscoverConfigInconsistent {
        change_id: Uuid,
        committed: Vec<String>,
        rolled_back: Vec<String>,
    },
    DiscoverConfigPartitioned {
        version: u64,
        description: String,
    },
    DiscoverClusterDesynchronized {
        description: String,
    },
    StartTakeover,
    TakeoverSucceeded {
        endpoint: String,
    },
    TakeoverFail {
        endpoint: String,
        reason: String,
    },
    StartPrepare {
        change_id: Uuid,
        version: u64,
    },
    Prepared {
        endpoint: String,
    },
    PrepareFail {
        endpoint: String,
        reason: String,
    },
    PrepareRejected {
        endpoint: String,
        reason: String,
    },
    /// The decider refused to commit a fully prepared change
    CommitVetoed {
        reason: String,
    },
    StartCommit {
        change_id: Uuid,
    },
    Committed {
        endpoint: String,
    },
    CommitFail {
        endpoint: String,
        reason: String,
    },
    StartRollback {
        change_id: Uuid,
    },
    RolledBack {
        endpoint: String,
    },
    RollbackFail {
        endpoint: String,
        reason: String,
    },
    CannotDecideOverCommitOrRollback,
    Done(Outcome),
}

impl<C: NomadChange> NomadEvent<C> {
    /// Stable event name, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            NomadEvent::StartDiscovery { .. } => "startDiscovery",
            NomadEvent::DiscoverRepeated => "discoverRepeated",
            NomadEvent::Discovered { .. } => "discovered",
            NomadEvent::DiscoverFail { .. } => "discoverFail",
            NomadEvent::DiscoverOtherClient { .. } => "discoverOtherClient",
            NomadEvent::DiscoverConfigInconsistent { .. } => "discoverConfigInconsistent",
            NomadEvent::DiscoverConfigPartitioned { .. } => "discoverConfigPartitioned",
            NomadEvent::DiscoverClusterDesynchronized { .. } => "discoverClusterDesynchronized",
            NomadEvent::StartTakeover => "startTakeover",
            NomadEvent::TakeoverSucceeded { .. } => "takeover",
            NomadEvent::TakeoverFail { .. } => "takeoverFail",
            NomadEvent::StartPrepare { .. } => "startPrepare",
            NomadEvent::Prepared { .. } => "prepared",
            NomadEvent::PrepareFail { .. } => "prepareFail",
            NomadEvent::PrepareRejected { .. } => "prepareRejected",
            NomadEvent::CommitVetoed { .. } => "commitVetoed",
            NomadEvent::StartCommit { .. } => "startCommit",
            NomadEvent::Committed { .. } => "committed",
            NomadEvent::CommitFail { .. } => "commitFail",
            NomadEvent::StartRollback { .. } => "startRollback",
            NomadEvent::RolledBack { .. } => "rolledBack",
            NomadEvent::RollbackFail { .. } => "rollbackFail",
            NomadEvent::CannotDecideOverCommitOrRollback => "cannotDecideOverCommitOrRollback",
            NomadEvent::Done(_) => "done",
        }
    }

    /// Endpoint the event concerns, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            NomadEvent::Discovered { endpoint, .. }
            | NomadEvent::DiscoverFail { endpoint, .. }
            | NomadEvent::DiscoverOtherClient { endpoint, .. }
            | NomadEvent::TakeoverSucceeded { endpoint }
            | NomadEvent::TakeoverFail { endpoint, .. }
            | NomadEvent::Prepared { endpoint }
            | NomadEvent::PrepareFail { endpoint, .. }
            | NomadEvent::PrepareRejected { endpoint, .. }
            | NomadEvent::Committed { endpoint }
            | NomadEvent::CommitFail { endpoint, .. }
            | NomadEvent::RolledBack { endpoint }
            | NomadEvent::RollbackFail { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }
}

/// Sink for run events
pub trait ResultsReceiver<C: NomadChange> {
    fn receive(&mut self, event: NomadEvent<C>);
}

impl<C: NomadChange> ResultsReceiver<C> for Vec<NomadEvent<C>> {
    fn receive(&mut self, event: NomadEvent<C>) {
        self.push(event);
    }
}

impl<C: NomadChange> ResultsReceiver<C> for UnboundedSender<NomadEvent<C>> {
    fn receive(&mut self, event: NomadEvent<C>) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.send(event);
    }
}

impl<C: NomadChange, R: ResultsReceiver<C> + ?Sized> ResultsReceiver<C> for &mut R {
    fn receive(&mut self, event: NomadEvent<C>) {
        (**self).receive(event);
    }
}

/// Mirrors every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReceiver;

impl<C: NomadChange> ResultsReceiver<C> for TracingReceiver {
    fn receive(&mut self, event: NomadEvent<C>) {
        let name = event.name();
        match &event {
            NomadEvent::Discovered { endpoint, response } => tracing::debug!(
                endpoint = %endpoint,
                mode = %response.mode,
                mutative_message_count = response.mutative_message_count,
                current_version = response.current_version,
                "{}",
                name
            ),
            NomadEvent::DiscoverFail { endpoint, reason }
            | NomadEvent::TakeoverFail { endpoint, reason }
            | NomadEvent::PrepareFail { endpoint, reason }
            | NomadEvent::PrepareRejected { endpoint, reason } => {
                tracing::warn!(endpoint = %endpoint, reason = %reason, "{}", name)
            }
            NomadEvent::CommitFail { endpoint, reason }
            | NomadEvent::RollbackFail { endpoint, reason } => {
                tracing::error!(endpoint = %endpoint, reason = %reason, "{}", name)
            }
            NomadEvent::DiscoverOtherClient {
                endpoint,
                change_id,
                host,
                user,
            } => tracing::warn!(
                endpoint = %endpoint,
                change_id = %change_id,
                host = host.as_deref().unwrap_or("unknown"),
                user = user.as_deref().unwrap_or("unknown"),
                "{}",
                name
            ),
            NomadEvent::DiscoverConfigInconsistent { change_id, .. } => {
                tracing::error!(change_id = %change_id, "{}", name)
            }
            NomadEvent::DiscoverConfigPartitioned {
                version,
                description,
            } => tracing::error!(version, "{}: {}", name, description),
            NomadEvent::DiscoverClusterDesynchronized { description }
            | NomadEvent::CommitVetoed {
                reason: description,
            } => tracing::warn!("{}: {}", name, description),
            NomadEvent::CannotDecideOverCommitOrRollback => tracing::error!("{}", name),
            NomadEvent::Done(outcome) => tracing::info!(outcome = %outcome, "{}", name),
            NomadEvent::StartPrepare { change_id, version } => {
                tracing::info!(change_id = %change_id, version, "{}", name)
            }
            _ => match event.endpoint() {
                Some(endpoint) => tracing::info!(endpoint = %endpoint, "{}", name),
                None => tracing::info!("{}", name),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConfigChange;

    #[test]
    fn test_vec_receiver_keeps_order() {
        let mut events: Vec<NomadEvent<ConfigChange>> = Vec::new();
        events.receive(NomadEvent::StartCommit {
            change_id: Uuid::nil(),
        });
        events.receive(NomadEvent::Committed {
            endpoint: "a".into(),
        });
        events.receive(NomadEvent::Done(Outcome::Committed));

        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["startCommit", "committed", "done"]);
        assert_eq!(events[1].endpoint(), Some("a"));
    }

    #[tokio::test]
    async fn test_channel_receiver() {
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<NomadEvent<ConfigChange>>();
        tx.receive(NomadEvent::CannotDecideOverCommitOrRollback);
        drop(tx);
        assert_eq!(
            rx.recv().await.map(|e| e.name()),
            Some("cannotDecideOverCommitOrRollback")
        );
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            Outcome::Aborted(AbortReason::Partitioned).to_string(),
            "aborted: cluster configuration is partitioned"
        );
        assert_eq!(Outcome::Ambiguous.to_string(), "cannot decide over commit or rollback");
    }
}
