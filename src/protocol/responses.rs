//! Server → client responses

use crate::protocol::change::NomadChange;
use crate::protocol::record::ChangeRequestState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server mode as seen by a client.
///
/// Servers only ever report `Accepting` or `Prepared`. `OtherClient` is the
/// client's classification of a server prepared with a change that is not
/// the one the current run is driving (see [`DiscoverResponse::mode_for`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NomadMode {
    Accepting,
    Prepared,
    OtherClient,
}

impl std::fmt::Display for NomadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NomadMode::Accepting => write!(f, "ACCEPTING"),
            NomadMode::Prepared => write!(f, "PREPARED"),
            NomadMode::OtherClient => write!(f, "OTHER_CLIENT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// The message fence did not match: stale, duplicate or reordered
    Dead,
    /// Server state does not allow the requested transition
    Bad,
    /// The change failed domain validation
    Unacceptable,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Dead => "dead",
            RejectionReason::Bad => "bad",
            RejectionReason::Unacceptable => "unacceptable",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::Dead => write!(f, "DEAD"),
            RejectionReason::Bad => write!(f, "BAD"),
            RejectionReason::Unacceptable => write!(f, "UNACCEPTABLE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRejectResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_message: Option<String>,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
}

impl AcceptRejectResponse {
    pub fn accept(last_mutation_host: Option<String>, last_mutation_user: Option<String>) -> Self {
        Self {
            accepted: true,
            rejection_reason: None,
            rejection_message: None,
            last_mutation_host,
            last_mutation_user,
        }
    }

    pub fn reject(
        reason: RejectionReason,
        message: impl Into<String>,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    ) -> Self {
        Self {
            accepted: false,
            rejection_reason: Some(reason),
            rejection_message: Some(message.into()),
            last_mutation_host,
            last_mutation_user,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn is_dead(&self) -> bool {
        self.rejection_reason == Some(RejectionReason::Dead)
    }

    /// "REASON: message" for rejected responses
    pub fn describe_rejection(&self) -> Option<String> {
        self.rejection_reason.map(|reason| {
            format!(
                "{}: {}",
                reason,
                self.rejection_message.as_deref().unwrap_or("no reason given")
            )
        })
    }
}

/// Short form of a change record, as listed in change history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub change_id: Uuid,
    pub version: u64,
    pub previous_change_id: Option<Uuid>,
    pub state: ChangeRequestState,
    pub summary: String,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
}

/// Full description of the change a server currently holds prepared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ChangeDetails<C: NomadChange> {
    pub change_id: Uuid,
    pub version: u64,
    pub state: ChangeRequestState,
    pub summary: String,
    pub payload: C,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
}

/// Read-only snapshot of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DiscoverResponse<C: NomadChange> {
    pub mode: NomadMode,
    pub mutative_message_count: u64,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
    pub last_mutation_timestamp: Option<DateTime<Utc>>,
    pub current_version: u64,
    pub highest_version: u64,
    /// Present iff the server is prepared
    pub latest_change: Option<ChangeDetails<C>>,
    /// Every record of the server's log, oldest first
    pub change_history: Vec<ChangeSummary>,
    /// State produced by the last committed change
    pub current_config: Option<C::State>,
}

impl<C: NomadChange> DiscoverResponse<C> {
    /// Mode from the point of view of a run driving `own_change`: a server
    /// prepared with any other change belongs to another client.
    pub fn mode_for(&self, own_change: Option<Uuid>) -> NomadMode {
        match (&self.mode, &self.latest_change) {
            (NomadMode::Prepared, Some(latest)) if Some(latest.change_id) == own_change => {
                NomadMode::Prepared
            }
            (NomadMode::Prepared, _) => NomadMode::OtherClient,
            (mode, _) => *mode,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.mode == NomadMode::Accepting
    }

    /// Change id currently prepared on this server
    pub fn prepared_change_id(&self) -> Option<Uuid> {
        match self.mode {
            NomadMode::Prepared => self.latest_change.as_ref().map(|c| c.change_id),
            _ => None,
        }
    }

    /// Most recent committed record
    pub fn last_committed(&self) -> Option<&ChangeSummary> {
        self.change_history
            .iter()
            .rev()
            .find(|c| c.state == ChangeRequestState::Committed)
    }

    pub fn find_change(&self, change_id: Uuid) -> Option<&ChangeSummary> {
        self.change_history.iter().find(|c| c.change_id == change_id)
    }
}
