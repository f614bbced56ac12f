//! Change request records: one per accepted prepare, persisted per server

use crate::protocol::change::NomadChange;
use crate::protocol::responses::{ChangeDetails, ChangeSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestState {
    Prepared,
    Committed,
    RolledBack,
}

impl ChangeRequestState {
    /// Committed and rolled-back records never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeRequestState::Prepared)
    }
}

impl std::fmt::Display for ChangeRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeRequestState::Prepared => write!(f, "PREPARED"),
            ChangeRequestState::Committed => write!(f, "COMMITTED"),
            ChangeRequestState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// One entry of a server's append-only change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ChangeRecord<C: NomadChange> {
    pub change_id: Uuid,
    pub version: u64,
    pub previous_change_id: Option<Uuid>,
    pub state: ChangeRequestState,
    pub payload: C,
    /// Committed state produced by the change (set on commit)
    pub result: Option<C::State>,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp: DateTime<Utc>,
}

impl<C: NomadChange> ChangeRecord<C> {
    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            change_id: self.change_id,
            version: self.version,
            previous_change_id: self.previous_change_id,
            state: self.state,
            summary: self.payload.summary(),
            creation_host: self.creation_host.clone(),
            creation_user: self.creation_user.clone(),
            creation_timestamp: self.creation_timestamp,
        }
    }

    pub fn details(&self) -> ChangeDetails<C> {
        ChangeDetails {
            change_id: self.change_id,
            version: self.version,
            state: self.state,
            summary: self.payload.summary(),
            payload: self.payload.clone(),
            creation_host: self.creation_host.clone(),
            creation_user: self.creation_user.clone(),
            creation_timestamp: self.creation_timestamp,
        }
    }
}
