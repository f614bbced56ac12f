//! Client → server mutative messages
//!
//! Every mutative message carries a [`Mutation`] whose
//! `expected_mutative_message_count` is the sender's belief of the server's
//! counter. A server only processes a message whose fence matches.

use crate::protocol::change::NomadChange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fence and audit fields common to all mutative messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub expected_mutative_message_count: u64,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PrepareMessage<C: NomadChange> {
    pub mutation: Mutation,
    pub change_id: Uuid,
    pub version_number: u64,
    pub change: C,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub mutation: Mutation,
    pub change_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMessage {
    pub mutation: Mutation,
    pub change_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverMessage {
    pub mutation: Mutation,
}

/// The four mutative operations, dispatched by an explicit match on the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", bound = "")]
pub enum MutativeMessage<C: NomadChange> {
    Prepare(PrepareMessage<C>),
    Commit(CommitMessage),
    Rollback(RollbackMessage),
    Takeover(TakeoverMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Prepare,
    Commit,
    Rollback,
    Takeover,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Prepare => "prepare",
            MessageKind::Commit => "commit",
            MessageKind::Rollback => "rollback",
            MessageKind::Takeover => "takeover",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<C: NomadChange> MutativeMessage<C> {
    pub fn kind(&self) -> MessageKind {
        match self {
            MutativeMessage::Prepare(_) => MessageKind::Prepare,
            MutativeMessage::Commit(_) => MessageKind::Commit,
            MutativeMessage::Rollback(_) => MessageKind::Rollback,
            MutativeMessage::Takeover(_) => MessageKind::Takeover,
        }
    }

    pub fn mutation(&self) -> &Mutation {
        match self {
            MutativeMessage::Prepare(m) => &m.mutation,
            MutativeMessage::Commit(m) => &m.mutation,
            MutativeMessage::Rollback(m) => &m.mutation,
            MutativeMessage::Takeover(m) => &m.mutation,
        }
    }

    /// Change targeted by the message (takeover targets none)
    pub fn change_id(&self) -> Option<Uuid> {
        match self {
            MutativeMessage::Prepare(m) => Some(m.change_id),
            MutativeMessage::Commit(m) => Some(m.change_id),
            MutativeMessage::Rollback(m) => Some(m.change_id),
            MutativeMessage::Takeover(_) => None,
        }
    }
}
