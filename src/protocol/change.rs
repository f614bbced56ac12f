//! The pluggable change contract
//!
//! The protocol never looks inside a change. It only needs a human-readable
//! summary, a discriminating tag, and an applicator that can validate the
//! change against a server's committed state and then apply it.

use crate::common::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A change that can be coordinated across the cluster.
pub trait NomadChange:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Committed configuration this kind of change mutates.
    type State: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// One-line description for operators and change history.
    fn summary(&self) -> String;

    /// Discriminating tag ("set-setting", "activate", ...).
    fn kind(&self) -> &'static str;
}

/// Outcome of validating a change against a server's committed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PotentialApplication {
    Allowed,
    Rejected(String),
}

impl PotentialApplication {
    pub fn reject(reason: impl Into<String>) -> Self {
        PotentialApplication::Rejected(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PotentialApplication::Allowed)
    }
}

/// Validates and applies changes on one server.
///
/// `try_apply` runs during prepare and must not have side effects. `apply`
/// runs during commit and returns the new committed state; an error leaves
/// the change prepared.
pub trait ChangeApplicator<C: NomadChange>: Send + Sync {
    fn try_apply(&self, existing: Option<&C::State>, change: &C) -> PotentialApplication;

    fn apply(&self, existing: Option<&C::State>, change: &C) -> Result<C::State>;
}
