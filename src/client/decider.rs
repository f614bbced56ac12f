//! Go/no-go policy for a client run
//!
//! Every method is a pure function of the responses collected so far. The
//! policy is strictly unanimous: one unreachable or disagreeing endpoint
//! blocks progress, it is never outvoted.

use crate::protocol::{ChangeRequestState, DiscoverResponse, NomadChange, NomadMode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Discovery responses of the reachable endpoints, keyed by endpoint
pub type Discovered<C> = BTreeMap<String, DiscoverResponse<C>>;

/// Result of comparing the committed history of every reachable endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ClusterConsistency {
    Consistent,
    /// The same change is committed on some endpoints and rolled back on others
    Inconsistent {
        change_id: Uuid,
        committed: Vec<String>,
        rolled_back: Vec<String>,
    },
    /// Endpoints hold different changes at one version, at least one committed
    Partitioned { version: u64, description: String },
    /// Endpoints stopped at different committed changes
    Desynchronized { description: String },
}

impl ClusterConsistency {
    pub fn is_consistent(&self) -> bool {
        matches!(self, ClusterConsistency::Consistent)
    }
}

/// What to do with a change found prepared during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Commit,
    Rollback,
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "commit" => Ok(Resolution::Commit),
            "rollback" => Ok(Resolution::Rollback),
            other => Err(format!("expected commit or rollback, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    Commit,
    Rollback,
    Refuse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitDecision {
    Commit,
    Veto(String),
}

pub trait NomadDecider<C: NomadChange>: Send + Sync {
    fn analyze(&self, discovered: &Discovered<C>) -> ClusterConsistency {
        analyze_consistency(discovered)
    }

    /// Every reachable endpoint is accepting, or prepared with `own_change`,
    /// and the committed histories agree.
    fn is_discover_successful(&self, discovered: &Discovered<C>, own_change: Option<Uuid>) -> bool {
        discovered
            .values()
            .all(|r| r.mode_for(own_change) != NomadMode::OtherClient)
            && self.analyze(discovered).is_consistent()
    }

    /// Unanimous ACCEPTING. Any failed endpoint blocks.
    fn is_whole_cluster_accepting(
        &self,
        discovered: &Discovered<C>,
        failures: &BTreeMap<String, String>,
    ) -> bool {
        failures.is_empty()
            && !discovered.is_empty()
            && discovered.values().all(DiscoverResponse::is_accepting)
    }

    fn is_prepare_successful(&self, endpoints: &[String], prepared: &BTreeSet<String>) -> bool {
        !endpoints.is_empty() && endpoints.iter().all(|e| prepared.contains(e))
    }

    /// Last gate before commit. Domain deciders add checks on `change`
    /// against what the endpoints reported during discovery.
    fn should_do_commit(
        &self,
        _change: &C,
        endpoints: &[String],
        prepared: &BTreeSet<String>,
        _discovered: &Discovered<C>,
    ) -> CommitDecision {
        if self.is_prepare_successful(endpoints, prepared) {
            CommitDecision::Commit
        } else {
            CommitDecision::Veto(format!(
                "{} of {} endpoints prepared",
                prepared.len(),
                endpoints.len()
            ))
        }
    }

    /// Decide the fate of `change_id`, left prepared by an abandoned client.
    fn resolve_pending(
        &self,
        change_id: Uuid,
        endpoints: &[String],
        discovered: &Discovered<C>,
        forced: Option<Resolution>,
    ) -> RecoveryDecision {
        resolve_pending_change(change_id, endpoints, discovered, forced)
    }
}

/// Unanimous policy with no domain-specific commit gate
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDecider;

impl<C: NomadChange> NomadDecider<C> for DefaultDecider {}

/// Compare committed histories: inconsistency first, then partitions at a
/// shared version, then diverging committed heads.
pub fn analyze_consistency<C: NomadChange>(discovered: &Discovered<C>) -> ClusterConsistency {
    // change id -> (committed on, rolled back on)
    let mut outcomes: BTreeMap<Uuid, (u64, Vec<String>, Vec<String>)> = BTreeMap::new();
    // version -> change id -> (endpoints, committed anywhere)
    let mut by_version: BTreeMap<u64, BTreeMap<Uuid, (Vec<String>, bool)>> = BTreeMap::new();

    for (endpoint, response) in discovered {
        for record in &response.change_history {
            let entry = outcomes
                .entry(record.change_id)
                .or_insert_with(|| (record.version, Vec::new(), Vec::new()));
            match record.state {
                ChangeRequestState::Committed => entry.1.push(endpoint.clone()),
                ChangeRequestState::RolledBack => entry.2.push(endpoint.clone()),
                ChangeRequestState::Prepared => {}
            }

            let holders = by_version
                .entry(record.version)
                .or_default()
                .entry(record.change_id)
                .or_insert_with(|| (Vec::new(), false));
            holders.0.push(endpoint.clone());
            holders.1 |= record.state == ChangeRequestState::Committed;
        }
    }

    let mut conflicts: Vec<_> = outcomes
        .into_iter()
        .filter(|(_, (_, committed, rolled_back))| !committed.is_empty() && !rolled_back.is_empty())
        .collect();
    conflicts.sort_by_key(|(_, (version, _, _))| *version);
    if let Some((change_id, (_, committed, rolled_back))) = conflicts.into_iter().next() {
        return ClusterConsistency::Inconsistent {
            change_id,
            committed,
            rolled_back,
        };
    }

    for (version, changes) in &by_version {
        if changes.len() > 1 && changes.values().any(|(_, committed)| *committed) {
            let description = changes
                .iter()
                .map(|(change_id, (endpoints, committed))| {
                    format!(
                        "{} {} on [{}]",
                        change_id,
                        if *committed { "committed" } else { "not committed" },
                        endpoints.join(", ")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            return ClusterConsistency::Partitioned {
                version: *version,
                description,
            };
        }
    }

    // A change committed somewhere and still prepared elsewhere counts as
    // committed: recovery will finish it.
    let committed_anywhere: BTreeSet<Uuid> = discovered
        .values()
        .flat_map(|r| r.change_history.iter())
        .filter(|c| c.state == ChangeRequestState::Committed)
        .map(|c| c.change_id)
        .collect();
    let heads: BTreeMap<&String, Option<Uuid>> = discovered
        .iter()
        .map(|(endpoint, r)| {
            let head = match r.prepared_change_id() {
                Some(id) if committed_anywhere.contains(&id) => Some(id),
                _ => r.last_committed().map(|c| c.change_id),
            };
            (endpoint, head)
        })
        .collect();
    let distinct: BTreeSet<Option<Uuid>> = heads.values().copied().collect();
    if distinct.len() > 1 {
        let description = heads
            .iter()
            .map(|(endpoint, head)| match head {
                Some(id) => format!("{} at {}", endpoint, id),
                None => format!("{} has no committed change", endpoint),
            })
            .collect::<Vec<_>>()
            .join(", ");
        return ClusterConsistency::Desynchronized { description };
    }

    ClusterConsistency::Consistent
}

fn resolve_pending_change<C: NomadChange>(
    change_id: Uuid,
    endpoints: &[String],
    discovered: &Discovered<C>,
    forced: Option<Resolution>,
) -> RecoveryDecision {
    let states: Vec<ChangeRequestState> = discovered
        .values()
        .filter_map(|r| r.find_change(change_id).map(|c| c.state))
        .collect();

    if states.contains(&ChangeRequestState::Committed) {
        return RecoveryDecision::Commit;
    }
    if states.contains(&ChangeRequestState::RolledBack) {
        return RecoveryDecision::Rollback;
    }

    let prepared_everywhere = endpoints.iter().all(|endpoint| {
        discovered
            .get(endpoint)
            .and_then(|r| r.prepared_change_id())
            == Some(change_id)
    });
    match (prepared_everywhere, forced) {
        (true, Some(Resolution::Commit)) => RecoveryDecision::Commit,
        (true, _) => RecoveryDecision::Rollback,
        (false, Some(Resolution::Commit)) => RecoveryDecision::Refuse(format!(
            "change {} is not prepared on every endpoint",
            change_id
        )),
        (false, _) => RecoveryDecision::Rollback,
    }
}
