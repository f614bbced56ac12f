//! Per-run message fan-out
//!
//! Each phase sends one message per endpoint concurrently on a
//! [`JoinSet`], bounds every call with the configured timeout, and reports
//! results in completion order. The sender also tracks, for the run it
//! belongs to:
//! - the fence (expected mutative message count) of every endpoint
//! - the endpoints that accepted the prepare, which bound the rollback scope

use crate::client::events::{NomadEvent, ResultsReceiver};
use crate::client::transport::NomadTransport;
use crate::common::{Error, Result};
use crate::protocol::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, MessageKind, Mutation,
    MutativeMessage, NomadChange, PrepareMessage, RollbackMessage, TakeoverMessage,
};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Endpoints that answered a discovery round, and those that did not
#[derive(Debug, Clone)]
pub struct DiscoveryRound<C: NomadChange> {
    pub responses: BTreeMap<String, DiscoverResponse<C>>,
    pub failures: BTreeMap<String, String>,
}

impl<C: NomadChange> DiscoveryRound<C> {
    /// Highest version prepared anywhere in the cluster
    pub fn highest_version(&self) -> u64 {
        self.responses
            .values()
            .map(|r| r.highest_version)
            .max()
            .unwrap_or(0)
    }

    /// Change ids currently prepared, with the endpoints holding each
    pub fn prepared_changes(&self) -> BTreeMap<Uuid, Vec<String>> {
        let mut prepared: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
        for (endpoint, response) in &self.responses {
            if let Some(change_id) = response.prepared_change_id() {
                prepared.entry(change_id).or_default().push(endpoint.clone());
            }
        }
        prepared
    }
}

/// Per-endpoint outcome of one mutative phase
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub accepted: BTreeSet<String>,
    pub rejected: BTreeMap<String, AcceptRejectResponse>,
    pub failed: BTreeMap<String, String>,
}

impl PhaseResult {
    pub fn all_accepted(&self) -> bool {
        self.rejected.is_empty() && self.failed.is_empty()
    }
}

pub struct MessageSender<C: NomadChange, T: NomadTransport<C>> {
    transport: Arc<T>,
    timeout: Duration,
    mutation_host: String,
    mutation_user: String,
    fences: BTreeMap<String, u64>,
    prepared: BTreeSet<String>,
    _change: PhantomData<fn() -> C>,
}

impl<C: NomadChange, T: NomadTransport<C>> MessageSender<C, T> {
    pub fn new(
        transport: Arc<T>,
        timeout: Duration,
        mutation_host: impl Into<String>,
        mutation_user: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            timeout,
            mutation_host: mutation_host.into(),
            mutation_user: mutation_user.into(),
            fences: BTreeMap::new(),
            prepared: BTreeSet::new(),
            _change: PhantomData,
        }
    }

    pub fn mutation_host(&self) -> &str {
        &self.mutation_host
    }

    pub fn mutation_user(&self) -> &str {
        &self.mutation_user
    }

    /// Endpoints holding this run's prepared change
    pub fn prepared_servers(&self) -> &BTreeSet<String> {
        &self.prepared
    }

    /// Treat `endpoint` as prepared (recovery adopts changes it did not send)
    pub fn mark_prepared(&mut self, endpoint: &str) {
        self.prepared.insert(endpoint.to_string());
    }

    pub fn clear_prepared(&mut self) {
        self.prepared.clear();
    }

    pub fn fence(&self, endpoint: &str) -> Option<u64> {
        self.fences.get(endpoint).copied()
    }

    /// Discover every endpoint. Fences are reset from the answers.
    pub async fn discover<R>(&mut self, endpoints: &[String], receiver: &mut R) -> DiscoveryRound<C>
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let transport = self.transport.clone();
            let endpoint = endpoint.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, transport.discover(&endpoint)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!("discover after {:?}", timeout))),
                };
                (endpoint, result)
            });
        }

        let mut round = DiscoveryRound {
            responses: BTreeMap::new(),
            failures: BTreeMap::new(),
        };
        while let Some(joined) = tasks.join_next().await {
            let (endpoint, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("discover task failed: {}", e);
                    continue;
                }
            };
            match result {
                Ok(response) => {
                    receiver.receive(NomadEvent::Discovered {
                        endpoint: endpoint.clone(),
                        response: Box::new(response.clone()),
                    });
                    round.responses.insert(endpoint, response);
                }
                Err(e) => {
                    receiver.receive(NomadEvent::DiscoverFail {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    });
                    round.failures.insert(endpoint, e.to_string());
                }
            }
        }
        for endpoint in endpoints {
            if !round.responses.contains_key(endpoint) && !round.failures.contains_key(endpoint) {
                round
                    .failures
                    .insert(endpoint.clone(), "discover task failed".to_string());
            }
        }

        self.fences = round
            .responses
            .iter()
            .map(|(endpoint, r)| (endpoint.clone(), r.mutative_message_count))
            .collect();
        round
    }

    pub async fn takeover<R>(&mut self, endpoints: &[String], receiver: &mut R) -> PhaseResult
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        receiver.receive(NomadEvent::StartTakeover);
        let messages = self.build(endpoints, |mutation| {
            MutativeMessage::Takeover(TakeoverMessage { mutation })
        });
        let result = self.dispatch(messages).await;
        for endpoint in &result.accepted {
            receiver.receive(NomadEvent::TakeoverSucceeded {
                endpoint: endpoint.clone(),
            });
        }
        for (endpoint, reason) in rejections(&result) {
            receiver.receive(NomadEvent::TakeoverFail { endpoint, reason });
        }
        result
    }

    pub async fn prepare<R>(
        &mut self,
        endpoints: &[String],
        change_id: Uuid,
        version_number: u64,
        change: &C,
        receiver: &mut R,
    ) -> PhaseResult
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        receiver.receive(NomadEvent::StartPrepare {
            change_id,
            version: version_number,
        });
        let messages = self.build(endpoints, |mutation| {
            MutativeMessage::Prepare(PrepareMessage {
                mutation,
                change_id,
                version_number,
                change: change.clone(),
            })
        });
        let result = self.dispatch(messages).await;
        for endpoint in &result.accepted {
            self.prepared.insert(endpoint.clone());
            receiver.receive(NomadEvent::Prepared {
                endpoint: endpoint.clone(),
            });
        }
        for (endpoint, response) in &result.rejected {
            receiver.receive(NomadEvent::PrepareRejected {
                endpoint: endpoint.clone(),
                reason: response
                    .describe_rejection()
                    .unwrap_or_else(|| "rejected".to_string()),
            });
        }
        for (endpoint, reason) in &result.failed {
            receiver.receive(NomadEvent::PrepareFail {
                endpoint: endpoint.clone(),
                reason: reason.clone(),
            });
        }
        result
    }

    /// Commit `change_id` on the prepared servers
    pub async fn commit<R>(&mut self, change_id: Uuid, receiver: &mut R) -> PhaseResult
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        receiver.receive(NomadEvent::StartCommit { change_id });
        let targets: Vec<String> = self.prepared.iter().cloned().collect();
        let messages = self.build(&targets, |mutation| {
            MutativeMessage::Commit(CommitMessage {
                mutation,
                change_id,
            })
        });
        let result = self.dispatch(messages).await;
        for endpoint in &result.accepted {
            receiver.receive(NomadEvent::Committed {
                endpoint: endpoint.clone(),
            });
        }
        for (endpoint, reason) in rejections(&result) {
            receiver.receive(NomadEvent::CommitFail { endpoint, reason });
        }
        result
    }

    /// Roll back `change_id` on the prepared servers, and only on them
    pub async fn rollback<R>(&mut self, change_id: Uuid, receiver: &mut R) -> PhaseResult
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        receiver.receive(NomadEvent::StartRollback { change_id });
        let targets: Vec<String> = self.prepared.iter().cloned().collect();
        let messages = self.build(&targets, |mutation| {
            MutativeMessage::Rollback(RollbackMessage {
                mutation,
                change_id,
            })
        });
        let result = self.dispatch(messages).await;
        for endpoint in &result.accepted {
            receiver.receive(NomadEvent::RolledBack {
                endpoint: endpoint.clone(),
            });
        }
        for (endpoint, reason) in rejections(&result) {
            receiver.receive(NomadEvent::RollbackFail { endpoint, reason });
        }
        result
    }

    fn build<F>(&self, endpoints: &[String], mut make: F) -> Vec<(String, MutativeMessage<C>)>
    where
        F: FnMut(Mutation) -> MutativeMessage<C>,
    {
        let now = Utc::now();
        endpoints
            .iter()
            .map(|endpoint| {
                let mutation = Mutation {
                    expected_mutative_message_count: self.fence(endpoint).unwrap_or(0),
                    mutation_host: self.mutation_host.clone(),
                    mutation_user: self.mutation_user.clone(),
                    mutation_timestamp: now,
                };
                (endpoint.clone(), make(mutation))
            })
            .collect()
    }

    /// Send every message and wait for all of them to settle
    async fn dispatch(&mut self, messages: Vec<(String, MutativeMessage<C>)>) -> PhaseResult {
        let targets: Vec<String> = messages.iter().map(|(e, _)| e.clone()).collect();
        let mut tasks = JoinSet::new();
        for (endpoint, message) in messages {
            let transport = self.transport.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let kind = message.kind();
                tracing::debug!(
                    endpoint = %endpoint,
                    kind = %kind,
                    fence = message.mutation().expected_mutative_message_count,
                    "sending"
                );
                let result =
                    match tokio::time::timeout(timeout, transport.mutate(&endpoint, message)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::Timeout(format!("{} after {:?}", kind, timeout))),
                    };
                (endpoint, result)
            });
        }

        let mut result = PhaseResult::default();
        while let Some(joined) = tasks.join_next().await {
            let (endpoint, outcome): (String, Result<AcceptRejectResponse>) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("send task failed: {}", e);
                    continue;
                }
            };
            match outcome {
                Ok(response) => {
                    // DEAD means the server did not process it
                    if !response.is_dead() {
                        if let Some(fence) = self.fences.get_mut(&endpoint) {
                            *fence += 1;
                        }
                    }
                    if response.accepted {
                        result.accepted.insert(endpoint);
                    } else {
                        result.rejected.insert(endpoint, response);
                    }
                }
                Err(e) => {
                    // Whether the server acted is unknown, so is its counter
                    self.fences.remove(&endpoint);
                    result.failed.insert(endpoint, e.to_string());
                }
            }
        }
        for endpoint in targets {
            if !result.accepted.contains(&endpoint)
                && !result.rejected.contains_key(&endpoint)
                && !result.failed.contains_key(&endpoint)
            {
                result.failed.insert(endpoint, "send task failed".to_string());
            }
        }
        result
    }
}

/// Rejections and failures of a phase as (endpoint, reason)
fn rejections(result: &PhaseResult) -> Vec<(String, String)> {
    let rejected = result.rejected.iter().map(|(endpoint, response)| {
        (
            endpoint.clone(),
            response
                .describe_rejection()
                .unwrap_or_else(|| "rejected".to_string()),
        )
    });
    let failed = result
        .failed
        .iter()
        .map(|(endpoint, reason)| (endpoint.clone(), reason.clone()));
    rejected.chain(failed).collect()
}
