//! Client orchestrator: one call drives one change across every endpoint
//!
//! ```text
//! discover ──► consistent? ──no──► abort
//!                 │
//!                 ├─ prepared by another client ──► takeover ─► rediscover ─► resolve (once)
//!                 │
//!                 ▼
//!              prepare ──all accepted──► commit
//!                 │
//!                 └──otherwise──► rollback (prepared servers only)
//! ```
//!
//! A commit or rollback that does not reach every target ends the run as
//! [`Outcome::Ambiguous`]; it is never retried.

use crate::client::decider::{
    ClusterConsistency, CommitDecision, DefaultDecider, NomadDecider, RecoveryDecision, Resolution,
};
use crate::client::events::{AbortReason, NomadEvent, Outcome, ResultsReceiver};
use crate::client::sender::{DiscoveryRound, MessageSender, PhaseResult};
use crate::client::transport::NomadTransport;
use crate::common::{ClientConfig, Result};
use crate::protocol::NomadChange;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Discovery round together with its consistency verdict
#[derive(Debug, Clone)]
pub struct ClusterView<C: NomadChange> {
    pub round: DiscoveryRound<C>,
    pub consistency: ClusterConsistency,
}

pub struct NomadClientProcess<C: NomadChange, T: NomadTransport<C>, D = DefaultDecider> {
    endpoints: Vec<String>,
    transport: Arc<T>,
    decider: D,
    timeout: Duration,
    mutation_host: String,
    mutation_user: String,
    _change: std::marker::PhantomData<fn() -> C>,
}

/// State of one call. Never shared between calls.
struct RunContext<'r, C: NomadChange, T: NomadTransport<C>, R: ?Sized> {
    sender: MessageSender<C, T>,
    receiver: &'r mut R,
    /// Counters seen by the discovery round before the last takeover
    before_takeover: BTreeMap<String, u64>,
}

impl<C: NomadChange, T: NomadTransport<C>, R: ResultsReceiver<C> + ?Sized> RunContext<'_, C, T, R> {
    fn emit(&mut self, event: NomadEvent<C>) {
        self.receiver.receive(event);
    }

    fn done(&mut self, outcome: Outcome) -> Outcome {
        if outcome == Outcome::Ambiguous {
            self.emit(NomadEvent::CannotDecideOverCommitOrRollback);
        }
        self.emit(NomadEvent::Done(outcome));
        outcome
    }
}

impl<C: NomadChange, T: NomadTransport<C>> NomadClientProcess<C, T, DefaultDecider> {
    pub fn new(config: &ClientConfig, transport: Arc<T>) -> Result<Self> {
        Self::with_decider(config, transport, DefaultDecider)
    }
}

impl<C, T, D> NomadClientProcess<C, T, D>
where
    C: NomadChange,
    T: NomadTransport<C>,
    D: NomadDecider<C>,
{
    pub fn with_decider(config: &ClientConfig, transport: Arc<T>, decider: D) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            endpoints: config.endpoints.clone(),
            transport,
            decider,
            timeout: config.rpc_timeout(),
            mutation_host: config.mutation_host.clone(),
            mutation_user: config.mutation_user.clone(),
            _change: std::marker::PhantomData,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn context<'r, R>(&self, receiver: &'r mut R) -> RunContext<'r, C, T, R>
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        RunContext {
            sender: MessageSender::new(
                self.transport.clone(),
                self.timeout,
                self.mutation_host.clone(),
                self.mutation_user.clone(),
            ),
            receiver,
            before_takeover: BTreeMap::new(),
        }
    }

    /// Read-only discovery of the whole cluster
    pub async fn discover<R>(&mut self, receiver: &mut R) -> ClusterView<C>
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        let mut ctx = self.context(receiver);
        ctx.emit(NomadEvent::StartDiscovery {
            endpoints: self.endpoints.clone(),
        });
        let round = ctx.sender.discover(&self.endpoints, ctx.receiver).await;
        let consistency = self.decider.analyze(&round.responses);
        self.report_consistency(&mut ctx, &consistency);
        ClusterView { round, consistency }
    }

    /// Apply `change` to every endpoint, or to none.
    ///
    /// A change left prepared by an abandoned client is recovered first (at
    /// most once per call): the run takes over the cluster, resolves that
    /// change, then prepares its own.
    pub async fn apply_change<R>(&mut self, change: C, receiver: &mut R) -> Outcome
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        tracing::info!(
            summary = %change.summary(),
            endpoints = self.endpoints.len(),
            "applying change"
        );
        let mut ctx = self.context(receiver);
        ctx.emit(NomadEvent::StartDiscovery {
            endpoints: self.endpoints.clone(),
        });
        let mut round = ctx.sender.discover(&self.endpoints, ctx.receiver).await;
        let mut recovered = false;

        loop {
            if let Some(reason) = self.check_round(&mut ctx, &round) {
                return ctx.done(Outcome::Aborted(reason));
            }
            if self.decider.is_discover_successful(&round.responses, None)
                && self
                    .decider
                    .is_whole_cluster_accepting(&round.responses, &round.failures)
            {
                break;
            }
            if recovered {
                return ctx.done(Outcome::Aborted(AbortReason::ClusterNotAccepting));
            }

            match self.recover_pending(&mut ctx, &round, None).await {
                Outcome::Committed | Outcome::RolledBack => {}
                other => return ctx.done(other),
            }
            recovered = true;
            ctx.emit(NomadEvent::DiscoverRepeated);
            round = ctx.sender.discover(&self.endpoints, ctx.receiver).await;
        }

        let change_id = Uuid::new_v4();
        let version = round.highest_version() + 1;
        ctx.sender.clear_prepared();
        let prepare = ctx
            .sender
            .prepare(&self.endpoints, change_id, version, &change, ctx.receiver)
            .await;

        if !self
            .decider
            .is_prepare_successful(&self.endpoints, ctx.sender.prepared_servers())
        {
            tracing::warn!(
                change_id = %change_id,
                prepared = ctx.sender.prepared_servers().len(),
                rejected = prepare.rejected.len(),
                failed = prepare.failed.len(),
                "prepare failed"
            );
            if ctx.sender.prepared_servers().is_empty() {
                return ctx.done(Outcome::RolledBack);
            }
            let result = ctx.sender.rollback(change_id, ctx.receiver).await;
            return ctx.done(settle(&result, Outcome::RolledBack));
        }

        match self.decider.should_do_commit(
            &change,
            &self.endpoints,
            ctx.sender.prepared_servers(),
            &round.responses,
        ) {
            CommitDecision::Commit => {
                let result = ctx.sender.commit(change_id, ctx.receiver).await;
                ctx.done(settle(&result, Outcome::Committed))
            }
            CommitDecision::Veto(reason) => {
                tracing::warn!(change_id = %change_id, "commit vetoed: {}", reason);
                ctx.emit(NomadEvent::CommitVetoed { reason });
                let result = ctx.sender.rollback(change_id, ctx.receiver).await;
                ctx.done(settle(&result, Outcome::RolledBack))
            }
        }
    }

    /// Finish whatever change an abandoned client left prepared.
    ///
    /// `forced` decides a change prepared on every endpoint; without it such
    /// a change is rolled back.
    pub async fn recover<R>(&mut self, forced: Option<Resolution>, receiver: &mut R) -> Outcome
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        let mut ctx = self.context(receiver);
        ctx.emit(NomadEvent::StartDiscovery {
            endpoints: self.endpoints.clone(),
        });
        let round = ctx.sender.discover(&self.endpoints, ctx.receiver).await;

        if let Some(reason) = self.check_round(&mut ctx, &round) {
            return ctx.done(Outcome::Aborted(reason));
        }
        if self
            .decider
            .is_whole_cluster_accepting(&round.responses, &round.failures)
        {
            return ctx.done(Outcome::Aborted(AbortReason::NothingToRecover));
        }
        let outcome = self.recover_pending(&mut ctx, &round, forced).await;
        ctx.done(outcome)
    }

    /// Abort reasons visible in a discovery round
    fn check_round<R>(
        &self,
        ctx: &mut RunContext<'_, C, T, R>,
        round: &DiscoveryRound<C>,
    ) -> Option<AbortReason>
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        let consistency = self.decider.analyze(&round.responses);
        if let Some(reason) = self.report_consistency(ctx, &consistency) {
            return Some(reason);
        }
        if !round.failures.is_empty() {
            tracing::warn!(
                unreachable = round.failures.len(),
                "not every endpoint could be discovered"
            );
            return Some(AbortReason::DiscoverFailed);
        }
        None
    }

    fn report_consistency<R>(
        &self,
        ctx: &mut RunContext<'_, C, T, R>,
        consistency: &ClusterConsistency,
    ) -> Option<AbortReason>
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        match consistency.clone() {
            ClusterConsistency::Consistent => None,
            ClusterConsistency::Inconsistent {
                change_id,
                committed,
                rolled_back,
            } => {
                ctx.emit(NomadEvent::DiscoverConfigInconsistent {
                    change_id,
                    committed,
                    rolled_back,
                });
                Some(AbortReason::Inconsistent)
            }
            ClusterConsistency::Partitioned {
                version,
                description,
            } => {
                ctx.emit(NomadEvent::DiscoverConfigPartitioned {
                    version,
                    description,
                });
                Some(AbortReason::Partitioned)
            }
            ClusterConsistency::Desynchronized { description } => {
                ctx.emit(NomadEvent::DiscoverClusterDesynchronized { description });
                Some(AbortReason::Desynchronized)
            }
        }
    }

    /// Take over, rediscover, then commit or roll back every pending change.
    async fn recover_pending<R>(
        &self,
        ctx: &mut RunContext<'_, C, T, R>,
        round: &DiscoveryRound<C>,
        forced: Option<Resolution>,
    ) -> Outcome
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        for (endpoint, response) in &round.responses {
            if let Some(change_id) = response.prepared_change_id() {
                ctx.emit(NomadEvent::DiscoverOtherClient {
                    endpoint: endpoint.clone(),
                    change_id,
                    host: response.last_mutation_host.clone(),
                    user: response.last_mutation_user.clone(),
                });
            }
        }

        ctx.before_takeover = round
            .responses
            .iter()
            .map(|(endpoint, r)| (endpoint.clone(), r.mutative_message_count))
            .collect();
        let takeover = ctx.sender.takeover(&self.endpoints, ctx.receiver).await;
        if !takeover.rejected.is_empty() {
            return Outcome::Aborted(AbortReason::OtherClientInProgress);
        }
        if !takeover.failed.is_empty() {
            return Outcome::Aborted(AbortReason::TakeoverFailed);
        }

        ctx.emit(NomadEvent::DiscoverRepeated);
        let second = ctx.sender.discover(&self.endpoints, ctx.receiver).await;
        if let Some(reason) = self.check_round(ctx, &second) {
            return Outcome::Aborted(reason);
        }
        if let Some(endpoint) = self.interleaved_endpoint(ctx, &second) {
            tracing::warn!(endpoint = %endpoint, "another client mutated after takeover");
            return Outcome::Aborted(AbortReason::OtherClientInProgress);
        }

        let pending = second.prepared_changes();
        if pending.is_empty() {
            return Outcome::Aborted(AbortReason::NothingToRecover);
        }

        let mut plan = Vec::new();
        for (change_id, holders) in &pending {
            match self
                .decider
                .resolve_pending(*change_id, &self.endpoints, &second.responses, forced)
            {
                RecoveryDecision::Refuse(reason) => {
                    tracing::warn!(change_id = %change_id, "recovery refused: {}", reason);
                    return Outcome::Aborted(AbortReason::RecoveryRefused);
                }
                RecoveryDecision::Commit => plan.push((*change_id, holders, Resolution::Commit)),
                RecoveryDecision::Rollback => {
                    plan.push((*change_id, holders, Resolution::Rollback))
                }
            }
        }

        let mut any_committed = false;
        for (change_id, holders, resolution) in plan {
            tracing::info!(
                change_id = %change_id,
                resolution = ?resolution,
                endpoints = holders.len(),
                "resolving pending change"
            );
            ctx.sender.clear_prepared();
            for endpoint in holders {
                ctx.sender.mark_prepared(endpoint);
            }
            let result = match resolution {
                Resolution::Commit => ctx.sender.commit(change_id, ctx.receiver).await,
                Resolution::Rollback => ctx.sender.rollback(change_id, ctx.receiver).await,
            };
            if !result.all_accepted() {
                return Outcome::Ambiguous;
            }
            any_committed |= resolution == Resolution::Commit;
        }
        ctx.sender.clear_prepared();

        if any_committed {
            Outcome::Committed
        } else {
            Outcome::RolledBack
        }
    }

    /// An endpoint whose counter or last mutation shows activity by someone
    /// other than this run since the takeover
    fn interleaved_endpoint<R>(
        &self,
        ctx: &RunContext<'_, C, T, R>,
        second: &DiscoveryRound<C>,
    ) -> Option<String>
    where
        R: ResultsReceiver<C> + ?Sized,
    {
        second.responses.iter().find_map(|(endpoint, r)| {
            let expected = ctx.before_takeover.get(endpoint).map(|count| count + 1);
            let ours = r.last_mutation_host.as_deref() == Some(ctx.sender.mutation_host())
                && r.last_mutation_user.as_deref() == Some(ctx.sender.mutation_user());
            if expected != Some(r.mutative_message_count) || !ours {
                Some(endpoint.clone())
            } else {
                None
            }
        })
    }
}

/// Outcome of a commit or rollback phase: `complete` only if every target accepted
fn settle(result: &PhaseResult, complete: Outcome) -> Outcome {
    if result.all_accepted() {
        complete
    } else {
        Outcome::Ambiguous
    }
}
