//! Per-server nomad state machine
//!
//! A server is either `ACCEPTING` (no pending change) or `PREPARED` (one
//! change awaiting commit or rollback). Every mutative message is checked
//! against the fence first: a message whose `expected_mutative_message_count`
//! differs from the server's counter is rejected as DEAD and leaves no trace.
//! Any other message is processed and bumps the counter, whether it is
//! accepted or rejected.

use crate::common::{Error, Result};
use crate::protocol::{
    AcceptRejectResponse, ChangeApplicator, ChangeRecord, ChangeRequestState, ChangeSummary,
    CommitMessage, DiscoverResponse, Mutation, MutativeMessage, NomadChange, NomadMode,
    PotentialApplication, PrepareMessage, RejectionReason, RollbackMessage, TakeoverMessage,
};
use crate::server::store::{ChangeStore, ServerState};
use std::sync::Arc;
use uuid::Uuid;

pub struct NomadServer<C: NomadChange> {
    name: String,
    store: Box<dyn ChangeStore<C>>,
    applicator: Arc<dyn ChangeApplicator<C>>,
    state: ServerState<C>,
    /// Most recent record, mirrored from the store
    latest: Option<ChangeRecord<C>>,
    /// Summaries of every record, oldest first
    history: Vec<ChangeSummary>,
}

impl<C: NomadChange> NomadServer<C> {
    /// Open a server over its change log, resuming from the persisted state.
    pub fn new(
        name: impl Into<String>,
        store: Box<dyn ChangeStore<C>>,
        applicator: Arc<dyn ChangeApplicator<C>>,
    ) -> Result<Self> {
        let name = name.into();
        let state = store.load_state()?.unwrap_or_default();
        let history: Vec<ChangeSummary> =
            store.history()?.iter().map(ChangeRecord::summary).collect();
        let latest = match state.latest_change_id {
            Some(change_id) => Some(
                store
                    .get_by_change_id(change_id)?
                    .ok_or_else(|| Error::Corrupted(format!("latest change {} missing", change_id)))?,
            ),
            None => None,
        };

        let prepared_record = latest
            .as_ref()
            .map(|r| r.state == ChangeRequestState::Prepared)
            .unwrap_or(false);
        if (state.mode == NomadMode::Prepared) != prepared_record {
            return Err(Error::Corrupted(format!(
                "server mode {} disagrees with latest change record",
                state.mode
            )));
        }

        tracing::info!(
            server = %name,
            mode = %state.mode,
            mutative_message_count = state.mutative_message_count,
            current_version = state.current_version,
            highest_version = state.highest_version,
            records = history.len(),
            "nomad server loaded"
        );

        Ok(Self {
            name,
            store,
            applicator,
            state,
            latest,
            history,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &ServerState<C> {
        &self.state
    }

    /// Snapshot of this server. Side-effect free.
    pub fn discover(&self) -> DiscoverResponse<C> {
        let latest_change = match self.state.mode {
            NomadMode::Prepared => self.latest.as_ref().map(ChangeRecord::details),
            _ => None,
        };
        DiscoverResponse {
            mode: self.state.mode,
            mutative_message_count: self.state.mutative_message_count,
            last_mutation_host: self.state.last_mutation_host.clone(),
            last_mutation_user: self.state.last_mutation_user.clone(),
            last_mutation_timestamp: self.state.last_mutation_timestamp,
            current_version: self.state.current_version,
            highest_version: self.state.highest_version,
            latest_change,
            change_history: self.history.clone(),
            current_config: self.state.current_config.clone(),
        }
    }

    pub fn get_change(&self, change_id: Uuid) -> Result<Option<ChangeRecord<C>>> {
        self.store.get_by_change_id(change_id)
    }

    /// Records with a version strictly greater than `version`
    pub fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord<C>>> {
        self.store.changes_since(version)
    }

    pub fn process(&mut self, message: MutativeMessage<C>) -> Result<AcceptRejectResponse> {
        match message {
            MutativeMessage::Prepare(m) => self.prepare(m),
            MutativeMessage::Commit(m) => self.commit(m),
            MutativeMessage::Rollback(m) => self.rollback(m),
            MutativeMessage::Takeover(m) => self.takeover(m),
        }
    }

    pub fn prepare(&mut self, message: PrepareMessage<C>) -> Result<AcceptRejectResponse> {
        if let Some(dead) = self.check_fence(&message.mutation) {
            return Ok(dead);
        }
        if self.state.mode != NomadMode::Accepting {
            return self.reject_processed(
                RejectionReason::Bad,
                format!("expected mode ACCEPTING, server is {}", self.state.mode),
            );
        }
        if message.version_number <= self.state.highest_version {
            return self.reject_processed(
                RejectionReason::Bad,
                format!(
                    "change version {} is not above highest version {}",
                    message.version_number, self.state.highest_version
                ),
            );
        }
        if self.store.get_by_change_id(message.change_id)?.is_some() {
            return self.reject_processed(
                RejectionReason::Bad,
                format!("change {} already exists", message.change_id),
            );
        }
        if let PotentialApplication::Rejected(reason) = self
            .applicator
            .try_apply(self.state.current_config.as_ref(), &message.change)
        {
            return self.reject_processed(RejectionReason::Unacceptable, reason);
        }

        let record = ChangeRecord {
            change_id: message.change_id,
            version: message.version_number,
            previous_change_id: self.state.latest_change_id,
            state: ChangeRequestState::Prepared,
            payload: message.change,
            result: None,
            creation_host: message.mutation.mutation_host.clone(),
            creation_user: message.mutation.mutation_user.clone(),
            creation_timestamp: message.mutation.mutation_timestamp,
        };
        let mut next = self.next_state(&message.mutation);
        next.mode = NomadMode::Prepared;
        next.highest_version = record.version;
        next.latest_change_id = Some(record.change_id);

        self.store.append(&record, &next)?;

        tracing::info!(
            server = %self.name,
            change_id = %record.change_id,
            version = record.version,
            summary = %record.payload.summary(),
            "change prepared"
        );
        self.history.push(record.summary());
        self.latest = Some(record);
        self.state = next;
        Ok(self.accepted())
    }

    pub fn commit(&mut self, message: CommitMessage) -> Result<AcceptRejectResponse> {
        if let Some(dead) = self.check_fence(&message.mutation) {
            return Ok(dead);
        }
        let mut record = match self.prepared_record(message.change_id) {
            Ok(record) => record,
            Err(reason) => return self.reject_processed(RejectionReason::Bad, reason),
        };

        let new_config = self
            .applicator
            .apply(self.state.current_config.as_ref(), &record.payload)?;

        record.state = ChangeRequestState::Committed;
        record.result = Some(new_config.clone());
        let mut next = self.next_state(&message.mutation);
        next.mode = NomadMode::Accepting;
        next.current_version = record.version;
        next.current_config = Some(new_config);

        self.finish(record, next)
    }

    pub fn rollback(&mut self, message: RollbackMessage) -> Result<AcceptRejectResponse> {
        if let Some(dead) = self.check_fence(&message.mutation) {
            return Ok(dead);
        }
        let mut record = match self.prepared_record(message.change_id) {
            Ok(record) => record,
            Err(reason) => return self.reject_processed(RejectionReason::Bad, reason),
        };

        record.state = ChangeRequestState::RolledBack;
        let mut next = self.next_state(&message.mutation);
        next.mode = NomadMode::Accepting;

        self.finish(record, next)
    }

    /// Claim the server for a new client. The change log is untouched; only
    /// the counter and the last-mutation fields move, which voids every
    /// message the previous client may still have in flight.
    pub fn takeover(&mut self, message: TakeoverMessage) -> Result<AcceptRejectResponse> {
        if let Some(dead) = self.check_fence(&message.mutation) {
            return Ok(dead);
        }
        let next = self.next_state(&message.mutation);
        self.store.save_state(&next)?;

        tracing::info!(
            server = %self.name,
            host = %message.mutation.mutation_host,
            user = %message.mutation.mutation_user,
            mode = %next.mode,
            "takeover accepted"
        );
        self.state = next;
        Ok(self.accepted())
    }

    fn check_fence(&self, mutation: &Mutation) -> Option<AcceptRejectResponse> {
        if mutation.expected_mutative_message_count == self.state.mutative_message_count {
            return None;
        }
        tracing::warn!(
            server = %self.name,
            expected = mutation.expected_mutative_message_count,
            actual = self.state.mutative_message_count,
            host = %mutation.mutation_host,
            "dead message rejected"
        );
        Some(AcceptRejectResponse::reject(
            RejectionReason::Dead,
            format!(
                "expected mutative message count {} but server is at {}",
                mutation.expected_mutative_message_count, self.state.mutative_message_count
            ),
            self.state.last_mutation_host.clone(),
            self.state.last_mutation_user.clone(),
        ))
    }

    /// The prepared record targeted by a commit or rollback
    fn prepared_record(&self, change_id: Uuid) -> std::result::Result<ChangeRecord<C>, String> {
        if self.state.mode != NomadMode::Prepared {
            return Err(format!("expected mode PREPARED, server is {}", self.state.mode));
        }
        match &self.latest {
            Some(record) if record.change_id == change_id => Ok(record.clone()),
            Some(record) => Err(format!(
                "change {} does not match prepared change {}",
                change_id, record.change_id
            )),
            None => Err("no prepared change record".to_string()),
        }
    }

    /// State after processing a message from `mutation`
    fn next_state(&self, mutation: &Mutation) -> ServerState<C> {
        let mut next = self.state.clone();
        next.mutative_message_count += 1;
        next.last_mutation_host = Some(mutation.mutation_host.clone());
        next.last_mutation_user = Some(mutation.mutation_user.clone());
        next.last_mutation_timestamp = Some(mutation.mutation_timestamp);
        next
    }

    fn finish(
        &mut self,
        record: ChangeRecord<C>,
        next: ServerState<C>,
    ) -> Result<AcceptRejectResponse> {
        self.store.update(&record, &next)?;

        tracing::info!(
            server = %self.name,
            change_id = %record.change_id,
            version = record.version,
            state = %record.state,
            "change finished"
        );
        if let Some(summary) = self
            .history
            .iter_mut()
            .rev()
            .find(|s| s.change_id == record.change_id)
        {
            summary.state = record.state;
        }
        self.latest = Some(record);
        self.state = next;
        Ok(self.accepted())
    }

    /// Reject a message that passed the fence: the counter still moves.
    fn reject_processed(
        &mut self,
        reason: RejectionReason,
        message: impl Into<String>,
    ) -> Result<AcceptRejectResponse> {
        let message = message.into();
        let mut next = self.state.clone();
        next.mutative_message_count += 1;
        self.store.save_state(&next)?;
        self.state = next;

        tracing::warn!(server = %self.name, reason = %reason, "{}", message);
        Ok(AcceptRejectResponse::reject(
            reason,
            message,
            self.state.last_mutation_host.clone(),
            self.state.last_mutation_user.clone(),
        ))
    }

    fn accepted(&self) -> AcceptRejectResponse {
        AcceptRejectResponse::accept(
            self.state.last_mutation_host.clone(),
            self.state.last_mutation_user.clone(),
        )
    }
}
