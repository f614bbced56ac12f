//! Serialization point for one server
//!
//! A [`NomadServer`] is owned by a single task. Every request, whether it
//! arrives over HTTP or from an in-process transport, goes through the
//! task's channel and is handled to completion before the next one starts.

use crate::common::{Error, NomadMetrics, Result};
use crate::protocol::{
    AcceptRejectResponse, ChangeRecord, DiscoverResponse, MutativeMessage, NomadChange, NomadMode,
};
use crate::server::state_machine::NomadServer;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

const REQUEST_QUEUE: usize = 256;

enum Request<C: NomadChange> {
    Discover {
        reply: oneshot::Sender<DiscoverResponse<C>>,
    },
    Mutate {
        message: MutativeMessage<C>,
        reply: oneshot::Sender<Result<AcceptRejectResponse>>,
    },
    ChangesSince {
        version: u64,
        reply: oneshot::Sender<Result<Vec<ChangeRecord<C>>>>,
    },
    GetChange {
        change_id: Uuid,
        reply: oneshot::Sender<Result<Option<ChangeRecord<C>>>>,
    },
}

/// Cloneable handle to a running server task
pub struct ServerHandle<C: NomadChange> {
    name: Arc<str>,
    tx: mpsc::Sender<Request<C>>,
    metrics: Arc<NomadMetrics>,
}

impl<C: NomadChange> Clone for ServerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: NomadChange> ServerHandle<C> {
    /// Move `server` onto its own task. Must be called within a tokio runtime.
    pub fn spawn(server: NomadServer<C>) -> Self {
        let name: Arc<str> = Arc::from(server.name());
        let metrics = Arc::new(NomadMetrics::new());
        update_gauges(&server, &metrics);

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        tokio::spawn(run(server, rx, metrics.clone()));

        Self { name, tx, metrics }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<NomadMetrics> {
        &self.metrics
    }

    pub async fn discover(&self) -> Result<DiscoverResponse<C>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Discover { reply }).await?;
        rx.await.map_err(|_| self.stopped())
    }

    pub async fn mutate(&self, message: MutativeMessage<C>) -> Result<AcceptRejectResponse> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Mutate { message, reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn changes_since(&self, version: u64) -> Result<Vec<ChangeRecord<C>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::ChangesSince { version, reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub async fn get_change(&self, change_id: Uuid) -> Result<Option<ChangeRecord<C>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::GetChange { change_id, reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    async fn send(&self, request: Request<C>) -> Result<()> {
        self.tx.send(request).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> Error {
        Error::ServerStopped(self.name.to_string())
    }
}

async fn run<C: NomadChange>(
    mut server: NomadServer<C>,
    mut rx: mpsc::Receiver<Request<C>>,
    metrics: Arc<NomadMetrics>,
) {
    while let Some(request) = rx.recv().await {
        match request {
            Request::Discover { reply } => {
                metrics.discover_total.inc();
                let _ = reply.send(server.discover());
            }
            Request::Mutate { message, reply } => {
                let kind = message.kind().as_str();
                let result = server.process(message);
                let outcome = match &result {
                    Ok(resp) => match resp.rejection_reason {
                        None => "accepted",
                        Some(reason) => reason.as_str(),
                    },
                    Err(e) => {
                        tracing::error!(server = %server.name(), kind, "message failed: {}", e);
                        "error"
                    }
                };
                metrics.record_mutation(kind, outcome);
                update_gauges(&server, &metrics);
                let _ = reply.send(result);
            }
            Request::ChangesSince { version, reply } => {
                let _ = reply.send(server.changes_since(version));
            }
            Request::GetChange { change_id, reply } => {
                let _ = reply.send(server.get_change(change_id));
            }
        }
    }
    tracing::debug!(server = %server.name(), "server task stopped");
}

fn update_gauges<C: NomadChange>(server: &NomadServer<C>, metrics: &NomadMetrics) {
    let state = server.state();
    metrics
        .mutative_message_count
        .set(state.mutative_message_count);
    metrics.current_version.set(state.current_version);
    metrics.highest_version.set(state.highest_version);
    metrics
        .prepared
        .set(u64::from(state.mode == NomadMode::Prepared));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Mutation, TakeoverMessage};
    use crate::server::store::MemoryChangeStore;
    use crate::settings::{ConfigChange, SettingsApplicator};
    use chrono::Utc;

    fn handle() -> ServerHandle<ConfigChange> {
        let server = NomadServer::new(
            "node-a",
            Box::new(MemoryChangeStore::<ConfigChange>::new()),
            Arc::new(SettingsApplicator::new()),
        )
        .unwrap();
        ServerHandle::spawn(server)
    }

    fn takeover(fence: u64) -> MutativeMessage<ConfigChange> {
        MutativeMessage::Takeover(TakeoverMessage {
            mutation: Mutation {
                expected_mutative_message_count: fence,
                mutation_host: "host-a".into(),
                mutation_user: "ops".into(),
                mutation_timestamp: Utc::now(),
            },
        })
    }

    #[tokio::test]
    async fn test_concurrent_messages_are_serialized() {
        let handle = handle();
        // Ten clients race with the same fence; exactly one wins.
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let h = handle.clone();
            tasks.spawn(async move { h.mutate(takeover(0)).await });
        }
        let mut accepted = 0;
        while let Some(res) = tasks.join_next().await {
            if res.unwrap().unwrap().accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(handle.discover().await.unwrap().mutative_message_count, 1);
        assert_eq!(handle.metrics().mutation_count("takeover", "accepted"), 1);
        assert_eq!(handle.metrics().mutation_count("takeover", "dead"), 9);
        assert_eq!(handle.metrics().mutative_message_count.get(), 1);
    }

    #[tokio::test]
    async fn test_discover_counts() {
        let handle = handle();
        handle.discover().await.unwrap();
        handle.discover().await.unwrap();
        assert_eq!(handle.metrics().discover_total.get(), 2);
        assert!(handle.changes_since(0).await.unwrap().is_empty());
        assert!(handle.get_change(Uuid::new_v4()).await.unwrap().is_none());
    }
}
