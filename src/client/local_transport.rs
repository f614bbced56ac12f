//! In-process transport over [`ServerHandle`]s
//!
//! Used by tests and embedded deployments. Faults can be injected per
//! endpoint to reproduce the failure modes a real network produces.

use crate::client::transport::NomadTransport;
use crate::common::{Error, Result};
use crate::protocol::{
    AcceptRejectResponse, ChangeRecord, DiscoverResponse, MessageKind, MutativeMessage, NomadChange,
};
use crate::server::ServerHandle;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The request never reaches the server
    Unreachable,
    /// The server processes the request but the answer is lost
    LoseResponse,
    /// The call never completes; only a client timeout ends it
    Hang,
}

#[derive(Debug, Clone, Copy)]
struct FaultRule {
    fault: Fault,
    /// `None` applies to every call, discovery included
    kind: Option<MessageKind>,
}

pub struct LocalTransport<C: NomadChange> {
    servers: HashMap<String, ServerHandle<C>>,
    faults: Mutex<HashMap<String, Vec<FaultRule>>>,
    sent: Mutex<Vec<(String, MessageKind)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C: NomadChange> LocalTransport<C> {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
            faults: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Register a server under its own name
    pub fn with_server(mut self, handle: ServerHandle<C>) -> Self {
        self.add_server(handle);
        self
    }

    pub fn add_server(&mut self, handle: ServerHandle<C>) {
        self.servers.insert(handle.name().to_string(), handle);
    }

    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn server(&self, endpoint: &str) -> Option<&ServerHandle<C>> {
        self.servers.get(endpoint)
    }

    /// Fail every call to `endpoint`
    pub fn inject(&self, endpoint: &str, fault: Fault) {
        self.push_rule(endpoint, FaultRule { fault, kind: None });
    }

    /// Fail only mutative messages of `kind` sent to `endpoint`
    pub fn inject_on(&self, endpoint: &str, kind: MessageKind, fault: Fault) {
        self.push_rule(
            endpoint,
            FaultRule {
                fault,
                kind: Some(kind),
            },
        );
    }

    pub fn clear_faults(&self, endpoint: &str) {
        lock(&self.faults).remove(endpoint);
    }

    /// Every mutative message handed to this transport, in send order
    pub fn sent(&self) -> Vec<(String, MessageKind)> {
        lock(&self.sent).clone()
    }

    pub fn sent_kinds(&self, kind: MessageKind) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    fn push_rule(&self, endpoint: &str, rule: FaultRule) {
        lock(&self.faults)
            .entry(endpoint.to_string())
            .or_default()
            .push(rule);
    }

    fn fault_for(&self, endpoint: &str, kind: Option<MessageKind>) -> Option<Fault> {
        lock(&self.faults).get(endpoint).and_then(|rules| {
            rules
                .iter()
                .find(|rule| rule.kind.is_none() || rule.kind == kind)
                .map(|rule| rule.fault)
        })
    }

    fn handle(&self, endpoint: &str) -> Result<&ServerHandle<C>> {
        self.servers
            .get(endpoint)
            .ok_or_else(|| Error::ConnectionFailed(format!("unknown endpoint {}", endpoint)))
    }
}

impl<C: NomadChange> Default for LocalTransport<C> {
    fn default() -> Self {
        Self::new()
    }
}

async fn hang<T>() -> T {
    futures_util::future::pending().await
}

impl<C: NomadChange> NomadTransport<C> for LocalTransport<C> {
    async fn discover(&self, endpoint: &str) -> Result<DiscoverResponse<C>> {
        match self.fault_for(endpoint, None) {
            Some(Fault::Hang) => hang().await,
            Some(_) => Err(Error::ConnectionFailed(format!("{} unreachable", endpoint))),
            None => self.handle(endpoint)?.discover().await,
        }
    }

    async fn mutate(
        &self,
        endpoint: &str,
        message: MutativeMessage<C>,
    ) -> Result<AcceptRejectResponse> {
        let kind = message.kind();
        lock(&self.sent).push((endpoint.to_string(), kind));

        let handle = self.handle(endpoint)?;
        match self.fault_for(endpoint, Some(kind)) {
            None => handle.mutate(message).await,
            Some(Fault::Unreachable) => {
                Err(Error::ConnectionFailed(format!("{} unreachable", endpoint)))
            }
            Some(Fault::LoseResponse) => {
                let _ = handle.mutate(message).await;
                Err(Error::ConnectionFailed(format!(
                    "{} closed the connection before answering {}",
                    endpoint, kind
                )))
            }
            Some(Fault::Hang) => {
                let _ = handle.mutate(message).await;
                hang().await
            }
        }
    }

    async fn changes_since(&self, endpoint: &str, version: u64) -> Result<Vec<ChangeRecord<C>>> {
        match self.fault_for(endpoint, None) {
            Some(Fault::Hang) => hang().await,
            Some(_) => Err(Error::ConnectionFailed(format!("{} unreachable", endpoint))),
            None => self.handle(endpoint)?.changes_since(version).await,
        }
    }
}
