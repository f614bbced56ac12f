//! Verify cluster consistency (read-only)

use crate::client::{
    ClusterConsistency, HttpTransport, NomadClientProcess, NomadDecider, NomadEvent,
    NomadTransport,
};
use crate::common::{ClientConfig, Result};
use crate::protocol::{NomadChange, NomadMode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub endpoints: usize,
    pub reachable: usize,
    /// Endpoint -> failure
    pub unreachable: BTreeMap<String, String>,
    pub accepting: usize,
    /// Endpoint -> change held prepared
    pub prepared: BTreeMap<String, Uuid>,
    /// Endpoint -> version of its last committed change
    pub current_versions: BTreeMap<String, u64>,
    pub consistency: ClusterConsistency,
}

impl VerifyReport {
    /// Every endpoint reachable, accepting and in agreement
    pub fn is_healthy(&self) -> bool {
        self.unreachable.is_empty()
            && self.accepting == self.endpoints
            && self.consistency.is_consistent()
    }
}

/// Discover every configured endpoint over HTTP and report what was found
pub async fn verify_cluster<C: NomadChange>(config: &ClientConfig) -> Result<VerifyReport> {
    let transport = Arc::new(HttpTransport::new(config.rpc_timeout())?);
    let mut process = NomadClientProcess::<C, _>::new(config, transport)?;
    Ok(verify_with(&mut process).await)
}

pub async fn verify_with<C, T, D>(process: &mut NomadClientProcess<C, T, D>) -> VerifyReport
where
    C: NomadChange,
    T: NomadTransport<C>,
    D: NomadDecider<C>,
{
    tracing::info!("Starting cluster verification");

    let mut events: Vec<NomadEvent<C>> = Vec::new();
    let view = process.discover(&mut events).await;
    let responses = &view.round.responses;

    let report = VerifyReport {
        endpoints: process.endpoints().len(),
        reachable: responses.len(),
        unreachable: view.round.failures.clone(),
        accepting: responses
            .values()
            .filter(|r| r.mode == NomadMode::Accepting)
            .count(),
        prepared: responses
            .iter()
            .filter_map(|(endpoint, r)| r.prepared_change_id().map(|id| (endpoint.clone(), id)))
            .collect(),
        current_versions: responses
            .iter()
            .map(|(endpoint, r)| (endpoint.clone(), r.current_version))
            .collect(),
        consistency: view.consistency,
    };

    tracing::info!(
        reachable = report.reachable,
        accepting = report.accepting,
        healthy = report.is_healthy(),
        "Cluster verification finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Fault, LocalTransport};
    use crate::server::{MemoryChangeStore, NomadServer, ServerHandle};
    use crate::settings::{ConfigChange, SettingsApplicator};

    fn transport(names: &[&str]) -> Arc<LocalTransport<ConfigChange>> {
        let mut transport = LocalTransport::new();
        for name in names {
            let server = NomadServer::new(
                *name,
                Box::new(MemoryChangeStore::<ConfigChange>::new()),
                Arc::new(SettingsApplicator::new()),
            )
            .unwrap();
            transport.add_server(ServerHandle::spawn(server));
        }
        Arc::new(transport)
    }

    fn config(endpoints: &[&str]) -> ClientConfig {
        ClientConfig {
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fresh_cluster_is_healthy() {
        let transport = transport(&["a", "b", "c"]);
        let mut process =
            NomadClientProcess::<ConfigChange, _>::new(&config(&["a", "b", "c"]), transport).unwrap();

        let report = verify_with(&mut process).await;
        assert!(report.is_healthy());
        assert_eq!(report.reachable, 3);
        assert_eq!(report.accepting, 3);
        assert!(report.prepared.is_empty());
        assert_eq!(report.current_versions.get("b"), Some(&0));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reported() {
        let transport = transport(&["a", "b"]);
        transport.inject("b", Fault::Unreachable);
        let mut process =
            NomadClientProcess::<ConfigChange, _>::new(&config(&["a", "b"]), transport).unwrap();

        let report = verify_with(&mut process).await;
        assert!(!report.is_healthy());
        assert_eq!(report.reachable, 1);
        assert!(report.unreachable.contains_key("b"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["consistency"]["verdict"], "consistent");
    }
}
