//! Full cluster over HTTP: three servers on loopback, driven by the HTTP transport

use nomad::client::{HttpTransport, NomadClientProcess, NomadEvent, NomadTransport, Outcome};
use nomad::common::{ClientConfig, ServerConfig, StorageBackend};
use nomad::ops::{change_log, verify_with};
use nomad::protocol::{ChangeRequestState, NomadMode};
use nomad::settings::{ConfigChange, SettingsApplicator};
use nomad::NomadNode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    url: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<nomad::Result<()>>,
}

async fn start_server(name: &str) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let config = ServerConfig {
        name: name.to_string(),
        storage: StorageBackend::Memory,
        ..ServerConfig::default()
    };
    let node = NomadNode::<ConfigChange>::new(config, Arc::new(SettingsApplicator::new()));
    let (shutdown, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(node.serve_with(listener, async move {
        let _ = rx.await;
    }));

    TestServer {
        url,
        shutdown,
        task,
    }
}

fn client_config(servers: &[TestServer]) -> ClientConfig {
    ClientConfig {
        endpoints: servers.iter().map(|s| s.url.clone()).collect(),
        rpc_timeout_ms: 2_000,
        mutation_host: "http-test".to_string(),
        mutation_user: "alice".to_string(),
    }
}

async fn stop(servers: Vec<TestServer>) {
    for server in servers {
        let _ = server.shutdown.send(());
        server.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_changes_over_http() {
    let servers = vec![
        start_server("node-a").await,
        start_server("node-b").await,
        start_server("node-c").await,
    ];
    let config = client_config(&servers);
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap());
    let mut process = NomadClientProcess::new(&config, transport.clone()).unwrap();

    let mut events: Vec<NomadEvent<ConfigChange>> = Vec::new();
    let outcome = process
        .apply_change(
            ConfigChange::Activate {
                cluster_name: "prod".to_string(),
            },
            &mut events,
        )
        .await;
    assert_eq!(outcome, Outcome::Committed);

    let outcome = process
        .apply_change(
            ConfigChange::SetSetting {
                name: "lease-time".to_string(),
                value: "20s".to_string(),
            },
            &mut events,
        )
        .await;
    assert_eq!(outcome, Outcome::Committed);

    let report = verify_with(&mut process).await;
    assert!(report.is_healthy());
    assert!(report.current_versions.values().all(|v| *v == 2));

    for server in &servers {
        let response = NomadTransport::<ConfigChange>::discover(transport.as_ref(), &server.url)
            .await
            .unwrap();
        assert_eq!(response.mode, NomadMode::Accepting);
        assert_eq!(response.last_mutation_user.as_deref(), Some("alice"));
        assert_eq!(
            response.current_config.unwrap().setting("lease-time"),
            Some("20s")
        );

        let log = change_log::<ConfigChange, _>(transport.as_ref(), &server.url, 1)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].version, 2);
        assert_eq!(log[0].state, ChangeRequestState::Committed);
        assert_eq!(log[0].creation_user, "alice");
    }

    stop(servers).await;
}

#[tokio::test]
async fn test_stopped_server_blocks_the_change() {
    let mut servers = vec![start_server("node-a").await, start_server("node-b").await];
    let config = client_config(&servers);

    let down = servers.remove(1);
    let _ = down.shutdown.send(());
    down.task.await.unwrap().unwrap();

    let transport = Arc::new(HttpTransport::new(Duration::from_millis(500)).unwrap());
    let mut process = NomadClientProcess::new(&config, transport.clone()).unwrap();
    let mut events: Vec<NomadEvent<ConfigChange>> = Vec::new();
    let outcome = process
        .apply_change(
            ConfigChange::Activate {
                cluster_name: "prod".to_string(),
            },
            &mut events,
        )
        .await;
    assert_eq!(
        outcome,
        Outcome::Aborted(nomad::client::AbortReason::DiscoverFailed)
    );

    let survivor = NomadTransport::<ConfigChange>::discover(transport.as_ref(), &servers[0].url)
        .await
        .unwrap();
    assert_eq!(survivor.mutative_message_count, 0);

    stop(servers).await;
}
