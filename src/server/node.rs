//! Nomad server node: change log + state machine + HTTP API

use crate::common::{Result, ServerConfig, StorageBackend};
use crate::protocol::{ChangeApplicator, NomadChange};
use crate::server::handle::ServerHandle;
use crate::server::http::create_router;
use crate::server::rocks::RocksChangeStore;
use crate::server::state_machine::NomadServer;
use crate::server::store::{ChangeStore, MemoryChangeStore};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct NomadNode<C: NomadChange> {
    config: ServerConfig,
    applicator: Arc<dyn ChangeApplicator<C>>,
}

/// Open the change log selected by `config.storage`
pub fn open_store<C: NomadChange>(config: &ServerConfig) -> Result<Box<dyn ChangeStore<C>>> {
    match config.storage {
        StorageBackend::Memory => Ok(Box::new(MemoryChangeStore::<C>::new())),
        StorageBackend::RocksDb => {
            std::fs::create_dir_all(&config.db_path)?;
            Ok(Box::new(RocksChangeStore::<C>::open(&config.db_path)?))
        }
    }
}

impl<C: NomadChange> NomadNode<C> {
    pub fn new(config: ServerConfig, applicator: Arc<dyn ChangeApplicator<C>>) -> Self {
        Self { config, applicator }
    }

    /// Load the change log and start the server task
    pub fn start(&self) -> Result<ServerHandle<C>> {
        let store = open_store(&self.config)?;
        let server = NomadServer::new(self.config.name.clone(), store, self.applicator.clone())?;
        Ok(ServerHandle::spawn(server))
    }

    /// Serve until Ctrl-C
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_with<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting nomad server: {}", self.config.name);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Storage: {:?}", self.config.storage);
        if self.config.storage == StorageBackend::RocksDb {
            tracing::info!("  DB path: {}", self.config.db_path.display());
        }

        let handle = self.start()?;
        let router = create_router(handle, self.config.max_body_bytes);

        tracing::info!("✓ Nomad server ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Nomad server {} stopped", self.config.name);
        Ok(())
    }
}
