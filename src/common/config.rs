//! Configuration for nomad components

use crate::common::utils::{local_host, local_user};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server-side settings (present on nodes running `nomad-server`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Client-side settings (used by the `nomad` CLI and ops commands)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file, then `NOMAD__*`
    /// environment variables (e.g. `NOMAD__SERVER__NAME=node-1`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("nomad").required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("NOMAD").separator("__"))
            .build()?;
        let mut config: Config = settings.try_deserialize()?;
        if config.log_level.is_empty() {
            config.log_level = default_log_level();
        }
        Ok(config)
    }
}

/// Change log backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageBackend::Memory),
            "rocksdb" | "rocks" => Ok(StorageBackend::RocksDb),
            other => Err(Error::InvalidConfig(format!("unknown storage backend: {}", other))),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server name, reported in logs and metrics
    pub name: String,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Change log directory (RocksDB backend)
    pub db_path: PathBuf,

    /// Change log backend
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    /// Maximum accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_storage() -> StorageBackend {
    StorageBackend::RocksDb
}
fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "nomad-1".to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9410)),
            db_path: PathBuf::from("./nomad-data"),
            storage: default_storage(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Every server taking part in a change (base URLs for HTTP)
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Per-call timeout
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Host recorded on every mutation (defaults to this machine)
    #[serde(default = "local_host")]
    pub mutation_host: String,

    /// User recorded on every mutation (defaults to the current user)
    #[serde(default = "local_user")]
    pub mutation_user: String,
}

fn default_rpc_timeout() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            rpc_timeout_ms: default_rpc_timeout(),
            mutation_host: local_host(),
            mutation_user: local_user(),
        }
    }
}

impl ClientConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::InvalidConfig("no endpoints configured".into()));
        }
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "endpoint listed twice: {}",
                    endpoint
                )));
            }
        }
        if self.rpc_timeout_ms == 0 {
            return Err(Error::InvalidConfig("rpc_timeout_ms must be positive".into()));
        }
        if self.mutation_host.is_empty() || self.mutation_user.is_empty() {
            return Err(Error::InvalidConfig(
                "mutation host and user must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nomad.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[server]
name = "node-a"
bind_addr = "127.0.0.1:9500"
db_path = "/tmp/node-a"
storage = "memory"

[client]
endpoints = ["http://a:9410", "http://b:9410"]
rpc_timeout_ms = 250
"#
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        let server = config.server.unwrap();
        assert_eq!(server.name, "node-a");
        assert_eq!(server.storage, StorageBackend::Memory);
        assert_eq!(server.max_body_bytes, 4 * 1024 * 1024);
        let client = config.client.unwrap();
        assert_eq!(client.endpoints.len(), 2);
        assert_eq!(client.rpc_timeout(), Duration::from_millis(250));
        assert!(!client.mutation_user.is_empty());
    }

    #[test]
    fn test_client_config_validation() {
        let mut config = ClientConfig::default();
        assert!(config.validate().is_err());

        config.endpoints = vec!["http://a".into(), "http://a".into()];
        assert!(config.validate().is_err());

        config.endpoints = vec!["http://a".into(), "http://b".into()];
        assert!(config.validate().is_ok());

        config.rpc_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("rocksdb".parse::<StorageBackend>().unwrap(), StorageBackend::RocksDb);
        assert_eq!("Memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("sled".parse::<StorageBackend>().is_err());
    }
}
