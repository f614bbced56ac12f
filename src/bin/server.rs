//! Nomad server binary

use clap::{Parser, Subcommand};
use nomad::common::{Config, StorageBackend};
use nomad::settings::{ConfigChange, SettingsApplicator};
use nomad::NomadNode;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nomad-server")]
#[command(about = "nomad configuration change server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server
    Serve {
        /// Server name
        #[arg(long)]
        name: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Change log directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Change log backend (rocksdb, memory)
        #[arg(long)]
        storage: Option<StorageBackend>,

        /// Configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            name,
            bind,
            db,
            storage,
            config,
        } => {
            // File and environment first, CLI flags on top
            let config = Config::load(config.as_deref())?;
            init_tracing(&config.log_level);

            let mut server_config = config.server.unwrap_or_default();
            if let Some(name) = name {
                server_config.name = name;
            }
            if let Some(bind) = bind {
                server_config.bind_addr = bind.parse()?;
            }
            if let Some(db) = db {
                server_config.db_path = db;
            }
            if let Some(storage) = storage {
                server_config.storage = storage;
            }

            let node = NomadNode::<ConfigChange>::new(server_config, Arc::new(SettingsApplicator::new()));
            node.serve().await?;
        }
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
