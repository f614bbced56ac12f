//! CLI for cluster configuration changes

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nomad::client::{
    HttpTransport, NomadClientProcess, NomadEvent, Outcome, Resolution, ResultsReceiver,
};
use nomad::common::{join_display, parse_size, ClientConfig, Config};
use nomad::ops::{change_log, recover_cluster, verify_cluster};
use nomad::settings::{ConfigChange, ResourceShrinkDecider};
use nomad::NomadChange;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nomad")]
#[command(about = "nomad cluster configuration CLI")]
#[command(version)]
struct Cli {
    /// Server URLs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    endpoints: Vec<String>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the state of every server
    Discover,

    /// Activate the cluster
    Activate {
        /// Cluster name
        cluster_name: String,
    },

    /// Set a setting
    Set { name: String, value: String },

    /// Remove a setting
    Unset { name: String },

    /// Resize a resource (e.g. 512MB, 2GB)
    Resize { name: String, size: String },

    /// Finish a change left prepared by a lost client
    Recover {
        /// Resolution for a change prepared on every server (commit, rollback)
        #[arg(long)]
        force: Option<Resolution>,
    },

    /// Print the change log of one server
    Log {
        /// Server URL
        endpoint: String,

        /// Only changes above this version
        #[arg(long, default_value = "0")]
        since: u64,
    },
}

/// Prints run events as they happen
struct ConsoleReceiver;

impl ResultsReceiver<ConfigChange> for ConsoleReceiver {
    fn receive(&mut self, event: NomadEvent<ConfigChange>) {
        match &event {
            NomadEvent::StartDiscovery { endpoints } => {
                println!("Discovering {}", join_display(endpoints))
            }
            NomadEvent::Discovered { endpoint, response } => println!(
                "  {}: {} (version {}, messages {})",
                endpoint, response.mode, response.current_version, response.mutative_message_count
            ),
            NomadEvent::StartPrepare { change_id, version } => {
                println!("Preparing change {} (version {})", change_id, version)
            }
            NomadEvent::StartCommit { change_id } => println!("Committing change {}", change_id),
            NomadEvent::StartRollback { change_id } => {
                println!("Rolling back change {}", change_id)
            }
            NomadEvent::Done(outcome) => println!("Done: {}", outcome),
            NomadEvent::DiscoverFail { endpoint, reason }
            | NomadEvent::TakeoverFail { endpoint, reason }
            | NomadEvent::PrepareFail { endpoint, reason }
            | NomadEvent::PrepareRejected { endpoint, reason }
            | NomadEvent::CommitFail { endpoint, reason }
            | NomadEvent::RollbackFail { endpoint, reason } => {
                eprintln!("  {}: {} ({})", endpoint, event.name(), reason)
            }
            NomadEvent::DiscoverConfigPartitioned { description, .. }
            | NomadEvent::DiscoverClusterDesynchronized { description }
            | NomadEvent::CommitVetoed {
                reason: description,
            } => eprintln!("{}: {}", event.name(), description),
            other => match other.endpoint() {
                Some(endpoint) => println!("  {}: {}", endpoint, other.name()),
                None => println!("{}", other.name()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut client = config.client.unwrap_or_default();
    if !cli.endpoints.is_empty() {
        client.endpoints = cli.endpoints.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        client.rpc_timeout_ms = timeout_ms;
    }

    let change = match cli.command {
        Commands::Discover => {
            client.validate()?;
            let report = verify_cluster::<ConfigChange>(&client).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                bail!("cluster is not healthy");
            }
            return Ok(());
        }
        Commands::Recover { force } => {
            let outcome =
                recover_cluster::<ConfigChange, _>(&client, ResourceShrinkDecider, force).await?;
            println!("Recovery: {}", outcome);
            return match outcome {
                Outcome::Committed | Outcome::RolledBack => Ok(()),
                other => bail!("recovery did not complete: {}", other),
            };
        }
        Commands::Log { endpoint, since } => {
            let transport = HttpTransport::new(client.rpc_timeout())?;
            let records = change_log::<ConfigChange, _>(&transport, &endpoint, since)
                .await
                .with_context(|| format!("reading change log of {}", endpoint))?;
            for record in records {
                println!(
                    "{:>6}  {}  {:<11}  {}  ({}@{}, {})",
                    record.version,
                    record.change_id,
                    record.state.to_string(),
                    record.payload.summary(),
                    record.creation_user,
                    record.creation_host,
                    record.creation_timestamp.to_rfc3339()
                );
            }
            return Ok(());
        }
        Commands::Activate { cluster_name } => ConfigChange::Activate { cluster_name },
        Commands::Set { name, value } => ConfigChange::SetSetting { name, value },
        Commands::Unset { name } => ConfigChange::UnsetSetting { name },
        Commands::Resize { name, size } => ConfigChange::ResizeResource {
            name,
            bytes: parse_size(&size)?,
        },
    };

    apply(&client, change).await
}

async fn apply(client: &ClientConfig, change: ConfigChange) -> anyhow::Result<()> {
    let transport = Arc::new(HttpTransport::new(client.rpc_timeout())?);
    let mut process = NomadClientProcess::with_decider(client, transport, ResourceShrinkDecider)?;

    match process.apply_change(change, &mut ConsoleReceiver).await {
        Outcome::Committed => Ok(()),
        Outcome::Ambiguous => bail!(
            "the change reached only part of the cluster; run `nomad recover` once every server is reachable"
        ),
        other => bail!("change not applied: {}", other),
    }
}
