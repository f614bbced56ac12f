//! Operator recovery and change log inspection

use crate::client::{
    HttpTransport, NomadClientProcess, NomadDecider, NomadTransport, Outcome, Resolution,
    TracingReceiver,
};
use crate::common::{ClientConfig, Result};
use crate::protocol::{ChangeRecord, NomadChange};
use std::sync::Arc;

/// Finish a change an abandoned client left prepared, over HTTP
pub async fn recover_cluster<C, D>(
    config: &ClientConfig,
    decider: D,
    forced: Option<Resolution>,
) -> Result<Outcome>
where
    C: NomadChange,
    D: NomadDecider<C>,
{
    let transport = Arc::new(HttpTransport::new(config.rpc_timeout())?);
    let mut process = NomadClientProcess::with_decider(config, transport, decider)?;

    tracing::info!(forced = ?forced, "Starting cluster recovery");
    let outcome = process.recover(forced, &mut TracingReceiver).await;
    tracing::info!(outcome = %outcome, "Cluster recovery finished");
    Ok(outcome)
}

/// Records of one endpoint above `since`, oldest first
pub async fn change_log<C, T>(transport: &T, endpoint: &str, since: u64) -> Result<Vec<ChangeRecord<C>>>
where
    C: NomadChange,
    T: NomadTransport<C>,
{
    transport.changes_since(endpoint, since).await
}
