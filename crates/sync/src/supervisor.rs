//! Outer "always restart" loop: catches any unexpected failure, logs it,
//! sleeps a fixed backoff, and reconstructs the node client and DB pool
//! from scratch before retrying.

use std::time::Duration;

use ethindex_common::config::AppConfig;
use ethindex_common::db;
use ethindex_common::error::SyncError;

use crate::chain::HttpChainClient;
use crate::synchronizer::Synchronizer;

const BACKOFF: Duration = Duration::from_secs(10);

/// Run `syncid` forever, surviving connection drops and transient RPC/DB
/// errors by reconnecting from scratch. Returns once a merge into
/// `merge_with_syncid` succeeds; with no merge target configured this never
/// returns under normal operation.
///
/// `NoAbisAvailable` and `InvariantViolation` are fatal per §7 ("Fatal to
/// the process" / "Fatal; indicates a bug") and are not retried: they
/// propagate out instead of looping forever on a condition an operator
/// needs to notice and fix.
pub async fn run_forever(
    config: &AppConfig,
    syncid: &str,
    start_block: i64,
    merge_with_syncid: Option<&str>,
) -> anyhow::Result<()> {
    loop {
        match run_once(config, syncid, start_block, merge_with_syncid).await {
            Ok(()) => return Ok(()),
            Err(error @ (SyncError::NoAbisAvailable { .. } | SyncError::InvariantViolation(_))) => {
                tracing::error!(syncid, error = ?error, "fatal error in runsync, exiting");
                return Err(error.into());
            }
            Err(error) => {
                tracing::error!(
                    syncid,
                    error = ?error,
                    "An error occurred in runsync. Will restart in {}s",
                    BACKOFF.as_secs()
                );
                tokio::time::sleep(BACKOFF).await;
            }
        }
    }
}

async fn run_once(
    config: &AppConfig,
    syncid: &str,
    start_block: i64,
    merge_with_syncid: Option<&str>,
) -> Result<(), SyncError> {
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .map_err(SyncError::Rpc)?;
    let client = HttpChainClient::connect(&config.jsonrpc_url).map_err(SyncError::Rpc)?;

    let all_abi_addresses: Vec<String> =
        ethindex_abi::AbiRegistry::all_addresses(&pool)
            .await?
            .iter()
            .map(|a| a.to_checksum(None))
            .collect();

    {
        let mut tx = pool.begin().await?;
        crate::cursor::CursorStore::ensure(&mut tx, syncid, start_block, &all_abi_addresses).await?;
        tx.commit().await?;
    }

    let mut synchronizer = Synchronizer::new(
        client,
        pool,
        syncid,
        config.required_confirmations,
        config.blocks_per_round,
    );

    synchronizer
        .sync_loop(config.waittime, merge_with_syncid)
        .await?;

    Ok(())
}
