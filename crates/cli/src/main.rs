use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ethindex_abi::{import, AbiRegistry};
use ethindex_common::config::AppConfig;
use ethindex_common::db;
use ethindex_sync::supervisor;

/// Schema DDL executed verbatim by `createtables`, matching
/// `do_createtables` in the source implementation (raw DDL, not a
/// migration runner, so `droptables`/`createtables` stay usable even
/// against a database `sqlx::migrate!` has never touched).
const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_init.sql");

const TABLES: [&str; 4] = ["events", "sync", "abis", "graphfeed"];

#[derive(Parser)]
#[command(name = "ethindex", version, about = "Chain-to-database event indexer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database tables.
    CreateTables,
    /// Drop the database tables. Requires --force; otherwise this is a
    /// dry run that makes no changes and exits 1.
    DropTables {
        #[arg(long)]
        force: bool,
    },
    /// Import contract ABIs from an addresses/contracts file pair.
    ImportAbi {
        #[arg(long, default_value = "./addresses.json")]
        addresses: PathBuf,
        #[arg(long, default_value = "./contracts.json")]
        contracts: PathBuf,
    },
    /// Run the synchronization engine.
    RunSync {
        #[arg(long)]
        jsonrpc: Option<String>,
        #[arg(long)]
        required_confirmations: Option<u64>,
        #[arg(long, help = "time to sleep in milliseconds waiting for a new block")]
        waittime: Option<u64>,
        #[arg(long, default_value_t = -1)]
        startblock: i64,
        #[arg(long, default_value = "default")]
        syncid: String,
        #[arg(long)]
        merge_with_syncid: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ethindex_sync=info,ethindex_abi=info".into()),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ethindex starting");

    let cli = Cli::parse();

    match cli.command {
        Command::CreateTables => create_tables().await,
        Command::DropTables { force } => drop_tables(force).await,
        Command::ImportAbi {
            addresses,
            contracts,
        } => import_abi(&addresses, &contracts).await,
        Command::RunSync {
            jsonrpc,
            required_confirmations,
            waittime,
            startblock,
            syncid,
            merge_with_syncid,
        } => {
            run_sync(
                jsonrpc,
                required_confirmations,
                waittime,
                startblock,
                syncid,
                merge_with_syncid,
            )
            .await
        }
    }
}

async fn create_tables() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    tracing::info!("creating tables");
    let mut tx = pool.begin().await?;
    sqlx::raw_sql(SCHEMA_SQL).execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(())
}

async fn drop_tables(force: bool) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    for table in TABLES {
        let statement = format!("DROP TABLE IF EXISTS {table}");
        tracing::info!(statement, "executing");
        if force {
            sqlx::query(&statement).execute(&pool).await?;
        }
    }

    if !force {
        tracing::warn!("dry-run, please specify --force to really delete the tables");
        std::process::exit(1);
    }

    Ok(())
}

async fn import_abi(addresses_path: &std::path::Path, contracts_path: &std::path::Path) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    let addresses: import::AddressesFile =
        serde_json::from_slice(&std::fs::read(addresses_path)?)?;
    let contracts: import::ContractsFile =
        serde_json::from_slice(&std::fs::read(contracts_path)?)?;

    let address_to_abi = import::build_address_to_abi(&addresses, &contracts)?;
    tracing::info!(count = address_to_abi.len(), "importing abis");
    AbiRegistry::import(&pool, &address_to_abi).await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_sync(
    jsonrpc: Option<String>,
    required_confirmations: Option<u64>,
    waittime_ms: Option<u64>,
    startblock: i64,
    syncid: String,
    merge_with_syncid: Option<String>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env()?;

    if let Some(jsonrpc) = jsonrpc {
        config.jsonrpc_url = jsonrpc;
    }
    if let Some(required_confirmations) = required_confirmations {
        config.required_confirmations = required_confirmations;
    }
    if let Some(waittime_ms) = waittime_ms {
        config.waittime = Duration::from_millis(waittime_ms);
    }

    supervisor::run_forever(
        &config,
        &syncid,
        startblock,
        merge_with_syncid.as_deref(),
    )
    .await
}
