use std::time::Duration;

/// Global application configuration loaded from environment variables.
///
/// CLI flags on `ethindex runsync` take precedence over these when both are
/// supplied; see `ethindex-cli`'s `RunSync` arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// jsonrpc URL of the node to sync from.
    pub jsonrpc_url: String,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Number of confirmations until a block is considered final.
    pub required_confirmations: u64,

    /// Time to sleep between sync passes once caught up.
    pub waittime: Duration,

    /// Maximum number of blocks fetched in a single round.
    pub blocks_per_round: u64,

    /// Maximum number of PostgreSQL connections in the pool.
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults from the design (`blocks_per_round = 50_000`,
    /// `required_confirmations = 10`, `waittime = 1s`).
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            jsonrpc_url: std::env::var("JSONRPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            required_confirmations: std::env::var("REQUIRED_CONFIRMATIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REQUIRED_CONFIRMATIONS must be a valid u64"))?,
            waittime: Duration::from_millis(
                std::env::var("WAITTIME_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .map_err(|_| anyhow::anyhow!("WAITTIME_MS must be a valid u64"))?,
            ),
            blocks_per_round: std::env::var("BLOCKS_PER_ROUND")
                .unwrap_or_else(|_| "50000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BLOCKS_PER_ROUND must be a valid u64"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
        })
    }
}
