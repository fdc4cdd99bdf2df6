use thiserror::Error;

/// Error taxonomy for the synchronization engine.
///
/// `UnknownTopic` is deliberately absent: a log with no registered ABI
/// descriptor is not an error, it is logged at `warn` and the log is
/// skipped (see `ethindex_abi::decode::LogDecoder::decode`).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("chain reorg detected mid-fetch at block {block}")]
    ChainReorgMidFetch { block: u64 },

    #[error("no unowned ABI-registered addresses available for syncid {syncid}")]
    NoAbisAvailable { syncid: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] anyhow::Error),
}
