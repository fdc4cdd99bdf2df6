//! Event Writer: atomic range-replace, the reorg compensation primitive.

use ethindex_abi::Event;
use ethindex_common::error::SyncError;
use sqlx::{Postgres, Transaction};

pub struct EventWriter;

impl EventWriter {
    /// `DELETE FROM events WHERE block_number BETWEEN from AND to AND address
    /// = ANY(addresses)`, then insert every supplied event, all within the
    /// caller's transaction so this commits atomically with the cursor
    /// update and graph feed insert.
    pub async fn replace_range(
        tx: &mut Transaction<'_, Postgres>,
        from: u64,
        to: u64,
        addresses: &[String],
        events: &[Event],
    ) -> Result<(), SyncError> {
        sqlx::query(
            "DELETE FROM events WHERE block_number BETWEEN $1 AND $2 AND address = ANY($3)",
        )
        .bind(from as i64)
        .bind(to as i64)
        .bind(addresses)
        .execute(&mut **tx)
        .await?;

        for event in events {
            let result = sqlx::query(
                "INSERT INTO events (
                    transaction_hash, block_number, address, event_name, args,
                    block_hash, transaction_index, log_index, timestamp
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&event.transaction_hash)
            .bind(event.block_number as i64)
            .bind(&event.address)
            .bind(&event.name)
            .bind(sqlx::types::Json(&event.args))
            .bind(&event.block_hash)
            .bind(event.transaction_index as i64)
            .bind(event.log_index as i64)
            .bind(event.timestamp)
            .execute(&mut **tx)
            .await;

            if let Err(sqlx::Error::Database(db_error)) = &result {
                if db_error.is_unique_violation() {
                    return Err(SyncError::InvariantViolation(format!(
                        "duplicate event identity key within one batch: {} / {} / {} / {} / {}",
                        event.transaction_hash,
                        event.address,
                        event.block_hash,
                        event.transaction_index,
                        event.log_index
                    )));
                }
            }
            result?;
        }

        Ok(())
    }
}
