//! Sync Cursor Store: durable per-syncid cursor and owned address set,
//! guarded by a row-level lock for the duration of each round.

use ethindex_common::error::SyncError;
use sqlx::{Postgres, Transaction};

/// A `sync` table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub syncid: String,
    pub last_block_number: i64,
    pub last_confirmed_block_number: i64,
    pub latest_block_hash: Option<String>,
    pub addresses: Vec<String>,
}

impl SyncCursor {
    pub fn new(syncid: impl Into<String>, start_block: i64, addresses: Vec<String>) -> Self {
        Self {
            syncid: syncid.into(),
            last_block_number: start_block,
            last_confirmed_block_number: start_block,
            latest_block_hash: None,
            addresses,
        }
    }
}

pub struct CursorStore;

impl CursorStore {
    /// `SELECT * FROM sync WHERE syncid = $1 FOR UPDATE`, taking the
    /// row-level exclusive lock within the caller's transaction — the
    /// mechanism by which two concurrent synchronizers for the same syncid
    /// mutually exclude.
    pub async fn select_for_update(
        tx: &mut Transaction<'_, Postgres>,
        syncid: &str,
    ) -> Result<Option<SyncCursor>, SyncError> {
        let row: Option<(String, i64, i64, Option<String>, Vec<String>)> = sqlx::query_as(
            "SELECT syncid, last_block_number, last_confirmed_block_number, \
             latest_block_hash, addresses FROM sync WHERE syncid = $1 FOR UPDATE",
        )
        .bind(syncid)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(
            |(syncid, last_block_number, last_confirmed_block_number, latest_block_hash, addresses)| {
                SyncCursor {
                    syncid,
                    last_block_number,
                    last_confirmed_block_number,
                    latest_block_hash,
                    addresses,
                }
            },
        ))
    }

    /// Lock both `a` and `b`'s rows with a single `SELECT ... WHERE syncid =
    /// ANY($1) FOR UPDATE` statement, mirroring the original's
    /// `SELECT * FROM sync WHERE syncid IN (%s, %s) FOR UPDATE`
    /// (`_try_merge` in `pgimport.py`). A single multi-row statement locks
    /// rows in the scan's own order regardless of how the list is written,
    /// so two callers racing a merge in opposite directions always lock in
    /// the same order; issuing two separate single-row `FOR UPDATE`
    /// statements dst-then-src would let such callers lock the other's row
    /// first, deadlocking. Returns rows in whatever order Postgres locked
    /// them in, not necessarily `[a, b]`.
    pub async fn select_pair_for_update(
        tx: &mut Transaction<'_, Postgres>,
        a: &str,
        b: &str,
    ) -> Result<Vec<SyncCursor>, SyncError> {
        let rows: Vec<(String, i64, i64, Option<String>, Vec<String>)> = sqlx::query_as(
            "SELECT syncid, last_block_number, last_confirmed_block_number, \
             latest_block_hash, addresses FROM sync WHERE syncid = ANY($1) FOR UPDATE",
        )
        .bind(vec![a, b])
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(syncid, last_block_number, last_confirmed_block_number, latest_block_hash, addresses)| {
                    SyncCursor {
                        syncid,
                        last_block_number,
                        last_confirmed_block_number,
                        latest_block_hash,
                        addresses,
                    }
                },
            )
            .collect())
    }

    /// Create the row if absent. `addresses` is every ABI-registered address
    /// minus addresses already owned by any other sync row. Fails with
    /// `NoAbisAvailable` if that leaves nothing to sync.
    pub async fn ensure(
        tx: &mut Transaction<'_, Postgres>,
        syncid: &str,
        start_block: i64,
        all_abi_addresses: &[String],
    ) -> Result<SyncCursor, SyncError> {
        if let Some(existing) = Self::select_for_update(tx, syncid).await? {
            return Ok(existing);
        }

        let owned: Vec<String> =
            sqlx::query_scalar("SELECT unnest(addresses) FROM sync")
                .fetch_all(&mut **tx)
                .await?;

        let addresses: Vec<String> = all_abi_addresses
            .iter()
            .filter(|a| !owned.contains(a))
            .cloned()
            .collect();

        if addresses.is_empty() {
            return Err(SyncError::NoAbisAvailable {
                syncid: syncid.to_string(),
            });
        }

        sqlx::query(
            "INSERT INTO sync (syncid, last_block_number, last_confirmed_block_number, \
             latest_block_hash, addresses) VALUES ($1, $2, $2, NULL, $3)",
        )
        .bind(syncid)
        .bind(start_block)
        .bind(&addresses)
        .execute(&mut **tx)
        .await?;

        Ok(SyncCursor::new(syncid, start_block, addresses))
    }

    /// Persist the advanced cursor at the end of a round.
    pub async fn update(
        tx: &mut Transaction<'_, Postgres>,
        cursor: &SyncCursor,
    ) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE sync SET last_block_number = $2, last_confirmed_block_number = $3, \
             latest_block_hash = $4 WHERE syncid = $1",
        )
        .bind(&cursor.syncid)
        .bind(cursor.last_block_number)
        .bind(cursor.last_confirmed_block_number)
        .bind(&cursor.latest_block_hash)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Delete a row (used once a merge has folded its addresses into
    /// another syncid).
    pub async fn delete(
        tx: &mut Transaction<'_, Postgres>,
        syncid: &str,
    ) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync WHERE syncid = $1")
            .bind(syncid)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cursor_starts_with_equal_last_and_confirmed() {
        let cursor = SyncCursor::new("main", -1, vec!["0xabc".to_string()]);
        assert_eq!(cursor.last_block_number, -1);
        assert_eq!(cursor.last_confirmed_block_number, -1);
        assert!(cursor.latest_block_hash.is_none());
    }

    /// These exercise real SQL against Postgres; run with:
    /// `DATABASE_URL=... cargo test -p ethindex-sync --test cursor -- --ignored`
    #[sqlx::test]
    #[ignore]
    async fn ensure_fails_when_no_unowned_addresses_remain(pool: sqlx::PgPool) {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync (syncid TEXT PRIMARY KEY, last_block_number BIGINT, \
             last_confirmed_block_number BIGINT, latest_block_hash TEXT, addresses TEXT[])",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut tx = pool.begin().await.unwrap();
        CursorStore::ensure(&mut tx, "main", -1, &["0xabc".to_string()])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let result = CursorStore::ensure(&mut tx, "other", -1, &["0xabc".to_string()]).await;
        assert!(matches!(result, Err(SyncError::NoAbisAvailable { .. })));
    }
}
