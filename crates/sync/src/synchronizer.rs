//! The driver state machine binding the Cursor Store, Reorg-Aware Fetcher,
//! Event Writer, and Graph Feed Projector into one transactional round, plus
//! the cooperative merge protocol between two syncids.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use ethindex_abi::{AbiRegistry, Event, LogDecoder};
use ethindex_common::error::SyncError;
use sqlx::PgPool;

use crate::chain::ChainClient;
use crate::cursor::CursorStore;
use crate::fetcher::Fetcher;
use crate::graph::GraphFeedProjector;
use crate::writer::EventWriter;

/// Whether a round caught the syncid up to the chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Finished,
    Continue,
}

pub struct Synchronizer<C> {
    client: C,
    pool: PgPool,
    syncid: String,
    required_confirmations: u64,
    blocks_per_round: u64,
    unfinalized_graph_events: Vec<Event>,
    last_fully_synced_block: Option<i64>,
}

impl<C: ChainClient> Synchronizer<C> {
    pub fn new(
        client: C,
        pool: PgPool,
        syncid: impl Into<String>,
        required_confirmations: u64,
        blocks_per_round: u64,
    ) -> Self {
        Self {
            client,
            pool,
            syncid: syncid.into(),
            required_confirmations,
            blocks_per_round,
            unfinalized_graph_events: Vec::new(),
            last_fully_synced_block: None,
        }
    }

    /// The underlying chain client, exposed so tests can mutate a fake
    /// client's state between rounds (e.g. to simulate a reorg).
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run exactly one round of the state machine described in the design
    /// (load cursor, compute range, fetch/decode/write/project, advance
    /// cursor), all inside a single transaction.
    pub async fn sync_round(&mut self) -> Result<RoundOutcome, SyncError> {
        let mut tx = self.pool.begin().await?;

        let cursor = CursorStore::select_for_update(&mut tx, &self.syncid)
            .await?
            .ok_or_else(|| {
                SyncError::InvariantViolation(format!(
                    "sync row '{}' missing at round start",
                    self.syncid
                ))
            })?;

        let abi_addresses = cursor
            .addresses
            .iter()
            .map(|a| Address::from_str(a))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SyncError::InvariantViolation(e.to_string()))?;

        let abi_records = AbiRegistry::load(&self.pool, Some(&abi_addresses)).await?;
        let decoder = LogDecoder::new(&abi_records).map_err(SyncError::Rpc)?;

        let latest = self
            .client
            .get_latest_block_header()
            .await
            .map_err(SyncError::Rpc)?;
        let latest_number = latest.number as i64;
        let latest_hash = format!("{:#x}", latest.hash);

        let from_block = cursor.last_confirmed_block_number + 1;
        let to_block = latest_number.min(cursor.last_confirmed_block_number + self.blocks_per_round as i64);
        let next_confirmed = to_block
            .min(latest_number - self.required_confirmations as i64)
            .max(-1);

        let already_current = cursor.last_block_number == latest_number
            && cursor.latest_block_hash.as_deref() == Some(latest_hash.as_str());

        if from_block > to_block || already_current {
            if self.last_fully_synced_block != Some(to_block) {
                self.last_fully_synced_block = Some(to_block);
                tracing::info!(syncid = %self.syncid, to_block, "already synced up to latest block");
            }
            tx.commit().await?;
            return Ok(RoundOutcome::Finished);
        }

        let fetcher = Fetcher::new(&self.client);
        let events = fetcher
            .fetch(&abi_addresses, from_block as u64, to_block as u64, &decoder)
            .await?;

        tracing::info!(
            syncid = %self.syncid,
            events = events.len(),
            from_block,
            to_block,
            "fetched events for round"
        );

        EventWriter::replace_range(
            &mut tx,
            from_block as u64,
            to_block as u64,
            &cursor.addresses,
            &events,
        )
        .await?;

        let e_new = GraphFeedProjector::filter_events_for_graph(&events);
        let (updates, next_unfinalized) = GraphFeedProjector::project(
            &mut tx,
            &self.unfinalized_graph_events,
            next_confirmed,
            e_new,
        )
        .await?;
        GraphFeedProjector::insert_updates(&mut tx, &updates).await?;

        let mut next_cursor = cursor;
        next_cursor.last_block_number = to_block;
        next_cursor.last_confirmed_block_number = next_confirmed;
        next_cursor.latest_block_hash = Some(latest_hash);
        CursorStore::update(&mut tx, &next_cursor).await?;

        tx.commit().await?;
        self.unfinalized_graph_events = next_unfinalized;

        Ok(RoundOutcome::Continue)
    }

    /// Run rounds until the syncid catches up to the chain tip.
    pub async fn sync_until_current(&mut self) -> Result<(), SyncError> {
        while self.sync_round().await? == RoundOutcome::Continue {}
        Ok(())
    }

    /// Repeat `sync_until_current`, optionally attempt a merge, then sleep
    /// `waittime` — until a merge succeeds (if `merge_with_syncid` is set),
    /// in which case this syncid's row no longer exists and the loop exits.
    pub async fn sync_loop(
        &mut self,
        waittime: Duration,
        merge_with_syncid: Option<&str>,
    ) -> Result<(), SyncError> {
        loop {
            self.sync_until_current().await?;

            if let Some(other) = merge_with_syncid
                && self.try_merge(other).await?
            {
                return Ok(());
            }

            tokio::time::sleep(waittime).await;
        }
    }

    /// Attempt to fold this syncid's addresses into `other_syncid`. Returns
    /// `true` if the merge happened (this syncid's row is now gone).
    pub async fn try_merge(&self, other_syncid: &str) -> Result<bool, SyncError> {
        let mut tx = self.pool.begin().await?;

        let mut rows = CursorStore::select_pair_for_update(&mut tx, other_syncid, &self.syncid).await?;
        let dst_index = rows
            .iter()
            .position(|row| row.syncid == other_syncid)
            .ok_or_else(|| {
                SyncError::InvariantViolation(format!("merge target '{other_syncid}' missing"))
            })?;
        let dst = rows.remove(dst_index);
        let src_index = rows
            .iter()
            .position(|row| row.syncid == self.syncid)
            .ok_or_else(|| {
                SyncError::InvariantViolation(format!("merge source '{}' missing", self.syncid))
            })?;
        let src = rows.remove(src_index);

        let block_diff = dst.last_block_number - src.last_block_number;

        let merged = if block_diff == 0 {
            if dst.latest_block_hash != src.latest_block_hash {
                tracing::info!(
                    syncid = %self.syncid,
                    other = %other_syncid,
                    "cannot merge, the two sync jobs see a different chain view"
                );
                false
            } else {
                tracing::info!(syncid = %self.syncid, other = %other_syncid, "merging sync job into target");
                let mut merged_addresses = dst.addresses.clone();
                merged_addresses.extend(src.addresses.clone());
                sqlx::query("UPDATE sync SET addresses = $1 WHERE syncid = $2")
                    .bind(&merged_addresses)
                    .bind(other_syncid)
                    .execute(&mut *tx)
                    .await?;
                CursorStore::delete(&mut tx, &self.syncid).await?;
                true
            }
        } else if block_diff < 0 {
            tracing::info!(
                syncid = %self.syncid,
                other = %other_syncid,
                blocks_ahead = -block_diff,
                "cannot merge, we are ahead of the merge target"
            );
            false
        } else {
            tracing::info!(
                syncid = %self.syncid,
                other = %other_syncid,
                blocks_behind = block_diff,
                "cannot merge, we are behind the merge target"
            );
            false
        };

        tx.commit().await?;
        Ok(merged)
    }
}
