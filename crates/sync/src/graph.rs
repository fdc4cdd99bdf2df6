//! Graph Feed Projector: diffs consecutive unfinalized event snapshots and
//! emits compensating updates for events that vanish because of a reorg.

use ethindex_abi::{Args, Event, GraphUpdate};
use ethindex_common::error::SyncError;
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};

const BALANCE_UPDATE: &str = "BalanceUpdate";
const TRUSTLINE_UPDATE: &str = "TrustlineUpdate";

pub struct GraphFeedProjector;

impl GraphFeedProjector {
    /// Append feed rows to `graphfeed`, in the order supplied — callers pass
    /// `added` before the compensating updates, per the ordering rule.
    pub async fn insert_updates(
        tx: &mut Transaction<'_, Postgres>,
        updates: &[GraphUpdate],
    ) -> Result<(), SyncError> {
        for update in updates {
            sqlx::query(
                "INSERT INTO graphfeed (address, event_name, args, timestamp) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&update.address)
            .bind(&update.name)
            .bind(sqlx::types::Json(&update.args))
            .bind(update.timestamp)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Keep only the events a graph feed cares about.
    pub fn filter_events_for_graph(events: &[Event]) -> Vec<Event> {
        events
            .iter()
            .filter(|e| e.name == BALANCE_UPDATE || e.name == TRUSTLINE_UPDATE)
            .cloned()
            .collect()
    }

    /// Diff `prev_unfinalized` against this round's graph-relevant events
    /// and produce the feed rows to append, plus the new unfinalized
    /// snapshot to carry into the next round.
    ///
    /// `e_new` must already be filtered to graph-relevant events (see
    /// [`Self::filter_events_for_graph`]).
    pub async fn project(
        tx: &mut Transaction<'_, Postgres>,
        prev_unfinalized: &[Event],
        new_confirmed_block_number: i64,
        e_new: Vec<Event>,
    ) -> Result<(Vec<GraphUpdate>, Vec<Event>), SyncError> {
        let u_prev: Vec<Event> = prev_unfinalized
            .iter()
            .filter(|e| e.block_number as i64 > new_confirmed_block_number)
            .cloned()
            .collect();

        let missing: Vec<Event> = u_prev
            .iter()
            .filter(|e| !e_new.contains(e))
            .cloned()
            .collect();
        let added: Vec<Event> = e_new
            .iter()
            .filter(|e| !u_prev.contains(e))
            .cloned()
            .collect();

        let mut updates: Vec<GraphUpdate> = added.iter().map(GraphUpdate::from_event).collect();
        for event in &missing {
            updates.push(Self::find_replacing_graph_update_for_missing(tx, event).await?);
        }

        Ok((updates, e_new))
    }

    /// Mirrors `find_replacing_graph_update_for_missing` in the source
    /// implementation exactly, including its ordering
    /// (`block_number, transaction_index, log_index DESC LIMIT 1`) —
    /// literally "the first row in that order", not "the most recent before
    /// `event`": there is no additional lower bound in the WHERE clause.
    async fn find_replacing_graph_update_for_missing(
        tx: &mut Transaction<'_, Postgres>,
        event: &Event,
    ) -> Result<GraphUpdate, SyncError> {
        let (from_key, to_key) = participant_keys(&event.name)?;
        let from_value = arg_str(&event.args, from_key)?;
        let to_value = arg_str(&event.args, to_key)?;

        let row: Option<(String, Value, String, Option<i64>)> = sqlx::query_as(&format!(
            "SELECT address, args, event_name, timestamp FROM events \
             WHERE ((args->>'{from_key}' = $1 AND args->>'{to_key}' = $2) OR \
                    (args->>'{from_key}' = $2 AND args->>'{to_key}' = $1)) \
               AND event_name = $3 AND address = $4 \
             ORDER BY block_number, transaction_index, log_index DESC \
             LIMIT 1"
        ))
        .bind(&from_value)
        .bind(&to_value)
        .bind(&event.name)
        .bind(&event.address)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some((address, args, name, timestamp)) => {
                let args: Args = serde_json::from_value(args)
                    .map_err(|e| SyncError::InvariantViolation(e.to_string()))?;
                Ok(GraphUpdate {
                    name,
                    args,
                    address,
                    timestamp,
                })
            }
            None => Ok(null_replacing_graph_update(event)?),
        }
    }
}

fn participant_keys(event_name: &str) -> Result<(&'static str, &'static str), SyncError> {
    match event_name {
        BALANCE_UPDATE => Ok(("_from", "_to")),
        TRUSTLINE_UPDATE => Ok(("_creditor", "_debtor")),
        other => Err(SyncError::InvariantViolation(format!(
            "tried to find previous event for unexpected event type {other}"
        ))),
    }
}

fn arg_str(args: &Args, key: &str) -> Result<String, SyncError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            SyncError::InvariantViolation(format!("missing or non-string arg '{key}'"))
        })
}

/// The compensating update emitted when no prior state can be found for a
/// reorged-out event: zeroes the value (BalanceUpdate) or the trustline
/// terms and unfreezes it (TrustlineUpdate).
fn null_replacing_graph_update(event: &Event) -> Result<GraphUpdate, SyncError> {
    let args: Args = match event.name.as_str() {
        BALANCE_UPDATE => {
            let mut args = event.args.clone();
            args.insert("_value".to_string(), json!("0"));
            args
        }
        TRUSTLINE_UPDATE => {
            let mut args = Args::new();
            args.insert("_creditor".to_string(), arg_value(event, "_creditor")?);
            args.insert("_debtor".to_string(), arg_value(event, "_debtor")?);
            args.insert("_creditlineGiven".to_string(), json!("0"));
            args.insert("_creditlineReceived".to_string(), json!("0"));
            args.insert("_interestRateGiven".to_string(), json!("0"));
            args.insert("_interestRateReceived".to_string(), json!("0"));
            args.insert("_isFrozen".to_string(), json!(false));
            args
        }
        other => {
            return Err(SyncError::InvariantViolation(format!(
                "tried to compute null graph update for unexpected event type {other}"
            )))
        }
    };

    Ok(GraphUpdate {
        name: event.name.clone(),
        args,
        address: event.address.clone(),
        timestamp: event.timestamp,
    })
}

fn arg_value(event: &Event, key: &str) -> Result<Value, SyncError> {
    event
        .args
        .get(key)
        .cloned()
        .ok_or_else(|| SyncError::InvariantViolation(format!("missing arg '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance_update(
        block_number: u64,
        log_index: u64,
        from: &str,
        to: &str,
        value: &str,
    ) -> Event {
        let mut args = Args::new();
        args.insert("_from".to_string(), json!(from));
        args.insert("_to".to_string(), json!(to));
        args.insert("_value".to_string(), json!(value));
        Event {
            name: BALANCE_UPDATE.to_string(),
            args,
            address: "0xC0FFEE0000000000000000000000000000C0FFEE".to_string(),
            transaction_hash: format!("0x{block_number:064x}"),
            block_number,
            block_hash: format!("0x{block_number:064x}"),
            transaction_index: 0,
            log_index,
            timestamp: Some(1_000),
            raw_log: None,
        }
    }

    #[test]
    fn filter_keeps_only_graph_relevant_events() {
        let mut trustline = balance_update(1, 0, "a", "b", "1");
        trustline.name = TRUSTLINE_UPDATE.to_string();
        let other = {
            let mut e = balance_update(1, 1, "a", "b", "1");
            e.name = "Transfer".to_string();
            e
        };
        let events = vec![balance_update(1, 0, "a", "b", "1"), trustline, other];
        let filtered = GraphFeedProjector::filter_events_for_graph(&events);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn null_update_zeroes_balance_value() {
        let event = balance_update(1, 0, "a", "b", "10");
        let update = null_replacing_graph_update(&event).unwrap();
        assert_eq!(update.args["_value"], json!("0"));
        assert_eq!(update.args["_from"], json!("a"));
    }

    #[test]
    fn null_update_unfreezes_trustline() {
        let mut args = Args::new();
        args.insert("_creditor".to_string(), json!("a"));
        args.insert("_debtor".to_string(), json!("b"));
        let event = Event {
            name: TRUSTLINE_UPDATE.to_string(),
            args,
            address: "0xC0FFEE0000000000000000000000000000C0FFEE".to_string(),
            transaction_hash: "0x1".to_string(),
            block_number: 1,
            block_hash: "0x1".to_string(),
            transaction_index: 0,
            log_index: 0,
            timestamp: Some(1),
            raw_log: None,
        };
        let update = null_replacing_graph_update(&event).unwrap();
        assert_eq!(update.args["_isFrozen"], json!(false));
        assert_eq!(update.args["_creditlineGiven"], json!("0"));
    }
}
