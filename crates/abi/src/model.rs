use std::collections::BTreeMap;

use serde_json::Value;

/// Decoded event arguments, keyed by ABI parameter name.
///
/// A `BTreeMap` rather than a `HashMap` so that `args` serializes
/// deterministically — useful both for the `args` JSONB column and for the
/// set-difference comparisons in the graph feed projector.
pub type Args = BTreeMap<String, Value>;

/// A decoded contract log, identified by
/// `(transaction_hash, address, block_hash, transaction_index, log_index)`
/// per the data model.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub args: Args,
    pub address: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    pub timestamp: Option<i64>,
    /// The raw log this event was decoded from. Only ever `Some` for events
    /// coming straight out of the fetcher; events rehydrated from the
    /// database (e.g. while searching for a replacing graph update) have no
    /// raw log to attach, so equality below deliberately ignores this field
    /// rather than comparing the whole record.
    pub raw_log: Option<alloy::rpc::types::Log>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.address == other.address
            && self.block_number == other.block_number
            && self.block_hash == other.block_hash
            && self.transaction_hash == other.transaction_hash
            && self.transaction_index == other.transaction_index
            && self.log_index == other.log_index
            && self.args == other.args
            && self.timestamp == other.timestamp
    }
}

impl Eq for Event {}

/// An append-only graph feed entry: either a forward event (new state) or a
/// compensating record emitted when a previously-observed event is no
/// longer present on the canonical chain.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphUpdate {
    pub name: String,
    pub args: Args,
    pub address: String,
    pub timestamp: Option<i64>,
}

impl GraphUpdate {
    pub fn from_event(event: &Event) -> Self {
        Self {
            name: event.name.clone(),
            args: event.args.clone(),
            address: event.address.clone(),
            timestamp: event.timestamp,
        }
    }
}
