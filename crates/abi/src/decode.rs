//! Decode raw contract logs against registered ABIs.
//!
//! Builds a `(address, topic0) -> event descriptor` lookup, where `topic0`
//! comes straight from `alloy_json_abi::Event::selector()` — the library
//! already computes `keccak256(canonical_signature)` for us, so there is no
//! need to hand-assemble signature strings the way a per-protocol decoder
//! would.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::json_abi::{Event as AbiEvent, JsonAbi};
use alloy::primitives::{Address, B256};
use serde_json::Value;

use crate::model::{Args, Event};
use crate::registry::AbiRecord;

/// Lookup table from `(contract address, topic0)` to the event descriptor
/// that decodes it, built from a set of registered ABIs.
pub struct LogDecoder {
    addresses: Vec<Address>,
    index: HashMap<(Address, B256), AbiEvent>,
}

impl LogDecoder {
    /// Build a decoder from the ABI records of the addresses a sync round
    /// currently owns.
    pub fn new(records: &[AbiRecord]) -> anyhow::Result<Self> {
        let mut addresses = Vec::with_capacity(records.len());
        let mut index = HashMap::new();

        for record in records {
            let address = Address::from_str(&record.address)?;
            addresses.push(address);

            let abi: JsonAbi = serde_json::from_value(record.abi.clone())?;
            for event in abi.events.values().flatten() {
                index.insert((address, event.selector()), event.clone());
            }
        }

        Ok(Self { addresses, index })
    }

    /// The addresses this decoder was built from, for use as an
    /// `eth_getLogs` address filter.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Decode a single raw log.
    ///
    /// Returns `Ok(None)` for an `UnknownTopic` (no registered descriptor):
    /// per the design this is not an error, it is logged at `warn` and the
    /// log is skipped.
    pub fn decode(&self, log: &alloy::rpc::types::Log) -> anyhow::Result<Option<Event>> {
        let address = log.inner.address;
        let topics = log.inner.topics();

        let Some(topic0) = topics.first() else {
            return Ok(None);
        };

        let Some(descriptor) = self.index.get(&(address, *topic0)) else {
            tracing::warn!(
                address = %address,
                topic0 = %topic0,
                "no ABI registered for log topic, skipping (UnknownTopic)"
            );
            return Ok(None);
        };

        let mut args: Args = Args::new();

        let indexed_inputs: Vec<_> = descriptor.inputs.iter().filter(|i| i.indexed).collect();
        for (param, topic) in indexed_inputs.iter().zip(topics[1..].iter()) {
            let ty = DynSolType::parse(&param.ty)?;
            let value = if ty.is_dynamic() {
                // Indexed dynamic types (string, bytes, arrays) are hashed
                // into the topic; the original value is not recoverable.
                // Keep the hash itself rather than silently dropping it.
                DynSolValue::FixedBytes(*topic, 32)
            } else {
                ty.abi_decode(topic.as_slice())?
            };
            args.insert(param.name.clone(), dyn_sol_value_to_json(&value));
        }

        let non_indexed: Vec<_> = descriptor.inputs.iter().filter(|i| !i.indexed).collect();
        if !non_indexed.is_empty() {
            let types = non_indexed
                .iter()
                .map(|param| DynSolType::parse(&param.ty))
                .collect::<Result<Vec<_>, _>>()?;
            let decoded = DynSolType::Tuple(types).abi_decode_sequence(&log.inner.data.data)?;
            if let DynSolValue::Tuple(values) = decoded {
                for (param, value) in non_indexed.iter().zip(values.iter()) {
                    args.insert(param.name.clone(), dyn_sol_value_to_json(value));
                }
            }
        }

        Ok(Some(Event {
            name: descriptor.name.clone(),
            args,
            address: address.to_checksum(None),
            transaction_hash: log
                .transaction_hash
                .map(|h| format!("{h:#x}"))
                .unwrap_or_default(),
            block_number: log.block_number.unwrap_or_default(),
            block_hash: log.block_hash.map(|h| format!("{h:#x}")).unwrap_or_default(),
            transaction_index: log.transaction_index.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
            timestamp: None,
            raw_log: Some(log.clone()),
        }))
    }
}

/// Convert a decoded ABI value to JSON.
///
/// `address`-typed values are checksummed; byte arrays become `0x`-prefixed
/// lowercase hex strings, per the design.
fn dyn_sol_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word.as_slice()[..*size])))
        }
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            Value::Array(items.iter().map(dyn_sol_value_to_json).collect())
        }
        DynSolValue::Tuple(items) => Value::Array(items.iter().map(dyn_sol_value_to_json).collect()),
        DynSolValue::CustomStruct { tuple, .. } => {
            Value::Array(tuple.iter().map(dyn_sol_value_to_json).collect())
        }
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{keccak256, Bytes, Log as PrimLog, LogData, U256};
    use serde_json::json;

    fn transfer_abi() -> Value {
        json!([
            {
                "type": "event",
                "name": "Transfer",
                "anonymous": false,
                "inputs": [
                    {"name": "_from", "type": "address", "indexed": true},
                    {"name": "_to", "type": "address", "indexed": true},
                    {"name": "_value", "type": "uint256", "indexed": false}
                ]
            }
        ])
    }

    fn address_topic(address: Address) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[12..32].copy_from_slice(address.as_slice());
        B256::from(bytes)
    }

    fn build_rpc_log(
        address: Address,
        topics: Vec<B256>,
        data: Vec<u8>,
        block_number: u64,
    ) -> alloy::rpc::types::Log {
        let inner = PrimLog {
            address,
            data: LogData::new(topics, Bytes::from(data)).expect("valid log data"),
        };
        alloy::rpc::types::Log {
            inner,
            block_hash: Some(B256::repeat_byte(0xAB)),
            block_number: Some(block_number),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0xCD)),
            transaction_index: Some(0),
            log_index: Some(0),
            removed: false,
        }
    }

    #[test]
    fn decodes_transfer_event_with_checksummed_addresses_and_value() {
        let record = AbiRecord {
            address: "0x0000000000000000000000000000000000001234".to_string(),
            abi: transfer_abi(),
        };
        let decoder = LogDecoder::new(&[record]).unwrap();

        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let topic0 = keccak256("Transfer(address,address,uint256)");
        let data = U256::from(42u64).to_be_bytes::<32>().to_vec();

        let log = build_rpc_log(
            Address::from_str("0x0000000000000000000000000000000000001234").unwrap(),
            vec![topic0, address_topic(from), address_topic(to)],
            data,
            100,
        );

        let event = decoder.decode(&log).unwrap().unwrap();
        assert_eq!(event.name, "Transfer");
        assert_eq!(event.args["_from"], json!(from.to_checksum(None)));
        assert_eq!(event.args["_to"], json!(to.to_checksum(None)));
        assert_eq!(event.args["_value"], json!("42"));
        assert_eq!(event.block_number, 100);
    }

    #[test]
    fn unknown_topic_returns_none() {
        let record = AbiRecord {
            address: "0x0000000000000000000000000000000000001234".to_string(),
            abi: transfer_abi(),
        };
        let decoder = LogDecoder::new(&[record]).unwrap();

        let log = build_rpc_log(
            Address::from_str("0x0000000000000000000000000000000000001234").unwrap(),
            vec![B256::repeat_byte(0x99)],
            vec![],
            100,
        );

        assert!(decoder.decode(&log).unwrap().is_none());
    }

    #[test]
    fn unregistered_address_returns_none() {
        let record = AbiRecord {
            address: "0x0000000000000000000000000000000000001234".to_string(),
            abi: transfer_abi(),
        };
        let decoder = LogDecoder::new(&[record]).unwrap();

        let topic0 = keccak256("Transfer(address,address,uint256)");
        let log = build_rpc_log(Address::repeat_byte(0xFF), vec![topic0], vec![], 100);

        assert!(decoder.decode(&log).unwrap().is_none());
    }
}
