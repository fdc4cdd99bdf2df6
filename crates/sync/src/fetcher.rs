//! Reorg-Aware Fetcher: pull logs in a bounded range, decode, and verify
//! every event's `block_hash` against a freshly-fetched header before
//! trusting it.

use std::collections::{HashMap, HashSet};

use alloy::primitives::Address;
use ethindex_abi::{Event, LogDecoder};
use ethindex_common::error::SyncError;

use crate::chain::ChainClient;

pub struct Fetcher<'a, C> {
    client: &'a C,
}

impl<'a, C: ChainClient> Fetcher<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Fetch and decode every event in `[from, to]` for `addresses`,
    /// verifying block-hash agreement across the whole batch.
    ///
    /// Returns `SyncError::ChainReorgMidFetch` if any decoded event's
    /// recorded block hash disagrees with the header fetched for that same
    /// block number within this call — i.e. the chain moved under us while
    /// fetching.
    pub async fn fetch(
        &self,
        addresses: &[Address],
        from: u64,
        to: u64,
        decoder: &LogDecoder,
    ) -> Result<Vec<Event>, SyncError> {
        let logs = self
            .client
            .get_logs(from, to, addresses)
            .await
            .map_err(SyncError::Rpc)?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = decoder.decode(log).map_err(SyncError::Rpc)? {
                events.push(event);
            }
        }

        let block_numbers: HashSet<u64> = events.iter().map(|e| e.block_number).collect();
        let mut headers = HashMap::with_capacity(block_numbers.len());
        for block_number in block_numbers {
            let header = self
                .client
                .get_block_header(block_number)
                .await
                .map_err(SyncError::Rpc)?
                .ok_or_else(|| {
                    SyncError::InvariantViolation(format!(
                        "block {block_number} disappeared between getLogs and getBlockByNumber"
                    ))
                })?;
            headers.insert(block_number, header);
        }

        for event in &mut events {
            let header = headers
                .get(&event.block_number)
                .expect("header fetched for every block number present in events");
            let header_hash = format!("{:#x}", header.hash);
            if header_hash != event.block_hash {
                return Err(SyncError::ChainReorgMidFetch {
                    block: event.block_number,
                });
            }
            event.timestamp = Some(header.timestamp as i64);
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockHeader;
    use alloy::primitives::{keccak256, Bytes, Log as PrimLog, LogData, B256};
    use ethindex_abi::AbiRecord;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeClient {
        logs: Vec<alloy::rpc::types::Log>,
        headers: Mutex<HashMap<u64, BlockHeader>>,
    }

    impl ChainClient for FakeClient {
        async fn get_logs(
            &self,
            _from: u64,
            _to: u64,
            _addresses: &[Address],
        ) -> anyhow::Result<Vec<alloy::rpc::types::Log>> {
            Ok(self.logs.clone())
        }

        async fn get_block_header(&self, number: u64) -> anyhow::Result<Option<BlockHeader>> {
            Ok(self.headers.lock().unwrap().get(&number).copied())
        }

        async fn get_latest_block_header(&self) -> anyhow::Result<BlockHeader> {
            unimplemented!("not exercised by fetcher tests")
        }
    }

    fn transfer_abi() -> serde_json::Value {
        json!([{
            "type": "event",
            "name": "Transfer",
            "anonymous": false,
            "inputs": [
                {"name": "_value", "type": "uint256", "indexed": false}
            ]
        }])
    }

    fn make_log(address: Address, block_number: u64, block_hash: B256) -> alloy::rpc::types::Log {
        let topic0 = keccak256("Transfer(uint256)");
        let data = alloy::primitives::U256::from(7u64).to_be_bytes::<32>().to_vec();
        let inner = PrimLog {
            address,
            data: LogData::new(vec![topic0], Bytes::from(data)).unwrap(),
        };
        alloy::rpc::types::Log {
            inner,
            block_hash: Some(block_hash),
            block_number: Some(block_number),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0x01)),
            transaction_index: Some(0),
            log_index: Some(0),
            removed: false,
        }
    }

    #[tokio::test]
    async fn attaches_timestamp_when_hashes_agree() {
        let address = Address::repeat_byte(0x42);
        let block_hash = B256::repeat_byte(0xAA);
        let log = make_log(address, 10, block_hash);

        let mut headers = HashMap::new();
        headers.insert(
            10,
            BlockHeader {
                number: 10,
                hash: block_hash,
                timestamp: 1_700_000_000,
            },
        );

        let client = FakeClient {
            logs: vec![log],
            headers: Mutex::new(headers),
        };
        let decoder = LogDecoder::new(&[AbiRecord {
            address: address.to_checksum(None),
            abi: transfer_abi(),
        }])
        .unwrap();

        let fetcher = Fetcher::new(&client);
        let events = fetcher
            .fetch(&[address], 10, 10, &decoder)
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn mismatched_block_hash_is_chain_reorg_mid_fetch() {
        let address = Address::repeat_byte(0x42);
        let log = make_log(address, 10, B256::repeat_byte(0xAA));

        let mut headers = HashMap::new();
        headers.insert(
            10,
            BlockHeader {
                number: 10,
                hash: B256::repeat_byte(0xBB),
                timestamp: 1,
            },
        );

        let client = FakeClient {
            logs: vec![log],
            headers: Mutex::new(headers),
        };
        let decoder = LogDecoder::new(&[AbiRecord {
            address: address.to_checksum(None),
            abi: transfer_abi(),
        }])
        .unwrap();

        let fetcher = Fetcher::new(&client);
        let result = fetcher.fetch(&[address], 10, 10, &decoder).await;

        assert!(matches!(result, Err(SyncError::ChainReorgMidFetch { block: 10 })));
    }
}
