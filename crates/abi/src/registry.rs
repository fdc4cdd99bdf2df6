use std::collections::HashMap;
use std::str::FromStr;

use alloy::primitives::Address;
use serde_json::Value;
use sqlx::PgPool;

/// A stored `AbiRecord { address (PK), abi }` row.
#[derive(Debug, Clone)]
pub struct AbiRecord {
    pub address: String,
    pub abi: Value,
}

/// Persist and retrieve per-address event ABIs.
pub struct AbiRegistry;

impl AbiRegistry {
    /// Insert ABI records, checksumming every address before storage.
    ///
    /// No-op on conflict: an existing record wins so decoding stays
    /// deterministic across restarts (see DESIGN NOTES — ABI replacement).
    /// Use a fresh `AbiRegistry::import` call after manually deleting a row
    /// if a contract's ABI genuinely needs replacing.
    pub async fn import(
        pool: &PgPool,
        address_to_abi: &HashMap<Address, Value>,
    ) -> Result<(), sqlx::Error> {
        for (address, abi) in address_to_abi {
            sqlx::query(
                "INSERT INTO abis (contract_address, abi) VALUES ($1, $2) \
                 ON CONFLICT (contract_address) DO NOTHING",
            )
            .bind(address.to_checksum(None))
            .bind(abi)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Load ABI records, optionally filtered to a set of addresses
    /// (checksummed before lookup — the `abis` table key is always
    /// checksummed hex).
    pub async fn load(
        pool: &PgPool,
        addresses: Option<&[Address]>,
    ) -> Result<Vec<AbiRecord>, sqlx::Error> {
        let rows: Vec<(String, Value)> = match addresses {
            None => {
                sqlx::query_as("SELECT contract_address, abi FROM abis")
                    .fetch_all(pool)
                    .await?
            }
            Some(addrs) => {
                let checksummed: Vec<String> =
                    addrs.iter().map(|a| a.to_checksum(None)).collect();
                sqlx::query_as(
                    "SELECT contract_address, abi FROM abis WHERE contract_address = ANY($1)",
                )
                .bind(&checksummed)
                .fetch_all(pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(address, abi)| AbiRecord { address, abi })
            .collect())
    }

    /// All checksummed addresses currently present in the registry.
    pub async fn all_addresses(pool: &PgPool) -> Result<Vec<Address>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT contract_address FROM abis")
            .fetch_all(pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(a,)| Address::from_str(&a).ok())
            .collect())
    }
}
