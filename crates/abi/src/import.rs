//! Mapping rule from `addresses.json` + `contracts.json` to an
//! address-to-ABI dictionary, ready for `AbiRegistry::import`.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::Deserialize;
use serde_json::Value;

/// Shape of `addresses.json`.
#[derive(Debug, Deserialize)]
pub struct AddressesFile {
    pub networks: Vec<String>,
    #[serde(rename = "unwEth")]
    pub unw_eth: Option<String>,
    pub exchange: Option<String>,
}

/// Shape of `contracts.json`: contract name -> `{ abi, bytecode? }`.
pub type ContractsFile = HashMap<String, Value>;

/// Every element of `networks` is assigned the `CurrencyNetworkOwnable`
/// ABI; `unwEth`/`exchange`, if present, map to their namesake ABIs.
pub fn build_address_to_abi(
    addresses: &AddressesFile,
    contracts: &ContractsFile,
) -> anyhow::Result<HashMap<Address, Value>> {
    let mut result = HashMap::new();

    let abi_for = |name: &str| -> anyhow::Result<Value> {
        contracts
            .get(name)
            .and_then(|contract| contract.get("abi"))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("contract '{name}' missing from contracts file"))
    };

    let currency_network_abi = abi_for("CurrencyNetworkOwnable")?;
    for network in &addresses.networks {
        result.insert(Address::from_str(network)?, currency_network_abi.clone());
    }

    if let Some(unw_eth) = &addresses.unw_eth {
        result.insert(Address::from_str(unw_eth)?, abi_for("UnwEth")?);
    }

    if let Some(exchange) = &addresses.exchange {
        result.insert(Address::from_str(exchange)?, abi_for("Exchange")?);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_networks_to_currency_network_ownable() {
        let addresses = AddressesFile {
            networks: vec!["0x0000000000000000000000000000000000000001".to_string()],
            unw_eth: None,
            exchange: None,
        };
        let mut contracts = ContractsFile::new();
        contracts.insert(
            "CurrencyNetworkOwnable".to_string(),
            json!({ "abi": [] , "bytecode": "0x"}),
        );

        let result = build_address_to_abi(&addresses, &contracts).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn maps_unweth_and_exchange_to_namesake_abis() {
        let addresses = AddressesFile {
            networks: vec![],
            unw_eth: Some("0x0000000000000000000000000000000000000002".to_string()),
            exchange: Some("0x0000000000000000000000000000000000000003".to_string()),
        };
        let mut contracts = ContractsFile::new();
        contracts.insert("UnwEth".to_string(), json!({ "abi": [{"type": "fallback"}] }));
        contracts.insert("Exchange".to_string(), json!({ "abi": [{"type": "fallback"}] }));

        let result = build_address_to_abi(&addresses, &contracts).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn errors_when_currency_network_abi_missing() {
        let addresses = AddressesFile {
            networks: vec!["0x0000000000000000000000000000000000000001".to_string()],
            unw_eth: None,
            exchange: None,
        };
        let contracts = ContractsFile::new();

        assert!(build_address_to_abi(&addresses, &contracts).is_err());
    }
}
