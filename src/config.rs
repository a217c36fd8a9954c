//! Environment-based Configuration
//!
//! All key material comes from the environment (optionally via a `.env`
//! file), never from hardcoded values.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SUPPLIER_NETWORK` - "mainnet", "testnet" or "mocknet"
//! - `SUPPLIER_BTC_KEY` - WIF-encoded Bitcoin key of the operator wallet
//! - `SUPPLIER_STX_KEY` - hex Stacks key (64 chars, or 66 with trailing `01`)
//! - `SUPPLIER_ID` - supplier id registered in the bridge contract
//!
//! ## Optional
//! - `SUPPLIER_CONTRACT_ADDRESS` - bridge deployer (required off mocknet)
//! - `STACKS_API_URL` - Stacks node / API base URL
//! - `ELECTRUM_HOST`, `ELECTRUM_PORT`, `ELECTRUM_PROTOCOL` - Electrum server
//! - `SUPPLIER_DB_PATH` - SQLite file (default `data/supplier-<network>.db`)
//! - `SUPPLIER_LOG_LEVEL` - debug, info, warn, error (default: info)
//! - `SUPPLIER_MAX_TX_SIZE` - largest BTC transaction to broadcast, in bytes
//! - `SUPPLIER_STX_TX_FEE` - fee for settlement transactions, in micro-STX
//!
//! Legacy `OPERATOR_*` names are accepted wherever a `SUPPLIER_*` name is.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::btc::{ElectrumConfig, ElectrumProtocol, OperatorWallet};
use crate::stacks::{self, c32, StacksKey, TransactionVersion};

/// Default bridge deployer on a local devnet
pub const MOCKNET_CONTRACT_ADDRESS: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";

pub const DEFAULT_MAX_TX_SIZE: usize = 10_000;
pub const DEFAULT_STX_TX_FEE: u64 = 10_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("key mismatch: {0}")]
    KeyMismatch(String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Mocknet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "mocknet" => Ok(Network::Mocknet),
            _ => Err(ConfigError::InvalidValue(
                "SUPPLIER_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Mocknet => write!(f, "mocknet"),
        }
    }
}

impl Network {
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Mocknet => bitcoin::Network::Regtest,
        }
    }

    pub fn transaction_version(&self) -> TransactionVersion {
        match self {
            Network::Mainnet => TransactionVersion::Mainnet,
            Network::Testnet | Network::Mocknet => TransactionVersion::Testnet,
        }
    }

    /// Prefix of every durable key
    pub fn store_prefix(&self) -> String {
        format!("swapy-{}", self)
    }

    pub fn default_stacks_api(&self) -> &'static str {
        match self {
            Network::Mainnet => stacks::api::MAINNET_URL,
            Network::Testnet => stacks::api::TESTNET_URL,
            Network::Mocknet => stacks::api::MOCKNET_URL,
        }
    }

    pub fn default_electrum(&self) -> ElectrumConfig {
        match self {
            Network::Mainnet => ElectrumConfig::new("fortress.qtornado.com", 443, ElectrumProtocol::Ssl),
            Network::Testnet => ElectrumConfig::new("blackie.c3-soft.com", 57006, ElectrumProtocol::Ssl),
            Network::Mocknet => ElectrumConfig::new("localhost", 50001, ElectrumProtocol::Tcp),
        }
    }

    /// JSON logs on mainnet, pretty output elsewhere
    pub fn json_logs(&self) -> bool {
        matches!(self, Network::Mainnet)
    }
}

/// Main configuration struct
#[derive(Clone)]
pub struct SupplierConfig {
    pub network: Network,

    /// WIF key of the operator BTC wallet
    pub btc_key: String,

    /// Hex key of the operator Stacks account
    pub stx_key: String,

    pub supplier_id: u64,

    /// Bridge deployer address
    pub contract_address: String,

    pub stacks_api_url: String,

    pub electrum: ElectrumConfig,

    pub db_path: String,

    pub log_level: String,

    pub max_tx_size: usize,

    /// Fee for settlement transactions, in micro-STX
    pub stx_tx_fee: u64,
}

impl fmt::Debug for SupplierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupplierConfig")
            .field("network", &self.network)
            .field("supplier_id", &self.supplier_id)
            .field("contract_address", &self.contract_address)
            .field("stacks_api_url", &self.stacks_api_url)
            .field("electrum", &self.electrum)
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

/// Environment lookup with the legacy `OPERATOR_*` alias
fn lookup<F>(get: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = get(key).or_else(|| {
        key.strip_prefix("SUPPLIER_")
            .and_then(|rest| get(&format!("OPERATOR_{}", rest)))
    });
    value.filter(|v| !v.trim().is_empty())
}

fn required<F>(get: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(get, key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<F, T>(get: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(get, key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), v.clone())),
        None => Ok(default),
    }
}

impl SupplierConfig {
    /// Load configuration from the process environment (after `.env`)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a fixed set of variables
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network: Network = required(&get, "SUPPLIER_NETWORK")?.parse()?;
        let btc_key = required(&get, "SUPPLIER_BTC_KEY")?;
        let stx_key = required(&get, "SUPPLIER_STX_KEY")?;
        let supplier_id: u64 = {
            let raw = required(&get, "SUPPLIER_ID")?;
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SUPPLIER_ID".to_string(), raw.clone()))?
        };

        let contract_address = match lookup(&get, "SUPPLIER_CONTRACT_ADDRESS") {
            Some(address) => address,
            None if network == Network::Mocknet => MOCKNET_CONTRACT_ADDRESS.to_string(),
            None => return Err(ConfigError::MissingEnvVar("SUPPLIER_CONTRACT_ADDRESS".to_string())),
        };
        c32::decode_address(&contract_address).map_err(|e| {
            ConfigError::InvalidValue("SUPPLIER_CONTRACT_ADDRESS".to_string(), e.to_string())
        })?;

        let stacks_api_url = lookup(&get, "STACKS_API_URL")
            .unwrap_or_else(|| network.default_stacks_api().to_string());

        let defaults = network.default_electrum();
        let electrum = ElectrumConfig {
            host: lookup(&get, "ELECTRUM_HOST").unwrap_or(defaults.host),
            port: parsed(&get, "ELECTRUM_PORT", defaults.port)?,
            protocol: match lookup(&get, "ELECTRUM_PROTOCOL") {
                Some(p) => p
                    .parse()
                    .map_err(|e: String| ConfigError::InvalidValue("ELECTRUM_PROTOCOL".to_string(), e))?,
                None => defaults.protocol,
            },
        };

        let db_path = lookup(&get, "SUPPLIER_DB_PATH")
            .unwrap_or_else(|| format!("data/supplier-{}.db", network));
        let log_level = lookup(&get, "SUPPLIER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let max_tx_size = parsed(&get, "SUPPLIER_MAX_TX_SIZE", DEFAULT_MAX_TX_SIZE)?;
        let stx_tx_fee = parsed(&get, "SUPPLIER_STX_TX_FEE", DEFAULT_STX_TX_FEE)?;

        let config = Self {
            network,
            btc_key,
            stx_key,
            supplier_id,
            contract_address,
            stacks_api_url,
            electrum,
            db_path,
            log_level,
            max_tx_size,
            stx_tx_fee,
        };

        // fail fast on unusable keys
        config.operator_wallet()?;
        config.stacks_key()?;
        Ok(config)
    }

    /// Operator Bitcoin wallet; the WIF must be for the configured network
    pub fn operator_wallet(&self) -> Result<OperatorWallet, ConfigError> {
        OperatorWallet::from_wif(&self.btc_key, self.network.bitcoin_network())
            .map_err(|e| ConfigError::InvalidValue("SUPPLIER_BTC_KEY".to_string(), e.to_string()))
    }

    pub fn stacks_key(&self) -> Result<StacksKey, ConfigError> {
        StacksKey::from_hex(&self.stx_key)
            .map_err(|e| ConfigError::InvalidValue("SUPPLIER_STX_KEY".to_string(), e.to_string()))
    }

    pub fn btc_address(&self) -> Result<String, ConfigError> {
        Ok(self.operator_wallet()?.address().to_string())
    }

    pub fn stx_address(&self) -> Result<String, ConfigError> {
        self.stacks_key()?
            .address(self.network.transaction_version())
            .map_err(|e| ConfigError::InvalidValue("SUPPLIER_STX_KEY".to_string(), e.to_string()))
    }

    /// Settlement-chain client settings
    pub fn stacks_api_config(&self) -> stacks::StacksApiConfig {
        let mut api = stacks::StacksApiConfig::new(
            &self.stacks_api_url,
            &self.contract_address,
            self.network.transaction_version(),
        );
        api.tx_fee = self.stx_tx_fee;
        api
    }

    /// Configuration summary without key material
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "network": self.network.to_string(),
            "supplier_id": self.supplier_id,
            "btc_address": self.btc_address().ok(),
            "stx_address": self.stx_address().ok(),
            "contract": format!("{}.{}", self.contract_address, stacks::BRIDGE_CONTRACT),
            "stacks_api": self.stacks_api_url,
            "electrum": self.electrum.url(),
            "db_path": self.db_path,
            "max_tx_size": self.max_tx_size,
            "stx_tx_fee": self.stx_tx_fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::signer::tests::test_wallet;

    const STX_KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = [
            ("SUPPLIER_NETWORK", "testnet"),
            ("SUPPLIER_BTC_KEY", ""),
            ("SUPPLIER_STX_KEY", STX_KEY),
            ("SUPPLIER_ID", "3"),
            ("SUPPLIER_CONTRACT_ADDRESS", MOCKNET_CONTRACT_ADDRESS),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        map.insert("SUPPLIER_BTC_KEY".to_string(), test_wallet().to_wif());
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        map
    }

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("Testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("mocknet".parse::<Network>().unwrap(), Network::Mocknet);
        assert!("devnet".parse::<Network>().is_err());
        assert_eq!(Network::Testnet.store_prefix(), "swapy-testnet");
    }

    #[test]
    fn test_loads_with_defaults() {
        let config = SupplierConfig::from_vars(&vars(&[])).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.supplier_id, 3);
        assert_eq!(config.electrum.host, "blackie.c3-soft.com");
        assert_eq!(config.electrum.port, 57006);
        assert_eq!(config.db_path, "data/supplier-testnet.db");
        assert_eq!(config.max_tx_size, DEFAULT_MAX_TX_SIZE);
        assert!(config.stx_address().unwrap().starts_with("ST"));
    }

    #[test]
    fn test_legacy_operator_names() {
        let mut map = vars(&[]);
        let id = map.remove("SUPPLIER_ID").unwrap();
        map.insert("OPERATOR_ID".to_string(), id);
        let config = SupplierConfig::from_vars(&map).unwrap();
        assert_eq!(config.supplier_id, 3);
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let mut map = vars(&[]);
        map.remove("SUPPLIER_STX_KEY");
        assert!(matches!(
            SupplierConfig::from_vars(&map),
            Err(ConfigError::MissingEnvVar(k)) if k == "SUPPLIER_STX_KEY"
        ));

        assert!(matches!(
            SupplierConfig::from_vars(&vars(&[("SUPPLIER_ID", "abc")])),
            Err(ConfigError::InvalidValue(..))
        ));
        assert!(matches!(
            SupplierConfig::from_vars(&vars(&[("ELECTRUM_PROTOCOL", "udp")])),
            Err(ConfigError::InvalidValue(..))
        ));
        // testnet WIF on mainnet
        assert!(SupplierConfig::from_vars(&vars(&[("SUPPLIER_NETWORK", "mainnet")])).is_err());
    }

    #[test]
    fn test_contract_address_required_off_mocknet() {
        let mut map = vars(&[]);
        map.remove("SUPPLIER_CONTRACT_ADDRESS");
        assert!(SupplierConfig::from_vars(&map).is_err());

        map.insert("SUPPLIER_NETWORK".to_string(), "mocknet".to_string());
        let config = SupplierConfig::from_vars(&map).unwrap();
        assert_eq!(config.contract_address, MOCKNET_CONTRACT_ADDRESS);
        assert_eq!(config.electrum.protocol, ElectrumProtocol::Tcp);
    }

    #[test]
    fn test_summary_hides_keys() {
        let config = SupplierConfig::from_vars(&vars(&[])).unwrap();
        let summary = config.summary().to_string();
        assert!(!summary.contains(STX_KEY));
        assert!(!summary.contains(&config.btc_key));
        assert!(!format!("{:?}", config).contains(STX_KEY));
    }
}
