//! Electrum Protocol Client
//!
//! `BitcoinNode` over an Electrum server. The underlying client is blocking,
//! so every operation opens a fresh connection on a blocking thread, runs,
//! and drops the connection before returning, on success and error alike.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Txid};
use electrum_client::{Client, ConfigBuilder, ElectrumApi, Param};
use serde::{Deserialize, Serialize};

use super::node::{Balance, BitcoinNode, MerkleBranch, NodeError, VerboseTx};
use crate::types::Utxo;

/// Socket timeout for a single Electrum call
const TIMEOUT_SECS: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectrumProtocol {
    Tcp,
    Ssl,
}

impl fmt::Display for ElectrumProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectrumProtocol::Tcp => write!(f, "tcp"),
            ElectrumProtocol::Ssl => write!(f, "ssl"),
        }
    }
}

impl FromStr for ElectrumProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(ElectrumProtocol::Tcp),
            "ssl" | "tls" => Ok(ElectrumProtocol::Ssl),
            _ => Err(format!("unknown electrum protocol: {}", s)),
        }
    }
}

/// Electrum server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectrumConfig {
    pub host: String,
    pub port: u16,
    pub protocol: ElectrumProtocol,
}

impl ElectrumConfig {
    pub fn new(host: impl Into<String>, port: u16, protocol: ElectrumProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }

    /// `ssl://host:port` or `tcp://host:port`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Electrum-backed Bitcoin node
#[derive(Debug, Clone)]
pub struct ElectrumNode {
    config: ElectrumConfig,
}

impl ElectrumNode {
    pub fn new(config: ElectrumConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ElectrumConfig {
        &self.config
    }

    /// Run `f` against a freshly connected client on a blocking thread
    async fn with_client<F, R>(&self, f: F) -> Result<R, NodeError>
    where
        F: FnOnce(&Client) -> Result<R, electrum_client::Error> + Send + 'static,
        R: Send + 'static,
    {
        let url = self.config.url();
        tokio::task::spawn_blocking(move || {
            // public servers commonly present self-signed certificates
            let config = ConfigBuilder::new()
                .validate_domain(false)
                .timeout(Some(TIMEOUT_SECS))
                .build();
            let client = Client::from_config(&url, config)
                .map_err(|e| NodeError::Connection(format!("{}: {}", url, e)))?;
            f(&client).map_err(map_electrum_error)
        })
        .await
        .map_err(|e| NodeError::Task(e.to_string()))?
    }
}

fn map_electrum_error(error: electrum_client::Error) -> NodeError {
    match error {
        electrum_client::Error::Protocol(value) => NodeError::Rpc(protocol_message(&value)),
        other => NodeError::Connection(other.to_string()),
    }
}

/// Extract the human-readable part of a JSON-RPC error object
fn protocol_message(value: &serde_json::Value) -> String {
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| value.as_str().map(str::to_string))
        .unwrap_or_else(|| value.to_string())
}

#[async_trait]
impl BitcoinNode for ElectrumNode {
    async fn list_unspent(&self, script: &ScriptBuf) -> Result<Vec<Utxo>, NodeError> {
        let script = script.clone();
        self.with_client(move |client| {
            let unspents = client.script_list_unspent(&script)?;
            let mut utxos = Vec::with_capacity(unspents.len());
            for unspent in unspents {
                let raw = client.transaction_get_raw(&unspent.tx_hash)?;
                utxos.push(Utxo {
                    txid: unspent.tx_hash.to_string(),
                    vout: unspent.tx_pos as u32,
                    value_sats: unspent.value,
                    raw_tx_hex: hex::encode(raw),
                });
            }
            Ok(utxos)
        })
        .await
    }

    async fn estimate_fee(&self, target_blocks: usize) -> Result<f64, NodeError> {
        self.with_client(move |client| client.estimate_fee(target_blocks))
            .await
    }

    async fn transaction_raw(&self, txid: &Txid) -> Result<Vec<u8>, NodeError> {
        let txid = *txid;
        self.with_client(move |client| client.transaction_get_raw(&txid))
            .await
    }

    async fn transaction_verbose(&self, txid: &Txid) -> Result<VerboseTx, NodeError> {
        let txid = *txid;
        let value = self
            .with_client(move |client| {
                client.raw_call(
                    "blockchain.transaction.get",
                    vec![Param::String(txid.to_string()), Param::Bool(true)],
                )
            })
            .await?;
        serde_json::from_value(value).map_err(|e| NodeError::InvalidResponse(e.to_string()))
    }

    async fn transaction_merkle(
        &self,
        txid: &Txid,
        height: u64,
    ) -> Result<MerkleBranch, NodeError> {
        let txid = *txid;
        let res = self
            .with_client(move |client| client.transaction_get_merkle(&txid, height as usize))
            .await?;
        Ok(MerkleBranch {
            block_height: res.block_height as u64,
            pos: res.pos as u64,
            merkle: res.merkle.iter().map(hex::encode).collect(),
        })
    }

    async fn block_header_raw(&self, height: u64) -> Result<Vec<u8>, NodeError> {
        self.with_client(move |client| client.block_header_raw(height as usize))
            .await
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, NodeError> {
        let raw = raw_tx.to_vec();
        self.with_client(move |client| client.transaction_broadcast_raw(&raw))
            .await
    }

    async fn balance(&self, script: &ScriptBuf) -> Result<Balance, NodeError> {
        let script = script.clone();
        let res = self
            .with_client(move |client| client.script_get_balance(&script))
            .await?;
        Ok(Balance {
            confirmed: res.confirmed,
            unconfirmed: res.unconfirmed,
        })
    }

    async fn tip_height(&self) -> Result<u64, NodeError> {
        let header = self
            .with_client(|client| client.block_headers_subscribe())
            .await?;
        Ok(header.height as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let config = ElectrumConfig::new("blackie.c3-soft.com", 57006, ElectrumProtocol::Ssl);
        assert_eq!(config.url(), "ssl://blackie.c3-soft.com:57006");

        let local = ElectrumConfig::new("localhost", 50001, ElectrumProtocol::Tcp);
        assert_eq!(local.url(), "tcp://localhost:50001");
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("SSL".parse::<ElectrumProtocol>(), Ok(ElectrumProtocol::Ssl));
        assert_eq!("tcp".parse::<ElectrumProtocol>(), Ok(ElectrumProtocol::Tcp));
        assert!("udp".parse::<ElectrumProtocol>().is_err());
    }

    #[test]
    fn test_protocol_message() {
        let obj = serde_json::json!({"code": 1, "message": "Transaction already in block chain"});
        assert_eq!(protocol_message(&obj), "Transaction already in block chain");

        let s = serde_json::json!("bad-txns-inputs-missingorspent");
        assert_eq!(protocol_message(&s), "bad-txns-inputs-missingorspent");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let node = ElectrumNode::new(ElectrumConfig::new("127.0.0.1", 1, ElectrumProtocol::Tcp));
        let err = node.tip_height().await.unwrap_err();
        assert!(matches!(err, NodeError::Connection(_)));
    }
}
