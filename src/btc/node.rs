//! Bitcoin Node Interface
//!
//! The narrow set of Electrum-protocol calls the settlement engine needs.
//! Every call is one logical operation on its own connection.

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{units, Utxo};

/// Bitcoin node errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("connection failed: {0}")]
    Connection(String),

    /// Error reported by the server itself (e.g. a broadcast rejection)
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("transaction not confirmed: {0}")]
    NotConfirmed(String),

    #[error("task failed: {0}")]
    Task(String),
}

/// Verbose transaction lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerboseTx {
    pub txid: String,
    /// Raw transaction hex
    pub hex: String,
    /// Zero or absent while in the mempool
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub blockhash: Option<String>,
}

impl VerboseTx {
    pub fn confirmations(&self) -> u64 {
        self.confirmations.unwrap_or(0)
    }
}

/// Merkle branch as returned by `blockchain.transaction.get_merkle`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBranch {
    pub block_height: u64,
    /// Position of the transaction in the block
    pub pos: u64,
    /// Sibling hashes, leaf to root, in RPC hex form
    pub merkle: Vec<String>,
}

/// Scripthash balance in satoshis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: i64,
}

impl Balance {
    pub fn total(&self) -> u64 {
        (self.confirmed as i64 + self.unconfirmed).max(0) as u64
    }
}

/// Bitcoin chain access
///
/// Implementations:
/// - `ElectrumNode` - Electrum protocol server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BitcoinNode: Send + Sync {
    /// Spendable outputs of `script`, each with its funding transaction
    async fn list_unspent(&self, script: &ScriptBuf) -> Result<Vec<Utxo>, NodeError>;

    /// Fee estimate in BTC/kB for confirmation within `target_blocks`; `-1` if unknown
    async fn estimate_fee(&self, target_blocks: usize) -> Result<f64, NodeError>;

    async fn transaction_raw(&self, txid: &Txid) -> Result<Vec<u8>, NodeError>;

    async fn transaction_verbose(&self, txid: &Txid) -> Result<VerboseTx, NodeError>;

    async fn transaction_merkle(&self, txid: &Txid, height: u64)
        -> Result<MerkleBranch, NodeError>;

    /// Raw 80-byte header at `height`
    async fn block_header_raw(&self, height: u64) -> Result<Vec<u8>, NodeError>;

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, NodeError>;

    async fn balance(&self, script: &ScriptBuf) -> Result<Balance, NodeError>;

    async fn tip_height(&self) -> Result<u64, NodeError>;
}

/// Fee rate in sat/vB for next-block confirmation.
///
/// Falls back to 1 sat/vB when the server has no estimate.
pub async fn fee_rate<N: BitcoinNode + ?Sized>(node: &N) -> Result<u64, NodeError> {
    let btc_per_kb = node.estimate_fee(1).await?;
    match units::fee_rate_from_btc_per_kb(btc_per_kb) {
        Some(rate) => Ok(rate),
        None => {
            tracing::error!(btc_per_kb, "Unable to get fee rate from Electrum, using 1 sat/vB");
            Ok(1)
        }
    }
}

/// Electrum scripthash: sha256 of the script, byte-reversed, hex
pub fn script_hash(script: &bitcoin::Script) -> String {
    use sha2::{Digest, Sha256};
    let mut hash: [u8; 32] = Sha256::digest(script.as_bytes()).into();
    hash.reverse();
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fee_rate_fallback() {
        let mut node = MockBitcoinNode::new();
        node.expect_estimate_fee().returning(|_| Ok(-1.0));
        assert_eq!(fee_rate(&node).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fee_rate_rounds_up() {
        let mut node = MockBitcoinNode::new();
        // 0.0001 BTC/kB = 10_000 sat/kB -> 9.77 sat/vB
        node.expect_estimate_fee()
            .withf(|target| *target == 1)
            .returning(|_| Ok(0.0001));
        assert_eq!(fee_rate(&node).await.unwrap(), 10);
    }

    #[test]
    fn test_script_hash_is_reversed_sha256() {
        let script = ScriptBuf::from_bytes(vec![0x51]);
        assert_eq!(
            script_hash(&script),
            "6032c38c0bc0e91e726f1e55e1832e434509001a7aed5cfd881b6ef07215e84a"
        );
    }

    #[test]
    fn test_balance_total() {
        let b = Balance {
            confirmed: 1_000,
            unconfirmed: -200,
        };
        assert_eq!(b.total(), 800);
        assert_eq!(Balance::default().total(), 0);
    }
}
