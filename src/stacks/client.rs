//! Settlement Chain Interface
//!
//! Read-only bridge contract calls, the event stream, transaction status and
//! the single write the engine performs (`finalize-outbound-swap`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{ClarityError, ClarityValue, DecodeError};
use crate::spv::SpvProof;
use crate::types::{FullInboundSwap, InboundSwap, OutboundSwap, Supplier};

/// Settlement chain errors
#[derive(Debug, Error)]
pub enum StacksError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("read-only call {function} failed: {cause}")]
    ReadOnly { function: String, cause: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("clarity error: {0}")]
    Clarity(#[from] ClarityError),

    #[error("transaction rejected: {reason}")]
    Rejected { reason: String, txid: Option<String> },

    /// Another transaction from the same account holds this nonce
    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Settlement-chain transaction status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Success,
    /// Aborted or dropped; the effect did not happen
    Failed(String),
    NotFound,
}

impl TxStatus {
    /// Map an API `tx_status` string
    pub fn from_api(status: &str) -> Self {
        match status {
            "pending" => TxStatus::Pending,
            "success" => TxStatus::Success,
            other => TxStatus::Failed(other.to_string()),
        }
    }
}

/// Node view of both chains' tips
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Bitcoin height the settlement chain has processed
    pub burn_block_height: u64,
    pub stacks_tip_height: u64,
    /// Settlement-chain tip block hash
    pub stacks_tip: String,
}

/// Account balances in base units
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalances {
    pub micro_stx: u64,
    /// Wrapped-BTC balance in sats
    pub xbtc_sats: u64,
}

/// One entry of the contract event listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContractEvent {
    pub event_index: u64,
    pub event_type: String,
    pub tx_id: String,
    #[serde(default)]
    pub contract_log: Option<ContractLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLog {
    pub contract_id: String,
    pub topic: String,
    pub value: ContractLogValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLogValue {
    pub hex: String,
    #[serde(default)]
    pub repr: Option<String>,
}

/// Arguments of `finalize-outbound-swap`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutboundArgs {
    pub proof: SpvProof,
    /// Output of the payment transaction that pays the swapper
    pub output_index: u64,
    pub swap_id: u64,
}

impl FinalizeOutboundArgs {
    /// `(block {header, height}) (prev-blocks (list (buff 80))) (tx buff)
    ///  (proof {hashes, tx-index, tree-depth}) (output-index uint) (swap-id uint)`
    pub fn to_clarity_args(&self) -> Vec<ClarityValue> {
        let p = &self.proof;
        vec![
            ClarityValue::tuple([
                ("header", ClarityValue::buffer(p.header.clone())),
                ("height", ClarityValue::uint(p.stacks_height)),
            ]),
            // the verifier walks back from `header`, so the parent comes first
            ClarityValue::List(
                p.prev_blocks
                    .iter()
                    .rev()
                    .map(|h| ClarityValue::buffer(h.clone()))
                    .collect(),
            ),
            ClarityValue::buffer(p.tx.clone()),
            ClarityValue::tuple([
                (
                    "hashes",
                    ClarityValue::List(
                        p.hashes
                            .iter()
                            .map(|h| ClarityValue::buffer(h.to_vec()))
                            .collect(),
                    ),
                ),
                ("tx-index", ClarityValue::uint(p.tx_index)),
                ("tree-depth", ClarityValue::uint(p.tree_depth())),
            ]),
            ClarityValue::uint(self.output_index),
            ClarityValue::uint(self.swap_id),
        ]
    }
}

/// Settlement chain access
///
/// Implementations:
/// - `StacksApi` - Stacks node + blockchain API over HTTP
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementChain: Send + Sync {
    /// Inbound swap by BTC deposit txid (display hex)
    async fn get_inbound_swap(&self, txid: &str) -> Result<Option<InboundSwap>, StacksError>;

    async fn get_full_inbound(&self, txid: &str) -> Result<Option<FullInboundSwap>, StacksError>;

    async fn get_outbound_swap(&self, swap_id: u64) -> Result<Option<OutboundSwap>, StacksError>;

    /// BTC txid the contract accepted as payment for `swap_id`, if finalized
    async fn get_completed_outbound_swap_txid(
        &self,
        swap_id: u64,
    ) -> Result<Option<String>, StacksError>;

    async fn get_preimage(&self, txid: &str) -> Result<Option<Vec<u8>>, StacksError>;

    async fn get_supplier(&self, supplier_id: u64) -> Result<Option<Supplier>, StacksError>;

    /// Wrapped-BTC funds the supplier has escrowed in the bridge, in sats
    async fn get_funds(&self, supplier_id: u64) -> Result<u64, StacksError>;

    /// Bridge contract events, newest first
    async fn contract_events(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<RawContractEvent>, StacksError>;

    async fn tx_status(&self, txid: &str) -> Result<TxStatus, StacksError>;

    async fn account_nonce(&self, address: &str) -> Result<u64, StacksError>;

    /// Settlement-chain block anchored at `burn_height`, if indexed yet
    async fn stacks_height_at_burn_height(
        &self,
        burn_height: u64,
    ) -> Result<Option<u64>, StacksError>;

    async fn chain_tip(&self) -> Result<ChainTip, StacksError>;

    async fn account_balances(&self, address: &str) -> Result<AccountBalances, StacksError>;

    /// Sign and broadcast `finalize-outbound-swap`; returns the settlement txid
    async fn submit_finalize_outbound(
        &self,
        args: &FinalizeOutboundArgs,
        nonce: u64,
    ) -> Result<String, StacksError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_status_mapping() {
        assert_eq!(TxStatus::from_api("pending"), TxStatus::Pending);
        assert_eq!(TxStatus::from_api("success"), TxStatus::Success);
        assert_eq!(
            TxStatus::from_api("abort_by_response"),
            TxStatus::Failed("abort_by_response".into())
        );
        assert!(matches!(
            TxStatus::from_api("dropped_replace_by_fee"),
            TxStatus::Failed(_)
        ));
    }

    #[test]
    fn test_raw_event_deserializes() {
        let json = serde_json::json!({
            "event_index": 3,
            "event_type": "smart_contract_log",
            "tx_id": "0xabc",
            "contract_log": {
                "contract_id": "SP000000000000000000002Q6VF78.bridge",
                "topic": "print",
                "value": { "hex": "0x0100000000000000000000000000000001", "repr": "u1" }
            }
        });
        let event: RawContractEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.event_index, 3);
        assert_eq!(event.contract_log.unwrap().value.repr.as_deref(), Some("u1"));

        let transfer = serde_json::json!({
            "event_index": 0,
            "event_type": "fungible_token_asset",
            "tx_id": "0xdef"
        });
        let event: RawContractEvent = serde_json::from_value(transfer).unwrap();
        assert!(event.contract_log.is_none());
    }

    #[test]
    fn test_finalize_args_shape() {
        let args = FinalizeOutboundArgs {
            proof: SpvProof {
                header: vec![0u8; 80],
                stacks_height: 42,
                prev_blocks: vec![vec![1u8; 80], vec![9u8; 80]],
                tx: vec![2u8; 100],
                hashes: vec![[3u8; 32], [4u8; 32]],
                tx_index: 5,
                burn_height: 700,
            },
            output_index: 0,
            swap_id: 7,
        };
        let values = args.to_clarity_args();
        assert_eq!(values.len(), 6);

        let proof = values[3].as_tuple().unwrap();
        assert_eq!(proof["tree-depth"], ClarityValue::uint(2u64));
        assert_eq!(proof["tx-index"], ClarityValue::uint(5u64));
        assert_eq!(values[5], ClarityValue::uint(7u64));

        assert_eq!(
            values[1],
            ClarityValue::List(vec![
                ClarityValue::buffer(vec![9u8; 80]),
                ClarityValue::buffer(vec![1u8; 80]),
            ])
        );

        let block = values[0].as_tuple().unwrap();
        assert_eq!(block["height"], ClarityValue::uint(42u64));
    }
}
