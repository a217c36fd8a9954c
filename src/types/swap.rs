//! Swap Records
//!
//! Settlement-chain views of inbound (BTC -> wrapped) and outbound
//! (wrapped -> BTC) swaps, the supplier record, and operator UTXOs.

use serde::{Deserialize, Serialize};

use super::{hex_bytes, units};

/// Inbound swap as stored by the bridge contract, keyed by the BTC deposit txid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundSwap {
    /// Swapper id assigned by the contract
    pub swapper: u64,
    /// Wrapped-asset amount (sats precision)
    pub xbtc: u64,
    /// Supplier (operator) id the swap is escrowed against
    pub supplier: u64,
    /// Settlement-chain height after which the swap can be revoked
    pub expiration: u64,
    /// HTLC payment hash
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
}

/// HTLC details recorded at escrow time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMeta {
    /// Escrowed satoshis in the HTLC output
    pub sats: u64,
    /// P2SH redeem script of the HTLC
    #[serde(with = "hex_bytes")]
    pub redeem_script: Vec<u8>,
    /// HTLC output index in the deposit transaction
    pub output_index: u32,
    /// Depositor's public key (refund path)
    #[serde(with = "hex_bytes")]
    pub sender_public_key: Vec<u8>,
    /// Relative timelock of the refund path, in blocks
    pub csv: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullInboundSwap {
    #[serde(flatten)]
    pub swap: InboundSwap,
    #[serde(flatten)]
    pub meta: InboundMeta,
}

/// Outbound swap, keyed by the contract-assigned swap id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundSwap {
    /// Requesting principal
    pub swapper: String,
    /// Satoshis the operator must pay out
    pub sats: u64,
    /// Wrapped-asset amount burned by the swapper
    pub xbtc: u64,
    pub supplier: u64,
    /// Destination hash160 (pubkey hash or script hash)
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
    /// Base58 address version byte; selects P2PKH vs P2SH
    pub version: u8,
    /// Bitcoin (burn) height at which the swap was created
    pub created_at: u64,
}

impl OutboundSwap {
    /// Blocks elapsed since creation at `current_height`
    pub fn age(&self, current_height: u64) -> u64 {
        current_height.saturating_sub(self.created_at)
    }
}

/// Supplier registration on the bridge contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    /// Settlement-chain principal allowed to act for this supplier
    pub controller: String,
    /// Compressed secp256k1 key of the supplier's BTC wallet
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    pub inbound_fee: Option<i64>,
    pub outbound_fee: Option<i64>,
    pub outbound_base_fee: i64,
    pub inbound_base_fee: i64,
}

/// Spendable output of the operator wallet.
///
/// Fetched fresh for every coin selection; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding txid (display hex)
    pub txid: String,
    pub vout: u32,
    pub value_sats: u64,
    /// Full funding transaction, needed to sign legacy inputs
    pub raw_tx_hex: String,
}

impl std::fmt::Display for Utxo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.txid,
            self.vout,
            units::sats_to_display(self.value_sats)
        )
    }
}
