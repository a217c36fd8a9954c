//! Bitcoin Module
//!
//! Chain access, transaction construction and signing for the operator wallet.

pub mod broadcast;
pub mod builder;
pub mod electrum;
pub mod node;
pub mod signer;

pub use broadcast::{classify_broadcast_error, is_known, try_broadcast, BroadcastClass, Broadcasted};
pub use builder::{
    outbound_script, script_address, select_coins, tx_weight, BuilderError, BuiltTx,
    CoinSelection, HtlcSpend, TxBuilder, DUST_LIMIT, DUST_RESERVE, HTLC_INPUT_VBYTES,
};
pub use electrum::{ElectrumConfig, ElectrumNode, ElectrumProtocol};
pub use node::{fee_rate, script_hash, Balance, BitcoinNode, MerkleBranch, NodeError, VerboseTx};
pub use signer::{OperatorWallet, SignerError};

#[cfg(test)]
pub use node::MockBitcoinNode;
