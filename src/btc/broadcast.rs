//! Broadcast Classification
//!
//! Electrum servers relay node rejection text verbatim. Some rejections mean
//! this exact transaction is already on the network; those are treated as
//! success. A spent-inputs rejection only counts once the node confirms it
//! knows our txid, since any other spend of those coins means we paid nothing.

use bitcoin::{consensus, Transaction, Txid};

use super::node::{BitcoinNode, NodeError};

/// Rejection messages that indicate this transaction was already accepted
const ALREADY_ACCEPTED: &[&str] = &[
    "transaction already in block chain",
    "txn-already-in-mempool",
    "txn-already-known",
    "already have transaction",
];

/// Rejection messages that indicate some input is already spent
const INPUTS_SPENT: &[&str] = &["inputs-missingorspent", "missing-inputs"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastClass {
    AlreadyAccepted,
    /// Spent by this transaction or a conflicting one
    InputsSpent,
    Rejected,
}

/// Classify a broadcast rejection message
pub fn classify_broadcast_error(message: &str) -> BroadcastClass {
    let message = message.to_lowercase();
    if ALREADY_ACCEPTED.iter().any(|m| message.contains(m)) {
        BroadcastClass::AlreadyAccepted
    } else if INPUTS_SPENT.iter().any(|m| message.contains(m)) {
        BroadcastClass::InputsSpent
    } else {
        BroadcastClass::Rejected
    }
}

/// Result of a broadcast attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcasted {
    Sent(Txid),
    /// The network already had it
    AlreadyKnown(Txid),
}

impl Broadcasted {
    pub fn txid(&self) -> Txid {
        match self {
            Broadcasted::Sent(txid) | Broadcasted::AlreadyKnown(txid) => *txid,
        }
    }
}

/// Broadcast `tx`, treating already-accepted rejections as success
pub async fn try_broadcast<N: BitcoinNode + ?Sized>(
    node: &N,
    tx: &Transaction,
) -> Result<Broadcasted, NodeError> {
    let txid = tx.compute_txid();
    match node.broadcast(&consensus::serialize(tx)).await {
        Ok(_) => {
            tracing::info!(%txid, "Broadcasted BTC tx");
            Ok(Broadcasted::Sent(txid))
        }
        Err(NodeError::Rpc(message)) => match classify_broadcast_error(&message) {
            BroadcastClass::AlreadyAccepted => {
                tracing::debug!(%txid, %message, "Transaction already broadcast");
                Ok(Broadcasted::AlreadyKnown(txid))
            }
            BroadcastClass::InputsSpent if is_known(node, &txid).await => {
                tracing::debug!(%txid, %message, "Inputs spent by this transaction");
                Ok(Broadcasted::AlreadyKnown(txid))
            }
            BroadcastClass::InputsSpent | BroadcastClass::Rejected => {
                tracing::error!(%txid, error = %message, "Error broadcasting");
                Err(NodeError::Rpc(message))
            }
        },
        Err(e) => {
            tracing::error!(%txid, error = %e, "Error broadcasting");
            Err(e)
        }
    }
}

/// Whether the node has `txid` in its mempool or chain
pub async fn is_known<N: BitcoinNode + ?Sized>(node: &N, txid: &Txid) -> bool {
    match node.transaction_verbose(txid).await {
        Ok(verbose) => verbose.txid == txid.to_string(),
        Err(e) => {
            tracing::debug!(%txid, error = %e, "Transaction lookup failed");
            false
        }
    }
}
