//! Bitcoin SPV Proof Assembly
//!
//! Packages a confirmed operator payment so the bridge contract can verify it:
//! the header of a Bitcoin block the settlement chain has observed, any
//! headers between the payment's block and that block, the raw transaction
//! and its merkle branch.
//!
//! The settlement chain indexes Bitcoin blocks with some lag. When no
//! settlement block is anchored at the payment's height yet, the search walks
//! forward one Bitcoin block at a time, carrying the skipped headers along.

use std::sync::Arc;

use bitcoin::{
    hashes::{sha256d, Hash},
    Txid,
};
use thiserror::Error;

use crate::btc::{BitcoinNode, NodeError};
use crate::stacks::{SettlementChain, StacksError};

/// Blocks searched past the payment's block for a settlement anchor
pub const MAX_FORWARD_BLOCKS: u64 = 12;

const HEADER_LEN: usize = 80;

/// SPV-related errors
#[derive(Debug, Error)]
pub enum SpvError {
    #[error("bitcoin node error: {0}")]
    Node(#[from] NodeError),

    #[error("settlement chain error: {0}")]
    Stacks(#[from] StacksError),

    #[error("transaction not confirmed: {0}")]
    NotConfirmed(String),

    #[error("Invalid height: {confirmations} confirmations at burn height {tip}")]
    InvalidHeight { confirmations: u64, tip: u64 },

    #[error("no stacks block found from burn height {burn_height} ({searched} blocks searched)")]
    NoStacksBlockFound { burn_height: u64, searched: u64 },

    #[error("merkle branch is for height {found}, expected {expected}")]
    HeightMismatch { expected: u64, found: u64 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid merkle proof")]
    InvalidMerkleProof,
}

impl SpvError {
    /// Whether waiting for more blocks can fix this
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SpvError::Node(_)
                | SpvError::Stacks(_)
                | SpvError::NotConfirmed(_)
                | SpvError::InvalidHeight { .. }
                | SpvError::NoStacksBlockFound { .. }
                | SpvError::HeightMismatch { .. }
        )
    }
}

/// Payment inclusion proof in the shape the bridge contract verifies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpvProof {
    /// Header of the first block at or after the payment with a settlement anchor
    pub header: Vec<u8>,
    /// Settlement-chain height anchored at `header`
    pub stacks_height: u64,
    /// Headers from the payment's block up to (excluding) `header`, oldest first
    pub prev_blocks: Vec<Vec<u8>>,
    /// Raw payment transaction
    pub tx: Vec<u8>,
    /// Merkle siblings, leaf to root, in wire byte order
    pub hashes: Vec<[u8; 32]>,
    /// Position of the payment in its block
    pub tx_index: u64,
    /// Bitcoin height of the payment's block
    pub burn_height: u64,
}

impl SpvProof {
    pub fn tree_depth(&self) -> u64 {
        self.hashes.len() as u64
    }

    /// Header of the block that contains the payment
    pub fn tx_block_header(&self) -> &[u8] {
        self.prev_blocks.first().unwrap_or(&self.header)
    }

    /// Recompute the merkle root from the branch and compare with the header
    pub fn verify(&self) -> bool {
        let header = self.tx_block_header();
        if header.len() != HEADER_LEN {
            return false;
        }
        let mut current = sha256d::Hash::hash(&self.tx).to_byte_array();
        let mut index = self.tx_index;
        for sibling in &self.hashes {
            let mut pair = [0u8; 64];
            if index & 1 == 1 {
                pair[..32].copy_from_slice(sibling);
                pair[32..].copy_from_slice(&current);
            } else {
                pair[..32].copy_from_slice(&current);
                pair[32..].copy_from_slice(sibling);
            }
            current = sha256d::Hash::hash(&pair).to_byte_array();
            index >>= 1;
        }
        current[..] == header[36..68]
    }
}

/// Convert RPC-order hex hashes to wire byte order
pub fn reverse_merkle_hashes(merkle: &[String]) -> Result<Vec<[u8; 32]>, SpvError> {
    merkle
        .iter()
        .map(|h| {
            let bytes = hex::decode(h)
                .map_err(|e| SpvError::ParseError(format!("invalid merkle hash hex: {}", e)))?;
            let mut hash: [u8; 32] = bytes
                .try_into()
                .map_err(|_| SpvError::ParseError(format!("invalid merkle hash length: {}", h)))?;
            hash.reverse();
            Ok(hash)
        })
        .collect()
}

/// Builds [`SpvProof`]s from the Bitcoin node and the settlement chain's index
#[derive(Clone)]
pub struct SpvProofAssembler {
    btc: Arc<dyn BitcoinNode>,
    stacks: Arc<dyn SettlementChain>,
    max_forward: u64,
}

impl SpvProofAssembler {
    pub fn new(btc: Arc<dyn BitcoinNode>, stacks: Arc<dyn SettlementChain>) -> Self {
        Self {
            btc,
            stacks,
            max_forward: MAX_FORWARD_BLOCKS,
        }
    }

    pub fn with_max_forward(mut self, max_forward: u64) -> Self {
        self.max_forward = max_forward;
        self
    }

    /// Bitcoin height of a transaction with `confirmations`, per the settlement chain's tip
    async fn confirmations_to_height(&self, confirmations: u64) -> Result<u64, SpvError> {
        let tip = self.stacks.chain_tip().await?.burn_block_height;
        (tip + 1)
            .checked_sub(confirmations)
            .ok_or(SpvError::InvalidHeight { confirmations, tip })
    }

    /// First block at or after `burn_height` with a settlement anchor.
    ///
    /// Returns `(header, stacks_height, skipped_headers)`.
    async fn find_stacks_block(
        &self,
        burn_height: u64,
    ) -> Result<(Vec<u8>, u64, Vec<Vec<u8>>), SpvError> {
        let btc_tip = self.btc.tip_height().await?;
        let last = burn_height.saturating_add(self.max_forward).min(btc_tip);

        let mut skipped = Vec::new();
        let mut height = burn_height;
        while height <= last {
            let header = self.btc.block_header_raw(height).await?;
            if header.len() != HEADER_LEN {
                return Err(SpvError::ParseError(format!(
                    "invalid header length: {} bytes",
                    header.len()
                )));
            }
            if let Some(stacks_height) = self.stacks.stacks_height_at_burn_height(height).await? {
                return Ok((header, stacks_height, skipped));
            }
            tracing::debug!(height, "No stacks block anchored yet, walking forward");
            skipped.push(header);
            height += 1;
        }

        Err(SpvError::NoStacksBlockFound {
            burn_height,
            searched: skipped.len() as u64,
        })
    }

    /// Assemble the proof for a confirmed transaction
    pub async fn assemble(&self, txid: &Txid) -> Result<SpvProof, SpvError> {
        let verbose = self.btc.transaction_verbose(txid).await?;
        let confirmations = verbose.confirmations();
        if confirmations == 0 {
            return Err(SpvError::NotConfirmed(txid.to_string()));
        }

        let burn_height = self.confirmations_to_height(confirmations).await?;
        let (header, stacks_height, prev_blocks) = self.find_stacks_block(burn_height).await?;

        let branch = self.btc.transaction_merkle(txid, burn_height).await?;
        if branch.block_height != burn_height {
            return Err(SpvError::HeightMismatch {
                expected: burn_height,
                found: branch.block_height,
            });
        }
        let hashes = reverse_merkle_hashes(&branch.merkle)?;
        let tx = hex::decode(&verbose.hex)
            .map_err(|e| SpvError::ParseError(format!("invalid tx hex: {}", e)))?;

        let proof = SpvProof {
            header,
            stacks_height,
            prev_blocks,
            tx,
            hashes,
            tx_index: branch.pos,
            burn_height,
        };
        if !proof.verify() {
            return Err(SpvError::InvalidMerkleProof);
        }

        tracing::info!(
            %txid,
            burn_height,
            stacks_height,
            prev_blocks = proof.prev_blocks.len(),
            "Assembled SPV proof"
        );
        Ok(proof)
    }
}
