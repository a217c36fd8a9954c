//! Outbound Finalization
//!
//! Proves each sent outbound payment to the bridge contract. Pending pairs
//! are swept serially: every submission from the supplier account takes the
//! next nonce after the account's base nonce.

use std::str::FromStr;

use bitcoin::Txid;
use serde::Serialize;

use super::SwapProcessor;
use crate::common::SupplierError;
use crate::logging::{log_swap_event, stacks_tx_url};
use crate::stacks::{FinalizeOutboundArgs, TxStatus};
use crate::storage::PendingFinalize;

/// Output of the payment transaction that pays the swapper
pub const PAYMENT_OUTPUT_INDEX: u64 = 0;

/// Finalize submissions per swap before the pair is dropped for manual
/// reconciliation. Matches the finalize-outbound queue's attempt budget.
pub const MAX_FINALIZE_ATTEMPTS: u32 = 24;

/// Counts from one sweep over the pending set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pending: usize,
    /// Finalize transactions submitted this sweep
    pub submitted: usize,
    /// Pairs removed because the contract already settled them
    pub resolved: usize,
    /// Pairs left for a later sweep (submission in flight, proof not ready)
    pub waiting: usize,
    pub failed: usize,
    /// Pairs dropped after [`MAX_FINALIZE_ATTEMPTS`] failed submissions
    pub abandoned: usize,
}

#[derive(Debug)]
enum Step {
    Submitted(String),
    Resolved,
    Waiting(String),
    Abandoned,
}

impl SwapProcessor {
    /// Sweep every pending `(swap_id, btc_txid)` pair once
    pub async fn process_pending_outbounds(&self) -> Result<SweepReport, SupplierError> {
        let pending = self.store.pending_finalizes().await?;
        let mut report = SweepReport {
            pending: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::debug!(
            pending = ?pending.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            "Pending finalized outbounds"
        );

        let base_nonce = self.stacks.account_nonce(&self.stx_address).await?;
        let mut processed = 0u64;
        for item in &pending {
            let nonce = base_nonce + processed;
            match self.finalize_outbound(item, nonce).await {
                Ok(Step::Submitted(_)) => {
                    processed += 1;
                    report.submitted += 1;
                }
                Ok(Step::Resolved) => report.resolved += 1,
                Ok(Step::Abandoned) => report.abandoned += 1,
                Ok(Step::Waiting(reason)) => {
                    tracing::debug!(swap_id = item.swap_id, %reason, "Finalize not ready");
                    report.waiting += 1;
                }
                Err(SupplierError::NonceConflict(reason)) => {
                    // the nonce is taken in the mempool either way
                    tracing::warn!(
                        swap_id = item.swap_id,
                        nonce,
                        %reason,
                        "Nonce conflict finalizing outbound"
                    );
                    processed += 1;
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!(
                        swap_id = item.swap_id,
                        btc_txid = %item.btc_txid,
                        error = %e,
                        "Error when finalizing outbound"
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(?report, "Finalize outbound sweep done");
        Ok(report)
    }

    async fn finalize_outbound(&self, item: &PendingFinalize, nonce: u64) -> Result<Step, SupplierError> {
        let swap_id = item.swap_id;

        let prior = self.store.finalized_outbound(swap_id).await?;
        let mut retry = false;
        if let Some(stx_txid) = &prior {
            match self.stacks.tx_status(stx_txid).await? {
                TxStatus::Pending => return Ok(Step::Waiting(format!("{} pending", stx_txid))),
                TxStatus::Success => {
                    self.resolve(item).await?;
                    tracing::info!(swap_id, %stx_txid, "Finalize outbound confirmed");
                    return Ok(Step::Resolved);
                }
                TxStatus::Failed(status) => {
                    tracing::warn!(swap_id, %stx_txid, %status, "Finalize outbound failed");
                    retry = true;
                }
                TxStatus::NotFound => {
                    tracing::warn!(swap_id, %stx_txid, "Finalize outbound dropped");
                    retry = true;
                }
            }
        }

        if let Some(paid) = self.stacks.get_completed_outbound_swap_txid(swap_id).await? {
            self.resolve(item).await?;
            tracing::info!(swap_id, %paid, "Outbound swap already settled on chain");
            return Ok(Step::Resolved);
        }

        let attempts = self.store.finalize_attempts(swap_id).await?;
        if retry && attempts >= MAX_FINALIZE_ATTEMPTS {
            self.store.remove_pending_finalize(item).await?;
            self.store.clear_finalize_attempts(swap_id).await?;
            let message = format!(
                "gave up after {} finalize submissions; last was {}",
                attempts,
                prior.as_deref().unwrap_or_default()
            );
            log_swap_event(
                "outbound_finalize_abandoned",
                &swap_id.to_string(),
                serde_json::json!({
                    "swap_id": swap_id,
                    "btc_txid": item.btc_txid,
                    "attempts": attempts,
                    "last_stx_txid": prior,
                }),
                Some(("FINALIZE_ABANDONED", &message)),
            );
            return Ok(Step::Abandoned);
        }

        let btc_txid = Txid::from_str(&item.btc_txid)
            .map_err(|e| SupplierError::internal(format!("bad pending txid {}: {}", item, e)))?;
        let proof = match self.spv.assemble(&btc_txid).await.map_err(SupplierError::from) {
            Ok(proof) => proof,
            Err(SupplierError::ProofUnavailable(reason)) => return Ok(Step::Waiting(reason)),
            Err(e) => return Err(e),
        };

        if self.store.finalized_outbound(swap_id).await? != prior {
            return Ok(Step::Waiting("finalize submitted concurrently".to_string()));
        }

        let args = FinalizeOutboundArgs {
            proof,
            output_index: PAYMENT_OUTPUT_INDEX,
            swap_id,
        };
        let stx_txid = self.stacks.submit_finalize_outbound(&args, nonce).await?;
        self.store.set_finalized_outbound(swap_id, &stx_txid).await?;
        let attempt = self.store.record_finalize_attempt(swap_id).await?;

        log_swap_event(
            "outbound_finalize_submitted",
            &swap_id.to_string(),
            serde_json::json!({
                "swap_id": swap_id,
                "btc_txid": item.btc_txid,
                "stx_txid": stx_txid,
                "nonce": nonce,
                "attempt": attempt,
                "tx_url": stacks_tx_url(self.network, &stx_txid),
            }),
            None,
        );
        Ok(Step::Submitted(stx_txid))
    }

    async fn resolve(&self, item: &PendingFinalize) -> Result<(), SupplierError> {
        self.store.remove_pending_finalize(item).await?;
        self.store.clear_finalize_attempts(item.swap_id).await?;
        Ok(())
    }
}
