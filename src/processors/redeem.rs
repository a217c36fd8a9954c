//! Inbound HTLC Redemption
//!
//! When a swapper reveals the preimage on the settlement chain, the supplier
//! claims the BTC HTLC and sweeps its other coins into the same output.

use std::str::FromStr;

use bitcoin::{consensus, ScriptBuf, Transaction, Txid};

use super::{settle, ProcessOutcome, SwapProcessor};
use crate::btc::{fee_rate, HtlcSpend};
use crate::common::SupplierError;
use crate::events::FinalizeInboundPrint;
use crate::logging::{btc_tx_url, log_swap_event};
use crate::types::units::sats_to_btc_string;

impl SwapProcessor {
    /// Redeem the HTLC behind a `finalize-inbound` print
    pub async fn process_finalize_inbound(
        &self,
        print: &FinalizeInboundPrint,
    ) -> Result<ProcessOutcome, SupplierError> {
        if !self.is_ours(print.swap.supplier) {
            return Ok(ProcessOutcome::skipped("other supplier"));
        }
        tracing::info!(txid = %print.txid, "Processing redeem of HTLC");
        settle(&print.txid, self.redeem_htlc(print).await)
    }

    async fn redeem_htlc(&self, print: &FinalizeInboundPrint) -> Result<ProcessOutcome, SupplierError> {
        if let Some(redeemed) = self.store.redeemed(&print.txid).await? {
            tracing::debug!(txid = %print.txid, %redeemed, "Already redeemed");
            return Ok(ProcessOutcome::skipped(format!("already redeemed in {}", redeemed)));
        }

        let preimage = print
            .preimage
            .clone()
            .ok_or_else(|| SupplierError::MissingPreimage(print.txid.clone()))?;
        let txid = Txid::from_str(&print.txid)
            .map_err(|e| SupplierError::NoMatchingSwap(format!("bad txid {}: {}", print.txid, e)))?;

        let swap = self
            .stacks
            .get_full_inbound(&print.txid)
            .await?
            .ok_or_else(|| SupplierError::NoMatchingSwap(format!("no inbound swap for {}", print.txid)))?;

        let sats = swap.meta.sats;
        let action = format!("redeem::{}", print.txid);
        if let Some(redeem_txid) = self.resume_broadcast(&action).await? {
            return self
                .record_redeemed(print, &action, redeem_txid.to_string(), sats, None)
                .await;
        }

        let raw = self.btc.transaction_raw(&txid).await?;
        let funding_tx: Transaction = consensus::deserialize(&raw)
            .map_err(|e| SupplierError::bitcoin(format!("invalid funding tx {}: {}", txid, e)))?;

        let spend = HtlcSpend {
            funding_tx,
            output_index: swap.meta.output_index,
            redeem_script: ScriptBuf::from_bytes(swap.meta.redeem_script.clone()),
            preimage,
        };

        let _wallet = self.lock_wallet().await;
        let wallet_script = self.builder.wallet().script_pubkey();
        let (utxos, rate) = tokio::try_join!(
            self.btc.list_unspent(&wallet_script),
            fee_rate(self.btc.as_ref())
        )?;
        let built = self.builder.build_htlc_redeem(&spend, &utxos, rate)?;

        // a concurrent run may have finished while we were building
        if let Some(redeemed) = self.store.redeemed(&print.txid).await? {
            return Ok(ProcessOutcome::skipped(format!("already redeemed in {}", redeemed)));
        }

        let redeem_txid = self.broadcast_with_intent(&action, &built.tx).await?;
        self.record_redeemed(
            print,
            &action,
            redeem_txid.to_string(),
            sats,
            Some((built.fee, utxos.len())),
        )
        .await
    }

    /// Write the redemption marker, then drop the broadcast intent
    async fn record_redeemed(
        &self,
        print: &FinalizeInboundPrint,
        action: &str,
        redeem_txid: String,
        sats: u64,
        built: Option<(u64, usize)>,
    ) -> Result<ProcessOutcome, SupplierError> {
        self.store.set_redeemed(&print.txid, &redeem_txid).await?;
        self.store.clear_broadcast_intent(action).await?;

        log_swap_event(
            "htlc_redeemed",
            &print.txid,
            serde_json::json!({
                "htlc_txid": print.txid,
                "redeem_txid": redeem_txid,
                "tx_url": btc_tx_url(self.network, &redeem_txid),
                "sats": sats,
                "fee": built.map(|(fee, _)| fee),
                "consolidated": built.map(|(_, coins)| coins),
                "resumed": built.is_none(),
            }),
            None,
        );
        tracing::info!(
            txid = %print.txid,
            %redeem_txid,
            "Redeemed inbound HTLC for {} BTC",
            sats_to_btc_string(sats)
        );

        Ok(ProcessOutcome::Redeemed {
            txid: print.txid.clone(),
            redeem_txid,
            sats,
        })
    }
}
