//! Outbound Payment
//!
//! Pays BTC to the swapper of an `initiate-outbound` swap, then queues the
//! payment for finalization on the settlement chain.

use super::{settle, ProcessOutcome, SwapProcessor};
use crate::btc::{fee_rate, outbound_script, script_address};
use crate::common::SupplierError;
use crate::events::InitiateOutboundPrint;
use crate::logging::{btc_tx_url, log_swap_event};
use crate::storage::PendingFinalize;
use crate::types::units::sats_to_btc_string;

/// Oldest swap, in Bitcoin blocks, that is still worth paying.
/// Older swaps would expire before the finalize transaction lands.
pub const OUTBOUND_EXPIRY_WINDOW: u64 = 190;

impl SwapProcessor {
    /// Send the BTC payment for an outbound swap
    pub async fn process_initiate_outbound(
        &self,
        print: &InitiateOutboundPrint,
    ) -> Result<ProcessOutcome, SupplierError> {
        if !self.is_ours(print.swap.supplier) {
            return Ok(ProcessOutcome::skipped("other supplier"));
        }
        let swap_ref = format!("outbound-{}", print.swap_id);
        settle(&swap_ref, self.send_outbound(print).await)
    }

    async fn send_outbound(&self, print: &InitiateOutboundPrint) -> Result<ProcessOutcome, SupplierError> {
        let swap_id = print.swap_id;
        let swap = &print.swap;
        let action = format!("outbound::{}", swap_id);

        if let Some(sent) = self.store.sent_outbound(swap_id).await? {
            tracing::info!(swap_id, %sent, "Already sent outbound swap");
            return Ok(ProcessOutcome::skipped(format!("already sent in {}", sent)));
        }
        if let Some(btc_txid) = self.resume_broadcast(&action).await? {
            return self.record_outbound(print, &action, btc_txid.to_string(), None).await;
        }
        if let Some(paid) = self.stacks.get_completed_outbound_swap_txid(swap_id).await? {
            tracing::info!(swap_id, %paid, "Outbound swap already finalized on chain");
            return Ok(ProcessOutcome::skipped(format!("already finalized with {}", paid)));
        }

        let height = self.btc.tip_height().await?;
        let age = swap.age(height);
        if age > OUTBOUND_EXPIRY_WINDOW {
            tracing::warn!(
                swap_id,
                age,
                created_at = swap.created_at,
                height,
                "Outbound swap too old to send"
            );
            return Err(SupplierError::Expired { swap_id, age });
        }

        let recipient = outbound_script(&swap.hash, swap.version)?;
        tracing::debug!(
            swap_id,
            address = %script_address(&recipient, self.network.bitcoin_network()),
            sats = swap.sats,
            "Sending outbound payment"
        );

        let _wallet = self.lock_wallet().await;
        let wallet_script = self.builder.wallet().script_pubkey();
        let (utxos, rate) = tokio::try_join!(
            self.btc.list_unspent(&wallet_script),
            fee_rate(self.btc.as_ref())
        )?;
        let built = self.builder.build_payment(&utxos, recipient, swap.sats, rate)?;

        if let Some(sent) = self.store.sent_outbound(swap_id).await? {
            return Ok(ProcessOutcome::skipped(format!("already sent in {}", sent)));
        }

        let btc_txid = self.broadcast_with_intent(&action, &built.tx).await?;
        self.record_outbound(print, &action, btc_txid.to_string(), Some(built.fee))
            .await
    }

    /// Write the payment markers for a broadcast payment, then drop its intent
    async fn record_outbound(
        &self,
        print: &InitiateOutboundPrint,
        action: &str,
        btc_txid: String,
        fee: Option<u64>,
    ) -> Result<ProcessOutcome, SupplierError> {
        let swap_id = print.swap_id;
        let sats = print.swap.sats;

        self.store.set_sent_outbound(swap_id, &btc_txid).await?;
        self.store
            .add_pending_finalize(&PendingFinalize::new(swap_id, &btc_txid))
            .await?;
        self.store.clear_broadcast_intent(action).await?;

        let recipient = outbound_script(&print.swap.hash, print.swap.version)
            .map(|script| script_address(&script, self.network.bitcoin_network()))
            .unwrap_or_default();
        log_swap_event(
            "outbound_sent",
            &swap_id.to_string(),
            serde_json::json!({
                "swap_id": swap_id,
                "btc_txid": btc_txid,
                "tx_url": btc_tx_url(self.network, &btc_txid),
                "recipient": recipient,
                "sats": sats,
                "fee": fee,
                "resumed": fee.is_none(),
            }),
            None,
        );
        tracing::info!(swap_id, %btc_txid, "Sent {} BTC for outbound swap", sats_to_btc_string(sats));

        Ok(ProcessOutcome::Sent {
            swap_id,
            btc_txid,
            sats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::builder::tests::wallet_utxos;
    use crate::btc::signer::tests::test_wallet;
    use crate::btc::{MockBitcoinNode, NodeError};
    use crate::processors::tests::{processor, processor_on, FailingWrites, SUPPLIER};
    use crate::stacks::MockSettlementChain;
    use crate::types::OutboundSwap;
    use bitcoin::{consensus, Transaction, Txid};
    use std::sync::{Arc, Mutex};

    fn print(swap_id: u64, supplier: u64, version: u8) -> InitiateOutboundPrint {
        InitiateOutboundPrint {
            swap_id,
            swap: OutboundSwap {
                swapper: "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM".into(),
                sats: 50_000,
                xbtc: 50_500,
                supplier,
                hash: vec![0x44; 20],
                version,
                created_at: 100,
            },
        }
    }

    fn stacks_unfinalized() -> MockSettlementChain {
        let mut stacks = MockSettlementChain::new();
        stacks
            .expect_get_completed_outbound_swap_txid()
            .returning(|_| Ok(None));
        stacks
    }

    fn funded_node(tip: u64, broadcasts: usize) -> MockBitcoinNode {
        let mut btc = MockBitcoinNode::new();
        btc.expect_tip_height().returning(move || Ok(tip));
        btc.expect_list_unspent()
            .returning(|_| Ok(wallet_utxos(&test_wallet(), &[30_000, 80_000])));
        btc.expect_estimate_fee().returning(|_| Ok(0.00001));
        btc.expect_broadcast().times(broadcasts).returning(|raw| {
            let tx: Transaction = consensus::deserialize(raw).unwrap();
            Ok(tx.compute_txid())
        });
        btc
    }

    #[tokio::test]
    async fn test_sends_once_and_queues_finalize() {
        let processor = processor(funded_node(150, 1), stacks_unfinalized());
        let p = print(7, SUPPLIER, 0x6f);

        let btc_txid = match processor.process_initiate_outbound(&p).await.unwrap() {
            ProcessOutcome::Sent { btc_txid, sats, .. } => {
                assert_eq!(sats, 50_000);
                btc_txid
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            processor.store().sent_outbound(7).await.unwrap(),
            Some(btc_txid.clone())
        );
        assert_eq!(
            processor.store().pending_finalizes().await.unwrap(),
            vec![PendingFinalize::new(7, btc_txid)]
        );

        // redelivery does not pay twice
        assert!(processor.process_initiate_outbound(&p).await.unwrap().is_skipped());
    }

    #[tokio::test]
    async fn test_expired_swap_not_paid() {
        let processor = processor(funded_node(100 + 191, 0), stacks_unfinalized());

        let outcome = processor
            .process_initiate_outbound(&print(7, SUPPLIER, 0x6f))
            .await
            .unwrap();
        assert_eq!(outcome.failure_code(), Some("EXPIRED"));
        assert!(processor.store().sent_outbound(7).await.unwrap().is_none());
        assert!(processor.store().pending_finalizes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_edge_still_paid() {
        let processor = processor(funded_node(100 + OUTBOUND_EXPIRY_WINDOW, 1), stacks_unfinalized());
        let outcome = processor
            .process_initiate_outbound(&print(8, SUPPLIER, 0xc4))
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Sent { swap_id: 8, .. }));
    }

    #[tokio::test]
    async fn test_finalized_on_chain_skipped() {
        let mut stacks = MockSettlementChain::new();
        stacks
            .expect_get_completed_outbound_swap_txid()
            .returning(|_| Ok(Some("ab".repeat(32))));
        let processor = processor(MockBitcoinNode::new(), stacks);

        let outcome = processor
            .process_initiate_outbound(&print(9, SUPPLIER, 0x6f))
            .await
            .unwrap();
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_unknown_version_fails() {
        let processor = processor(funded_node(150, 0), stacks_unfinalized());
        let outcome = processor
            .process_initiate_outbound(&print(10, SUPPLIER, 0x42))
            .await
            .unwrap();
        assert_eq!(outcome.failure_code(), Some("NO_MATCHING_SWAP"));
    }

    #[tokio::test]
    async fn test_insufficient_funds_fails() {
        let mut btc = MockBitcoinNode::new();
        btc.expect_tip_height().returning(|| Ok(150));
        btc.expect_list_unspent()
            .returning(|_| Ok(wallet_utxos(&test_wallet(), &[10_000])));
        btc.expect_estimate_fee().returning(|_| Ok(0.00001));
        let processor = processor(btc, stacks_unfinalized());

        let outcome = processor
            .process_initiate_outbound(&print(11, SUPPLIER, 0x6f))
            .await
            .unwrap();
        assert_eq!(outcome.failure_code(), Some("INSUFFICIENT_FUNDS"));
        assert!(processor.store().sent_outbound(11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_supplier_skipped() {
        let processor = processor(MockBitcoinNode::new(), MockSettlementChain::new());
        let outcome = processor
            .process_initiate_outbound(&print(12, SUPPLIER + 1, 0x6f))
            .await
            .unwrap();
        assert!(outcome.is_skipped());
    }

    #[tokio::test]
    async fn test_failed_marker_write_does_not_pay_twice() {
        let seen: Arc<Mutex<Vec<Txid>>> = Arc::default();
        let mut btc = MockBitcoinNode::new();
        btc.expect_tip_height().returning(|| Ok(150));
        btc.expect_list_unspent()
            .returning(|_| Ok(wallet_utxos(&test_wallet(), &[30_000, 80_000])));
        btc.expect_estimate_fee().returning(|_| Ok(0.00001));
        let relayed = seen.clone();
        btc.expect_broadcast().returning(move |raw| {
            let txid = consensus::deserialize::<Transaction>(raw).unwrap().compute_txid();
            let mut relayed = relayed.lock().unwrap();
            if relayed.contains(&txid) {
                return Err(NodeError::Rpc("txn-already-in-mempool".into()));
            }
            relayed.push(txid);
            Ok(txid)
        });

        let kv = Arc::new(FailingWrites::new("sent_outbound", 1));
        let processor = processor_on(kv, btc, stacks_unfinalized());
        let p = print(7, SUPPLIER, 0x6f);

        assert!(matches!(
            processor.process_initiate_outbound(&p).await,
            Err(SupplierError::Storage(_))
        ));
        let outcome = processor.process_initiate_outbound(&p).await.unwrap();

        let paid = seen.lock().unwrap().clone();
        assert_eq!(paid.len(), 1);
        let btc_txid = paid[0].to_string();
        assert_eq!(
            outcome,
            ProcessOutcome::Sent {
                swap_id: 7,
                btc_txid: btc_txid.clone(),
                sats: 50_000,
            }
        );
        assert_eq!(processor.store().sent_outbound(7).await.unwrap(), Some(btc_txid.clone()));
        assert_eq!(
            processor.store().pending_finalizes().await.unwrap(),
            vec![PendingFinalize::new(7, btc_txid)]
        );
        assert_eq!(processor.store().broadcast_intent("outbound::7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_inputs_spent_elsewhere_is_not_paid() {
        let mut btc = MockBitcoinNode::new();
        btc.expect_tip_height().returning(|| Ok(150));
        btc.expect_list_unspent()
            .returning(|_| Ok(wallet_utxos(&test_wallet(), &[30_000, 80_000])));
        btc.expect_estimate_fee().returning(|_| Ok(0.00001));
        btc.expect_broadcast()
            .returning(|_| Err(NodeError::Rpc("bad-txns-inputs-missingorspent".into())));
        btc.expect_transaction_verbose()
            .returning(|_| Err(NodeError::Rpc("No such mempool or blockchain transaction".into())));
        let processor = processor(btc, stacks_unfinalized());

        let result = processor.process_initiate_outbound(&print(7, SUPPLIER, 0x6f)).await;
        assert!(matches!(result, Err(SupplierError::Bitcoin(_))));
        assert!(processor.store().sent_outbound(7).await.unwrap().is_none());
        assert!(processor.store().pending_finalizes().await.unwrap().is_empty());
        assert_eq!(processor.store().broadcast_intent("outbound::7").await.unwrap(), None);
    }
}
