//! Swap Processors
//!
//! One processor instance acts for one supplier. Each entry point is safe to
//! re-invoke with the same input: idempotency markers in the [`SwapStore`]
//! are checked at the start and again right before the irreversible action.
//!
//! Expected failures come back as `Ok(ProcessOutcome::Failed)`. Only
//! retryable errors are returned as `Err` so the job layer can back off.

pub mod finalize;
pub mod outbound;
pub mod redeem;
pub mod supplier;

use std::sync::Arc;

use bitcoin::{consensus, Transaction, Txid};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

pub use finalize::{SweepReport, MAX_FINALIZE_ATTEMPTS, PAYMENT_OUTPUT_INDEX};
pub use outbound::OUTBOUND_EXPIRY_WINDOW;
pub use supplier::BalanceReport;

use crate::btc::{try_broadcast, BitcoinNode, NodeError, TxBuilder};
use crate::common::SupplierError;
use crate::config::{ConfigError, Network, SupplierConfig};
use crate::logging::log_swap_event;
use crate::spv::SpvProofAssembler;
use crate::stacks::SettlementChain;
use crate::storage::SwapStore;

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Nothing to do (other supplier, already handled)
    Skipped { reason: String },
    /// Terminal for this event; retrying will not help
    Failed { code: String, error: String },
    Redeemed {
        txid: String,
        redeem_txid: String,
        sats: u64,
    },
    Sent {
        swap_id: u64,
        btc_txid: String,
        sats: u64,
    },
}

impl ProcessOutcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        ProcessOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessOutcome::Skipped { .. })
    }

    /// Error code of a failed outcome
    pub fn failure_code(&self) -> Option<&str> {
        match self {
            ProcessOutcome::Failed { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Turn expected failures into a `Failed` outcome; pass retryable ones through
pub(crate) fn settle(
    swap_ref: &str,
    result: Result<ProcessOutcome, SupplierError>,
) -> Result<ProcessOutcome, SupplierError> {
    match result {
        Err(e) if !e.is_retryable() => {
            log_swap_event(
                "swap_failed",
                swap_ref,
                serde_json::json!({ "swap": swap_ref }),
                Some((e.error_code(), &e.to_string())),
            );
            Ok(ProcessOutcome::Failed {
                code: e.error_code().to_string(),
                error: e.to_string(),
            })
        }
        other => other,
    }
}

/// Handles bridge events on behalf of one supplier
#[derive(Clone)]
pub struct SwapProcessor {
    supplier_id: u64,
    network: Network,
    stx_address: String,
    store: SwapStore,
    btc: Arc<dyn BitcoinNode>,
    stacks: Arc<dyn SettlementChain>,
    builder: TxBuilder,
    spv: SpvProofAssembler,
    /// Held from coin listing through broadcast by every wallet spend
    wallet_lock: Arc<Mutex<()>>,
}

impl SwapProcessor {
    pub fn new(
        supplier_id: u64,
        network: Network,
        stx_address: impl Into<String>,
        store: SwapStore,
        btc: Arc<dyn BitcoinNode>,
        stacks: Arc<dyn SettlementChain>,
        builder: TxBuilder,
    ) -> Self {
        let spv = SpvProofAssembler::new(btc.clone(), stacks.clone());
        Self {
            supplier_id,
            network,
            stx_address: stx_address.into(),
            store,
            btc,
            stacks,
            builder,
            spv,
            wallet_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wire a processor from configuration and already-built clients
    pub fn from_config(
        config: &SupplierConfig,
        store: SwapStore,
        btc: Arc<dyn BitcoinNode>,
        stacks: Arc<dyn SettlementChain>,
    ) -> Result<Self, ConfigError> {
        let wallet = Arc::new(config.operator_wallet()?);
        Ok(Self::new(
            config.supplier_id,
            config.network,
            config.stx_address()?,
            store,
            btc,
            stacks,
            TxBuilder::new(wallet, config.max_tx_size),
        ))
    }

    pub fn with_spv(mut self, spv: SpvProofAssembler) -> Self {
        self.spv = spv;
        self
    }

    pub fn supplier_id(&self) -> u64 {
        self.supplier_id
    }

    pub fn store(&self) -> &SwapStore {
        &self.store
    }

    pub fn stacks(&self) -> &Arc<dyn SettlementChain> {
        &self.stacks
    }

    fn is_ours(&self, supplier: u64) -> bool {
        supplier == self.supplier_id
    }

    async fn lock_wallet(&self) -> MutexGuard<'_, ()> {
        self.wallet_lock.lock().await
    }

    /// Broadcast a wallet transaction behind a durable intent record.
    ///
    /// The raw transaction is stored under `action` before it leaves, so a
    /// run that dies before writing its marker is picked up by
    /// [`Self::resume_broadcast`] instead of spending again. A rejection by
    /// the node clears the record.
    async fn broadcast_with_intent(
        &self,
        action: &str,
        tx: &Transaction,
    ) -> Result<Txid, SupplierError> {
        self.store
            .set_broadcast_intent(action, &consensus::encode::serialize_hex(tx))
            .await?;
        match try_broadcast(self.btc.as_ref(), tx).await {
            Ok(sent) => Ok(sent.txid()),
            Err(NodeError::Rpc(message)) => {
                self.store.clear_broadcast_intent(action).await?;
                Err(NodeError::Rpc(message).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-send the transaction an interrupted run recorded for `action`.
    ///
    /// `None` when nothing was recorded or the node now refuses it, in which
    /// case the caller builds a fresh one.
    async fn resume_broadcast(&self, action: &str) -> Result<Option<Txid>, SupplierError> {
        let Some(raw_hex) = self.store.broadcast_intent(action).await? else {
            return Ok(None);
        };
        let recorded: Option<Transaction> = hex::decode(&raw_hex)
            .ok()
            .and_then(|raw| consensus::deserialize(&raw).ok());
        let Some(tx) = recorded else {
            tracing::warn!(action, "Dropping unreadable broadcast intent");
            self.store.clear_broadcast_intent(action).await?;
            return Ok(None);
        };

        match try_broadcast(self.btc.as_ref(), &tx).await {
            Ok(sent) => {
                tracing::warn!(action, txid = %sent.txid(), "Resumed interrupted broadcast");
                Ok(Some(sent.txid()))
            }
            Err(NodeError::Rpc(message)) => {
                tracing::warn!(
                    action,
                    txid = %tx.compute_txid(),
                    %message,
                    "Recorded transaction refused, building a new one"
                );
                self.store.clear_broadcast_intent(action).await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::btc::signer::tests::test_wallet;
    use crate::btc::MockBitcoinNode;
    use crate::stacks::MockSettlementChain;
    use crate::storage::{KvStore, MemoryKvStore, StorageError, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const SUPPLIER: u64 = 3;
    pub const STX_ADDRESS: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";

    /// Memory store whose first `failures` writes to matching keys error
    pub struct FailingWrites {
        pub inner: MemoryKvStore,
        key_contains: &'static str,
        failures: AtomicUsize,
    }

    impl FailingWrites {
        pub fn new(key_contains: &'static str, failures: usize) -> Self {
            Self {
                inner: MemoryKvStore::new(),
                key_contains,
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl KvStore for FailingWrites {
        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            if key.contains(self.key_contains)
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(StorageError::Connection("database is locked".into()));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> StorageResult<bool> {
            self.inner.delete(key).await
        }

        async fn set_add(&self, key: &str, member: &str) -> StorageResult<bool> {
            self.inner.set_add(key, member).await
        }

        async fn set_remove(&self, key: &str, member: &str) -> StorageResult<bool> {
            self.inner.set_remove(key, member).await
        }

        async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
            self.inner.set_members(key).await
        }
    }

    pub fn processor(btc: MockBitcoinNode, stacks: MockSettlementChain) -> SwapProcessor {
        processor_on(Arc::new(MemoryKvStore::new()), btc, stacks)
    }

    pub fn processor_on(
        kv: Arc<dyn KvStore>,
        btc: MockBitcoinNode,
        stacks: MockSettlementChain,
    ) -> SwapProcessor {
        let store = SwapStore::new(kv, "swapy-testnet");
        SwapProcessor::new(
            SUPPLIER,
            Network::Testnet,
            STX_ADDRESS,
            store,
            Arc::new(btc),
            Arc::new(stacks),
            TxBuilder::new(Arc::new(test_wallet()), 10_000),
        )
    }

    #[test]
    fn test_settle_classifies() {
        let failed = settle("7", Err(SupplierError::MissingPreimage("t1".into()))).unwrap();
        assert_eq!(failed.failure_code(), Some("MISSING_PREIMAGE"));

        let retry = settle("7", Err(SupplierError::bitcoin("timeout")));
        assert!(matches!(retry, Err(SupplierError::Bitcoin(_))));

        let ok = settle("7", Ok(ProcessOutcome::skipped("done"))).unwrap();
        assert!(ok.is_skipped());
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(ProcessOutcome::skipped("already redeemed")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "already redeemed");
    }
}
