//! Swap State Store
//!
//! Idempotency markers and the event cursor, stored under a network-scoped
//! key prefix. These key families are the whole durable contract between
//! the engine and its own restarts:
//!
//! | key | value |
//! |---|---|
//! | `<prefix>:last_seen_txid` | settlement txid of the newest processed event |
//! | `<prefix>:redeemed::<txid>` | redemption txid for an inbound HTLC |
//! | `<prefix>:sent_outbound::<swap_id>` | BTC payment txid |
//! | `<prefix>:finalized_outbound::<swap_id>` | settlement finalize txid |
//! | `<prefix>:pending_finalized_outbound` | set of `<swap_id>::<btc_txid>` |
//! | `<prefix>:broadcast_intent::<action>` | raw hex of a tx written before broadcast |
//! | `<prefix>:finalize_attempts::<swap_id>` | finalize submissions so far |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::traits::{KvStore, StorageError, StorageResult};

/// Outbound payment awaiting proof submission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingFinalize {
    pub swap_id: u64,
    pub btc_txid: String,
}

impl PendingFinalize {
    pub fn new(swap_id: u64, btc_txid: impl Into<String>) -> Self {
        Self {
            swap_id,
            btc_txid: btc_txid.into(),
        }
    }
}

impl fmt::Display for PendingFinalize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.swap_id, self.btc_txid)
    }
}

impl FromStr for PendingFinalize {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, txid) = s
            .split_once("::")
            .ok_or_else(|| StorageError::InvalidData(format!("pending member: {}", s)))?;
        let swap_id = id
            .parse()
            .map_err(|_| StorageError::InvalidData(format!("pending swap id: {}", s)))?;
        if txid.is_empty() {
            return Err(StorageError::InvalidData(format!("pending txid: {}", s)));
        }
        Ok(Self::new(swap_id, txid))
    }
}

/// Typed view over a [`KvStore`] for one network
#[derive(Clone)]
pub struct SwapStore {
    kv: Arc<dyn KvStore>,
    prefix: String,
}

impl SwapStore {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    fn last_seen_key(&self) -> String {
        self.key("last_seen_txid")
    }

    fn redeemed_key(&self, txid: &str) -> String {
        self.key(&format!("redeemed::{}", txid))
    }

    fn sent_outbound_key(&self, swap_id: u64) -> String {
        self.key(&format!("sent_outbound::{}", swap_id))
    }

    fn finalized_outbound_key(&self, swap_id: u64) -> String {
        self.key(&format!("finalized_outbound::{}", swap_id))
    }

    fn intent_key(&self, action: &str) -> String {
        self.key(&format!("broadcast_intent::{}", action))
    }

    fn finalize_attempts_key(&self, swap_id: u64) -> String {
        self.key(&format!("finalize_attempts::{}", swap_id))
    }

    fn pending_key(&self) -> String {
        self.key("pending_finalized_outbound")
    }

    pub async fn last_seen_txid(&self) -> StorageResult<Option<String>> {
        self.kv.get(&self.last_seen_key()).await
    }

    pub async fn set_last_seen_txid(&self, txid: &str) -> StorageResult<()> {
        self.kv.set(&self.last_seen_key(), txid).await
    }

    pub async fn redeemed(&self, txid: &str) -> StorageResult<Option<String>> {
        self.kv.get(&self.redeemed_key(txid)).await
    }

    pub async fn set_redeemed(&self, txid: &str, redeem_txid: &str) -> StorageResult<()> {
        self.kv.set(&self.redeemed_key(txid), redeem_txid).await
    }

    pub async fn sent_outbound(&self, swap_id: u64) -> StorageResult<Option<String>> {
        self.kv.get(&self.sent_outbound_key(swap_id)).await
    }

    pub async fn set_sent_outbound(&self, swap_id: u64, btc_txid: &str) -> StorageResult<()> {
        self.kv.set(&self.sent_outbound_key(swap_id), btc_txid).await
    }

    pub async fn finalized_outbound(&self, swap_id: u64) -> StorageResult<Option<String>> {
        self.kv.get(&self.finalized_outbound_key(swap_id)).await
    }

    pub async fn set_finalized_outbound(&self, swap_id: u64, stx_txid: &str) -> StorageResult<()> {
        self.kv
            .set(&self.finalized_outbound_key(swap_id), stx_txid)
            .await
    }

    /// Raw hex of a transaction about to be broadcast for `action`
    pub async fn broadcast_intent(&self, action: &str) -> StorageResult<Option<String>> {
        self.kv.get(&self.intent_key(action)).await
    }

    pub async fn set_broadcast_intent(&self, action: &str, raw_hex: &str) -> StorageResult<()> {
        self.kv.set(&self.intent_key(action), raw_hex).await
    }

    pub async fn clear_broadcast_intent(&self, action: &str) -> StorageResult<bool> {
        self.kv.delete(&self.intent_key(action)).await
    }

    /// Finalize submissions made so far for an outbound swap
    pub async fn finalize_attempts(&self, swap_id: u64) -> StorageResult<u32> {
        match self.kv.get(&self.finalize_attempts_key(swap_id)).await? {
            Some(raw) => raw.parse().map_err(|_| {
                StorageError::InvalidData(format!("finalize attempts for {}: {}", swap_id, raw))
            }),
            None => Ok(0),
        }
    }

    /// Count one more finalize submission; returns the new total
    pub async fn record_finalize_attempt(&self, swap_id: u64) -> StorageResult<u32> {
        let attempts = self.finalize_attempts(swap_id).await?.saturating_add(1);
        self.kv
            .set(&self.finalize_attempts_key(swap_id), &attempts.to_string())
            .await?;
        Ok(attempts)
    }

    pub async fn clear_finalize_attempts(&self, swap_id: u64) -> StorageResult<()> {
        self.kv.delete(&self.finalize_attempts_key(swap_id)).await?;
        Ok(())
    }

    pub async fn add_pending_finalize(&self, pending: &PendingFinalize) -> StorageResult<bool> {
        self.kv
            .set_add(&self.pending_key(), &pending.to_string())
            .await
    }

    pub async fn remove_pending_finalize(&self, pending: &PendingFinalize) -> StorageResult<bool> {
        self.kv
            .set_remove(&self.pending_key(), &pending.to_string())
            .await
    }

    /// Pending finalizations; unparseable members are dropped with a warning
    pub async fn pending_finalizes(&self) -> StorageResult<Vec<PendingFinalize>> {
        let members = self.kv.set_members(&self.pending_key()).await?;
        Ok(members
            .iter()
            .filter_map(|m| match m.parse() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(member = %m, error = %e, "Ignoring malformed pending finalize");
                    None
                }
            })
            .collect())
    }
}
