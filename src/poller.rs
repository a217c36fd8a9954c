//! Settlement-Chain Event Poller
//!
//! Pages through the bridge contract's events newest first until it reaches
//! the cursor (the settlement txid of the newest event already handled) or
//! runs out of history.

use std::sync::Arc;

use crate::events::BridgeEvent;
use crate::stacks::{SettlementChain, StacksError};

/// Events requested per page
pub const PAGE_SIZE: u32 = 50;

/// Result of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    /// Decoded bridge events newer than the cursor, newest first
    pub events: Vec<BridgeEvent>,
    /// Settlement txid of the newest entry seen, decodable or not
    pub newest_txid: Option<String>,
    /// The chain tip moved while scanning
    pub tip_changed: bool,
}

impl PollResult {
    /// Cursor value to store once every event has been handed off.
    ///
    /// `None` when the tip moved mid-scan; the next poll rescans instead.
    pub fn next_cursor(&self) -> Option<&str> {
        if self.tip_changed {
            None
        } else {
            self.newest_txid.as_deref()
        }
    }

    /// Events in the order they happened on chain
    pub fn in_chain_order(&self) -> impl Iterator<Item = &BridgeEvent> {
        self.events.iter().rev()
    }
}

fn same_txid(a: &str, b: &str) -> bool {
    a.trim_start_matches("0x")
        .eq_ignore_ascii_case(b.trim_start_matches("0x"))
}

pub struct EventPoller {
    stacks: Arc<dyn SettlementChain>,
    page_size: u32,
}

impl EventPoller {
    pub fn new(stacks: Arc<dyn SettlementChain>) -> Self {
        Self {
            stacks,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch every bridge event newer than `cursor`
    pub async fn poll(&self, cursor: Option<&str>) -> Result<PollResult, StacksError> {
        let tip_before = self.stacks.chain_tip().await?.stacks_tip;

        let mut result = PollResult::default();
        let mut offset = 0u32;
        'pages: loop {
            let page = self.stacks.contract_events(offset, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            for raw in &page {
                if cursor.is_some_and(|c| same_txid(c, &raw.tx_id)) {
                    break 'pages;
                }
                if result.newest_txid.is_none() {
                    result.newest_txid = Some(raw.tx_id.clone());
                }
                if let Some(event) = BridgeEvent::from_raw(raw) {
                    result.events.push(event);
                }
            }
            // a short page is the oldest end of the history
            if (page.len() as u32) < self.page_size {
                break;
            }
            offset += page.len() as u32;
        }

        let tip_after = self.stacks.chain_tip().await?.stacks_tip;
        if tip_before != tip_after {
            tracing::warn!(
                %tip_before,
                %tip_after,
                "Chain tip changed while polling, cursor will not advance"
            );
            result.tip_changed = true;
        }

        tracing::debug!(
            events = result.events.len(),
            cursor = ?cursor,
            newest = ?result.newest_txid,
            "Polled bridge events"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::decode::fixtures::inbound_fields;
    use crate::events::ClarityValue;
    use crate::stacks::{
        ChainTip, ContractLog, ContractLogValue, MockSettlementChain, RawContractEvent,
    };
    use std::sync::Mutex;

    fn revoke_inbound(tx_id: &str) -> RawContractEvent {
        let mut fields = inbound_fields(1);
        fields.push(("topic", ClarityValue::StringAscii("revoke-inbound".into())));
        fields.push(("txid", ClarityValue::buffer(vec![0x01; 32])));
        RawContractEvent {
            event_index: 0,
            event_type: "smart_contract_log".into(),
            tx_id: tx_id.into(),
            contract_log: Some(ContractLog {
                contract_id: "ST000000000000000000002AMW42H.bridge".into(),
                topic: "print".into(),
                value: ContractLogValue {
                    hex: ClarityValue::tuple(fields).to_hex().unwrap(),
                    repr: None,
                },
            }),
        }
    }

    fn transfer(tx_id: &str) -> RawContractEvent {
        RawContractEvent {
            event_index: 1,
            event_type: "fungible_token_asset".into(),
            tx_id: tx_id.into(),
            contract_log: None,
        }
    }

    fn chain(history: Vec<RawContractEvent>, tips: Vec<&'static str>) -> MockSettlementChain {
        let mut chain = MockSettlementChain::new();
        chain.expect_contract_events().returning(move |offset, limit| {
            Ok(history
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        });
        let tips = Mutex::new(tips.into_iter());
        chain.expect_chain_tip().returning(move || {
            let tip = tips.lock().unwrap().next().unwrap_or("0xlast");
            Ok(ChainTip {
                burn_block_height: 100,
                stacks_tip_height: 50,
                stacks_tip: tip.to_string(),
            })
        });
        chain
    }

    fn txids(result: &PollResult) -> Vec<&str> {
        result.events.iter().map(|e| e.txid.as_str()).collect()
    }

    #[tokio::test]
    async fn test_stops_at_cursor() {
        let history = ["0xe5", "0xe4", "0xe3", "0xc", "0xe1"]
            .into_iter()
            .map(revoke_inbound)
            .collect();
        let poller = EventPoller::new(Arc::new(chain(history, vec!["a", "a"])));

        let result = poller.poll(Some("0xc")).await.unwrap();
        assert_eq!(txids(&result), vec!["0xe5", "0xe4", "0xe3"]);
        assert_eq!(result.next_cursor(), Some("0xe5"));
        let ordered: Vec<_> = result.in_chain_order().map(|e| e.txid.as_str()).collect();
        assert_eq!(ordered, vec!["0xe3", "0xe4", "0xe5"]);
    }

    #[tokio::test]
    async fn test_pages_until_cursor() {
        let history = ["0x6", "0x5", "0x4", "0x3", "0x2", "0x1"]
            .into_iter()
            .map(revoke_inbound)
            .collect();
        let poller = EventPoller::new(Arc::new(chain(history, vec!["a", "a"]))).with_page_size(2);

        let result = poller.poll(Some("2")).await.unwrap();
        assert_eq!(txids(&result), vec!["0x6", "0x5", "0x4", "0x3"]);
    }

    #[tokio::test]
    async fn test_cold_start_reads_all_history() {
        let history = ["0x3", "0x2", "0x1"].into_iter().map(revoke_inbound).collect();
        let poller = EventPoller::new(Arc::new(chain(history, vec!["a", "a"]))).with_page_size(2);

        let result = poller.poll(None).await.unwrap();
        assert_eq!(result.events.len(), 3);
        assert_eq!(result.next_cursor(), Some("0x3"));
    }

    #[tokio::test]
    async fn test_foreign_events_advance_cursor_only() {
        let history = vec![transfer("0x9"), revoke_inbound("0x8"), transfer("0x7")];
        let poller = EventPoller::new(Arc::new(chain(history, vec!["a", "a"])));

        let result = poller.poll(Some("0x7")).await.unwrap();
        assert_eq!(txids(&result), vec!["0x8"]);
        assert_eq!(result.next_cursor(), Some("0x9"));
    }

    #[tokio::test]
    async fn test_nothing_new() {
        let history = vec![revoke_inbound("0x2"), revoke_inbound("0x1")];
        let poller = EventPoller::new(Arc::new(chain(history, vec!["a", "a"])));

        let result = poller.poll(Some("0x2")).await.unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.next_cursor(), None);
    }

    #[tokio::test]
    async fn test_tip_race_holds_cursor() {
        let history = vec![revoke_inbound("0x2"), revoke_inbound("0x1")];
        let poller = EventPoller::new(Arc::new(chain(history, vec!["a", "b"])));

        let result = poller.poll(None).await.unwrap();
        assert_eq!(result.events.len(), 2);
        assert!(result.tip_changed);
        assert_eq!(result.next_cursor(), None);
    }

    #[tokio::test]
    async fn test_short_page_ends_history() {
        let history: Vec<RawContractEvent> =
            ["0x3", "0x2", "0x1"].into_iter().map(revoke_inbound).collect();
        let mut chain = MockSettlementChain::new();
        chain
            .expect_contract_events()
            .times(2)
            .returning(move |offset, limit| {
                assert!(offset < 3, "read past a short page at offset {}", offset);
                Ok(history
                    .iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect())
            });
        chain.expect_chain_tip().returning(|| {
            Ok(ChainTip {
                burn_block_height: 100,
                stacks_tip_height: 50,
                stacks_tip: "0xtip".into(),
            })
        });
        let poller = EventPoller::new(Arc::new(chain)).with_page_size(2);

        let result = poller.poll(None).await.unwrap();
        assert_eq!(txids(&result), vec!["0x3", "0x2", "0x1"]);
    }
}
