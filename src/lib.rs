//! Swap Supplier - Operator Settlement Engine
//!
//! Runs the supplier side of a BTC <-> wrapped-BTC HTLC bridge:
//!
//! 1. **Poller** - reads new bridge prints from the settlement chain
//! 2. **Processors** - redeem inbound HTLCs, pay outbound swaps, and prove
//!    outbound payments back to the bridge contract with SPV proofs
//! 3. **Jobs** - durable queues that retry each step until it sticks
//!
//! Every processor is idempotent: markers in the [`SwapStore`] record each
//! irreversible action so redelivered events are harmless.

pub mod btc;
pub mod common;
pub mod config;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod poller;
pub mod processors;
pub mod spv;
pub mod stacks;
pub mod storage;
pub mod types;

// Re-exports: errors and configuration
pub use common::{Result, SupplierError};
pub use config::{ConfigError, Network, SupplierConfig};

// Re-exports: chain clients
pub use btc::{BitcoinNode, ElectrumNode, OperatorWallet, TxBuilder};
pub use stacks::{SettlementChain, StacksApi};

// Re-exports: pipeline
pub use events::{BridgeEvent, Print};
pub use jobs::{JobStore, Orchestrator, QueueName};
pub use poller::EventPoller;
pub use processors::{BalanceReport, ProcessOutcome, SwapProcessor, SweepReport};
pub use spv::{SpvProof, SpvProofAssembler};
pub use storage::{SqliteKvStore, SwapStore};
