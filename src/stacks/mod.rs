//! Settlement Chain Module
//!
//! Access to the bridge contract on Stacks: read-only calls, the event
//! listing, and signed `finalize-outbound-swap` submissions.

pub mod api;
pub mod c32;
pub mod client;
pub mod tx;

pub use api::{unwrap_read_result, StacksApi, StacksApiConfig, BRIDGE_CONTRACT};
pub use client::{
    AccountBalances, ChainTip, ContractLog, ContractLogValue, FinalizeOutboundArgs,
    RawContractEvent, SettlementChain, StacksError, TxStatus,
};
pub use tx::{sign_contract_call, ContractCall, SignedTransaction, StacksKey, TransactionVersion};

#[cfg(test)]
pub use client::MockSettlementChain;
