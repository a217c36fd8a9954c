//! Common Error Types for the Swap Supplier
//!
//! Each subsystem keeps its own error enum; conversions into
//! [`SupplierError`] decide how a failure is treated by the job layer.

use thiserror::Error;

use crate::btc::{BuilderError, NodeError};
use crate::config::ConfigError;
use crate::jobs::QueueError;
use crate::logging::LoggingError;
use crate::spv::SpvError;
use crate::stacks::StacksError;
use crate::storage::StorageError;

/// Root error type for the settlement engine
#[derive(Debug, Error)]
pub enum SupplierError {
    /// Fatal, halts startup
    #[error("configuration error: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("transaction of {size} bytes is over the {max} byte limit")]
    TransactionTooLarge { size: usize, max: usize },

    #[error("finalize event for {0} has no preimage")]
    MissingPreimage(String),

    #[error("no matching swap: {0}")]
    NoMatchingSwap(String),

    /// The network already has this transaction
    #[error("already broadcast: {0}")]
    AlreadyBroadcast(String),

    #[error("proof unavailable: {0}")]
    ProofUnavailable(String),

    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    #[error("swap {swap_id} expired ({age} blocks old)")]
    Expired { swap_id: u64, age: u64 },

    #[error("bitcoin error: {0}")]
    Bitcoin(String),

    #[error("stacks error: {0}")]
    Stacks(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SupplierError {
    pub fn bitcoin(msg: impl Into<String>) -> Self {
        Self::Bitcoin(msg.into())
    }

    pub fn stacks(msg: impl Into<String>) -> Self {
        Self::Stacks(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Worth another attempt later: transport failures and chain lag
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupplierError::Bitcoin(_)
                | SupplierError::Stacks(_)
                | SupplierError::Storage(_)
                | SupplierError::Queue(_)
                | SupplierError::ProofUnavailable(_)
                | SupplierError::NonceConflict(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            SupplierError::ConfigInvalid(_) => "CONFIG_INVALID",
            SupplierError::Logging(_) => "LOGGING_ERROR",
            SupplierError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SupplierError::TransactionTooLarge { .. } => "TRANSACTION_TOO_LARGE",
            SupplierError::MissingPreimage(_) => "MISSING_PREIMAGE",
            SupplierError::NoMatchingSwap(_) => "NO_MATCHING_SWAP",
            SupplierError::AlreadyBroadcast(_) => "ALREADY_BROADCAST",
            SupplierError::ProofUnavailable(_) => "PROOF_UNAVAILABLE",
            SupplierError::NonceConflict(_) => "NONCE_CONFLICT",
            SupplierError::Expired { .. } => "EXPIRED",
            SupplierError::Bitcoin(_) => "BITCOIN_ERROR",
            SupplierError::Stacks(_) => "STACKS_ERROR",
            SupplierError::Storage(_) => "STORAGE_ERROR",
            SupplierError::Queue(_) => "QUEUE_ERROR",
            SupplierError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<BuilderError> for SupplierError {
    fn from(e: BuilderError) -> Self {
        match e {
            BuilderError::InsufficientFunds {
                required,
                available,
            } => SupplierError::InsufficientFunds {
                required,
                available,
            },
            BuilderError::TransactionTooLarge { size, max } => {
                SupplierError::TransactionTooLarge { size, max }
            }
            BuilderError::UnknownVersion(_)
            | BuilderError::InvalidDestination(_)
            | BuilderError::HtlcMismatch(_)
            | BuilderError::InvalidTxid(_) => SupplierError::NoMatchingSwap(e.to_string()),
            other => SupplierError::Internal(other.to_string()),
        }
    }
}

impl From<NodeError> for SupplierError {
    fn from(e: NodeError) -> Self {
        SupplierError::Bitcoin(e.to_string())
    }
}

impl From<StacksError> for SupplierError {
    fn from(e: StacksError) -> Self {
        match e {
            StacksError::NonceConflict(msg) => SupplierError::NonceConflict(msg),
            other => SupplierError::Stacks(other.to_string()),
        }
    }
}

impl From<SpvError> for SupplierError {
    fn from(e: SpvError) -> Self {
        match e {
            SpvError::Node(inner) => inner.into(),
            SpvError::Stacks(inner) => inner.into(),
            other if other.is_retryable() => SupplierError::ProofUnavailable(other.to_string()),
            other => SupplierError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for SupplierError {
    fn from(e: StorageError) -> Self {
        SupplierError::Storage(e.to_string())
    }
}

impl From<QueueError> for SupplierError {
    fn from(e: QueueError) -> Self {
        SupplierError::Queue(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SupplierError>;
