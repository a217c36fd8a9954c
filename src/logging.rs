//! Structured Logging for the Swap Supplier
//!
//! JSON output on mainnet for log aggregation, pretty output elsewhere.
//! Every state change carries the swap id, txid and an explorer link so an
//! operator can reconcile by hand when a job exhausts its attempts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use swap_supplier::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! tracing::info!(target: "supplier::swap", swap_id = 7, "Sent outbound payment");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{Network, SupplierConfig};

// ============================================================================
// Log Levels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Swap state changes (redeem, send, finalize)
    Swap,
    Bitcoin,
    Stacks,
    /// Job lifecycle
    Queue,
    Balances,
    /// Startup, shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Swap id, event txid or job id this line belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

// ============================================================================
// Explorer Links
// ============================================================================

/// mempool.space link for a Bitcoin transaction
pub fn btc_tx_url(network: Network, txid: &str) -> String {
    match network {
        Network::Mainnet => format!("https://mempool.space/tx/{}", txid),
        Network::Testnet => format!("https://mempool.space/testnet/tx/{}", txid),
        Network::Mocknet => format!("http://localhost:8001/tx/{}", txid),
    }
}

/// Hiro explorer link for a Stacks transaction
pub fn stacks_tx_url(network: Network, txid: &str) -> String {
    let txid = txid.trim_start_matches("0x");
    let chain = match network {
        Network::Mainnet => "mainnet",
        Network::Testnet => "testnet",
        Network::Mocknet => "testnet&api=http://localhost:3999",
    };
    format!("https://explorer.hiro.so/txid/0x{}?chain={}", txid, chain)
}

// ============================================================================
// Event Helpers
// ============================================================================

/// Log a swap state change
pub fn log_swap_event(
    event_type: &str,
    swap_ref: &str,
    data: serde_json::Value,
    error: Option<(&str, &str)>,
) {
    let level = if error.is_some() { LogLevel::Error } else { LogLevel::Info };
    let mut event = LogEvent::new(level, EventCategory::Swap, event_type)
        .with_correlation_id(swap_ref)
        .with_data(data);

    if let Some((code, message)) = error {
        event = event.with_error(code, message);
        tracing::error!(target: "supplier::swap", "{}", event.to_json());
    } else {
        tracing::info!(target: "supplier::swap", "{}", event.to_json());
    }
}

/// Log a job lifecycle change
pub fn log_queue_event(
    queue: &str,
    job_id: &str,
    event_type: &str,
    attempt: u32,
    duration_ms: Option<u64>,
    error: Option<&str>,
) {
    let level = if error.is_some() { LogLevel::Warn } else { LogLevel::Info };
    let mut event = LogEvent::new(level, EventCategory::Queue, format!("{} {}", queue, event_type))
        .with_correlation_id(job_id)
        .with_data(serde_json::json!({
            "queue": queue,
            "attempt": attempt,
        }));

    if let Some(ms) = duration_ms {
        event = event.with_duration(ms);
    }

    match error {
        Some(err) => {
            event = event.with_error("JOB_ERROR", err);
            tracing::warn!(target: "supplier::queue", "{}", event.to_json());
        }
        None => tracing::debug!(target: "supplier::queue", "{}", event.to_json()),
    }
}

/// Log an operator balance report
pub fn log_balances(summary: &str, data: serde_json::Value) {
    let event = LogEvent::new(LogLevel::Info, EventCategory::Balances, summary).with_data(data);
    tracing::info!(target: "supplier::balances", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.as_filter();
        EnvFilter::new(format!("swap_supplier={level},supplier={level},warn"))
    });

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

pub fn init_from_config(config: &SupplierConfig) -> Result<(), LoggingError> {
    init_logging(
        LogLevel::from(config.log_level.as_str()),
        config.network.json_logs(),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// Correlation id for jobs that have no natural one
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("nonsense"), LogLevel::Info);
    }

    #[test]
    fn test_log_event_json() {
        let event = LogEvent::new(LogLevel::Error, EventCategory::Swap, "redeem failed")
            .with_correlation_id("7")
            .with_error("MISSING_PREIMAGE", "no preimage");
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["level"], "ERROR");
        assert_eq!(json["category"], "swap");
        assert_eq!(json["correlation_id"], "7");
        assert_eq!(json["error"]["code"], "MISSING_PREIMAGE");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_explorer_links() {
        assert_eq!(
            btc_tx_url(Network::Testnet, "ab"),
            "https://mempool.space/testnet/tx/ab"
        );
        assert_eq!(btc_tx_url(Network::Mainnet, "ab"), "https://mempool.space/tx/ab");
        assert_eq!(
            stacks_tx_url(Network::Mainnet, "0xcd"),
            "https://explorer.hiro.so/txid/0xcd?chain=mainnet"
        );
        assert_eq!(
            stacks_tx_url(Network::Testnet, "cd"),
            "https://explorer.hiro.so/txid/0xcd?chain=testnet"
        );
    }

    #[test]
    fn test_correlation_ids_unique() {
        assert_ne!(generate_correlation_id(), generate_correlation_id());
    }
}
