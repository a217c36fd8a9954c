//! Swap Supplier - Operator Service
//!
//! Run modes:
//!   swap-supplier worker          - Run the queue worker until Ctrl-C
//!   swap-supplier check-config    - Validate configuration and supplier keys
//!   swap-supplier balances        - Print operator balances
//!   swap-supplier process         - Poll and process new events once

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use swap_supplier::jobs::{JobStore, Orchestrator};
use swap_supplier::logging::init_from_config;
use swap_supplier::storage::{open_pool, SqliteKvStore, SqlitePool};
use swap_supplier::{
    ElectrumNode, StacksApi, SupplierConfig, SupplierError, SwapProcessor, SwapStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let result = match args[1].as_str() {
        "worker" => run_worker().await,
        "check-config" => run_check_config().await,
        "balances" => run_balances().await,
        "process" => run_process().await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("Swap Supplier - BTC <-> xBTC bridge operator");
    println!();
    println!("Usage:");
    println!("  swap-supplier worker          Run the queue worker until Ctrl-C");
    println!("  swap-supplier check-config    Validate configuration and supplier keys");
    println!("  swap-supplier balances        Print operator balances");
    println!("  swap-supplier process         Poll and process new events once");
    println!();
    println!("Environment Variables:");
    println!("  SUPPLIER_NETWORK            mainnet | testnet | mocknet");
    println!("  SUPPLIER_BTC_KEY            Operator Bitcoin key (WIF)");
    println!("  SUPPLIER_STX_KEY            Operator Stacks key (hex)");
    println!("  SUPPLIER_ID                 Registered supplier id");
    println!("  SUPPLIER_CONTRACT_ADDRESS   Bridge deployer address");
    println!("  STACKS_API_URL              Stacks API endpoint");
    println!("  ELECTRUM_HOST / ELECTRUM_PORT / ELECTRUM_PROTOCOL");
    println!("  SUPPLIER_DB_PATH            SQLite file (default: data/supplier-<network>.db)");
    println!("  SUPPLIER_LOG_LEVEL          trace | debug | info | warn | error");
    println!();
    println!("OPERATOR_* names are accepted for the SUPPLIER_* variables.");
}

/// Everything a run mode needs, wired from the environment
struct Runtime {
    config: SupplierConfig,
    pool: SqlitePool,
    processor: SwapProcessor,
}

async fn setup() -> Result<Runtime, SupplierError> {
    let config = SupplierConfig::from_env()?;
    init_from_config(&config)?;
    tracing::info!(config = %config.summary(), "Loaded configuration");

    let pool = open_pool(&config.db_path)?;
    let kv = SqliteKvStore::from_pool(pool.clone())?;
    let store = SwapStore::new(Arc::new(kv), config.network.store_prefix());

    let btc = Arc::new(ElectrumNode::new(config.electrum.clone()));
    let stacks = Arc::new(StacksApi::new(config.stacks_api_config(), config.stacks_key()?)?);
    let processor = SwapProcessor::from_config(&config, store, btc, stacks)?;

    Ok(Runtime {
        config,
        pool,
        processor,
    })
}

async fn run_worker() -> Result<(), SupplierError> {
    let runtime = setup().await?;
    if let Err(e) = runtime.processor.validate_supplier_keys().await {
        if !e.is_retryable() {
            return Err(e);
        }
        tracing::warn!(error = %e, "Could not validate supplier keys, continuing");
    }

    let jobs = JobStore::new(runtime.pool.clone())?;
    let orchestrator = Arc::new(Orchestrator::new(jobs, runtime.processor));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(
        network = %runtime.config.network,
        supplier_id = runtime.config.supplier_id,
        "Starting supplier worker"
    );
    orchestrator.run(shutdown_rx).await
}

async fn run_check_config() -> Result<(), SupplierError> {
    let runtime = setup().await?;
    let config = &runtime.config;

    println!("Configuration OK");
    println!("  Network:      {}", config.network);
    println!("  Supplier ID:  {}", config.supplier_id);
    println!("  BTC address:  {}", config.btc_address()?);
    println!("  STX address:  {}", config.stx_address()?);
    println!("  Electrum:     {}", config.electrum.url());
    println!("  Stacks API:   {}", config.stacks_api_url);
    println!();

    match runtime.processor.validate_supplier_keys().await {
        Ok(()) => {
            println!("Supplier keys match the on-chain record");
            Ok(())
        }
        Err(e) if e.is_retryable() => {
            println!("Settlement chain unreachable, key check skipped: {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn run_balances() -> Result<(), SupplierError> {
    let runtime = setup().await?;
    let report = runtime.processor.report_balances().await?;
    println!("{}", report.message());
    Ok(())
}

async fn run_process() -> Result<(), SupplierError> {
    let runtime = setup().await?;
    let jobs = JobStore::new(runtime.pool.clone())?;
    let orchestrator = Orchestrator::new(jobs, runtime.processor);

    let report = orchestrator.process_once().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).map_err(|e| SupplierError::internal(e.to_string()))?
    );
    Ok(())
}
