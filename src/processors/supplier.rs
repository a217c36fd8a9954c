//! Supplier Account Checks
//!
//! Balance reporting and the startup check that the configured keys belong
//! to the registered supplier.

use bitcoin::{Address, PublicKey};
use serde::Serialize;

use super::SwapProcessor;
use crate::common::SupplierError;
use crate::config::ConfigError;
use crate::logging::log_balances;
use crate::types::units::{micro_stx_to_stx_string, sats_to_btc_string};

/// Operator balances across both chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub btc_sats: u64,
    pub micro_stx: u64,
    /// Wrapped BTC held by the operator account
    pub xbtc_sats: u64,
    /// Wrapped BTC escrowed as supplier funds in the bridge
    pub bridge_sats: u64,
}

impl BalanceReport {
    pub fn message(&self) -> String {
        format!(
            "Balances: {} STX; {} BTC; {} xBTC",
            micro_stx_to_stx_string(self.micro_stx),
            sats_to_btc_string(self.btc_sats),
            sats_to_btc_string(self.bridge_sats)
        )
    }
}

impl SwapProcessor {
    pub async fn report_balances(&self) -> Result<BalanceReport, SupplierError> {
        let wallet_script = self.builder.wallet().script_pubkey();
        let (btc, account, bridge) = tokio::try_join!(
            async { self.btc.balance(&wallet_script).await.map_err(SupplierError::from) },
            async {
                self.stacks
                    .account_balances(&self.stx_address)
                    .await
                    .map_err(SupplierError::from)
            },
            async { self.stacks.get_funds(self.supplier_id).await.map_err(SupplierError::from) },
        )?;

        let report = BalanceReport {
            btc_sats: btc.total(),
            micro_stx: account.micro_stx,
            xbtc_sats: account.xbtc_sats,
            bridge_sats: bridge,
        };
        log_balances(
            &report.message(),
            serde_json::json!({
                "btc": sats_to_btc_string(report.btc_sats),
                "stx": micro_stx_to_stx_string(report.micro_stx),
                "xbtc": sats_to_btc_string(report.xbtc_sats),
                "bridge": sats_to_btc_string(report.bridge_sats),
            }),
        );
        Ok(report)
    }

    /// The on-chain supplier record must name our Stacks account and BTC key
    pub async fn validate_supplier_keys(&self) -> Result<(), SupplierError> {
        let supplier = self
            .stacks
            .get_supplier(self.supplier_id)
            .await?
            .ok_or_else(|| {
                ConfigError::KeyMismatch(format!("no supplier with id {}", self.supplier_id))
            })?;

        if supplier.controller != self.stx_address {
            return Err(ConfigError::KeyMismatch(format!(
                "STX key invalid: expected {} to equal {}",
                supplier.controller, self.stx_address
            ))
            .into());
        }

        let wallet = self.builder.wallet();
        let registered = PublicKey::from_slice(&supplier.public_key)
            .map(|pk| Address::p2pkh(pk, wallet.network()).to_string())
            .map_err(|e| ConfigError::KeyMismatch(format!("supplier public key invalid: {}", e)))?;
        let ours = wallet.address().to_string();
        if registered != ours {
            return Err(ConfigError::KeyMismatch(format!(
                "BTC key invalid: expected {} to equal {}",
                registered, ours
            ))
            .into());
        }

        tracing::info!(
            supplier_id = self.supplier_id,
            stx = %self.stx_address,
            btc = %ours,
            "Supplier keys match"
        );
        Ok(())
    }
}
