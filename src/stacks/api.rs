//! Stacks Node HTTP Client
//!
//! Talks to a Stacks node (`/v2`) and its blockchain API (`/extended/v1`).

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::client::{
    AccountBalances, ChainTip, FinalizeOutboundArgs, RawContractEvent, SettlementChain,
    StacksError, TxStatus,
};
use super::tx::{sign_contract_call, ContractCall, StacksKey, TransactionVersion};
use crate::events::{ClarityValue, FromClarity};
use crate::types::{FullInboundSwap, InboundSwap, OutboundSwap, Supplier};

/// Stacks API endpoints
pub const MAINNET_URL: &str = "https://stacks-node-api.mainnet.stacks.co";
pub const TESTNET_URL: &str = "https://stacks-node-api.testnet.stacks.co";
pub const MOCKNET_URL: &str = "http://localhost:3999";

pub const BRIDGE_CONTRACT: &str = "bridge";

/// Rejection reasons that mean another transaction holds the nonce
const NONCE_REJECTIONS: &[&str] = &["ConflictingNonceInMempool", "BadNonce"];

/// Connection and signing parameters
#[derive(Debug, Clone)]
pub struct StacksApiConfig {
    pub base_url: String,
    /// Bridge deployer address
    pub contract_address: String,
    pub contract_name: String,
    /// Fully qualified wrapped-BTC asset identifier
    pub xbtc_asset: String,
    pub version: TransactionVersion,
    /// Flat fee for contract calls, in micro-STX
    pub tx_fee: u64,
}

impl StacksApiConfig {
    pub fn new(base_url: &str, contract_address: &str, version: TransactionVersion) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            contract_address: contract_address.to_string(),
            contract_name: BRIDGE_CONTRACT.to_string(),
            xbtc_asset: format!("{}.Wrapped-Bitcoin::wrapped-bitcoin", contract_address),
            version,
            tx_fee: 10_000,
        }
    }

    pub fn contract_id(&self) -> String {
        format!("{}.{}", self.contract_address, self.contract_name)
    }
}

/// HTTP implementation of [`SettlementChain`]
#[derive(Debug, Clone)]
pub struct StacksApi {
    client: Client,
    config: StacksApiConfig,
    key: StacksKey,
    /// Operator address; sender of read-only calls and owner of the nonce
    sender: String,
}

#[derive(Debug, Serialize)]
struct ReadOnlyRequest<'a> {
    sender: &'a str,
    arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReadOnlyResponse {
    okay: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    cause: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    results: Vec<RawContractEvent>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    tx_status: String,
}

#[derive(Debug, Deserialize)]
struct NoncesResponse {
    possible_next_nonce: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    balance: String,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    stx: BalanceEntry,
    #[serde(default)]
    fungible_tokens: HashMap<String, BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BroadcastRejection {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    txid: Option<String>,
}

/// Strip the wrappers read-only functions put around their value:
/// `(ok v)` and `(some v)` unwrap, `(err e)` and `none` mean "no value"
pub fn unwrap_read_result(value: ClarityValue) -> Option<ClarityValue> {
    match value {
        ClarityValue::ResponseOk(inner) => unwrap_read_result(*inner),
        ClarityValue::ResponseErr(_) | ClarityValue::OptionalNone => None,
        ClarityValue::OptionalSome(inner) => Some(*inner),
        other => Some(other),
    }
}

/// Classify a `/v2/transactions` rejection body
fn rejection_error(body: &str) -> StacksError {
    match serde_json::from_str::<BroadcastRejection>(body) {
        Ok(rejection) => {
            let reason = rejection.reason.unwrap_or(rejection.error);
            if NONCE_REJECTIONS.iter().any(|r| reason == *r) {
                StacksError::NonceConflict(reason)
            } else {
                StacksError::Rejected {
                    reason,
                    txid: rejection.txid,
                }
            }
        }
        Err(_) => StacksError::Rejected {
            reason: body.to_string(),
            txid: None,
        },
    }
}

fn txid_arg(txid: &str) -> Result<ClarityValue, StacksError> {
    let txid = txid.strip_prefix("0x").unwrap_or(txid);
    let bytes = hex::decode(txid).map_err(|e| StacksError::InvalidData(e.to_string()))?;
    Ok(ClarityValue::buffer(bytes))
}

fn parse_balance(s: &str) -> Result<u64, StacksError> {
    s.parse()
        .map_err(|_| StacksError::InvalidData(format!("invalid balance: {}", s)))
}

impl StacksApi {
    pub fn new(config: StacksApiConfig, key: StacksKey) -> Result<Self, StacksError> {
        let sender = key.address(config.version)?;
        Ok(Self {
            client: Client::new(),
            config,
            key,
            sender,
        })
    }

    pub fn config(&self) -> &StacksApiConfig {
        &self.config
    }

    /// Operator settlement-chain address
    pub fn address(&self) -> &str {
        &self.sender
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Option<T>, StacksError> {
        let url = format!("{}{}", self.config.base_url, path);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StacksError::Api { status, body });
        }
        Ok(Some(resp.json().await?))
    }

    async fn get_required<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, StacksError> {
        self.get_json(path).await?.ok_or_else(|| StacksError::Api {
            status: 404,
            body: format!("not found: {}", path),
        })
    }

    /// Call a read-only bridge function and unwrap its result
    async fn read_only(
        &self,
        function: &str,
        args: &[ClarityValue],
    ) -> Result<Option<ClarityValue>, StacksError> {
        let url = format!(
            "{}/v2/contracts/call-read/{}/{}/{}",
            self.config.base_url, self.config.contract_address, self.config.contract_name, function
        );
        let arguments = args
            .iter()
            .map(ClarityValue::to_hex)
            .collect::<Result<Vec<_>, _>>()?;
        let request = ReadOnlyRequest {
            sender: &self.sender,
            arguments,
        };

        let resp = self.client.post(&url).json(&request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StacksError::Api { status, body });
        }

        let body: ReadOnlyResponse = resp.json().await?;
        if !body.okay {
            return Err(StacksError::ReadOnly {
                function: function.to_string(),
                cause: body.cause.unwrap_or_default(),
            });
        }
        let result = body.result.ok_or_else(|| StacksError::ReadOnly {
            function: function.to_string(),
            cause: "empty result".to_string(),
        })?;
        Ok(unwrap_read_result(ClarityValue::from_hex(&result)?))
    }

    async fn read_record<T: FromClarity>(
        &self,
        function: &str,
        args: &[ClarityValue],
    ) -> Result<Option<T>, StacksError> {
        match self.read_only(function, args).await? {
            Some(value) => Ok(Some(T::from_clarity(&value)?)),
            None => Ok(None),
        }
    }

    async fn broadcast(&self, tx: &[u8]) -> Result<String, StacksError> {
        let url = format!("{}/v2/transactions", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(tx.to_vec())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(rejection_error(&body));
        }
        let txid: String = serde_json::from_str(&body).unwrap_or_else(|_| body.trim().to_string());
        Ok(txid.trim_start_matches("0x").to_string())
    }
}

#[async_trait]
impl SettlementChain for StacksApi {
    async fn get_inbound_swap(&self, txid: &str) -> Result<Option<InboundSwap>, StacksError> {
        self.read_record("get-inbound-swap", &[txid_arg(txid)?]).await
    }

    async fn get_full_inbound(&self, txid: &str) -> Result<Option<FullInboundSwap>, StacksError> {
        self.read_record("get-full-inbound", &[txid_arg(txid)?]).await
    }

    async fn get_outbound_swap(&self, swap_id: u64) -> Result<Option<OutboundSwap>, StacksError> {
        self.read_record("get-outbound-swap", &[ClarityValue::uint(swap_id)])
            .await
    }

    async fn get_completed_outbound_swap_txid(
        &self,
        swap_id: u64,
    ) -> Result<Option<String>, StacksError> {
        let value = self
            .read_only("get-completed-outbound-swap-txid", &[ClarityValue::uint(swap_id)])
            .await?;
        Ok(value.and_then(|v| v.as_buffer().map(hex::encode)))
    }

    async fn get_preimage(&self, txid: &str) -> Result<Option<Vec<u8>>, StacksError> {
        let value = self.read_only("get-preimage", &[txid_arg(txid)?]).await?;
        Ok(value.and_then(|v| v.as_buffer().map(<[u8]>::to_vec)))
    }

    async fn get_supplier(&self, supplier_id: u64) -> Result<Option<Supplier>, StacksError> {
        self.read_record("get-supplier", &[ClarityValue::uint(supplier_id)])
            .await
    }

    async fn get_funds(&self, supplier_id: u64) -> Result<u64, StacksError> {
        let value = self
            .read_only("get-funds", &[ClarityValue::uint(supplier_id)])
            .await?;
        let funds = value.and_then(|v| v.as_uint()).unwrap_or(0);
        u64::try_from(funds).map_err(|_| StacksError::InvalidData(format!("funds out of range: {}", funds)))
    }

    async fn contract_events(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<RawContractEvent>, StacksError> {
        let path = format!(
            "/extended/v1/contract/{}/events?offset={}&limit={}",
            self.config.contract_id(),
            offset,
            limit
        );
        let resp: EventsResponse = self.get_required(&path).await?;
        Ok(resp.results)
    }

    async fn tx_status(&self, txid: &str) -> Result<TxStatus, StacksError> {
        let txid = if txid.starts_with("0x") {
            txid.to_string()
        } else {
            format!("0x{}", txid)
        };
        let resp: Option<TxResponse> = self.get_json(&format!("/extended/v1/tx/{}", txid)).await?;
        Ok(match resp {
            Some(tx) => TxStatus::from_api(&tx.tx_status),
            None => TxStatus::NotFound,
        })
    }

    async fn account_nonce(&self, address: &str) -> Result<u64, StacksError> {
        let resp: NoncesResponse = self
            .get_required(&format!("/extended/v1/address/{}/nonces", address))
            .await?;
        Ok(resp.possible_next_nonce)
    }

    async fn stacks_height_at_burn_height(
        &self,
        burn_height: u64,
    ) -> Result<Option<u64>, StacksError> {
        let resp: Option<BlockResponse> = self
            .get_json(&format!("/extended/v1/block/by_burn_block_height/{}", burn_height))
            .await?;
        Ok(resp.map(|b| b.height))
    }

    async fn chain_tip(&self) -> Result<ChainTip, StacksError> {
        self.get_required("/v2/info").await
    }

    async fn account_balances(&self, address: &str) -> Result<AccountBalances, StacksError> {
        let resp: BalancesResponse = self
            .get_required(&format!("/extended/v1/address/{}/balances", address))
            .await?;
        let xbtc_sats = match resp.fungible_tokens.get(&self.config.xbtc_asset) {
            Some(entry) => parse_balance(&entry.balance)?,
            None => 0,
        };
        Ok(AccountBalances {
            micro_stx: parse_balance(&resp.stx.balance)?,
            xbtc_sats,
        })
    }

    async fn submit_finalize_outbound(
        &self,
        args: &FinalizeOutboundArgs,
        nonce: u64,
    ) -> Result<String, StacksError> {
        let call = ContractCall {
            contract_address: self.config.contract_address.clone(),
            contract_name: self.config.contract_name.clone(),
            function_name: "finalize-outbound-swap".to_string(),
            args: args.to_clarity_args(),
        };
        let signed = sign_contract_call(&self.key, self.config.version, &call, nonce, self.config.tx_fee)?;
        tracing::debug!(
            swap_id = args.swap_id,
            nonce,
            txid = %signed.txid,
            "Submitting finalize-outbound-swap"
        );
        self.broadcast(&signed.bytes).await
    }
}
