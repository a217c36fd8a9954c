//! BTC Transaction Builder
//!
//! Builds and signs operator transactions:
//! - outbound payments (one payment output, one change output)
//! - inbound HTLC redemptions that also consolidate every operator coin
//!
//! Fees use a fixed legacy P2PKH size model. Every transaction balances
//! exactly: inputs = outputs + fee.

use bitcoin::{
    absolute::LockTime, consensus, transaction::Version, Address, Amount, Network, OutPoint,
    PubkeyHash, ScriptBuf, ScriptHash, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use bitcoin::hashes::Hash;
use std::str::FromStr;
use std::sync::Arc;

use super::signer::{OperatorWallet, SignerError};
use crate::types::Utxo;

/// Selection must leave at least this much headroom above amount + fee
pub const DUST_RESERVE: u64 = 5_500;

/// Outputs at or below this value are not relayed
pub const DUST_LIMIT: u64 = 546;

/// Size allowance for the P2SH HTLC input of a redemption
pub const HTLC_INPUT_VBYTES: u64 = 312;

/// Estimated vbytes of a transaction with P2PKH inputs and outputs
pub fn tx_weight(inputs: usize, outputs: usize) -> u64 {
    10 + 34 * outputs as u64 + 148 * inputs as u64
}

/// Builder errors
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("transaction of {size} bytes is over {max} bytes")]
    TransactionTooLarge { size: usize, max: usize },

    #[error("invalid txid: {0}")]
    InvalidTxid(String),

    #[error("utxo mismatch: {0}")]
    UtxoMismatch(String),

    #[error("htlc mismatch: {0}")]
    HtlcMismatch(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("unsupported address version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("signing error: {0}")]
    Signing(#[from] SignerError),

    #[error("unbalanced transaction: inputs {inputs}, outputs {outputs}, fee {fee}")]
    Unbalanced { inputs: u64, outputs: u64, fee: u64 },
}

/// Coins chosen for a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub coins: Vec<Utxo>,
    pub fee: u64,
    pub total: u64,
}

/// Greedy largest-first selection.
///
/// Stops at the first prefix where `total > amount + fee + DUST_RESERVE`,
/// with the fee priced for that many inputs and two outputs.
pub fn select_coins(
    utxos: &[Utxo],
    amount: u64,
    fee_rate: u64,
) -> Result<CoinSelection, BuilderError> {
    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.value_sats.cmp(&a.value_sats));

    let mut total = 0u64;
    for (i, utxo) in sorted.iter().enumerate() {
        total = total.saturating_add(utxo.value_sats);
        // Fees only grow with more inputs, so an overflow here is final
        let Some((fee, needed)) = payment_need(amount, fee_rate, i + 1) else {
            break;
        };
        if total > needed {
            sorted.truncate(i + 1);
            return Ok(CoinSelection {
                coins: sorted,
                fee,
                total,
            });
        }
    }

    let required = payment_need(amount, fee_rate, sorted.len().max(1))
        .map(|(_, needed)| needed.saturating_add(1))
        .unwrap_or(u64::MAX);
    Err(BuilderError::InsufficientFunds {
        required,
        available: total,
    })
}

/// Fee and `amount + fee + DUST_RESERVE` for a two-output spend; `None` on overflow
fn payment_need(amount: u64, fee_rate: u64, inputs: usize) -> Option<(u64, u64)> {
    let fee = fee_rate.checked_mul(tx_weight(inputs, 2))?;
    let needed = amount.checked_add(fee)?.checked_add(DUST_RESERVE)?;
    Some((fee, needed))
}

/// Destination script from an outbound swap's `(hash, version)` pair
pub fn outbound_script(hash: &[u8], version: u8) -> Result<ScriptBuf, BuilderError> {
    let hash: [u8; 20] = hash
        .try_into()
        .map_err(|_| BuilderError::InvalidDestination(format!("hash of {} bytes", hash.len())))?;
    match version {
        // mainnet / testnet pubkey-hash
        0x00 | 0x6f => Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash))),
        // mainnet / testnet script-hash
        0x05 | 0xc4 => Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash))),
        other => Err(BuilderError::UnknownVersion(other)),
    }
}

/// Human-readable address for a script, for logs
pub fn script_address(script: &ScriptBuf, network: Network) -> String {
    Address::from_script(script, network)
        .map(|a| a.to_string())
        .unwrap_or_else(|_| script.to_hex_string())
}

/// A signed transaction and its accounting
#[derive(Debug, Clone)]
pub struct BuiltTx {
    pub tx: Transaction,
    pub fee: u64,
    pub input_total: u64,
    /// Serialized size in bytes
    pub size: usize,
}

impl BuiltTx {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn raw_hex(&self) -> String {
        consensus::encode::serialize_hex(&self.tx)
    }

    pub fn output_total(&self) -> u64 {
        self.tx
            .output
            .iter()
            .fold(0u64, |sum, o| sum.saturating_add(o.value.to_sat()))
    }
}

/// HTLC output being claimed with a revealed preimage
#[derive(Debug, Clone)]
pub struct HtlcSpend {
    /// Deposit transaction containing the HTLC output
    pub funding_tx: Transaction,
    pub output_index: u32,
    pub redeem_script: ScriptBuf,
    pub preimage: Vec<u8>,
}

/// Builds signed transactions for the operator wallet
#[derive(Clone)]
pub struct TxBuilder {
    wallet: Arc<OperatorWallet>,
    max_tx_size: usize,
}

impl TxBuilder {
    pub fn new(wallet: Arc<OperatorWallet>, max_tx_size: usize) -> Self {
        Self {
            wallet,
            max_tx_size,
        }
    }

    pub fn wallet(&self) -> &OperatorWallet {
        &self.wallet
    }

    /// Pay `amount` to `recipient` with change back to the operator
    pub fn build_payment(
        &self,
        utxos: &[Utxo],
        recipient: ScriptBuf,
        amount: u64,
        fee_rate: u64,
    ) -> Result<BuiltTx, BuilderError> {
        let selection = select_coins(utxos, amount, fee_rate)?;
        let change = selection
            .total
            .checked_sub(amount)
            .and_then(|rest| rest.checked_sub(selection.fee))
            .ok_or(BuilderError::InsufficientFunds {
                required: amount.saturating_add(selection.fee),
                available: selection.total,
            })?;

        let mut input = Vec::with_capacity(selection.coins.len());
        for coin in &selection.coins {
            input.push(self.wallet_input(coin)?);
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: vec![
                TxOut {
                    value: Amount::from_sat(amount),
                    script_pubkey: recipient,
                },
                TxOut {
                    value: Amount::from_sat(change),
                    script_pubkey: self.wallet.script_pubkey(),
                },
            ],
        };

        for index in 0..tx.input.len() {
            self.wallet.sign_p2pkh_input(&mut tx, index)?;
        }

        self.finish(tx, selection.total, selection.fee)
    }

    /// Claim an HTLC and sweep every operator coin into one output
    pub fn build_htlc_redeem(
        &self,
        htlc: &HtlcSpend,
        utxos: &[Utxo],
        fee_rate: u64,
    ) -> Result<BuiltTx, BuilderError> {
        let htlc_out = htlc
            .funding_tx
            .output
            .get(htlc.output_index as usize)
            .ok_or_else(|| {
                BuilderError::HtlcMismatch(format!("no output {}", htlc.output_index))
            })?;
        let expected = ScriptBuf::new_p2sh(&htlc.redeem_script.script_hash());
        if htlc_out.script_pubkey != expected {
            return Err(BuilderError::HtlcMismatch(
                "output is not P2SH of the redeem script".to_string(),
            ));
        }
        let htlc_value = htlc_out.value.to_sat();

        let mut input = vec![TxIn {
            previous_output: OutPoint {
                txid: htlc.funding_tx.compute_txid(),
                vout: htlc.output_index,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }];
        let mut consolidated = 0u64;
        for coin in utxos {
            input.push(self.wallet_input(coin)?);
            consolidated = consolidated.saturating_add(coin.value_sats);
        }

        let input_total = htlc_value.saturating_add(consolidated);
        let fee = fee_rate
            .checked_mul(HTLC_INPUT_VBYTES + tx_weight(utxos.len(), 1))
            .ok_or(BuilderError::InsufficientFunds {
                required: u64::MAX,
                available: input_total,
            })?;
        let output_value = input_total.saturating_sub(fee);
        if output_value <= DUST_LIMIT {
            return Err(BuilderError::InsufficientFunds {
                required: fee.saturating_add(DUST_LIMIT + 1),
                available: input_total,
            });
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: vec![TxOut {
                value: Amount::from_sat(output_value),
                script_pubkey: self.wallet.script_pubkey(),
            }],
        };

        self.wallet
            .sign_htlc_input(&mut tx, 0, &htlc.redeem_script, &htlc.preimage)?;
        for index in 1..tx.input.len() {
            self.wallet.sign_p2pkh_input(&mut tx, index)?;
        }

        self.finish(tx, input_total, fee)
    }

    /// Input spending one of the wallet's coins, checked against its funding tx
    fn wallet_input(&self, coin: &Utxo) -> Result<TxIn, BuilderError> {
        let txid = Txid::from_str(&coin.txid).map_err(|e| BuilderError::InvalidTxid(e.to_string()))?;
        let raw = hex::decode(&coin.raw_tx_hex)
            .map_err(|e| BuilderError::UtxoMismatch(format!("{}: {}", coin, e)))?;
        let funding: Transaction = consensus::deserialize(&raw)
            .map_err(|e| BuilderError::UtxoMismatch(format!("{}: {}", coin, e)))?;
        if funding.compute_txid() != txid {
            return Err(BuilderError::UtxoMismatch(format!("{}: funding txid differs", coin)));
        }
        let out = funding
            .output
            .get(coin.vout as usize)
            .ok_or_else(|| BuilderError::UtxoMismatch(format!("{}: no such output", coin)))?;
        if out.value.to_sat() != coin.value_sats || out.script_pubkey != self.wallet.script_pubkey() {
            return Err(BuilderError::UtxoMismatch(format!("{}: not a wallet output", coin)));
        }

        Ok(TxIn {
            previous_output: OutPoint { txid, vout: coin.vout },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        })
    }

    fn finish(&self, tx: Transaction, input_total: u64, fee: u64) -> Result<BuiltTx, BuilderError> {
        let outputs = tx
            .output
            .iter()
            .try_fold(0u64, |sum, o| sum.checked_add(o.value.to_sat()))
            .unwrap_or(u64::MAX);
        if outputs.checked_add(fee) != Some(input_total) {
            return Err(BuilderError::Unbalanced {
                inputs: input_total,
                outputs,
                fee,
            });
        }

        let size = consensus::serialize(&tx).len();
        if size > self.max_tx_size {
            tracing::error!(size, max = self.max_tx_size, "Transaction over size limit");
            return Err(BuilderError::TransactionTooLarge {
                size,
                max: self.max_tx_size,
            });
        }

        Ok(BuiltTx {
            tx,
            fee,
            input_total,
            size,
        })
    }
}
