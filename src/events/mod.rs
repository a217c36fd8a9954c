//! Bridge Event Model
//!
//! The bridge contract prints one tuple per state change, discriminated by a
//! `topic` string. Six topics are meaningful to the operator; everything else
//! in the log stream (other contracts, unknown topics, malformed values)
//! decodes to `None`.

pub mod clarity;
pub mod decode;

use serde::{Deserialize, Serialize};

pub use clarity::{ClarityError, ClarityValue};
pub use decode::{DecodeError, FromClarity, TupleFields};

use crate::stacks::RawContractEvent;
use crate::types::{hex_bytes_opt, FullInboundSwap, InboundSwap, OutboundSwap};

/// Escrow of an inbound HTLC deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPrint {
    /// BTC deposit txid (hex, as stored by the contract)
    pub txid: String,
    #[serde(flatten)]
    pub swap: FullInboundSwap,
}

/// Swapper revealed the preimage; the operator can now claim the HTLC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeInboundPrint {
    pub txid: String,
    #[serde(with = "hex_bytes_opt", default)]
    pub preimage: Option<Vec<u8>>,
    #[serde(flatten)]
    pub swap: InboundSwap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeInboundPrint {
    pub txid: String,
    #[serde(flatten)]
    pub swap: InboundSwap,
}

/// Swapper burned wrapped BTC and asks the operator to pay out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateOutboundPrint {
    pub swap_id: u64,
    #[serde(flatten)]
    pub swap: OutboundSwap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOutboundPrint {
    pub swap_id: u64,
    /// BTC payment txid proven to the contract
    pub txid: String,
    #[serde(flatten)]
    pub swap: OutboundSwap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeOutboundPrint {
    pub swap_id: u64,
    #[serde(flatten)]
    pub swap: OutboundSwap,
}

/// Decoded bridge print, tagged by topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum Print {
    Escrow(EscrowPrint),
    FinalizeInbound(FinalizeInboundPrint),
    RevokeInbound(RevokeInboundPrint),
    InitiateOutbound(InitiateOutboundPrint),
    FinalizeOutbound(FinalizeOutboundPrint),
    RevokeOutbound(RevokeOutboundPrint),
}

impl Print {
    pub fn topic(&self) -> &'static str {
        match self {
            Print::Escrow(_) => "escrow",
            Print::FinalizeInbound(_) => "finalize-inbound",
            Print::RevokeInbound(_) => "revoke-inbound",
            Print::InitiateOutbound(_) => "initiate-outbound",
            Print::FinalizeOutbound(_) => "finalize-outbound",
            Print::RevokeOutbound(_) => "revoke-outbound",
        }
    }

    /// Supplier id the print concerns
    pub fn supplier(&self) -> u64 {
        match self {
            Print::Escrow(p) => p.swap.swap.supplier,
            Print::FinalizeInbound(p) => p.swap.supplier,
            Print::RevokeInbound(p) => p.swap.supplier,
            Print::InitiateOutbound(p) => p.swap.supplier,
            Print::FinalizeOutbound(p) => p.swap.supplier,
            Print::RevokeOutbound(p) => p.swap.supplier,
        }
    }
}

impl FromClarity for Print {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError> {
        let f = TupleFields::new(value)?;
        let topic = f.string("topic")?;
        let print = match topic {
            "escrow" => Print::Escrow(EscrowPrint {
                txid: f.hex("txid")?,
                swap: FullInboundSwap::from_clarity(value)?,
            }),
            "finalize-inbound" => Print::FinalizeInbound(FinalizeInboundPrint {
                txid: f.hex("txid")?,
                preimage: f.optional_bytes("preimage")?,
                swap: InboundSwap::from_clarity(value)?,
            }),
            "revoke-inbound" => Print::RevokeInbound(RevokeInboundPrint {
                txid: f.hex("txid")?,
                swap: InboundSwap::from_clarity(value)?,
            }),
            "initiate-outbound" => Print::InitiateOutbound(InitiateOutboundPrint {
                swap_id: f.u64("swap-id")?,
                swap: OutboundSwap::from_clarity(value)?,
            }),
            "finalize-outbound" => Print::FinalizeOutbound(FinalizeOutboundPrint {
                swap_id: f.u64("swap-id")?,
                txid: f.hex("txid")?,
                swap: OutboundSwap::from_clarity(value)?,
            }),
            "revoke-outbound" => Print::RevokeOutbound(RevokeOutboundPrint {
                swap_id: f.u64("swap-id")?,
                swap: OutboundSwap::from_clarity(value)?,
            }),
            other => return Err(DecodeError::UnknownTopic(other.to_string())),
        };
        Ok(print)
    }
}

/// Decode a hex-encoded print value. Malformed or foreign values yield `None`.
pub fn decode_print(hex_value: &str) -> Option<Print> {
    let value = ClarityValue::from_hex(hex_value).ok()?;
    Print::from_clarity(&value).ok()
}

/// A bridge print together with its position in the settlement chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEvent {
    /// Settlement-chain txid that emitted the print
    pub txid: String,
    /// Event index within that transaction
    pub index: u64,
    pub print: Print,
}

impl BridgeEvent {
    /// Decode a raw contract log entry; non-log entries and unknown prints yield `None`
    pub fn from_raw(raw: &RawContractEvent) -> Option<Self> {
        if raw.event_type != "smart_contract_log" {
            return None;
        }
        let log = raw.contract_log.as_ref()?;
        let print = decode_print(&log.value.hex)?;
        Some(Self {
            txid: raw.tx_id.clone(),
            index: raw.event_index,
            print,
        })
    }

    pub fn topic(&self) -> &'static str {
        self.print.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::decode::fixtures::*;
    use super::*;
    use crate::stacks::{ContractLog, ContractLogValue};

    fn finalize_inbound_value(preimage: Option<Vec<u8>>) -> ClarityValue {
        let mut fields = inbound_fields(1);
        fields.push(("topic", ClarityValue::StringAscii("finalize-inbound".into())));
        fields.push(("txid", ClarityValue::buffer(vec![0xab; 32])));
        if let Some(p) = preimage {
            fields.push(("preimage", ClarityValue::OptionalSome(Box::new(ClarityValue::buffer(p)))));
        } else {
            fields.push(("preimage", ClarityValue::OptionalNone));
        }
        ClarityValue::tuple(fields)
    }

    fn raw(event_type: &str, hex_value: String) -> RawContractEvent {
        RawContractEvent {
            event_index: 2,
            event_type: event_type.to_string(),
            tx_id: "0xstx1".to_string(),
            contract_log: Some(ContractLog {
                contract_id: "ST000000000000000000002AMW42H.bridge".to_string(),
                topic: "print".to_string(),
                value: ContractLogValue {
                    hex: hex_value,
                    repr: None,
                },
            }),
        }
    }

    #[test]
    fn test_decode_finalize_inbound() {
        let hex_value = finalize_inbound_value(Some(vec![7; 32])).to_hex().unwrap();
        match decode_print(&hex_value) {
            Some(Print::FinalizeInbound(p)) => {
                assert_eq!(p.txid, "ab".repeat(32));
                assert_eq!(p.preimage, Some(vec![7; 32]));
                assert_eq!(p.swap.supplier, 1);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_escrow_and_outbound() {
        let mut fields = inbound_fields(4);
        fields.extend(meta_fields(100_000));
        fields.push(("topic", ClarityValue::StringAscii("escrow".into())));
        fields.push(("txid", ClarityValue::buffer(vec![1; 32])));
        let escrow = decode_print(&ClarityValue::tuple(fields).to_hex().unwrap()).unwrap();
        assert_eq!(escrow.topic(), "escrow");
        assert_eq!(escrow.supplier(), 4);

        let mut fields = outbound_fields(2, 50_000, 100);
        fields.push(("topic", ClarityValue::StringAscii("initiate-outbound".into())));
        fields.push(("swap-id", ClarityValue::uint(7u64)));
        match decode_print(&ClarityValue::tuple(fields).to_hex().unwrap()) {
            Some(Print::InitiateOutbound(p)) => {
                assert_eq!(p.swap_id, 7);
                assert_eq!(p.swap.sats, 50_000);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_foreign_values_are_not_events() {
        assert!(decode_print("0xzz").is_none());
        assert!(decode_print(&ClarityValue::uint(5u64).to_hex().unwrap()).is_none());

        let unknown = ClarityValue::tuple([("topic", ClarityValue::StringAscii("other".into()))]);
        assert!(decode_print(&unknown.to_hex().unwrap()).is_none());

        // known topic, missing fields
        let partial =
            ClarityValue::tuple([("topic", ClarityValue::StringAscii("escrow".into()))]);
        assert!(decode_print(&partial.to_hex().unwrap()).is_none());
    }

    #[test]
    fn test_from_raw_filters_event_type() {
        let hex_value = finalize_inbound_value(None).to_hex().unwrap();
        let event = BridgeEvent::from_raw(&raw("smart_contract_log", hex_value.clone())).unwrap();
        assert_eq!(event.txid, "0xstx1");
        assert_eq!(event.index, 2);
        assert_eq!(event.topic(), "finalize-inbound");

        assert!(BridgeEvent::from_raw(&raw("stx_asset", hex_value)).is_none());
    }

    #[test]
    fn test_event_json_payload() {
        let hex_value = finalize_inbound_value(Some(vec![7; 32])).to_hex().unwrap();
        let event = BridgeEvent::from_raw(&raw("smart_contract_log", hex_value)).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"topic\":\"finalize-inbound\""));
        let back: BridgeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
