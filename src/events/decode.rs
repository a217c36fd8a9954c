//! Typed decoding of bridge contract values.
//!
//! Contract tuples use kebab-case field names; every numeric field is a
//! Clarity `uint` that must fit in `u64`.

use std::collections::BTreeMap;

use super::clarity::{ClarityError, ClarityValue};
use crate::types::{FullInboundSwap, InboundMeta, InboundSwap, OutboundSwap, Supplier};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("clarity error: {0}")]
    Clarity(#[from] ClarityError),

    #[error("expected a tuple")]
    NotATuple,

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("field {0} has the wrong type")]
    WrongType(String),

    #[error("field {0} out of range")]
    OutOfRange(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

/// Decode a contract value into a typed record
pub trait FromClarity: Sized {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError>;
}

/// Field accessor over a decoded tuple
pub struct TupleFields<'a> {
    fields: &'a BTreeMap<String, ClarityValue>,
}

impl<'a> TupleFields<'a> {
    pub fn new(value: &'a ClarityValue) -> Result<Self, DecodeError> {
        value
            .as_tuple()
            .map(|fields| Self { fields })
            .ok_or(DecodeError::NotATuple)
    }

    pub fn get(&self, name: &str) -> Result<&'a ClarityValue, DecodeError> {
        self.fields
            .get(name)
            .ok_or_else(|| DecodeError::MissingField(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn u64(&self, name: &str) -> Result<u64, DecodeError> {
        let raw = self
            .get(name)?
            .as_uint()
            .ok_or_else(|| DecodeError::WrongType(name.to_string()))?;
        u64::try_from(raw).map_err(|_| DecodeError::OutOfRange(name.to_string()))
    }

    pub fn u32(&self, name: &str) -> Result<u32, DecodeError> {
        u32::try_from(self.u64(name)?).map_err(|_| DecodeError::OutOfRange(name.to_string()))
    }

    pub fn i64(&self, name: &str) -> Result<i64, DecodeError> {
        match self.get(name)? {
            ClarityValue::Int(v) => {
                i64::try_from(*v).map_err(|_| DecodeError::OutOfRange(name.to_string()))
            }
            _ => Err(DecodeError::WrongType(name.to_string())),
        }
    }

    pub fn optional_i64(&self, name: &str) -> Result<Option<i64>, DecodeError> {
        match self.get(name)? {
            ClarityValue::OptionalNone => Ok(None),
            ClarityValue::OptionalSome(inner) => match inner.as_ref() {
                ClarityValue::Int(v) => i64::try_from(*v)
                    .map(Some)
                    .map_err(|_| DecodeError::OutOfRange(name.to_string())),
                _ => Err(DecodeError::WrongType(name.to_string())),
            },
            _ => Err(DecodeError::WrongType(name.to_string())),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, DecodeError> {
        self.get(name)?
            .as_buffer()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| DecodeError::WrongType(name.to_string()))
    }

    /// Buffer that may be absent, `none`, a bare buffer or `(some buffer)`
    pub fn optional_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, DecodeError> {
        match self.fields.get(name) {
            None | Some(ClarityValue::OptionalNone) => Ok(None),
            Some(ClarityValue::Buffer(b)) => Ok(Some(b.clone())),
            Some(ClarityValue::OptionalSome(inner)) => inner
                .as_buffer()
                .map(|b| Some(b.to_vec()))
                .ok_or_else(|| DecodeError::WrongType(name.to_string())),
            Some(_) => Err(DecodeError::WrongType(name.to_string())),
        }
    }

    pub fn principal(&self, name: &str) -> Result<String, DecodeError> {
        self.get(name)?
            .as_principal()
            .ok_or_else(|| DecodeError::WrongType(name.to_string()))
    }

    /// Hex of a buffer field, as used for BTC txids
    pub fn hex(&self, name: &str) -> Result<String, DecodeError> {
        self.bytes(name).map(hex::encode)
    }

    pub fn string(&self, name: &str) -> Result<&'a str, DecodeError> {
        self.get(name)?
            .as_str()
            .ok_or_else(|| DecodeError::WrongType(name.to_string()))
    }
}

impl FromClarity for InboundSwap {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError> {
        let f = TupleFields::new(value)?;
        Ok(Self {
            swapper: f.u64("swapper")?,
            xbtc: f.u64("xbtc")?,
            supplier: f.u64("supplier")?,
            expiration: f.u64("expiration")?,
            hash: f.bytes("hash")?,
        })
    }
}

impl FromClarity for InboundMeta {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError> {
        let f = TupleFields::new(value)?;
        Ok(Self {
            sats: f.u64("sats")?,
            redeem_script: f.bytes("redeem-script")?,
            output_index: f.u32("output-index")?,
            sender_public_key: f.bytes("sender-public-key")?,
            csv: f.u64("csv")?,
        })
    }
}

impl FromClarity for FullInboundSwap {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError> {
        Ok(Self {
            swap: InboundSwap::from_clarity(value)?,
            meta: InboundMeta::from_clarity(value)?,
        })
    }
}

impl FromClarity for OutboundSwap {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError> {
        let f = TupleFields::new(value)?;
        let version = f.bytes("version")?;
        let version = match version.as_slice() {
            [v] => *v,
            _ => return Err(DecodeError::OutOfRange("version".to_string())),
        };
        Ok(Self {
            swapper: f.principal("swapper")?,
            sats: f.u64("sats")?,
            xbtc: f.u64("xbtc")?,
            supplier: f.u64("supplier")?,
            hash: f.bytes("hash")?,
            version,
            created_at: f.u64("created-at")?,
        })
    }
}

impl FromClarity for Supplier {
    fn from_clarity(value: &ClarityValue) -> Result<Self, DecodeError> {
        let f = TupleFields::new(value)?;
        Ok(Self {
            controller: f.principal("controller")?,
            public_key: f.bytes("public-key")?,
            inbound_fee: f.optional_i64("inbound-fee")?,
            outbound_fee: f.optional_i64("outbound-fee")?,
            outbound_base_fee: f.i64("outbound-base-fee")?,
            inbound_base_fee: f.i64("inbound-base-fee")?,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::stacks::c32;

    pub fn inbound_fields(supplier: u64) -> Vec<(&'static str, ClarityValue)> {
        vec![
            ("swapper", ClarityValue::uint(3u64)),
            ("xbtc", ClarityValue::uint(99_000u64)),
            ("supplier", ClarityValue::uint(supplier)),
            ("expiration", ClarityValue::uint(5_000u64)),
            ("hash", ClarityValue::buffer(vec![0xaa; 32])),
        ]
    }

    pub fn meta_fields(sats: u64) -> Vec<(&'static str, ClarityValue)> {
        vec![
            ("sats", ClarityValue::uint(sats)),
            ("redeem-script", ClarityValue::buffer(vec![0x51])),
            ("output-index", ClarityValue::uint(1u64)),
            ("sender-public-key", ClarityValue::buffer(vec![0x02; 33])),
            ("csv", ClarityValue::uint(500u64)),
        ]
    }

    pub fn outbound_fields(supplier: u64, sats: u64, created_at: u64) -> Vec<(&'static str, ClarityValue)> {
        vec![
            (
                "swapper",
                ClarityValue::StandardPrincipal {
                    version: c32::TESTNET_SINGLESIG,
                    hash160: [9u8; 20],
                },
            ),
            ("sats", ClarityValue::uint(sats)),
            ("xbtc", ClarityValue::uint(sats)),
            ("supplier", ClarityValue::uint(supplier)),
            ("hash", ClarityValue::buffer(vec![0x11; 20])),
            ("version", ClarityValue::buffer(vec![0x6f])),
            ("created-at", ClarityValue::uint(created_at)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_full_inbound_decodes() {
        let mut fields = inbound_fields(1);
        fields.extend(meta_fields(100_000));
        let value = ClarityValue::tuple(fields);

        let full = FullInboundSwap::from_clarity(&value).unwrap();
        assert_eq!(full.swap.supplier, 1);
        assert_eq!(full.meta.sats, 100_000);
        assert_eq!(full.meta.output_index, 1);
        assert_eq!(full.meta.redeem_script, vec![0x51]);
    }

    #[test]
    fn test_outbound_decodes() {
        let value = ClarityValue::tuple(outbound_fields(1, 50_000, 100));
        let swap = OutboundSwap::from_clarity(&value).unwrap();
        assert_eq!(swap.version, 0x6f);
        assert_eq!(swap.hash.len(), 20);
        assert!(swap.swapper.starts_with("ST"));
        assert_eq!(swap.age(291), 191);
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let value = ClarityValue::tuple([("sats", ClarityValue::Bool(true))]);
        let f = TupleFields::new(&value).unwrap();
        assert_eq!(f.u64("sats"), Err(DecodeError::WrongType("sats".into())));
        assert_eq!(f.u64("xbtc"), Err(DecodeError::MissingField("xbtc".into())));
        assert_eq!(f.optional_bytes("preimage"), Ok(None));

        let huge = ClarityValue::tuple([("n", ClarityValue::UInt(u128::MAX))]);
        let f = TupleFields::new(&huge).unwrap();
        assert_eq!(f.u64("n"), Err(DecodeError::OutOfRange("n".into())));
    }
}
