//! Clarity Value Codec
//!
//! Consensus serialization of settlement-chain values. Contract logs, read-only
//! call results and contract-call arguments all travel in this format.
//!
//! ```text
//! 0x00 int (i128 BE)        0x07 (ok v)          0x0c tuple (u32 n, (name, v)*)
//! 0x01 uint (u128 BE)       0x08 (err v)         0x0d string-ascii (u32 len)
//! 0x02 buff (u32 len)       0x09 none            0x0e string-utf8 (u32 len)
//! 0x03 true / 0x04 false    0x0a (some v)
//! 0x05 standard principal   0x0b list (u32 n)
//! 0x06 contract principal
//! ```

use std::collections::BTreeMap;

use crate::stacks::c32;

/// Values nest at most this deep on decode
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarityValue {
    Int(i128),
    UInt(u128),
    Buffer(Vec<u8>),
    Bool(bool),
    StandardPrincipal {
        version: u8,
        hash160: [u8; 20],
    },
    ContractPrincipal {
        version: u8,
        hash160: [u8; 20],
        name: String,
    },
    ResponseOk(Box<ClarityValue>),
    ResponseErr(Box<ClarityValue>),
    OptionalNone,
    OptionalSome(Box<ClarityValue>),
    List(Vec<ClarityValue>),
    Tuple(BTreeMap<String, ClarityValue>),
    StringAscii(String),
    StringUtf8(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClarityError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unknown type prefix 0x{0:02x}")]
    UnknownPrefix(u8),

    #[error("value nested too deeply")]
    TooDeep,

    #[error("invalid string: {0}")]
    InvalidString(String),

    #[error("trailing bytes after value")]
    TrailingBytes,

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("name too long: {0}")]
    NameTooLong(String),
}

impl ClarityValue {
    pub fn uint(v: impl Into<u128>) -> Self {
        ClarityValue::UInt(v.into())
    }

    pub fn buffer(bytes: impl Into<Vec<u8>>) -> Self {
        ClarityValue::Buffer(bytes.into())
    }

    pub fn tuple<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ClarityValue)>,
        K: Into<String>,
    {
        ClarityValue::Tuple(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Decode a single value that must consume all of `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ClarityError> {
        let mut reader = Reader { bytes, pos: 0 };
        let value = reader.read_value(0)?;
        if reader.pos != bytes.len() {
            return Err(ClarityError::TrailingBytes);
        }
        Ok(value)
    }

    /// Decode from hex, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, ClarityError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| ClarityError::InvalidHex(e.to_string()))?;
        Self::deserialize(&bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ClarityError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// `0x`-prefixed hex, the form the node API expects for arguments
    pub fn to_hex(&self) -> Result<String, ClarityError> {
        Ok(format!("0x{}", hex::encode(self.serialize()?)))
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<(), ClarityError> {
        match self {
            ClarityValue::Int(v) => {
                out.push(0x00);
                out.extend_from_slice(&v.to_be_bytes());
            }
            ClarityValue::UInt(v) => {
                out.push(0x01);
                out.extend_from_slice(&v.to_be_bytes());
            }
            ClarityValue::Buffer(b) => {
                out.push(0x02);
                out.extend_from_slice(&(b.len() as u32).to_be_bytes());
                out.extend_from_slice(b);
            }
            ClarityValue::Bool(true) => out.push(0x03),
            ClarityValue::Bool(false) => out.push(0x04),
            ClarityValue::StandardPrincipal { version, hash160 } => {
                out.push(0x05);
                out.push(*version);
                out.extend_from_slice(hash160);
            }
            ClarityValue::ContractPrincipal {
                version,
                hash160,
                name,
            } => {
                out.push(0x06);
                out.push(*version);
                out.extend_from_slice(hash160);
                write_name(out, name)?;
            }
            ClarityValue::ResponseOk(v) => {
                out.push(0x07);
                v.write_to(out)?;
            }
            ClarityValue::ResponseErr(v) => {
                out.push(0x08);
                v.write_to(out)?;
            }
            ClarityValue::OptionalNone => out.push(0x09),
            ClarityValue::OptionalSome(v) => {
                out.push(0x0a);
                v.write_to(out)?;
            }
            ClarityValue::List(items) => {
                out.push(0x0b);
                out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                for item in items {
                    item.write_to(out)?;
                }
            }
            ClarityValue::Tuple(fields) => {
                out.push(0x0c);
                out.extend_from_slice(&(fields.len() as u32).to_be_bytes());
                // BTreeMap iterates in lexicographic order, which is the canonical order
                for (name, value) in fields {
                    write_name(out, name)?;
                    value.write_to(out)?;
                }
            }
            ClarityValue::StringAscii(s) => {
                out.push(0x0d);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            ClarityValue::StringUtf8(s) => {
                out.push(0x0e);
                out.extend_from_slice(&(s.len() as u32).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        Ok(())
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            ClarityValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            ClarityValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ClarityValue::StringAscii(s) | ClarityValue::StringUtf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&BTreeMap<String, ClarityValue>> {
        match self {
            ClarityValue::Tuple(t) => Some(t),
            _ => None,
        }
    }

    /// Render a principal in `S...` (or `S....name`) form
    pub fn as_principal(&self) -> Option<String> {
        match self {
            ClarityValue::StandardPrincipal { version, hash160 } => {
                c32::encode_address(*version, hash160).ok()
            }
            ClarityValue::ContractPrincipal {
                version,
                hash160,
                name,
            } => c32::encode_address(*version, hash160)
                .ok()
                .map(|addr| format!("{}.{}", addr, name)),
            _ => None,
        }
    }

    /// Unwrap `(some v)` to `Some(v)`; `none` and non-optionals yield `None`
    pub fn into_optional(self) -> Option<ClarityValue> {
        match self {
            ClarityValue::OptionalSome(v) => Some(*v),
            _ => None,
        }
    }

    /// Unwrap `(ok v)`; `(err e)` is returned as `Err(e)`, other values pass through
    pub fn into_response(self) -> Result<ClarityValue, ClarityValue> {
        match self {
            ClarityValue::ResponseOk(v) => Ok(*v),
            ClarityValue::ResponseErr(e) => Err(*e),
            other => Ok(other),
        }
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), ClarityError> {
    let len = u8::try_from(name.len()).map_err(|_| ClarityError::NameTooLong(name.to_string()))?;
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ClarityError> {
        let end = self.pos.checked_add(n).ok_or(ClarityError::UnexpectedEof)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ClarityError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClarityError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ClarityError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn array16(&mut self) -> Result<[u8; 16], ClarityError> {
        let mut out = [0u8; 16];
        out.copy_from_slice(self.take(16)?);
        Ok(out)
    }

    fn hash160(&mut self) -> Result<[u8; 20], ClarityError> {
        let mut out = [0u8; 20];
        out.copy_from_slice(self.take(20)?);
        Ok(out)
    }

    fn string(&mut self, len: usize) -> Result<String, ClarityError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| ClarityError::InvalidString(e.to_string()))
    }

    fn name(&mut self) -> Result<String, ClarityError> {
        let len = self.u8()? as usize;
        self.string(len)
    }

    /// Length prefixes are bounded by the remaining input so a hostile
    /// length cannot trigger a huge allocation.
    fn length(&mut self) -> Result<usize, ClarityError> {
        let len = self.u32()? as usize;
        if len > self.bytes.len() - self.pos {
            return Err(ClarityError::UnexpectedEof);
        }
        Ok(len)
    }

    fn read_value(&mut self, depth: usize) -> Result<ClarityValue, ClarityError> {
        if depth > MAX_DEPTH {
            return Err(ClarityError::TooDeep);
        }
        let prefix = self.u8()?;
        let value = match prefix {
            0x00 => ClarityValue::Int(i128::from_be_bytes(self.array16()?)),
            0x01 => ClarityValue::UInt(u128::from_be_bytes(self.array16()?)),
            0x02 => {
                let len = self.length()?;
                ClarityValue::Buffer(self.take(len)?.to_vec())
            }
            0x03 => ClarityValue::Bool(true),
            0x04 => ClarityValue::Bool(false),
            0x05 => ClarityValue::StandardPrincipal {
                version: self.u8()?,
                hash160: self.hash160()?,
            },
            0x06 => ClarityValue::ContractPrincipal {
                version: self.u8()?,
                hash160: self.hash160()?,
                name: self.name()?,
            },
            0x07 => ClarityValue::ResponseOk(Box::new(self.read_value(depth + 1)?)),
            0x08 => ClarityValue::ResponseErr(Box::new(self.read_value(depth + 1)?)),
            0x09 => ClarityValue::OptionalNone,
            0x0a => ClarityValue::OptionalSome(Box::new(self.read_value(depth + 1)?)),
            0x0b => {
                let len = self.length()?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value(depth + 1)?);
                }
                ClarityValue::List(items)
            }
            0x0c => {
                let len = self.length()?;
                let mut fields = BTreeMap::new();
                for _ in 0..len {
                    let name = self.name()?;
                    let value = self.read_value(depth + 1)?;
                    fields.insert(name, value);
                }
                ClarityValue::Tuple(fields)
            }
            0x0d => {
                let len = self.length()?;
                let s = self.string(len)?;
                if !s.is_ascii() {
                    return Err(ClarityError::InvalidString(s));
                }
                ClarityValue::StringAscii(s)
            }
            0x0e => {
                let len = self.length()?;
                ClarityValue::StringUtf8(self.string(len)?)
            }
            other => return Err(ClarityError::UnknownPrefix(other)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_wire_format() {
        let v = ClarityValue::uint(7u64);
        let bytes = v.serialize().unwrap();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[16], 7);
        assert_eq!(v.to_hex().unwrap(), "0x0100000000000000000000000000000007");
    }

    #[test]
    fn test_tuple_is_canonically_ordered() {
        let v = ClarityValue::tuple([
            ("topic", ClarityValue::StringAscii("escrow".into())),
            ("amount", ClarityValue::uint(1u64)),
        ]);
        let bytes = v.serialize().unwrap();
        // first field name must be "amount"
        assert_eq!(&bytes[5..12], b"\x06amount");
        assert_eq!(ClarityValue::deserialize(&bytes).unwrap(), v);
    }

    #[test]
    fn test_nested_values_decode() {
        let v = ClarityValue::ResponseOk(Box::new(ClarityValue::OptionalSome(Box::new(
            ClarityValue::List(vec![
                ClarityValue::buffer(vec![1, 2, 3]),
                ClarityValue::Bool(false),
                ClarityValue::Int(-5),
            ]),
        ))));
        let decoded = ClarityValue::from_hex(&v.to_hex().unwrap()).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_principal_rendering() {
        let v = ClarityValue::ContractPrincipal {
            version: c32::MAINNET_SINGLESIG,
            hash160: [0u8; 20],
            name: "bridge".into(),
        };
        assert_eq!(
            v.as_principal().unwrap(),
            "SP000000000000000000002Q6VF78.bridge"
        );
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(
            ClarityValue::deserialize(&[0x01, 0x00]),
            Err(ClarityError::UnexpectedEof)
        );
        assert_eq!(
            ClarityValue::deserialize(&[0x42]),
            Err(ClarityError::UnknownPrefix(0x42))
        );
        // buffer claiming 4 GiB
        assert_eq!(
            ClarityValue::deserialize(&[0x02, 0xff, 0xff, 0xff, 0xff]),
            Err(ClarityError::UnexpectedEof)
        );
        assert_eq!(
            ClarityValue::deserialize(&[0x03, 0x03]),
            Err(ClarityError::TrailingBytes)
        );
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = vec![0x0a; MAX_DEPTH + 2];
        bytes.push(0x09);
        assert_eq!(ClarityValue::deserialize(&bytes), Err(ClarityError::TooDeep));
    }
}
