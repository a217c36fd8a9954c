//! c32check Address Encoding
//!
//! Settlement-chain principals are rendered as `S` + c32check(version, hash160).
//! Crockford base32 with a 4-byte double-SHA256 checksum.

use sha2::{Digest, Sha256};

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Single-sig address version on mainnet (`SP...`)
pub const MAINNET_SINGLESIG: u8 = 22;
/// Multi-sig address version on mainnet (`SM...`)
pub const MAINNET_MULTISIG: u8 = 20;
/// Single-sig address version on testnet (`ST...`)
pub const TESTNET_SINGLESIG: u8 = 26;
/// Multi-sig address version on testnet (`SN...`)
pub const TESTNET_MULTISIG: u8 = 21;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum C32Error {
    #[error("invalid c32 character: {0}")]
    InvalidCharacter(char),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("checksum mismatch")]
    BadChecksum,

    #[error("invalid version: {0}")]
    InvalidVersion(u8),
}

fn c32_encode(input: &[u8]) -> String {
    let mut result: Vec<u8> = Vec::with_capacity(input.len() * 8 / 5 + 1);
    let mut carry: u32 = 0;
    let mut carry_bits: u32 = 0;

    for &byte in input.iter().rev() {
        let byte = byte as u32;
        let low_bits_to_take = 5 - carry_bits;
        let low_bits = byte & ((1 << low_bits_to_take) - 1);
        let c32_value = (low_bits << carry_bits) + carry;
        result.push(C32_ALPHABET[c32_value as usize]);
        carry_bits = (8 + carry_bits) - 5;
        carry = byte >> (8 - carry_bits);

        if carry_bits >= 5 {
            result.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry_bits -= 5;
            carry >>= 5;
        }
    }

    if carry_bits > 0 {
        result.push(C32_ALPHABET[carry as usize]);
    }

    // strip encoding-produced leading zeros, then re-add one per leading zero byte
    while result.last() == Some(&C32_ALPHABET[0]) {
        result.pop();
    }
    for &byte in input {
        if byte != 0 {
            break;
        }
        result.push(C32_ALPHABET[0]);
    }

    result.reverse();
    result.into_iter().map(char::from).collect()
}

fn c32_digit(c: char) -> Result<u32, C32Error> {
    let normalized = match c.to_ascii_uppercase() {
        'O' => '0',
        'L' | 'I' => '1',
        other => other,
    };
    C32_ALPHABET
        .iter()
        .position(|&a| a as char == normalized)
        .map(|p| p as u32)
        .ok_or(C32Error::InvalidCharacter(c))
}

fn c32_decode(input: &str) -> Result<Vec<u8>, C32Error> {
    let digits = input.chars().map(c32_digit).collect::<Result<Vec<_>, _>>()?;

    let mut result: Vec<u8> = Vec::with_capacity(digits.len() * 5 / 8 + 1);
    let mut carry: u32 = 0;
    let mut carry_bits: u32 = 0;

    for digit in digits.iter().rev() {
        carry += digit << carry_bits;
        carry_bits += 5;
        if carry_bits >= 8 {
            result.push((carry & 0xff) as u8);
            carry_bits -= 8;
            carry >>= 8;
        }
    }

    if carry_bits > 0 {
        result.push(carry as u8);
    }

    while result.last() == Some(&0) {
        result.pop();
    }
    for &digit in &digits {
        if digit != 0 {
            break;
        }
        result.push(0);
    }

    result.reverse();
    Ok(result)
}

fn checksum(version: u8, data: &[u8]) -> [u8; 4] {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(data);
    let first = hasher.finalize();
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[0..4]);
    out
}

/// Encode `data` with a c32check version prefix
pub fn c32check_encode(version: u8, data: &[u8]) -> Result<String, C32Error> {
    if version >= 32 {
        return Err(C32Error::InvalidVersion(version));
    }
    let mut payload = data.to_vec();
    payload.extend_from_slice(&checksum(version, data));

    let mut encoded = String::with_capacity(payload.len() * 8 / 5 + 2);
    encoded.push(C32_ALPHABET[version as usize] as char);
    encoded.push_str(&c32_encode(&payload));
    Ok(encoded)
}

/// Decode a c32check string into `(version, data)`
pub fn c32check_decode(input: &str) -> Result<(u8, Vec<u8>), C32Error> {
    let mut chars = input.chars();
    let version_char = chars
        .next()
        .ok_or_else(|| C32Error::InvalidAddress(input.to_string()))?;
    let version = c32_digit(version_char)? as u8;

    let decoded = c32_decode(chars.as_str())?;
    if decoded.len() < 4 {
        return Err(C32Error::InvalidAddress(input.to_string()));
    }
    let (data, check) = decoded.split_at(decoded.len() - 4);
    if check != checksum(version, data) {
        return Err(C32Error::BadChecksum);
    }
    Ok((version, data.to_vec()))
}

/// Render a principal address from version and hash160
pub fn encode_address(version: u8, hash160: &[u8; 20]) -> Result<String, C32Error> {
    Ok(format!("S{}", c32check_encode(version, hash160)?))
}

/// Parse an `S...` address into version and hash160
pub fn decode_address(address: &str) -> Result<(u8, [u8; 20]), C32Error> {
    let rest = address
        .strip_prefix('S')
        .ok_or_else(|| C32Error::InvalidAddress(address.to_string()))?;
    let (version, data) = c32check_decode(rest)?;
    let hash: [u8; 20] = data
        .try_into()
        .map_err(|_| C32Error::InvalidAddress(address.to_string()))?;
    Ok((version, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_addresses() {
        assert_eq!(
            encode_address(MAINNET_SINGLESIG, &[0u8; 20]).unwrap(),
            "SP000000000000000000002Q6VF78"
        );
        assert_eq!(
            encode_address(TESTNET_SINGLESIG, &[0u8; 20]).unwrap(),
            "ST000000000000000000002AMW42H"
        );
    }

    #[test]
    fn test_address_roundtrip() {
        let hash = [
            0xa4, 0x6f, 0xf8, 0x88, 0x86, 0xc2, 0xef, 0x97, 0x62, 0xd9, 0x70, 0xb4, 0xd2, 0xc6,
            0x3a, 0xcb, 0xa1, 0x1b, 0x3b, 0x0f,
        ];
        for version in [MAINNET_SINGLESIG, TESTNET_SINGLESIG, MAINNET_MULTISIG] {
            let addr = encode_address(version, &hash).unwrap();
            assert_eq!(decode_address(&addr).unwrap(), (version, hash));
        }
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let addr = encode_address(MAINNET_SINGLESIG, &[7u8; 20]).unwrap();
        let mut tampered: Vec<char> = addr.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == '0' { '1' } else { '0' };
        let tampered: String = tampered.into_iter().collect();
        assert!(decode_address(&tampered).is_err());
    }

    #[test]
    fn test_invalid_character() {
        assert!(matches!(
            decode_address("SP!!!"),
            Err(C32Error::InvalidCharacter('!'))
        ));
    }
}
