//! Contract-Call Transactions
//!
//! Builds and signs single-sig Stacks transactions calling a public contract
//! function. Only the shape this service broadcasts is supported:
//!
//! ```text
//! version | chain_id | auth(standard, p2pkh, compressed) | anchor(any)
//!   | post-condition mode(allow) | post conditions(0) | contract-call payload
//! ```

use bitcoin::hashes::{hash160, Hash};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::{Digest, Sha512_256};

use super::c32;
use super::client::StacksError;
use crate::events::ClarityValue;

const AUTH_STANDARD: u8 = 0x04;
const HASH_MODE_P2PKH: u8 = 0x00;
const KEY_ENCODING_COMPRESSED: u8 = 0x00;
const ANCHOR_MODE_ANY: u8 = 0x03;
const POST_CONDITION_MODE_ALLOW: u8 = 0x01;
const PAYLOAD_CONTRACT_CALL: u8 = 0x02;

/// Transaction version and chain id pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionVersion {
    Mainnet,
    Testnet,
}

impl TransactionVersion {
    pub fn version_byte(&self) -> u8 {
        match self {
            TransactionVersion::Mainnet => 0x00,
            TransactionVersion::Testnet => 0x80,
        }
    }

    pub fn chain_id(&self) -> u32 {
        match self {
            TransactionVersion::Mainnet => 0x0000_0001,
            TransactionVersion::Testnet => 0x8000_0000,
        }
    }

    /// c32 version for single-sig addresses on this chain
    pub fn address_version(&self) -> u8 {
        match self {
            TransactionVersion::Mainnet => c32::MAINNET_SINGLESIG,
            TransactionVersion::Testnet => c32::TESTNET_SINGLESIG,
        }
    }
}

/// Operator settlement-chain key
#[derive(Clone)]
pub struct StacksKey {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for StacksKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StacksKey")
            .field("public", &hex::encode(self.public.serialize()))
            .finish_non_exhaustive()
    }
}

impl StacksKey {
    /// Parse a 32-byte hex key, optionally suffixed with `01` (compressed flag)
    pub fn from_hex(s: &str) -> Result<Self, StacksError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let key_hex = match s.len() {
            64 => s,
            66 if s.ends_with("01") => &s[..64],
            _ => {
                return Err(StacksError::Signing(format!(
                    "expected 64 or 66 hex chars, got {}",
                    s.len()
                )))
            }
        };
        let bytes = hex::decode(key_hex).map_err(|e| StacksError::Signing(e.to_string()))?;
        let secret =
            SecretKey::from_slice(&bytes).map_err(|e| StacksError::Signing(e.to_string()))?;
        let public = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> [u8; 33] {
        self.public.serialize()
    }

    pub fn hash160(&self) -> [u8; 20] {
        hash160::Hash::hash(&self.public.serialize()).to_byte_array()
    }

    pub fn address(&self, version: TransactionVersion) -> Result<String, StacksError> {
        c32::encode_address(version.address_version(), &self.hash160())
            .map_err(|e| StacksError::InvalidData(e.to_string()))
    }

    fn sign_digest(&self, digest: [u8; 32]) -> [u8; 65] {
        let msg = Message::from_digest(digest);
        let sig = Secp256k1::signing_only().sign_ecdsa_recoverable(&msg, &self.secret);
        let (recovery_id, compact) = sig.serialize_compact();
        let mut out = [0u8; 65];
        out[0] = recovery_id.to_i32() as u8;
        out[1..].copy_from_slice(&compact);
        out
    }
}

/// Public function call on a deployed contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Deployer address in c32 form
    pub contract_address: String,
    pub contract_name: String,
    pub function_name: String,
    pub args: Vec<ClarityValue>,
}

/// Signed, serialized transaction ready for `/v2/transactions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub bytes: Vec<u8>,
    /// `0x`-less hex txid
    pub txid: String,
}

struct SpendingCondition {
    signer: [u8; 20],
    nonce: u64,
    fee: u64,
    signature: [u8; 65],
}

fn sha512_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha512_256::digest(data));
    out
}

fn push_name(out: &mut Vec<u8>, name: &str) -> Result<(), StacksError> {
    let len = u8::try_from(name.len())
        .map_err(|_| StacksError::InvalidData(format!("name too long: {}", name)))?;
    out.push(len);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn encode_payload(call: &ContractCall) -> Result<Vec<u8>, StacksError> {
    let (version, hash) = c32::decode_address(&call.contract_address)
        .map_err(|e| StacksError::InvalidData(e.to_string()))?;
    let mut out = vec![PAYLOAD_CONTRACT_CALL, version];
    out.extend_from_slice(&hash);
    push_name(&mut out, &call.contract_name)?;
    push_name(&mut out, &call.function_name)?;
    out.extend_from_slice(&(call.args.len() as u32).to_be_bytes());
    for arg in &call.args {
        out.extend_from_slice(&arg.serialize()?);
    }
    Ok(out)
}

fn encode_transaction(
    version: TransactionVersion,
    condition: &SpendingCondition,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + payload.len());
    out.push(version.version_byte());
    out.extend_from_slice(&version.chain_id().to_be_bytes());
    out.push(AUTH_STANDARD);
    out.push(HASH_MODE_P2PKH);
    out.extend_from_slice(&condition.signer);
    out.extend_from_slice(&condition.nonce.to_be_bytes());
    out.extend_from_slice(&condition.fee.to_be_bytes());
    out.push(KEY_ENCODING_COMPRESSED);
    out.extend_from_slice(&condition.signature);
    out.push(ANCHOR_MODE_ANY);
    out.push(POST_CONDITION_MODE_ALLOW);
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Digest the signer commits to: the cleared-auth txid extended with
/// auth type, fee and nonce
fn presign_hash(
    version: TransactionVersion,
    signer: [u8; 20],
    fee: u64,
    nonce: u64,
    payload: &[u8],
) -> [u8; 32] {
    let cleared = SpendingCondition {
        signer,
        nonce: 0,
        fee: 0,
        signature: [0u8; 65],
    };
    let initial = sha512_256(&encode_transaction(version, &cleared, payload));

    let mut buf = Vec::with_capacity(49);
    buf.extend_from_slice(&initial);
    buf.push(AUTH_STANDARD);
    buf.extend_from_slice(&fee.to_be_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    sha512_256(&buf)
}

/// Build and sign a contract call with an explicit nonce and fee
pub fn sign_contract_call(
    key: &StacksKey,
    version: TransactionVersion,
    call: &ContractCall,
    nonce: u64,
    fee: u64,
) -> Result<SignedTransaction, StacksError> {
    let payload = encode_payload(call)?;
    let signer = key.hash160();
    let digest = presign_hash(version, signer, fee, nonce, &payload);

    let condition = SpendingCondition {
        signer,
        nonce,
        fee,
        signature: key.sign_digest(digest),
    };
    let bytes = encode_transaction(version, &condition, &payload);
    let txid = hex::encode(sha512_256(&bytes));
    Ok(SignedTransaction { bytes, txid })
}

/// Recover the signer's public key from a signed transaction
pub fn recover_signer(version: TransactionVersion, tx: &[u8]) -> Option<PublicKey> {
    // version(1) chain(4) auth(1) mode(1) signer(20) nonce(8) fee(8) encoding(1) sig(65)
    const SIG_OFFSET: usize = 44;
    const PAYLOAD_OFFSET: usize = SIG_OFFSET + 65 + 1 + 1 + 4;
    if tx.len() < PAYLOAD_OFFSET {
        return None;
    }
    let mut signer = [0u8; 20];
    signer.copy_from_slice(&tx[7..27]);
    let nonce = u64::from_be_bytes(tx[27..35].try_into().ok()?);
    let fee = u64::from_be_bytes(tx[35..43].try_into().ok()?);
    let sig = &tx[SIG_OFFSET..SIG_OFFSET + 65];

    let digest = presign_hash(version, signer, fee, nonce, &tx[PAYLOAD_OFFSET..]);
    let recovery_id = RecoveryId::from_i32(sig[0] as i32).ok()?;
    let recoverable = RecoverableSignature::from_compact(&sig[1..], recovery_id).ok()?;
    Secp256k1::verification_only()
        .recover_ecdsa(&Message::from_digest(digest), &recoverable)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    fn call() -> ContractCall {
        ContractCall {
            contract_address: c32::encode_address(c32::TESTNET_SINGLESIG, &[7u8; 20]).unwrap(),
            contract_name: "bridge".into(),
            function_name: "finalize-outbound-swap".into(),
            args: vec![ClarityValue::uint(7u64), ClarityValue::buffer(vec![1, 2, 3])],
        }
    }

    #[test]
    fn test_key_parsing() {
        let plain = StacksKey::from_hex(KEY).unwrap();
        let flagged = StacksKey::from_hex(&format!("{}01", KEY)).unwrap();
        assert_eq!(plain.public_key(), flagged.public_key());

        assert!(StacksKey::from_hex(&format!("{}02", KEY)).is_err());
        assert!(StacksKey::from_hex("abcd").is_err());
        assert!(StacksKey::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn test_address_versions() {
        let key = StacksKey::from_hex(KEY).unwrap();
        let mainnet = key.address(TransactionVersion::Mainnet).unwrap();
        let testnet = key.address(TransactionVersion::Testnet).unwrap();
        assert!(mainnet.starts_with("SP"));
        assert!(testnet.starts_with("ST"));

        let (version, hash) = c32::decode_address(&testnet).unwrap();
        assert_eq!(version, c32::TESTNET_SINGLESIG);
        assert_eq!(hash, key.hash160());
    }

    #[test]
    fn test_transaction_layout() {
        let key = StacksKey::from_hex(KEY).unwrap();
        let signed = sign_contract_call(&key, TransactionVersion::Testnet, &call(), 9, 10_000).unwrap();
        let tx = &signed.bytes;

        assert_eq!(tx[0], 0x80);
        assert_eq!(&tx[1..5], &[0x80, 0, 0, 0]);
        assert_eq!(tx[5], AUTH_STANDARD);
        assert_eq!(&tx[7..27], &key.hash160());
        assert_eq!(u64::from_be_bytes(tx[27..35].try_into().unwrap()), 9);
        assert_eq!(u64::from_be_bytes(tx[35..43].try_into().unwrap()), 10_000);
        assert_eq!(tx[109], ANCHOR_MODE_ANY);
        assert_eq!(tx[110], POST_CONDITION_MODE_ALLOW);
        assert_eq!(tx[115], PAYLOAD_CONTRACT_CALL);
        assert_eq!(signed.txid, hex::encode(sha512_256(tx)));
    }

    #[test]
    fn test_signature_recovers_to_signer() {
        let key = StacksKey::from_hex(KEY).unwrap();
        let signed = sign_contract_call(&key, TransactionVersion::Mainnet, &call(), 0, 1).unwrap();
        let recovered = recover_signer(TransactionVersion::Mainnet, &signed.bytes).unwrap();
        assert_eq!(recovered.serialize(), key.public_key());

        // the nonce is committed to
        let mut tampered = signed.bytes.clone();
        tampered[34] ^= 1;
        let other = recover_signer(TransactionVersion::Mainnet, &tampered);
        assert!(other.map(|pk| pk.serialize() != key.public_key()).unwrap_or(true));
    }

    #[test]
    fn test_nonce_changes_txid() {
        let key = StacksKey::from_hex(KEY).unwrap();
        let a = sign_contract_call(&key, TransactionVersion::Testnet, &call(), 1, 10).unwrap();
        let b = sign_contract_call(&key, TransactionVersion::Testnet, &call(), 2, 10).unwrap();
        assert_ne!(a.txid, b.txid);
    }
}
