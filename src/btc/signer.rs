//! Operator Wallet Signer
//!
//! The operator's Bitcoin wallet is a single P2PKH key. It signs its own
//! coins and the claim path of inbound HTLCs.

use bitcoin::{
    ecdsa,
    hashes::Hash,
    opcodes,
    script::{Builder, PushBytesBuf},
    secp256k1::{self, Message, Secp256k1},
    sighash::{EcdsaSighashType, SighashCache},
    Address, Network, NetworkKind, PrivateKey, PublicKey, Script, ScriptBuf, Transaction,
};

/// Signer errors
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key is for {found:?}, expected {expected:?}")]
    WrongNetwork {
        expected: NetworkKind,
        found: NetworkKind,
    },

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// P2PKH wallet over a compressed secp256k1 key
pub struct OperatorWallet {
    secret: PrivateKey,
    public: PublicKey,
    network: Network,
    secp: Secp256k1<secp256k1::All>,
}

impl OperatorWallet {
    /// Load from a WIF string; the key's network must match `network`
    pub fn from_wif(wif: &str, network: Network) -> Result<Self, SignerError> {
        let secret =
            PrivateKey::from_wif(wif.trim()).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let expected = NetworkKind::from(network);
        if secret.network != expected {
            return Err(SignerError::WrongNetwork {
                expected,
                found: secret.network,
            });
        }
        Ok(Self::from_private_key(secret, network))
    }

    pub fn from_secret_bytes(bytes: &[u8; 32], network: Network) -> Result<Self, SignerError> {
        let secret = PrivateKey::from_slice(bytes, network)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self::from_private_key(secret, network))
    }

    fn from_private_key(mut secret: PrivateKey, network: Network) -> Self {
        secret.compressed = true;
        let secp = Secp256k1::new();
        let public = PublicKey::from_private_key(&secp, &secret);
        Self {
            secret,
            public,
            network,
            secp,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn address(&self) -> Address {
        Address::p2pkh(self.public, self.network)
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.public.pubkey_hash())
    }

    /// Export as WIF
    pub fn to_wif(&self) -> String {
        self.secret.to_wif()
    }

    /// DER signature plus SIGHASH_ALL over the legacy sighash of `index`
    fn signature(
        &self,
        tx: &Transaction,
        index: usize,
        script_code: &Script,
    ) -> Result<PushBytesBuf, SignerError> {
        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(index, script_code, EcdsaSighashType::All.to_u32())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let sig = self.secp.sign_ecdsa(&msg, &self.secret.inner);
        PushBytesBuf::try_from(ecdsa::Signature::sighash_all(sig).to_vec())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))
    }

    /// Sign a spend of one of the wallet's own P2PKH outputs
    pub fn sign_p2pkh_input(&self, tx: &mut Transaction, index: usize) -> Result<(), SignerError> {
        let sig = self.signature(tx, index, &self.script_pubkey())?;
        let script_sig = Builder::new()
            .push_slice(sig)
            .push_key(&self.public)
            .into_script();
        set_script_sig(tx, index, script_sig)
    }

    /// Sign the claim path of a P2SH HTLC: `<sig> <preimage> OP_TRUE <redeem_script>`
    pub fn sign_htlc_input(
        &self,
        tx: &mut Transaction,
        index: usize,
        redeem_script: &Script,
        preimage: &[u8],
    ) -> Result<(), SignerError> {
        let sig = self.signature(tx, index, redeem_script)?;
        let preimage = PushBytesBuf::try_from(preimage.to_vec())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
        let redeem = PushBytesBuf::try_from(redeem_script.to_bytes())
            .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
        let script_sig = Builder::new()
            .push_slice(sig)
            .push_slice(preimage)
            .push_opcode(opcodes::OP_TRUE)
            .push_slice(redeem)
            .into_script();
        set_script_sig(tx, index, script_sig)
    }
}

fn set_script_sig(tx: &mut Transaction, index: usize, script_sig: ScriptBuf) -> Result<(), SignerError> {
    let input = tx
        .input
        .get_mut(index)
        .ok_or_else(|| SignerError::SigningFailed(format!("no input at index {}", index)))?;
    input.script_sig = script_sig;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bitcoin::{
        absolute::LockTime, script::Instruction, transaction::Version, Amount, OutPoint,
        Sequence, TxIn, TxOut, Witness,
    };

    pub fn test_wallet() -> OperatorWallet {
        OperatorWallet::from_secret_bytes(&[1u8; 32], Network::Testnet).unwrap()
    }

    /// Check a P2PKH-style `<sig> <pubkey>` or HTLC script_sig signature
    pub fn verify_input(tx: &Transaction, index: usize, script_code: &Script, pubkey: &PublicKey) -> bool {
        let pushes: Vec<Vec<u8>> = tx.input[index]
            .script_sig
            .instructions()
            .filter_map(|i| match i {
                Ok(Instruction::PushBytes(b)) => Some(b.as_bytes().to_vec()),
                _ => None,
            })
            .collect();
        let Some(sig_bytes) = pushes.first() else {
            return false;
        };
        let Ok(sig) = ecdsa::Signature::from_slice(sig_bytes) else {
            return false;
        };
        let sighash = SighashCache::new(tx)
            .legacy_signature_hash(index, script_code, EcdsaSighashType::All.to_u32())
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        Secp256k1::verification_only()
            .verify_ecdsa(&msg, &sig.signature, &pubkey.inner)
            .is_ok()
    }

    fn spend_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn test_address_is_p2pkh() {
        let wallet = test_wallet();
        let address = wallet.address();
        assert!(address.to_string().starts_with('m') || address.to_string().starts_with('n'));
        assert!(wallet.script_pubkey().is_p2pkh());
        assert!(wallet.public_key().compressed);
    }

    #[test]
    fn test_wif_roundtrip_and_network_check() {
        let wallet = test_wallet();
        let wif = wallet.to_wif();
        let loaded = OperatorWallet::from_wif(&wif, Network::Testnet).unwrap();
        assert_eq!(loaded.public_key(), wallet.public_key());

        assert!(matches!(
            OperatorWallet::from_wif(&wif, Network::Bitcoin),
            Err(SignerError::WrongNetwork { .. })
        ));
        assert!(OperatorWallet::from_wif("not-a-key", Network::Testnet).is_err());
    }

    #[test]
    fn test_p2pkh_signature_verifies() {
        let wallet = test_wallet();
        let mut tx = spend_tx();
        wallet.sign_p2pkh_input(&mut tx, 0).unwrap();
        assert!(verify_input(&tx, 0, &wallet.script_pubkey(), &wallet.public_key()));
    }

    #[test]
    fn test_htlc_script_sig_layout() {
        let wallet = test_wallet();
        let redeem = ScriptBuf::from_bytes(vec![0x51, 0x75, 0x51]);
        let mut tx = spend_tx();
        wallet.sign_htlc_input(&mut tx, 0, &redeem, &[9u8; 32]).unwrap();

        let instructions: Vec<_> = tx.input[0]
            .script_sig
            .instructions()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(instructions.len(), 4);
        assert!(matches!(instructions[2], Instruction::Op(op) if op == opcodes::OP_TRUE));
        match &instructions[3] {
            Instruction::PushBytes(b) => assert_eq!(b.as_bytes(), redeem.as_bytes()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(verify_input(&tx, 0, &redeem, &wallet.public_key()));
    }

    #[test]
    fn test_missing_input_index() {
        let wallet = test_wallet();
        let mut tx = spend_tx();
        assert!(wallet.sign_p2pkh_input(&mut tx, 3).is_err());
    }
}
