//! Signing keys and key providers
//!
//! Keys never appear in a transaction; they only produce signatures. Callers
//! hand keys to the assembler through a [`KeyProvider`] instead of any
//! process-wide wallet state.

use crate::encoding::hash256;
use crate::error::{MultisigError, Result};
use crate::types::{Hash, Network};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;

/// secp256k1 secret key with its compressed public key
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| MultisigError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Decode a compressed-key WIF string for `network`
    pub fn from_wif(wif: &str, network: Network) -> Result<Self> {
        let data = bs58::decode(wif)
            .into_vec()
            .map_err(|e| MultisigError::InvalidKey(format!("base58: {}", e)))?;
        if data.len() < 5 {
            return Err(MultisigError::InvalidKey("WIF too short".to_string()));
        }

        let (payload, checksum) = data.split_at(data.len() - 4);
        if hash256(payload)[..4] != *checksum {
            return Err(MultisigError::InvalidKey("WIF checksum mismatch".to_string()));
        }
        if payload[0] != network.wif_prefix() {
            return Err(MultisigError::InvalidKey(format!(
                "WIF prefix 0x{:02x} does not match {:?}",
                payload[0], network
            )));
        }

        match payload.len() {
            34 if payload[33] == 0x01 => Self::from_secret_bytes(&payload[1..33]),
            33 => Err(MultisigError::InvalidKey(
                "uncompressed WIF keys are not supported".to_string(),
            )),
            len => Err(MultisigError::InvalidKey(format!("WIF payload of {} bytes", len))),
        }
    }

    pub fn to_wif(&self, network: Network) -> String {
        let mut payload = Vec::with_capacity(38);
        payload.push(network.wif_prefix());
        payload.extend_from_slice(&self.secret_key.secret_bytes());
        payload.push(0x01);
        let checksum = hash256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload).into_string()
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Deterministic (RFC6979) low-S ECDSA signature over a 32-byte digest
    pub fn sign_digest(&self, digest: &Hash) -> Signature {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*digest);
        secp.sign_ecdsa(&message, &self.secret_key)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Source of signing keys for a cosigner
pub trait KeyProvider {
    /// Public keys this provider can sign for
    fn public_keys(&self) -> Vec<PublicKey>;

    /// Key pair for `public_key`, if held
    fn key_pair(&self, public_key: &PublicKey) -> Option<&KeyPair>;
}

/// In-memory provider holding named keys
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyProvider {
    keys: Vec<(String, KeyPair)>,
}

impl MemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the key stored under `name`
    pub fn insert(&mut self, name: impl Into<String>, key: KeyPair) {
        let name = name.into();
        match self.keys.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = key,
            None => self.keys.push((name, key)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&KeyPair> {
        self.keys
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, key)| key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn public_keys(&self) -> Vec<PublicKey> {
        self.keys.iter().map(|(_, key)| key.public_key()).collect()
    }

    fn key_pair(&self, public_key: &PublicKey) -> Option<&KeyPair> {
        self.keys
            .iter()
            .map(|(_, key)| key)
            .find(|key| key.public_key == *public_key)
    }
}
