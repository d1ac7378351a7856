//! # Multisig-Engine
//!
//! Assembly and signature collection for Bitcoin multisignature transactions.
//!
//! This crate builds the standard multisig locking scripts, ingests the
//! unspent outputs they protect, collects partial signatures from several
//! cosigners, and finalizes the result into raw transaction bytes ready for
//! broadcast by an external collaborator.
//!
//! ## Architecture
//!
//! Data flows through the system in one direction:
//! - Script templates (P2MS, P2SH, P2WSH, P2SH-P2WSH, P2PKH, P2WPKH)
//! - Unspent output descriptors (value + script, or the full parent transaction)
//! - Transaction assembler (inputs, outputs, signature digests)
//! - Partial signature collector (one record per cosigner per input)
//! - Finalizer (scriptSig / witness construction)
//! - Serializer and verifier (BIP144 wire format, template-directed checks)
//!
//! ## Design Principles
//!
//! 1. **Deterministic Scripts**: Multisig keys are sorted, so every cosigner
//!    derives identical scripts from the same key set
//! 2. **Explicit Keys**: Signing keys come from a [`keys::KeyProvider`], never
//!    from global state
//! 3. **Validated Transitions**: The builder rejects out-of-order calls
//! 4. **Exact Version Pinning**: All signature-critical dependencies pinned to exact versions
//!
//! ## Usage
//!
//! ```rust
//! use multisig_engine::MultisigEngine;
//! use multisig_engine::keys::KeyPair;
//! use multisig_engine::script::WrapKind;
//! use multisig_engine::types::*;
//! use multisig_engine::utxo::UnspentOutput;
//!
//! let engine = MultisigEngine::new();
//! let keys: Vec<KeyPair> = (1..=4u8)
//!     .map(|i| KeyPair::from_secret_bytes(&[i; 32]).unwrap())
//!     .collect();
//! let public_keys: Vec<_> = keys.iter().map(|k| k.public_key()).collect();
//!
//! // 2-of-4 multisig nested in P2WSH, nested in P2SH
//! let multisig = engine.build_multisig(2, &public_keys).unwrap();
//! let p2wsh = engine.wrap(multisig, WrapKind::WitnessScriptHash).unwrap();
//! let template = engine.wrap(p2wsh, WrapKind::ScriptHash).unwrap();
//!
//! let utxo = UnspentOutput::for_template(OutPoint::new([1; 32], 0), 100_000, &template);
//! let mut builder = engine.new_transaction();
//! builder.add_input(&utxo).unwrap();
//! builder.add_output(template.to_bytes(), 99_900).unwrap();
//! builder.sign(0, &keys[0], SighashType::All).unwrap();
//! builder.sign(0, &keys[1], SighashType::All).unwrap();
//! builder.finalize_all().unwrap();
//!
//! let bytes = builder.serialize().unwrap();
//! let tx = engine.deserialize_transaction(&bytes).unwrap();
//! assert!(engine.verify_transaction(&tx, &builder.spent_outputs()).unwrap());
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod config;
pub mod keys;
pub mod script;
pub mod utxo;
pub mod encoding;
pub mod sighash;
pub mod signature;
pub mod finalizer;
pub mod builder;
pub mod verify;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{MultisigError, Result};
pub use builder::{BuildStage, TransactionBuilder};
pub use config::AssemblerConfig;
pub use keys::{KeyPair, KeyProvider, MemoryKeyProvider};
pub use script::{LockingScript, WrapKind};
pub use utxo::UnspentOutput;

use secp256k1::PublicKey;

/// Entry point bundling a validated configuration with the crate's operations
///
/// # Examples
///
/// ```
/// use multisig_engine::{AssemblerConfig, MultisigEngine};
///
/// let engine = MultisigEngine::new();
/// assert_eq!(engine.config().version, 2);
///
/// let config = AssemblerConfig { lock_time: 650_000, ..AssemblerConfig::default() };
/// let engine = MultisigEngine::with_config(config).unwrap();
/// assert_eq!(engine.new_transaction().unsigned_transaction().lock_time, 650_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultisigEngine {
    config: AssemblerConfig,
}

impl MultisigEngine {
    /// Create an engine with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with `config`, rejecting invalid settings
    pub fn with_config(config: AssemblerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create an engine from a JSON configuration document
    ///
    /// # Examples
    ///
    /// ```
    /// use multisig_engine::{MultisigEngine, Network};
    ///
    /// let engine = MultisigEngine::from_json(r#"{"network": "testnet"}"#).unwrap();
    /// assert_eq!(engine.config().network, Network::Testnet);
    /// assert!(MultisigEngine::from_json(r#"{"version": 9}"#).is_err());
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self {
            config: AssemblerConfig::from_json(json)?,
        })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Build a sorted m-of-n multisig template
    ///
    /// # Examples
    ///
    /// ```
    /// use multisig_engine::{KeyPair, MultisigEngine, MultisigError};
    ///
    /// let engine = MultisigEngine::new();
    /// let a = KeyPair::from_secret_bytes(&[1; 32]).unwrap().public_key();
    /// let b = KeyPair::from_secret_bytes(&[2; 32]).unwrap().public_key();
    ///
    /// // key order does not affect the script
    /// let ab = engine.build_multisig(1, &[a, b]).unwrap();
    /// let ba = engine.build_multisig(1, &[b, a]).unwrap();
    /// assert_eq!(ab.to_bytes(), ba.to_bytes());
    ///
    /// assert_eq!(
    ///     engine.build_multisig(3, &[a, b]),
    ///     Err(MultisigError::InvalidThreshold { threshold: 3, keys: 2 })
    /// );
    /// ```
    pub fn build_multisig(&self, threshold: usize, public_keys: &[PublicKey]) -> Result<LockingScript> {
        script::build_multisig(threshold, public_keys)
    }

    /// Wrap a template in P2SH or P2WSH
    pub fn wrap(&self, inner: LockingScript, kind: WrapKind) -> Result<LockingScript> {
        script::wrap(inner, kind)
    }

    /// Start assembling a transaction with this engine's configuration
    pub fn new_transaction(&self) -> TransactionBuilder {
        TransactionBuilder::from_validated(self.config.clone())
    }

    /// Decode a WIF private key for the configured network
    ///
    /// # Examples
    ///
    /// ```
    /// use multisig_engine::{AssemblerConfig, MultisigEngine, Network};
    ///
    /// let config = AssemblerConfig { network: Network::Mainnet, ..AssemblerConfig::default() };
    /// let engine = MultisigEngine::with_config(config).unwrap();
    /// let key = engine
    ///     .key_from_wif("KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn")
    ///     .unwrap();
    /// assert_eq!(
    ///     key.public_key_hex(),
    ///     "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
    /// );
    /// ```
    pub fn key_from_wif(&self, wif: &str) -> Result<KeyPair> {
        KeyPair::from_wif(wif, self.config.network)
    }

    pub fn serialize_transaction(&self, tx: &Transaction) -> ByteString {
        encoding::serialize_transaction(tx)
    }

    pub fn deserialize_transaction(&self, bytes: &[u8]) -> Result<Transaction> {
        encoding::deserialize_transaction(bytes)
    }

    /// Transaction id in display (reversed) hex
    pub fn txid_hex(&self, tx: &Transaction) -> String {
        display_hash(&encoding::txid(tx))
    }

    /// Verify every input of a finalized transaction against the outputs it spends
    pub fn verify_transaction(&self, tx: &Transaction, spent_outputs: &[TransactionOutput]) -> Result<bool> {
        verify::verify_transaction(tx, spent_outputs)
    }
}
