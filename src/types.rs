//! Core transaction types for multisig assembly

use crate::constants::*;
use crate::error::{MultisigError, Result};
use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Witness stack of a single input
pub type Witness = Vec<ByteString>;

/// OutPoint: reference to a previous transaction output
///
/// `hash` is kept in wire (internal) byte order; the conventional txid
/// display order is the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// Build an outpoint from a txid in display (big-endian) hex
    pub fn from_txid_hex(txid: &str, index: u32) -> Result<Self> {
        let bytes = hex::decode(txid)
            .map_err(|e| MultisigError::MalformedEncoding(format!("txid hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(MultisigError::MalformedEncoding(format!(
                "txid must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        hash.reverse();
        Ok(Self { hash, index })
    }

    /// Txid in display (big-endian) hex
    pub fn txid_hex(&self) -> String {
        display_hash(&self.hash)
    }
}

/// Transaction Input: outpoint, unlocking script, sequence and witness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
    pub witness: Witness,
}

/// Transaction Output: value and locking script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: i64,
    pub script_pubkey: ByteString,
}

/// Transaction: version, inputs, outputs, lock time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// True when at least one input carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }
}

/// Signature hash type appended to every signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SighashType {
    All,
    None,
    Single,
    AllPlusAnyoneCanPay,
    NonePlusAnyoneCanPay,
    SinglePlusAnyoneCanPay,
}

impl SighashType {
    pub fn to_u8(self) -> u8 {
        match self {
            SighashType::All => SIGHASH_ALL,
            SighashType::None => SIGHASH_NONE,
            SighashType::Single => SIGHASH_SINGLE,
            SighashType::AllPlusAnyoneCanPay => SIGHASH_ALL | SIGHASH_ANYONECANPAY,
            SighashType::NonePlusAnyoneCanPay => SIGHASH_NONE | SIGHASH_ANYONECANPAY,
            SighashType::SinglePlusAnyoneCanPay => SIGHASH_SINGLE | SIGHASH_ANYONECANPAY,
        }
    }

    pub fn from_u8(flag: u8) -> Result<Self> {
        match flag {
            0x01 => Ok(SighashType::All),
            0x02 => Ok(SighashType::None),
            0x03 => Ok(SighashType::Single),
            0x81 => Ok(SighashType::AllPlusAnyoneCanPay),
            0x82 => Ok(SighashType::NonePlusAnyoneCanPay),
            0x83 => Ok(SighashType::SinglePlusAnyoneCanPay),
            other => Err(MultisigError::MalformedEncoding(format!(
                "unknown sighash flag 0x{:02x}",
                other
            ))),
        }
    }

    pub fn anyone_can_pay(self) -> bool {
        self.to_u8() & SIGHASH_ANYONECANPAY != 0
    }

    /// Base type with the ANYONECANPAY bit cleared
    pub fn base(self) -> u8 {
        self.to_u8() & 0x1f
    }
}

impl Default for SighashType {
    fn default() -> Self {
        SighashType::All
    }
}

/// Network a key is encoded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn wif_prefix(self) -> u8 {
        match self {
            Network::Mainnet => WIF_PREFIX_MAINNET,
            Network::Testnet | Network::Regtest => WIF_PREFIX_TESTNET,
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Network::Regtest
    }
}

/// Render a wire-order hash in display order
pub fn display_hash(hash: &Hash) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}
