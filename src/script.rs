//! Script template engine
//!
//! Builds the standard locking scripts used by multisig wallets:
//!
//! - P2MS:   OP_m ‖ ⟨pk₁⟩ … ⟨pkₙ⟩ ‖ OP_n ‖ OP_CHECKMULTISIG
//! - P2SH:   OP_HASH160 ‖ ⟨HASH160(redeem)⟩ ‖ OP_EQUAL
//! - P2WSH:  OP_0 ‖ ⟨SHA256(witness_script)⟩
//! - P2PKH:  OP_DUP OP_HASH160 ‖ ⟨HASH160(pk)⟩ ‖ OP_EQUALVERIFY OP_CHECKSIG
//! - P2WPKH: OP_0 ‖ ⟨HASH160(pk)⟩
//!
//! Keys passed to [`build_multisig`] are sorted by their compressed
//! encoding, so every cosigner derives byte-identical scripts.

use crate::constants::*;
use crate::encoding::Reader;
use crate::error::{MultisigError, Result};
use crate::types::ByteString;
use ripemd::Ripemd160;
use secp256k1::PublicKey;
use sha2::{Digest, Sha256};

/// HASH160(x) = RIPEMD160(SHA256(x))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = Sha256::digest(data);
    let ripemd160_hash = Ripemd160::digest(&sha256_hash);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripemd160_hash);
    out
}

/// Single SHA-256, the P2WSH commitment
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Append a minimal data push
pub fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// Append a small non-negative number (OP_0, OP_1..OP_16, or a one-byte push)
fn push_int(out: &mut Vec<u8>, n: usize) {
    match n {
        0 => out.push(OP_0),
        1..=16 => out.push(OP_1 + (n as u8 - 1)),
        _ => push_data(out, &[n as u8]),
    }
}

/// How an inner script is committed to by its wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapKind {
    ScriptHash,
    WitnessScriptHash,
}

/// Closed set of locking-script templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockingScript {
    PayToPubkeyHash([u8; 20]),
    PayToWitnessPubkeyHash([u8; 20]),
    /// Keys are kept in script order; [`build_multisig`] sorts them first.
    PayToMultisig {
        threshold: usize,
        public_keys: Vec<PublicKey>,
    },
    PayToScriptHash(Box<LockingScript>),
    PayToWitnessScriptHash(Box<LockingScript>),
}

/// Who may sign for a template, extracted from its innermost script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPolicy {
    Multisig {
        threshold: usize,
        public_keys: Vec<PublicKey>,
    },
    SingleKey { pubkey_hash: [u8; 20] },
}

impl SigningPolicy {
    pub fn threshold(&self) -> usize {
        match self {
            SigningPolicy::Multisig { threshold, .. } => *threshold,
            SigningPolicy::SingleKey { .. } => 1,
        }
    }

    pub fn contains(&self, public_key: &PublicKey) -> bool {
        match self {
            SigningPolicy::Multisig { public_keys, .. } => public_keys.contains(public_key),
            SigningPolicy::SingleKey { pubkey_hash } => {
                hash160(&public_key.serialize()) == *pubkey_hash
            }
        }
    }
}

/// BuildMultisig: m × [pk] → P2MS
///
/// 1. 1 ≤ m ≤ n
/// 2. n ≤ 20
/// 3. keys distinct
/// 4. keys sorted by compressed encoding
pub fn build_multisig(threshold: usize, public_keys: &[PublicKey]) -> Result<LockingScript> {
    let n = public_keys.len();
    if n > MAX_MULTISIG_KEYS {
        return Err(MultisigError::TooManyKeys(n));
    }
    if threshold < 1 || threshold > n {
        return Err(MultisigError::InvalidThreshold { threshold, keys: n });
    }

    let mut sorted = public_keys.to_vec();
    sorted.sort_by_key(|key| key.serialize());
    if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(MultisigError::InvalidKey("duplicate public key in multisig".to_string()));
    }

    Ok(LockingScript::PayToMultisig {
        threshold,
        public_keys: sorted,
    })
}

/// Wrap a template in P2SH or P2WSH
///
/// P2SH wraps a multisig, P2WSH or P2WPKH script; P2WSH wraps a multisig
/// script. Redeem scripts must fit in a single push (520 bytes).
pub fn wrap(inner: LockingScript, kind: WrapKind) -> Result<LockingScript> {
    match kind {
        WrapKind::ScriptHash => match inner {
            LockingScript::PayToMultisig { .. }
            | LockingScript::PayToWitnessScriptHash(_)
            | LockingScript::PayToWitnessPubkeyHash(_) => {
                let redeem_len = inner.to_bytes().len();
                if redeem_len > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(MultisigError::InvalidNesting(format!(
                        "redeem script is {} bytes, limit is {}",
                        redeem_len, MAX_SCRIPT_ELEMENT_SIZE
                    )));
                }
                Ok(LockingScript::PayToScriptHash(Box::new(inner)))
            }
            _ => Err(MultisigError::InvalidNesting(
                "P2SH can only wrap a multisig, P2WSH or P2WPKH script".to_string(),
            )),
        },
        WrapKind::WitnessScriptHash => match inner {
            LockingScript::PayToMultisig { .. } => {
                Ok(LockingScript::PayToWitnessScriptHash(Box::new(inner)))
            }
            _ => Err(MultisigError::InvalidNesting(
                "P2WSH can only wrap a multisig script".to_string(),
            )),
        },
    }
}

impl LockingScript {
    pub fn p2pkh(public_key: &PublicKey) -> Self {
        LockingScript::PayToPubkeyHash(hash160(&public_key.serialize()))
    }

    pub fn p2wpkh(public_key: &PublicKey) -> Self {
        LockingScript::PayToWitnessPubkeyHash(hash160(&public_key.serialize()))
    }

    /// Compile the template to script bytes
    pub fn to_bytes(&self) -> ByteString {
        let mut out = Vec::new();
        match self {
            LockingScript::PayToPubkeyHash(hash) => {
                out.extend_from_slice(&[OP_DUP, OP_HASH160]);
                push_data(&mut out, hash);
                out.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            }
            LockingScript::PayToWitnessPubkeyHash(hash) => {
                out.push(OP_0);
                push_data(&mut out, hash);
            }
            LockingScript::PayToMultisig {
                threshold,
                public_keys,
            } => {
                push_int(&mut out, *threshold);
                for key in public_keys {
                    push_data(&mut out, &key.serialize());
                }
                push_int(&mut out, public_keys.len());
                out.push(OP_CHECKMULTISIG);
            }
            LockingScript::PayToScriptHash(inner) => {
                out.push(OP_HASH160);
                push_data(&mut out, &hash160(&inner.to_bytes()));
                out.push(OP_EQUAL);
            }
            LockingScript::PayToWitnessScriptHash(inner) => {
                out.push(OP_0);
                push_data(&mut out, &sha256(&inner.to_bytes()));
            }
        }
        out
    }

    /// Script revealed in the scriptSig of a P2SH spend
    pub fn redeem_script(&self) -> Option<ByteString> {
        match self {
            LockingScript::PayToScriptHash(inner) => Some(inner.to_bytes()),
            _ => None,
        }
    }

    /// Script revealed in the witness of a P2WSH spend (direct or nested)
    pub fn witness_script(&self) -> Option<ByteString> {
        match self {
            LockingScript::PayToWitnessScriptHash(inner) => Some(inner.to_bytes()),
            LockingScript::PayToScriptHash(inner) => inner.witness_script(),
            _ => None,
        }
    }

    /// True when spending this template uses the BIP143 digest
    pub fn is_witness(&self) -> bool {
        match self {
            LockingScript::PayToWitnessPubkeyHash(_)
            | LockingScript::PayToWitnessScriptHash(_) => true,
            LockingScript::PayToScriptHash(inner) => inner.is_witness(),
            _ => false,
        }
    }

    /// Innermost template that actually checks signatures
    pub fn innermost(&self) -> &LockingScript {
        match self {
            LockingScript::PayToScriptHash(inner)
            | LockingScript::PayToWitnessScriptHash(inner) => inner.innermost(),
            other => other,
        }
    }

    pub fn signing_policy(&self) -> SigningPolicy {
        match self {
            LockingScript::PayToScriptHash(inner)
            | LockingScript::PayToWitnessScriptHash(inner) => inner.signing_policy(),
            LockingScript::PayToMultisig {
                threshold,
                public_keys,
            } => SigningPolicy::Multisig {
                threshold: *threshold,
                public_keys: public_keys.clone(),
            },
            LockingScript::PayToPubkeyHash(hash) | LockingScript::PayToWitnessPubkeyHash(hash) => {
                SigningPolicy::SingleKey { pubkey_hash: *hash }
            }
        }
    }

    /// Script code committed to by the signature digest
    pub fn script_code(&self) -> ByteString {
        match self.innermost() {
            LockingScript::PayToWitnessPubkeyHash(hash) => {
                LockingScript::PayToPubkeyHash(*hash).to_bytes()
            }
            inner => inner.to_bytes(),
        }
    }
}

/// Shape of a raw script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptKind {
    PayToPubkeyHash([u8; 20]),
    PayToScriptHash([u8; 20]),
    PayToWitnessPubkeyHash([u8; 20]),
    PayToWitnessScriptHash([u8; 32]),
    Multisig,
    NonStandard,
}

/// Classify raw script bytes into one of the standard shapes
pub fn classify(script: &[u8]) -> ScriptKind {
    match script {
        [OP_DUP, OP_HASH160, 0x14, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
            ScriptKind::PayToPubkeyHash(to_array(hash))
        }
        [OP_HASH160, 0x14, hash @ .., OP_EQUAL] if hash.len() == 20 => {
            ScriptKind::PayToScriptHash(to_array(hash))
        }
        [OP_0, 0x14, hash @ ..] if hash.len() == 20 => {
            ScriptKind::PayToWitnessPubkeyHash(to_array(hash))
        }
        [OP_0, 0x20, hash @ ..] if hash.len() == 32 => {
            ScriptKind::PayToWitnessScriptHash(to_array(hash))
        }
        _ if parse_multisig(script).is_ok() => ScriptKind::Multisig,
        _ => ScriptKind::NonStandard,
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn read_small_int(reader: &mut Reader<'_>) -> Result<usize> {
    match reader.u8()? {
        op @ OP_1..=OP_16 => Ok((op - OP_1 + 1) as usize),
        0x01 => Ok(reader.u8()? as usize),
        op => Err(MultisigError::UnsupportedScript(format!(
            "expected small integer, found opcode 0x{:02x}",
            op
        ))),
    }
}

/// Parse a bare `OP_m <keys> OP_n OP_CHECKMULTISIG` script, preserving key order
pub fn parse_multisig(script: &[u8]) -> Result<LockingScript> {
    let mut reader = Reader::new(script);
    let threshold = read_small_int(&mut reader)?;

    let mut public_keys = Vec::new();
    loop {
        let remaining = reader.remaining();
        // a key push is 34 bytes; the trailer is OP_n (1-2 bytes) + OP_CHECKMULTISIG
        if remaining <= 3 {
            break;
        }
        let len = reader.u8()? as usize;
        if len != COMPRESSED_PUBKEY_LEN {
            return Err(MultisigError::UnsupportedScript(format!(
                "multisig key push of {} bytes",
                len
            )));
        }
        let key = PublicKey::from_slice(reader.take(len)?)
            .map_err(|e| MultisigError::InvalidKey(e.to_string()))?;
        public_keys.push(key);
    }

    let n = read_small_int(&mut reader)?;
    if reader.u8()? != OP_CHECKMULTISIG || reader.remaining() != 0 {
        return Err(MultisigError::UnsupportedScript(
            "missing OP_CHECKMULTISIG trailer".to_string(),
        ));
    }
    if n != public_keys.len() {
        return Err(MultisigError::UnsupportedScript(format!(
            "script declares {} keys but pushes {}",
            n,
            public_keys.len()
        )));
    }
    if n > MAX_MULTISIG_KEYS {
        return Err(MultisigError::TooManyKeys(n));
    }
    if threshold < 1 || threshold > n {
        return Err(MultisigError::InvalidThreshold { threshold, keys: n });
    }

    Ok(LockingScript::PayToMultisig {
        threshold,
        public_keys,
    })
}

/// Parse a push-only script into the stack it produces
pub fn parse_pushes(script: &[u8]) -> Result<Vec<ByteString>> {
    let mut reader = Reader::new(script);
    let mut stack = Vec::new();
    while reader.remaining() > 0 {
        let op = reader.u8()?;
        let item = match op {
            OP_0 => Vec::new(),
            0x01..=0x4b => reader.take(op as usize)?.to_vec(),
            OP_PUSHDATA1 => {
                let len = reader.u8()? as usize;
                reader.take(len)?.to_vec()
            }
            OP_PUSHDATA2 => {
                let len = u16::from_le_bytes(to_array(reader.take(2)?)) as usize;
                reader.take(len)?.to_vec()
            }
            OP_PUSHDATA4 => {
                let len = reader.u32()? as usize;
                reader.take(len)?.to_vec()
            }
            OP_1NEGATE => vec![0x81],
            OP_1..=OP_16 => vec![op - OP_1 + 1],
            other => {
                return Err(MultisigError::UnsupportedScript(format!(
                    "non-push opcode 0x{:02x} in unlocking script",
                    other
                )))
            }
        };
        stack.push(item);
    }
    Ok(stack)
}
