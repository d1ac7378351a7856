//! Partial signatures collected per input

use crate::error::{MultisigError, Result};
use crate::types::{ByteString, Hash, SighashType};
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, Verification};

/// One cosigner's signature over one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub public_key: PublicKey,
    pub signature: Signature,
    pub sighash: SighashType,
}

impl SignatureRecord {
    pub fn new(public_key: PublicKey, signature: Signature, sighash: SighashType) -> Self {
        Self {
            public_key,
            signature,
            sighash,
        }
    }

    /// Key the collector indexes records by
    pub fn key_id(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    /// Script encoding: DER ‖ sighash flag
    pub fn to_script_bytes(&self) -> ByteString {
        encode_script_signature(&self.signature, self.sighash)
    }

    /// Parse a script-encoded signature attributed to `public_key`
    pub fn from_script_bytes(public_key: PublicKey, bytes: &[u8]) -> Result<Self> {
        let (signature, sighash) = parse_script_signature(bytes)?;
        Ok(Self::new(public_key, signature, sighash))
    }

    pub fn verify(&self, digest: &Hash) -> bool {
        let secp = Secp256k1::verification_only();
        verify_signature(&secp, &self.public_key, &self.signature, digest)
    }
}

pub fn encode_script_signature(signature: &Signature, sighash: SighashType) -> ByteString {
    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(sighash.to_u8());
    bytes
}

/// Split `DER ‖ flag` into its parts
pub fn parse_script_signature(bytes: &[u8]) -> Result<(Signature, SighashType)> {
    let (flag, der) = bytes
        .split_last()
        .ok_or_else(|| MultisigError::MalformedEncoding("empty signature".to_string()))?;
    let sighash = SighashType::from_u8(*flag)?;
    let signature = Signature::from_der(der)
        .map_err(|e| MultisigError::MalformedEncoding(format!("signature DER: {}", e)))?;
    Ok((signature, sighash))
}

/// Verify an ECDSA signature over a 32-byte digest
pub fn verify_signature<C: Verification>(
    secp: &Secp256k1<C>,
    public_key: &PublicKey,
    signature: &Signature,
    digest: &Hash,
) -> bool {
    let message = Message::from_digest(*digest);
    secp.verify_ecdsa(&message, signature, public_key).is_ok()
}
