//! Verification of finalized inputs against the outputs they spend
//!
//! VerifyInput: 𝒯𝒳 × ℕ × 𝒯 → {true, false}
//!
//! The verifier is template-directed: it recognises the standard spend
//! shapes produced by the finalizer, checks every hash commitment, then
//! replays CHECKMULTISIG (or CHECKSIG) with the digest the shape requires.
//! Structural problems surface as errors; failed checks return `false`.

use crate::error::{MultisigError, Result};
use crate::script::*;
use crate::sighash::{legacy_signature_hash, witness_v0_signature_hash};
use crate::signature::{parse_script_signature, verify_signature};
use crate::types::*;
use secp256k1::{PublicKey, Secp256k1, Verification};
use tracing::trace;

/// Which digest algorithm a spend uses
#[derive(Debug, Clone, Copy)]
enum DigestMode {
    Legacy,
    WitnessV0 { value: i64 },
}

struct SpendContext<'a, C: Verification> {
    secp: Secp256k1<C>,
    tx: &'a Transaction,
    index: usize,
}

impl<'a, C: Verification> SpendContext<'a, C> {
    fn digest(&self, script_code: &[u8], mode: DigestMode, sighash: SighashType) -> Result<Hash> {
        match mode {
            DigestMode::Legacy => legacy_signature_hash(self.tx, self.index, script_code, sighash),
            DigestMode::WitnessV0 { value } => {
                witness_v0_signature_hash(self.tx, self.index, script_code, value, sighash)
            }
        }
    }

    /// Verify one script-encoded signature; malformed signatures are just invalid
    fn check_sig(
        &self,
        sig_bytes: &[u8],
        public_key: &PublicKey,
        script_code: &[u8],
        mode: DigestMode,
    ) -> Result<bool> {
        let (signature, sighash) = match parse_script_signature(sig_bytes) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(false),
        };
        let digest = self.digest(script_code, mode, sighash)?;
        Ok(verify_signature(&self.secp, public_key, &signature, &digest))
    }

    /// Stack: dummy ‖ sig₁ … sigₘ against `m <keys> n CHECKMULTISIG`
    fn check_multisig(&self, stack: &[ByteString], script: &[u8], mode: DigestMode) -> Result<bool> {
        let (threshold, public_keys) = match parse_multisig(script)? {
            LockingScript::PayToMultisig {
                threshold,
                public_keys,
            } => (threshold, public_keys),
            _ => return Ok(false),
        };

        if stack.len() != threshold + 1 {
            trace!("input {}: expected {} stack items, found {}", self.index, threshold + 1, stack.len());
            return Ok(false);
        }
        // NULLDUMMY
        if !stack[0].is_empty() {
            return Ok(false);
        }

        // signatures must appear in key order, each key used at most once
        let mut keys = public_keys.iter();
        for sig_bytes in &stack[1..] {
            let mut matched = false;
            for key in keys.by_ref() {
                if self.check_sig(sig_bytes, key, script, mode)? {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stack: sig ‖ pubkey against HASH160(pubkey) = `pubkey_hash`
    fn check_single(&self, stack: &[ByteString], pubkey_hash: &[u8; 20], mode: DigestMode) -> Result<bool> {
        let [sig_bytes, key_bytes] = stack else {
            return Ok(false);
        };
        if hash160(key_bytes) != *pubkey_hash {
            return Ok(false);
        }
        let public_key = match PublicKey::from_slice(key_bytes) {
            Ok(key) => key,
            Err(_) => return Ok(false),
        };
        let script_code = LockingScript::PayToPubkeyHash(*pubkey_hash).to_bytes();
        self.check_sig(sig_bytes, &public_key, &script_code, mode)
    }

    /// Witness: stack ‖ witness_script, with SHA256(witness_script) = `program`
    fn check_witness_script(&self, witness: &Witness, program: &[u8; 32], value: i64) -> Result<bool> {
        let Some((witness_script, stack)) = witness.split_last() else {
            return Ok(false);
        };
        if sha256(witness_script) != *program {
            return Ok(false);
        }
        self.check_multisig(stack, witness_script, DigestMode::WitnessV0 { value })
    }
}

/// Verify the unlocking data of input `index` against the output it spends
pub fn verify_input(tx: &Transaction, index: usize, spent: &TransactionOutput) -> Result<bool> {
    let input = tx
        .inputs
        .get(index)
        .ok_or(MultisigError::InputOutOfRange(index))?;
    let ctx = SpendContext {
        secp: Secp256k1::verification_only(),
        tx,
        index,
    };
    let script_sig = parse_pushes(&input.script_sig)?;
    let value = spent.value;

    match classify(&spent.script_pubkey) {
        ScriptKind::PayToPubkeyHash(hash) => {
            Ok(input.witness.is_empty() && ctx.check_single(&script_sig, &hash, DigestMode::Legacy)?)
        }
        ScriptKind::Multisig => Ok(input.witness.is_empty()
            && ctx.check_multisig(&script_sig, &spent.script_pubkey, DigestMode::Legacy)?),
        ScriptKind::PayToWitnessPubkeyHash(hash) => Ok(script_sig.is_empty()
            && ctx.check_single(&input.witness, &hash, DigestMode::WitnessV0 { value })?),
        ScriptKind::PayToWitnessScriptHash(program) => {
            Ok(script_sig.is_empty() && ctx.check_witness_script(&input.witness, &program, value)?)
        }
        ScriptKind::PayToScriptHash(hash) => {
            let Some((redeem, stack)) = script_sig.split_last() else {
                return Ok(false);
            };
            if hash160(redeem) != hash {
                return Ok(false);
            }
            match classify(redeem) {
                ScriptKind::PayToWitnessScriptHash(program) => {
                    Ok(stack.is_empty() && ctx.check_witness_script(&input.witness, &program, value)?)
                }
                ScriptKind::PayToWitnessPubkeyHash(hash) => Ok(stack.is_empty()
                    && ctx.check_single(&input.witness, &hash, DigestMode::WitnessV0 { value })?),
                ScriptKind::Multisig => Ok(input.witness.is_empty()
                    && ctx.check_multisig(stack, redeem, DigestMode::Legacy)?),
                _ => Err(MultisigError::UnsupportedScript(format!(
                    "redeem script {}",
                    hex::encode(redeem)
                ))),
            }
        }
        ScriptKind::NonStandard => Err(MultisigError::UnsupportedScript(format!(
            "locking script {}",
            hex::encode(&spent.script_pubkey)
        ))),
    }
}

/// Verify every input; `spent_outputs[i]` is the output input `i` spends
pub fn verify_transaction(tx: &Transaction, spent_outputs: &[TransactionOutput]) -> Result<bool> {
    if spent_outputs.len() != tx.inputs.len() {
        return Err(MultisigError::InvalidState(format!(
            "{} spent outputs supplied for {} inputs",
            spent_outputs.len(),
            tx.inputs.len()
        )));
    }
    for (index, spent) in spent_outputs.iter().enumerate() {
        if !verify_input(tx, index, spent)? {
            return Ok(false);
        }
    }
    Ok(true)
}
