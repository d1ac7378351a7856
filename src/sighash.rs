//! Signature digests
//!
//! Two algorithms, selected by the kind of output being spent:
//!
//! - Legacy: Hash256 of a modified copy of the whole transaction, with the
//!   signed input's script replaced by the script code and every other
//!   input's script emptied.
//! - Witness v0 (BIP143): Hash256 of a fixed-layout preimage committing to
//!   the spent value and script code directly.

use crate::constants::*;
use crate::encoding::{hash256, serialize_without_witness, write_bytes, write_outpoint, write_output};
use crate::error::{MultisigError, Result};
use crate::types::*;

fn check_index(tx: &Transaction, input_index: usize) -> Result<()> {
    if input_index >= tx.inputs.len() {
        return Err(MultisigError::InputOutOfRange(input_index));
    }
    Ok(())
}

/// LegacySighash: 𝒯𝒳 × ℕ × 𝕊 × flag → ℍ
///
/// 1. SIGHASH_SINGLE with i ≥ |outs| signs the constant 1
/// 2. clear all scriptSigs, set ins[i].scriptSig = script_code
/// 3. NONE: drop outputs; SINGLE: keep outs[..=i], blank outs[..i]
/// 4. NONE/SINGLE: zero other inputs' sequences
/// 5. ANYONECANPAY: keep only ins[i]
/// 6. Hash256(Serialize(tx') ‖ flag as u32 LE)
pub fn legacy_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash: SighashType,
) -> Result<Hash> {
    check_index(tx, input_index)?;

    let base = sighash.base();
    if base == SIGHASH_SINGLE && input_index >= tx.outputs.len() {
        let mut one = [0u8; 32];
        one[0] = 1;
        return Ok(one);
    }

    let mut copy = tx.clone();
    for input in copy.inputs.iter_mut() {
        input.script_sig.clear();
        input.witness.clear();
    }
    copy.inputs[input_index].script_sig = script_code.to_vec();

    if base == SIGHASH_NONE || base == SIGHASH_SINGLE {
        if base == SIGHASH_NONE {
            copy.outputs.clear();
        } else {
            copy.outputs.truncate(input_index + 1);
            for output in copy.outputs[..input_index].iter_mut() {
                output.value = -1;
                output.script_pubkey.clear();
            }
        }
        for (i, input) in copy.inputs.iter_mut().enumerate() {
            if i != input_index {
                input.sequence = 0;
            }
        }
    }

    if sighash.anyone_can_pay() {
        let signed = copy.inputs.swap_remove(input_index);
        copy.inputs = vec![signed];
    }

    let mut preimage = serialize_without_witness(&copy);
    preimage.extend_from_slice(&(sighash.to_u8() as u32).to_le_bytes());
    Ok(hash256(&preimage))
}

/// WitnessV0Sighash (BIP143): 𝒯𝒳 × ℕ × 𝕊 × ℤ × flag → ℍ
///
/// Hash256(version ‖ hashPrevouts ‖ hashSequence ‖ outpoint ‖ scriptCode ‖
///         value ‖ nSequence ‖ hashOutputs ‖ nLockTime ‖ flag)
pub fn witness_v0_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    value: i64,
    sighash: SighashType,
) -> Result<Hash> {
    check_index(tx, input_index)?;

    let base = sighash.base();
    let anyone_can_pay = sighash.anyone_can_pay();
    let zero = [0u8; 32];

    let hash_prevouts = if anyone_can_pay {
        zero
    } else {
        let mut data = Vec::with_capacity(tx.inputs.len() * 36);
        for input in &tx.inputs {
            write_outpoint(&mut data, &input.prevout);
        }
        hash256(&data)
    };

    let hash_sequence = if anyone_can_pay || base == SIGHASH_SINGLE || base == SIGHASH_NONE {
        zero
    } else {
        let mut data = Vec::with_capacity(tx.inputs.len() * 4);
        for input in &tx.inputs {
            data.extend_from_slice(&input.sequence.to_le_bytes());
        }
        hash256(&data)
    };

    let hash_outputs = if base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        let mut data = Vec::new();
        for output in &tx.outputs {
            write_output(&mut data, output);
        }
        hash256(&data)
    } else if base == SIGHASH_SINGLE && input_index < tx.outputs.len() {
        let mut data = Vec::new();
        write_output(&mut data, &tx.outputs[input_index]);
        hash256(&data)
    } else {
        zero
    };

    let input = &tx.inputs[input_index];
    let mut preimage = Vec::with_capacity(156 + script_code.len());
    preimage.extend_from_slice(&tx.version.to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    write_outpoint(&mut preimage, &input.prevout);
    write_bytes(&mut preimage, script_code);
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&(sighash.to_u8() as u32).to_le_bytes());
    Ok(hash256(&preimage))
}
