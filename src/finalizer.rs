//! Finalization: turn collected signatures into unlocking data
//!
//! Signatures are emitted in the order their keys appear in the script,
//! not the order cosigners signed in. CHECKMULTISIG consumes exactly `m`
//! signatures after one dummy element, so unsigned positions are skipped
//! rather than filled with placeholders, and at most `m` signatures are used.

use crate::error::{MultisigError, Result};
use crate::script::{push_data, LockingScript, SigningPolicy};
use crate::signature::SignatureRecord;
use crate::types::{ByteString, Witness};
use serde::{Deserialize, Serialize};

/// Final unlocking data for one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScripts {
    pub script_sig: ByteString,
    pub witness: Witness,
}

/// Stack items that satisfy the template's signing policy
///
/// `valid` holds only signatures already checked against the input's
/// digest; their order does not matter.
pub fn satisfying_stack(
    input_index: usize,
    template: &LockingScript,
    valid: &[SignatureRecord],
) -> Result<Vec<ByteString>> {
    match template.signing_policy() {
        SigningPolicy::Multisig {
            threshold,
            public_keys,
        } => {
            let ordered: Vec<&SignatureRecord> = public_keys
                .iter()
                .filter_map(|key| valid.iter().find(|record| record.public_key == *key))
                .collect();
            if ordered.len() < threshold {
                return Err(MultisigError::InsufficientSignatures {
                    input: input_index,
                    required: threshold,
                    found: ordered.len(),
                });
            }

            let mut stack = Vec::with_capacity(threshold + 1);
            // CHECKMULTISIG pops one element more than it uses
            stack.push(Vec::new());
            stack.extend(
                ordered
                    .iter()
                    .take(threshold)
                    .map(|record| record.to_script_bytes()),
            );
            Ok(stack)
        }
        policy @ SigningPolicy::SingleKey { .. } => {
            let record = valid
                .iter()
                .find(|record| policy.contains(&record.public_key))
                .ok_or(MultisigError::InsufficientSignatures {
                    input: input_index,
                    required: 1,
                    found: 0,
                })?;
            Ok(vec![
                record.to_script_bytes(),
                record.public_key.serialize().to_vec(),
            ])
        }
    }
}

fn push_all(items: &[ByteString]) -> ByteString {
    let mut script = Vec::new();
    for item in items {
        push_data(&mut script, item);
    }
    script
}

/// Place the satisfying stack in the scriptSig and/or witness
pub fn build_final_scripts(template: &LockingScript, stack: Vec<ByteString>) -> Result<FinalScripts> {
    match template {
        LockingScript::PayToMultisig { .. } | LockingScript::PayToPubkeyHash(_) => {
            Ok(FinalScripts {
                script_sig: push_all(&stack),
                witness: Vec::new(),
            })
        }
        LockingScript::PayToWitnessPubkeyHash(_) => Ok(FinalScripts {
            script_sig: Vec::new(),
            witness: stack,
        }),
        LockingScript::PayToWitnessScriptHash(inner) => {
            let mut witness = stack;
            witness.push(inner.to_bytes());
            Ok(FinalScripts {
                script_sig: Vec::new(),
                witness,
            })
        }
        LockingScript::PayToScriptHash(inner) => {
            let redeem = inner.to_bytes();
            match inner.as_ref() {
                LockingScript::PayToMultisig { .. } => {
                    let mut items = stack;
                    items.push(redeem);
                    Ok(FinalScripts {
                        script_sig: push_all(&items),
                        witness: Vec::new(),
                    })
                }
                // nested segwit: the scriptSig only reveals the witness program
                LockingScript::PayToWitnessScriptHash(_)
                | LockingScript::PayToWitnessPubkeyHash(_) => {
                    let nested = build_final_scripts(inner, stack)?;
                    Ok(FinalScripts {
                        script_sig: push_all(&[redeem]),
                        witness: nested.witness,
                    })
                }
                other => Err(MultisigError::UnsupportedScript(format!(
                    "cannot finalize P2SH wrapping {:?}",
                    other
                ))),
            }
        }
    }
}
