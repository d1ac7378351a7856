//! Unspent output descriptors
//!
//! An [`UnspentOutput`] is supplied by a chain-query collaborator and is
//! read-only to the engine. It describes the output being spent either by
//! its value and locking script, or by the full parent transaction:
//!
//! Descriptor = 𝒪 × ((ℤ × 𝕊) ⊕ 𝒯𝒳) × redeem? × witness_script?

use crate::constants::*;
use crate::encoding::{deserialize_transaction, txid};
use crate::error::{MultisigError, Result};
use crate::script::*;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    /// Value and locking script of the spent output
    pub spent_output: Option<TransactionOutput>,
    /// Full serialized parent transaction
    pub parent_transaction: Option<ByteString>,
    pub redeem_script: Option<ByteString>,
    pub witness_script: Option<ByteString>,
}

/// A validated descriptor ready to be spent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub outpoint: OutPoint,
    pub output: TransactionOutput,
    pub template: Arc<LockingScript>,
}

impl UnspentOutput {
    /// Descriptor carrying the spent output's value and locking script
    pub fn from_output(outpoint: OutPoint, value: i64, script_pubkey: ByteString) -> Self {
        Self {
            outpoint,
            spent_output: Some(TransactionOutput {
                value,
                script_pubkey,
            }),
            parent_transaction: None,
            redeem_script: None,
            witness_script: None,
        }
    }

    /// Descriptor carrying the full parent transaction
    pub fn from_parent(outpoint: OutPoint, parent_transaction: ByteString) -> Self {
        Self {
            outpoint,
            spent_output: None,
            parent_transaction: Some(parent_transaction),
            redeem_script: None,
            witness_script: None,
        }
    }

    /// Descriptor for an output locked to `template`, with its redeem and
    /// witness scripts filled in
    pub fn for_template(outpoint: OutPoint, value: i64, template: &LockingScript) -> Self {
        Self::from_output(outpoint, value, template.to_bytes()).with_scripts_of(template)
    }

    /// Attach the redeem and witness scripts `template` reveals when spent
    pub fn with_scripts_of(mut self, template: &LockingScript) -> Self {
        self.redeem_script = template.redeem_script();
        self.witness_script = template.witness_script();
        self
    }

    pub fn with_redeem_script(mut self, redeem_script: ByteString) -> Self {
        self.redeem_script = Some(redeem_script);
        self
    }

    pub fn with_witness_script(mut self, witness_script: ByteString) -> Self {
        self.witness_script = Some(witness_script);
        self
    }

    /// Validate the descriptor's shape and return the spent output
    ///
    /// 1. exactly one of parent transaction / (value, script) is present
    /// 2. a parent transaction hashes to the outpoint's txid and has the index
    /// 3. 0 < value ≤ M_max
    /// 4. script non-empty
    pub fn validate(&self) -> Result<TransactionOutput> {
        let output = match (&self.spent_output, &self.parent_transaction) {
            (Some(output), None) => output.clone(),
            (None, Some(parent_bytes)) => {
                let parent = deserialize_transaction(parent_bytes).map_err(|e| {
                    MultisigError::IncompleteUtxoDescriptor(format!("parent transaction: {}", e))
                })?;
                if txid(&parent) != self.outpoint.hash {
                    return Err(MultisigError::IncompleteUtxoDescriptor(format!(
                        "parent transaction {} does not match outpoint txid {}",
                        display_hash(&txid(&parent)),
                        self.outpoint.txid_hex()
                    )));
                }
                parent
                    .outputs
                    .get(self.outpoint.index as usize)
                    .cloned()
                    .ok_or_else(|| {
                        MultisigError::IncompleteUtxoDescriptor(format!(
                            "parent transaction has no output {}",
                            self.outpoint.index
                        ))
                    })?
            }
            (Some(_), Some(_)) => {
                return Err(MultisigError::IncompleteUtxoDescriptor(
                    "both spent output and parent transaction supplied".to_string(),
                ))
            }
            (None, None) => {
                return Err(MultisigError::IncompleteUtxoDescriptor(
                    "neither spent output nor parent transaction supplied".to_string(),
                ))
            }
        };

        if output.value <= 0 || output.value > MAX_MONEY {
            return Err(MultisigError::IncompleteUtxoDescriptor(format!(
                "invalid value {}",
                output.value
            )));
        }
        if output.script_pubkey.is_empty() {
            return Err(MultisigError::IncompleteUtxoDescriptor(
                "empty locking script".to_string(),
            ));
        }
        Ok(output)
    }

    /// Validate and derive the template the output is locked to
    pub fn resolve(&self) -> Result<ResolvedOutput> {
        let output = self.validate()?;
        let template = template_from_parts(
            &output.script_pubkey,
            self.redeem_script.as_deref(),
            self.witness_script.as_deref(),
        )?;
        Ok(ResolvedOutput {
            outpoint: self.outpoint,
            output,
            template: Arc::new(template),
        })
    }
}

/// Rebuild the template from a locking script and the scripts that unlock it
pub fn template_from_parts(
    script_pubkey: &[u8],
    redeem_script: Option<&[u8]>,
    witness_script: Option<&[u8]>,
) -> Result<LockingScript> {
    match classify(script_pubkey) {
        ScriptKind::PayToScriptHash(hash) => {
            let redeem = redeem_script.ok_or_else(|| {
                MultisigError::IncompleteUtxoDescriptor("P2SH output needs a redeem script".to_string())
            })?;
            if hash160(redeem) != hash {
                return Err(MultisigError::ScriptMismatch(
                    "redeem script does not hash to the P2SH program".to_string(),
                ));
            }
            let inner = match classify(redeem) {
                ScriptKind::PayToWitnessScriptHash(program) => {
                    witness_template(&program, witness_script)?
                }
                ScriptKind::PayToWitnessPubkeyHash(hash) => {
                    reject_witness_script(witness_script)?;
                    LockingScript::PayToWitnessPubkeyHash(hash)
                }
                ScriptKind::Multisig => {
                    reject_witness_script(witness_script)?;
                    parse_multisig(redeem)?
                }
                _ => {
                    return Err(MultisigError::UnsupportedScript(format!(
                        "redeem script {}",
                        hex::encode(redeem)
                    )))
                }
            };
            Ok(LockingScript::PayToScriptHash(Box::new(inner)))
        }
        ScriptKind::PayToWitnessScriptHash(program) => {
            reject_redeem_script(redeem_script)?;
            witness_template(&program, witness_script)
        }
        ScriptKind::PayToWitnessPubkeyHash(hash) => {
            reject_redeem_script(redeem_script)?;
            reject_witness_script(witness_script)?;
            Ok(LockingScript::PayToWitnessPubkeyHash(hash))
        }
        ScriptKind::PayToPubkeyHash(hash) => {
            reject_redeem_script(redeem_script)?;
            reject_witness_script(witness_script)?;
            Ok(LockingScript::PayToPubkeyHash(hash))
        }
        ScriptKind::Multisig => {
            reject_redeem_script(redeem_script)?;
            reject_witness_script(witness_script)?;
            parse_multisig(script_pubkey)
        }
        ScriptKind::NonStandard => Err(MultisigError::UnsupportedScript(format!(
            "locking script {}",
            hex::encode(script_pubkey)
        ))),
    }
}

fn witness_template(program: &[u8; 32], witness_script: Option<&[u8]>) -> Result<LockingScript> {
    let witness = witness_script.ok_or_else(|| {
        MultisigError::IncompleteUtxoDescriptor("P2WSH output needs a witness script".to_string())
    })?;
    if sha256(witness) != *program {
        return Err(MultisigError::ScriptMismatch(
            "witness script does not hash to the P2WSH program".to_string(),
        ));
    }
    let inner = parse_multisig(witness)?;
    Ok(LockingScript::PayToWitnessScriptHash(Box::new(inner)))
}

fn reject_redeem_script(redeem_script: Option<&[u8]>) -> Result<()> {
    match redeem_script {
        Some(_) => Err(MultisigError::ScriptMismatch(
            "redeem script supplied for a non-P2SH output".to_string(),
        )),
        None => Ok(()),
    }
}

fn reject_witness_script(witness_script: Option<&[u8]>) -> Result<()> {
    match witness_script {
        Some(_) => Err(MultisigError::ScriptMismatch(
            "witness script supplied for a non-P2WSH output".to_string(),
        )),
        None => Ok(()),
    }
}
