//! Transaction assembly and partial signature collection
//!
//! A [`TransactionBuilder`] moves through four stages:
//!
//! Open → Signing → Finalized → Extracted
//!
//! 1. Open: inputs and outputs may be appended
//! 2. Signing: at least one signature recorded; inputs and outputs are frozen
//! 3. Finalized: every input carries final unlocking data
//! 4. Extracted: the transaction has been produced; no further mutation
//!
//! Every failing call leaves the builder unchanged.

use crate::config::AssemblerConfig;
use crate::constants::MAX_MONEY;
use crate::encoding::{serialize_transaction, virtual_size};
use crate::error::{MultisigError, Result};
use crate::finalizer::{build_final_scripts, satisfying_stack, FinalScripts};
use crate::keys::{KeyPair, KeyProvider};
use crate::script::LockingScript;
use crate::sighash::{legacy_signature_hash, witness_v0_signature_hash};
use crate::signature::SignatureRecord;
use crate::types::*;
use crate::utxo::{ResolvedOutput, UnspentOutput};
use crate::verify::verify_input;
use secp256k1::PublicKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle stage of a [`TransactionBuilder`]; stages only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Open,
    Signing,
    Finalized,
    Extracted,
}

/// An input being assembled, with the signatures collected for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInput {
    resolved: ResolvedOutput,
    sequence: u32,
    /// Keyed by compressed public key; one record per cosigner
    signatures: BTreeMap<[u8; 33], SignatureRecord>,
    finalized: Option<FinalScripts>,
}

impl PendingInput {
    pub fn outpoint(&self) -> OutPoint {
        self.resolved.outpoint
    }

    /// Value of the output being spent
    pub fn value(&self) -> i64 {
        self.resolved.output.value
    }

    pub fn spent_output(&self) -> &TransactionOutput {
        &self.resolved.output
    }

    pub fn template(&self) -> &Arc<LockingScript> {
        &self.resolved.template
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn signatures(&self) -> impl Iterator<Item = &SignatureRecord> {
        self.signatures.values()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub fn final_scripts(&self) -> Option<&FinalScripts> {
        self.finalized.as_ref()
    }
}

/// Assembles one spending transaction and collects cosigner signatures for it
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    config: AssemblerConfig,
    inputs: Vec<PendingInput>,
    outputs: Vec<TransactionOutput>,
    stage: BuildStage,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            config: AssemblerConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            stage: BuildStage::Open,
        }
    }

    pub fn with_config(config: AssemblerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    pub(crate) fn from_validated(config: AssemblerConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn stage(&self) -> BuildStage {
        self.stage
    }

    pub fn inputs(&self) -> &[PendingInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TransactionOutput] {
        &self.outputs
    }

    pub fn input(&self, index: usize) -> Result<&PendingInput> {
        self.inputs
            .get(index)
            .ok_or(MultisigError::InputOutOfRange(index))
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        match self.stage {
            BuildStage::Open => Ok(()),
            stage => Err(MultisigError::InvalidState(format!(
                "cannot {} in stage {:?}",
                action, stage
            ))),
        }
    }

    fn ensure_not_extracted(&self, action: &str) -> Result<()> {
        match self.stage {
            BuildStage::Extracted => Err(MultisigError::InvalidState(format!(
                "cannot {} after extraction",
                action
            ))),
            _ => Ok(()),
        }
    }

    /// Recompute the stage from the inputs' signing state
    fn refresh_stage(&mut self) {
        if self.stage == BuildStage::Extracted {
            return;
        }
        self.stage = if !self.inputs.is_empty() && self.inputs.iter().all(PendingInput::is_finalized)
        {
            BuildStage::Finalized
        } else if self
            .inputs
            .iter()
            .any(|input| input.is_finalized() || !input.signatures.is_empty())
        {
            BuildStage::Signing
        } else {
            BuildStage::Open
        };
    }

    /// Append an input spending `utxo`; returns its index
    pub fn add_input(&mut self, utxo: &UnspentOutput) -> Result<usize> {
        self.ensure_open("add an input")?;
        let resolved = utxo.resolve()?;
        if self.inputs.iter().any(|input| input.outpoint() == resolved.outpoint) {
            return Err(MultisigError::InvalidState(format!(
                "outpoint {}:{} is already spent by this transaction",
                resolved.outpoint.txid_hex(),
                resolved.outpoint.index
            )));
        }

        let index = self.inputs.len();
        debug!(
            "input {}: spending {}:{} ({} sat)",
            index,
            resolved.outpoint.txid_hex(),
            resolved.outpoint.index,
            resolved.output.value
        );
        self.inputs.push(PendingInput {
            resolved,
            sequence: self.config.sequence,
            signatures: BTreeMap::new(),
            finalized: None,
        });
        Ok(index)
    }

    /// Append an output; returns its index
    pub fn add_output(&mut self, script_pubkey: ByteString, value: i64) -> Result<usize> {
        self.ensure_open("add an output")?;
        if value < 0 {
            return Err(MultisigError::NegativeValue(value));
        }
        if value > MAX_MONEY {
            return Err(MultisigError::ValueOutOfRange(value));
        }
        let index = self.outputs.len();
        debug!("output {}: {} sat", index, value);
        self.outputs.push(TransactionOutput {
            value,
            script_pubkey,
        });
        Ok(index)
    }

    pub fn add_output_template(&mut self, template: &LockingScript, value: i64) -> Result<usize> {
        self.add_output(template.to_bytes(), value)
    }

    /// The transaction with every unlocking field empty
    pub fn unsigned_transaction(&self) -> Transaction {
        Transaction {
            version: self.config.version,
            inputs: self
                .inputs
                .iter()
                .map(|input| TransactionInput {
                    prevout: input.outpoint(),
                    script_sig: Vec::new(),
                    sequence: input.sequence,
                    witness: Vec::new(),
                })
                .collect(),
            outputs: self.outputs.clone(),
            lock_time: self.config.lock_time,
        }
    }

    /// Digest a cosigner signs for input `index`
    ///
    /// Witness templates (native or nested) use the BIP143 digest over the
    /// spent value; everything else uses the legacy digest.
    pub fn signing_hash(&self, index: usize, sighash: SighashType) -> Result<Hash> {
        let input = self.input(index)?;
        let template = input.template();
        let script_code = template.script_code();
        let tx = self.unsigned_transaction();
        if template.is_witness() {
            witness_v0_signature_hash(&tx, index, &script_code, input.value(), sighash)
        } else {
            legacy_signature_hash(&tx, index, &script_code, sighash)
        }
    }

    fn check_signable(&self, index: usize, public_key: &PublicKey) -> Result<&PendingInput> {
        self.ensure_not_extracted("sign")?;
        let input = self.input(index)?;
        if input.is_finalized() {
            return Err(MultisigError::InvalidState(format!(
                "input {} is already finalized",
                index
            )));
        }
        if !input.template().signing_policy().contains(public_key) {
            return Err(MultisigError::KeyNotInScript(hex::encode(public_key.serialize())));
        }
        Ok(input)
    }

    /// Produce a signature for input `index` without recording it
    ///
    /// Takes `&self`, so cosigners may sign concurrently and merge the
    /// results with [`add_signature`](Self::add_signature).
    pub fn sign_detached(
        &self,
        index: usize,
        key: &KeyPair,
        sighash: SighashType,
    ) -> Result<SignatureRecord> {
        let public_key = key.public_key();
        self.check_signable(index, &public_key)?;
        let digest = self.signing_hash(index, sighash)?;
        Ok(SignatureRecord::new(public_key, key.sign_digest(&digest), sighash))
    }

    /// Record a signature for input `index`; a later record for the same key
    /// replaces the earlier one
    pub fn add_signature(&mut self, index: usize, record: SignatureRecord) -> Result<()> {
        self.check_signable(index, &record.public_key)?;
        debug!(
            "input {}: recorded signature from {}",
            index,
            hex::encode(record.key_id())
        );
        self.inputs[index].signatures.insert(record.key_id(), record);
        self.refresh_stage();
        Ok(())
    }

    /// Sign input `index` with `key`
    pub fn sign(&mut self, index: usize, key: &KeyPair, sighash: SighashType) -> Result<()> {
        let record = self.sign_detached(index, key, sighash)?;
        self.add_signature(index, record)
    }

    /// Sign with the configured default sighash type
    pub fn sign_default(&mut self, index: usize, key: &KeyPair) -> Result<()> {
        self.sign(index, key, self.config.default_sighash)
    }

    /// Sign every unfinalized input whose template contains `key`
    ///
    /// Returns the number of inputs signed.
    pub fn sign_all_inputs(&mut self, key: &KeyPair, sighash: SighashType) -> Result<usize> {
        self.ensure_not_extracted("sign")?;
        let public_key = key.public_key();
        let mut records = Vec::new();
        for (index, input) in self.inputs.iter().enumerate() {
            if !input.is_finalized() && input.template().signing_policy().contains(&public_key) {
                records.push((index, self.sign_detached(index, key, sighash)?));
            }
        }
        let signed = records.len();
        for (index, record) in records {
            self.add_signature(index, record)?;
        }
        Ok(signed)
    }

    /// Sign input `index` with every provider key that belongs to its template
    ///
    /// Returns the number of signatures added.
    pub fn sign_with_provider(
        &mut self,
        index: usize,
        provider: &dyn KeyProvider,
        sighash: SighashType,
    ) -> Result<usize> {
        let policy = self.input(index)?.template().signing_policy();
        let mut records = Vec::new();
        for public_key in provider.public_keys() {
            if !policy.contains(&public_key) {
                continue;
            }
            if let Some(key) = provider.key_pair(&public_key) {
                records.push(self.sign_detached(index, key, sighash)?);
            }
        }
        if records.is_empty() {
            warn!("input {}: provider holds no key for this input", index);
        }
        let signed = records.len();
        for record in records {
            self.add_signature(index, record)?;
        }
        Ok(signed)
    }

    /// True when `record` belongs to the input's template and verifies
    /// against the input's digest for its sighash type
    fn record_is_valid(&self, index: usize, record: &SignatureRecord) -> Result<bool> {
        let input = self.input(index)?;
        if !input.template().signing_policy().contains(&record.public_key) {
            return Ok(false);
        }
        let digest = self.signing_hash(index, record.sighash)?;
        Ok(record.verify(&digest))
    }

    /// Check the signatures recorded for input `index`
    ///
    /// With a key: the result for that key's record, or `NoSignatureForKey`.
    /// Without: true only if there is at least one record and all verify.
    pub fn validate_signatures(&self, index: usize, public_key: Option<&PublicKey>) -> Result<bool> {
        let input = self.input(index)?;
        match public_key {
            Some(key) => {
                let record = input.signatures.get(&key.serialize()).ok_or_else(|| {
                    MultisigError::NoSignatureForKey(hex::encode(key.serialize()))
                })?;
                self.record_is_valid(index, record)
            }
            None => {
                if input.signatures.is_empty() {
                    return Ok(false);
                }
                for record in input.signatures.values() {
                    if !self.record_is_valid(index, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Build the final unlocking data for input `index`
    ///
    /// Only signatures that verify count toward the threshold. Finalizing
    /// an already finalized input is a no-op.
    pub fn finalize(&mut self, index: usize) -> Result<()> {
        self.ensure_not_extracted("finalize")?;
        let input = self.input(index)?;
        if input.is_finalized() {
            return Ok(());
        }

        let mut valid = Vec::with_capacity(input.signatures.len());
        for record in input.signatures.values() {
            if self.record_is_valid(index, record)? {
                valid.push(record.clone());
            } else {
                warn!(
                    "input {}: ignoring invalid signature from {}",
                    index,
                    hex::encode(record.key_id())
                );
            }
        }

        let template = Arc::clone(input.template());
        let stack = satisfying_stack(index, &template, &valid)?;
        let scripts = build_final_scripts(&template, stack)?;
        debug!(
            "input {}: finalized ({} byte scriptSig, {} witness items)",
            index,
            scripts.script_sig.len(),
            scripts.witness.len()
        );
        self.inputs[index].finalized = Some(scripts);
        self.refresh_stage();
        Ok(())
    }

    /// Finalize every input in order; stops at the first failure and keeps
    /// the inputs finalized before it
    pub fn finalize_all(&mut self) -> Result<()> {
        for index in 0..self.inputs.len() {
            self.finalize(index)?;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(PendingInput::is_finalized)
    }

    /// Sum of input values minus sum of output values
    ///
    /// Either sum above `MAX_MONEY` fails with `ValueOutOfRange`.
    pub fn fee(&self) -> Result<i64> {
        let inputs = sum_values(self.inputs.iter().map(PendingInput::value))?;
        let outputs = sum_values(self.outputs.iter().map(|output| output.value))?;
        if outputs > inputs {
            return Err(MultisigError::OutputsExceedInputs { inputs, outputs });
        }
        Ok(inputs - outputs)
    }

    /// The finalized transaction, with unlocking data installed
    ///
    /// Fails with `NotFinalized` for the first input lacking final data and
    /// with `FeeTooHigh` when the fee rate exceeds the configured maximum.
    /// Moves the builder to `Extracted`.
    pub fn extract_transaction(&mut self) -> Result<Transaction> {
        if self.inputs.is_empty() {
            return Err(MultisigError::InvalidState("transaction has no inputs".to_string()));
        }
        if self.outputs.is_empty() {
            return Err(MultisigError::InvalidState("transaction has no outputs".to_string()));
        }

        let mut tx = self.unsigned_transaction();
        for (index, (tx_input, input)) in tx.inputs.iter_mut().zip(&self.inputs).enumerate() {
            let scripts = input
                .final_scripts()
                .ok_or(MultisigError::NotFinalized(index))?;
            tx_input.script_sig = scripts.script_sig.clone();
            tx_input.witness = scripts.witness.clone();
        }

        let fee = self.fee()?;
        let vsize = virtual_size(&tx) as u64;
        let rate = fee as u64 / vsize.max(1);
        if rate > self.config.max_fee_rate {
            warn!("fee {} sat over {} vbytes exceeds the configured maximum rate", fee, vsize);
            return Err(MultisigError::FeeTooHigh {
                fee,
                rate,
                max: self.config.max_fee_rate,
            });
        }

        if self.stage != BuildStage::Extracted {
            debug!(
                "extracted transaction: {} inputs, {} outputs, fee {} sat, {} vbytes",
                tx.inputs.len(),
                tx.outputs.len(),
                fee,
                vsize
            );
        }
        self.stage = BuildStage::Extracted;
        Ok(tx)
    }

    /// Extract and serialize the final transaction
    pub fn serialize(&mut self) -> Result<ByteString> {
        Ok(serialize_transaction(&self.extract_transaction()?))
    }

    pub fn to_hex(&mut self) -> Result<String> {
        Ok(hex::encode(self.serialize()?))
    }

    /// Merge signatures and final scripts from another cosigner's builder
    ///
    /// Both builders must describe the same unsigned transaction and spend
    /// the same outputs through the same templates. Incoming records must
    /// belong to the input's template and adopted final scripts must
    /// verify. Records from `other` replace this builder's records for the
    /// same key. Nothing is merged unless every input passes.
    pub fn combine(&mut self, other: &TransactionBuilder) -> Result<()> {
        self.ensure_not_extracted("combine")?;
        let unsigned = self.unsigned_transaction();
        if unsigned != other.unsigned_transaction() {
            return Err(MultisigError::InvalidState(
                "cannot combine builders for different transactions".to_string(),
            ));
        }

        for (index, (mine, theirs)) in self.inputs.iter().zip(&other.inputs).enumerate() {
            if mine.resolved != theirs.resolved {
                return Err(MultisigError::InvalidState(format!(
                    "input {} spends a different output in the other builder",
                    index
                )));
            }
            let policy = mine.template().signing_policy();
            if let Some(record) = theirs
                .signatures
                .values()
                .find(|record| !policy.contains(&record.public_key))
            {
                return Err(MultisigError::KeyNotInScript(hex::encode(record.key_id())));
            }
            if let (None, Some(scripts)) = (&mine.finalized, &theirs.finalized) {
                let mut tx = unsigned.clone();
                tx.inputs[index].script_sig = scripts.script_sig.clone();
                tx.inputs[index].witness = scripts.witness.clone();
                if !verify_input(&tx, index, mine.spent_output())? {
                    return Err(MultisigError::InvalidState(format!(
                        "final scripts for input {} do not verify",
                        index
                    )));
                }
            }
        }

        let mut merged = 0;
        for (mine, theirs) in self.inputs.iter_mut().zip(&other.inputs) {
            if mine.finalized.is_none() {
                if let Some(scripts) = &theirs.finalized {
                    mine.finalized = Some(scripts.clone());
                }
            }
            if mine.finalized.is_none() {
                for (key, record) in &theirs.signatures {
                    mine.signatures.insert(*key, record.clone());
                    merged += 1;
                }
            }
        }
        debug!("combined {} signature records", merged);
        self.refresh_stage();
        Ok(())
    }

    /// Outputs spent by each input, in input order
    pub fn spent_outputs(&self) -> Vec<TransactionOutput> {
        self.inputs
            .iter()
            .map(|input| input.spent_output().clone())
            .collect()
    }
}

fn sum_values(mut values: impl Iterator<Item = i64>) -> Result<i64> {
    values.try_fold(0i64, |total, value| {
        total
            .checked_add(value)
            .filter(|sum| *sum <= MAX_MONEY)
            .ok_or_else(|| MultisigError::ValueOutOfRange(total.saturating_add(value)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::deserialize_transaction;
    use crate::keys::MemoryKeyProvider;
    use crate::script::{build_multisig, wrap, WrapKind};
    use crate::verify::verify_transaction;

    fn key_pairs(n: u8) -> Vec<KeyPair> {
        (1..=n)
            .map(|i| KeyPair::from_secret_bytes(&[i; 32]).unwrap())
            .collect()
    }

    fn nested_2_of_4(keys: &[KeyPair]) -> LockingScript {
        let pks: Vec<_> = keys.iter().map(|k| k.public_key()).collect();
        let p2wsh = wrap(build_multisig(2, &pks).unwrap(), WrapKind::WitnessScriptHash).unwrap();
        wrap(p2wsh, WrapKind::ScriptHash).unwrap()
    }

    fn builder_for(template: &LockingScript, value: i64) -> TransactionBuilder {
        let mut builder = TransactionBuilder::new();
        builder
            .add_input(&UnspentOutput::for_template(OutPoint::new([7; 32], 0), value, template))
            .unwrap();
        builder.add_output(vec![0x51], value - 100).unwrap();
        builder
    }

    #[test]
    fn test_stage_transitions() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        assert_eq!(builder.stage(), BuildStage::Open);

        builder.sign(0, &keys[0], SighashType::All).unwrap();
        assert_eq!(builder.stage(), BuildStage::Signing);
        assert!(matches!(
            builder.add_output(vec![0x51], 1),
            Err(MultisigError::InvalidState(_))
        ));
        assert_eq!(builder.outputs().len(), 1);

        builder.sign(0, &keys[1], SighashType::All).unwrap();
        builder.finalize_all().unwrap();
        assert_eq!(builder.stage(), BuildStage::Finalized);
        assert!(builder.is_complete());

        builder.extract_transaction().unwrap();
        assert_eq!(builder.stage(), BuildStage::Extracted);
        assert!(matches!(builder.finalize(0), Err(MultisigError::InvalidState(_))));
        assert!(matches!(
            builder.sign(0, &keys[2], SighashType::All),
            Err(MultisigError::InvalidState(_))
        ));
    }

    #[test]
    fn test_negative_output_leaves_outputs_unchanged() {
        let mut builder = TransactionBuilder::new();
        builder.add_output(vec![0x51], 10).unwrap();
        assert_eq!(builder.add_output(vec![0x51], -1), Err(MultisigError::NegativeValue(-1)));
        assert_eq!(builder.outputs().len(), 1);
        assert_eq!(builder.add_output(vec![0x51], 0).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_outpoint_rejected() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        let again = UnspentOutput::for_template(OutPoint::new([7; 32], 0), 5_000, &template);
        assert!(matches!(builder.add_input(&again), Err(MultisigError::InvalidState(_))));
        assert_eq!(builder.inputs().len(), 1);
    }

    #[test]
    fn test_sign_rejects_foreign_key() {
        let keys = key_pairs(5);
        let template = nested_2_of_4(&keys[..4]);
        let mut builder = builder_for(&template, 100_000);
        assert!(matches!(
            builder.sign(0, &keys[4], SighashType::All),
            Err(MultisigError::KeyNotInScript(_))
        ));
        assert_eq!(builder.stage(), BuildStage::Open);
        assert_eq!(
            builder.sign(1, &keys[0], SighashType::All),
            Err(MultisigError::InputOutOfRange(1))
        );
    }

    #[test]
    fn test_validate_signatures() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        assert!(!builder.validate_signatures(0, None).unwrap());
        assert!(matches!(
            builder.validate_signatures(0, Some(&keys[1].public_key())),
            Err(MultisigError::NoSignatureForKey(_))
        ));

        builder.sign(0, &keys[0], SighashType::All).unwrap();
        assert!(builder.validate_signatures(0, Some(&keys[0].public_key())).unwrap());
        assert!(builder.validate_signatures(0, None).unwrap());

        // a signature over some other digest is recorded but does not validate
        let bogus = SignatureRecord::new(
            keys[2].public_key(),
            keys[2].sign_digest(&[0x55; 32]),
            SighashType::All,
        );
        builder.add_signature(0, bogus).unwrap();
        assert!(!builder.validate_signatures(0, Some(&keys[2].public_key())).unwrap());
        assert!(!builder.validate_signatures(0, None).unwrap());
    }

    #[test]
    fn test_invalid_signatures_do_not_count() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        builder.sign(0, &keys[0], SighashType::All).unwrap();
        let bogus = SignatureRecord::new(
            keys[1].public_key(),
            keys[1].sign_digest(&[0x55; 32]),
            SighashType::All,
        );
        builder.add_signature(0, bogus).unwrap();
        assert_eq!(
            builder.finalize(0),
            Err(MultisigError::InsufficientSignatures {
                input: 0,
                required: 2,
                found: 1
            })
        );
        assert!(!builder.input(0).unwrap().is_finalized());

        // re-signing replaces the bad record
        builder.sign(0, &keys[1], SighashType::All).unwrap();
        assert_eq!(builder.input(0).unwrap().signature_count(), 2);
        builder.finalize(0).unwrap();
        builder.finalize(0).unwrap();
    }

    #[test]
    fn test_concurrent_detached_signing() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);

        let records: Vec<SignatureRecord> = std::thread::scope(|scope| {
            let shared = &builder;
            let handles: Vec<_> = keys[1..]
                .iter()
                .map(|key| scope.spawn(move || shared.sign_detached(0, key, SighashType::All)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap().unwrap())
                .collect()
        });
        for record in records {
            builder.add_signature(0, record).unwrap();
        }
        assert!(builder.validate_signatures(0, None).unwrap());
        builder.finalize_all().unwrap();
        let tx = builder.extract_transaction().unwrap();
        assert!(verify_transaction(&tx, &builder.spent_outputs()).unwrap());
    }

    #[test]
    fn test_combine_cosigner_copies() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut alice = builder_for(&template, 100_000);
        let mut bob = alice.clone();
        alice.sign(0, &keys[0], SighashType::All).unwrap();
        bob.sign(0, &keys[3], SighashType::All).unwrap();

        alice.combine(&bob).unwrap();
        assert_eq!(alice.input(0).unwrap().signature_count(), 2);
        alice.finalize_all().unwrap();
        let tx = alice.extract_transaction().unwrap();
        assert!(verify_transaction(&tx, &alice.spent_outputs()).unwrap());

        let mut other = builder_for(&template, 90_000);
        assert!(matches!(other.combine(&bob), Err(MultisigError::InvalidState(_))));
    }

    fn spending(template: &LockingScript, value: i64) -> TransactionBuilder {
        let mut builder = TransactionBuilder::new();
        builder
            .add_input(&UnspentOutput::for_template(OutPoint::new([7; 32], 0), value, template))
            .unwrap();
        builder.add_output(vec![0x51], 90_000).unwrap();
        builder
    }

    #[test]
    fn test_combine_rejects_different_spent_value() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut mine = spending(&template, 100_000);
        let mut theirs = spending(&template, 95_000);
        assert_eq!(mine.unsigned_transaction(), theirs.unsigned_transaction());

        mine.sign(0, &keys[0], SighashType::All).unwrap();
        theirs.sign(0, &keys[1], SighashType::All).unwrap();
        theirs.sign(0, &keys[2], SighashType::All).unwrap();
        theirs.finalize_all().unwrap();

        let before = mine.clone();
        assert!(matches!(mine.combine(&theirs), Err(MultisigError::InvalidState(_))));
        assert_eq!(mine.stage(), BuildStage::Signing);
        assert_eq!(mine.inputs(), before.inputs());
    }

    #[test]
    fn test_combine_checks_incoming_records_and_final_scripts() {
        let keys = key_pairs(5);
        let template = nested_2_of_4(&keys[..4]);
        let mut mine = spending(&template, 100_000);
        mine.sign(0, &keys[0], SighashType::All).unwrap();

        let mut foreign = spending(&template, 100_000);
        let record = foreign.sign_detached(0, &keys[1], SighashType::All).unwrap();
        let outsider = SignatureRecord::new(keys[4].public_key(), record.signature, record.sighash);
        foreign.inputs[0].signatures.insert(outsider.key_id(), outsider);
        assert!(matches!(mine.combine(&foreign), Err(MultisigError::KeyNotInScript(_))));

        let mut forged = spending(&template, 100_000);
        forged.sign(0, &keys[1], SighashType::All).unwrap();
        forged.sign(0, &keys[2], SighashType::All).unwrap();
        forged.finalize_all().unwrap();
        let mut scripts = forged.inputs[0].finalized.clone().unwrap();
        // first signature after the dummy: flip a byte inside r
        scripts.witness[1][10] ^= 0x01;
        forged.inputs[0].finalized = Some(scripts);
        assert!(mine.combine(&forged).is_err());
        assert_eq!(mine.stage(), BuildStage::Signing);
        assert!(!mine.input(0).unwrap().is_finalized());
        assert_eq!(mine.input(0).unwrap().signature_count(), 1);

        // an honest finalized copy is adopted
        let mut honest = spending(&template, 100_000);
        honest.sign(0, &keys[1], SighashType::All).unwrap();
        honest.sign(0, &keys[3], SighashType::All).unwrap();
        honest.finalize_all().unwrap();
        mine.combine(&honest).unwrap();
        assert_eq!(mine.stage(), BuildStage::Finalized);
        let tx = mine.extract_transaction().unwrap();
        assert!(verify_transaction(&tx, &mine.spent_outputs()).unwrap());
    }

    #[test]
    fn test_sign_with_provider() {
        let keys = key_pairs(5);
        let template = nested_2_of_4(&keys[..4]);
        let mut provider = MemoryKeyProvider::new();
        provider.insert("alice", keys[0].clone());
        provider.insert("carol", keys[2].clone());
        provider.insert("mallory", keys[4].clone());

        let mut builder = builder_for(&template, 100_000);
        assert_eq!(builder.sign_with_provider(0, &provider, SighashType::All).unwrap(), 2);
        builder.finalize_all().unwrap();
        assert!(builder.is_complete());
    }

    #[test]
    fn test_sign_all_inputs() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = TransactionBuilder::new();
        for i in 0..3u32 {
            builder
                .add_input(&UnspentOutput::for_template(OutPoint::new([8; 32], i), 10_000, &template))
                .unwrap();
        }
        builder.add_output(vec![0x51], 29_000).unwrap();
        assert_eq!(builder.sign_all_inputs(&keys[1], SighashType::All).unwrap(), 3);
        assert_eq!(builder.sign_all_inputs(&keys[2], SighashType::All).unwrap(), 3);
        builder.finalize_all().unwrap();
        let tx = builder.extract_transaction().unwrap();
        assert_eq!(tx.inputs.len(), 3);
        assert!(verify_transaction(&tx, &builder.spent_outputs()).unwrap());
    }

    #[test]
    fn test_extract_requires_finalized_inputs() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        builder
            .add_input(&UnspentOutput::for_template(OutPoint::new([7; 32], 1), 1_000, &template))
            .unwrap();
        builder.sign(0, &keys[0], SighashType::All).unwrap();
        builder.sign(0, &keys[1], SighashType::All).unwrap();
        assert!(matches!(
            builder.finalize_all(),
            Err(MultisigError::InsufficientSignatures { input: 1, .. })
        ));
        assert!(builder.input(0).unwrap().is_finalized());
        assert_eq!(builder.extract_transaction(), Err(MultisigError::NotFinalized(1)));
        assert_eq!(builder.stage(), BuildStage::Signing);
    }

    #[test]
    fn test_fee_checks() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = TransactionBuilder::new();
        builder
            .add_input(&UnspentOutput::for_template(OutPoint::new([7; 32], 0), 10_000, &template))
            .unwrap();
        builder.add_output(vec![0x51], 20_000).unwrap();
        assert_eq!(
            builder.fee(),
            Err(MultisigError::OutputsExceedInputs {
                inputs: 10_000,
                outputs: 20_000
            })
        );

        let config = AssemblerConfig {
            max_fee_rate: 10,
            ..AssemblerConfig::default()
        };
        let mut greedy = TransactionBuilder::with_config(config).unwrap();
        greedy
            .add_input(&UnspentOutput::for_template(OutPoint::new([7; 32], 0), 1_000_000, &template))
            .unwrap();
        greedy.add_output(vec![0x51], 1_000).unwrap();
        greedy.sign(0, &keys[0], SighashType::All).unwrap();
        greedy.sign(0, &keys[1], SighashType::All).unwrap();
        greedy.finalize_all().unwrap();
        assert!(matches!(
            greedy.extract_transaction(),
            Err(MultisigError::FeeTooHigh { max: 10, .. })
        ));
        assert_eq!(greedy.stage(), BuildStage::Finalized);
    }

    #[test]
    fn test_output_values_bounded_by_max_money() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        for value in [i64::MAX, MAX_MONEY + 1] {
            assert_eq!(
                builder.add_output(vec![0x51], value),
                Err(MultisigError::ValueOutOfRange(value))
            );
        }
        assert_eq!(builder.outputs().len(), 1);

        // each output is in range but the total is not
        builder.add_output(vec![0x51], MAX_MONEY).unwrap();
        builder.add_output(vec![0x51], MAX_MONEY).unwrap();
        assert!(matches!(builder.fee(), Err(MultisigError::ValueOutOfRange(_))));

        builder.sign(0, &keys[0], SighashType::All).unwrap();
        builder.sign(0, &keys[1], SighashType::All).unwrap();
        builder.finalize_all().unwrap();
        assert!(matches!(
            builder.extract_transaction(),
            Err(MultisigError::ValueOutOfRange(_))
        ));
        assert_eq!(builder.stage(), BuildStage::Finalized);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let keys = key_pairs(4);
        let template = nested_2_of_4(&keys);
        let mut builder = builder_for(&template, 100_000);
        builder.sign(0, &keys[2], SighashType::All).unwrap();
        builder.sign(0, &keys[0], SighashType::All).unwrap();
        builder.finalize_all().unwrap();
        let bytes = builder.serialize().unwrap();
        let tx = deserialize_transaction(&bytes).unwrap();
        assert_eq!(tx, builder.extract_transaction().unwrap());
        assert_eq!(builder.to_hex().unwrap(), hex::encode(&bytes));
    }

    #[test]
    fn test_config_applied_to_transaction() {
        let config = AssemblerConfig {
            version: 1,
            lock_time: 650_000,
            sequence: 0xfffffffd,
            ..AssemblerConfig::default()
        };
        let keys = key_pairs(2);
        let template = LockingScript::p2wpkh(&keys[0].public_key());
        let mut builder = TransactionBuilder::with_config(config).unwrap();
        builder
            .add_input(&UnspentOutput::for_template(OutPoint::new([3; 32], 2), 50_000, &template))
            .unwrap();
        builder.add_output(vec![0x51], 49_000).unwrap();
        let tx = builder.unsigned_transaction();
        assert_eq!(tx.version, 1);
        assert_eq!(tx.lock_time, 650_000);
        assert_eq!(tx.inputs[0].sequence, 0xfffffffd);

        builder.sign_default(0, &keys[0]).unwrap();
        builder.finalize_all().unwrap();
        let signed = builder.extract_transaction().unwrap();
        assert!(verify_transaction(&signed, &builder.spent_outputs()).unwrap());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AssemblerConfig {
            max_fee_rate: 0,
            ..AssemblerConfig::default()
        };
        assert!(matches!(
            TransactionBuilder::with_config(config),
            Err(MultisigError::Config(_))
        ));
    }
}
