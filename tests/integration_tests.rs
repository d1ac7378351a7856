//! Integration tests for multisig-engine
//!
//! End-to-end flows: build a template, fund it, collect signatures from
//! several cosigners, finalize, serialize and verify.

use multisig_engine::encoding::{deserialize_transaction, serialize_transaction, txid};
use multisig_engine::script::SigningPolicy;
use multisig_engine::*;

fn cosigners() -> MemoryKeyProvider {
    let mut provider = MemoryKeyProvider::new();
    for (i, name) in ["alice", "bob", "carol", "dave"].iter().enumerate() {
        provider.insert(*name, KeyPair::from_secret_bytes(&[i as u8 + 1; 32]).unwrap());
    }
    provider
}

fn named<'a>(provider: &'a MemoryKeyProvider, name: &str) -> &'a KeyPair {
    provider.get(name).unwrap()
}

fn public_keys(provider: &MemoryKeyProvider) -> Vec<secp256k1::PublicKey> {
    provider.public_keys()
}

fn nested_multisig(engine: &MultisigEngine, threshold: usize, keys: &[secp256k1::PublicKey]) -> LockingScript {
    let multisig = engine.build_multisig(threshold, keys).unwrap();
    let p2wsh = engine.wrap(multisig, WrapKind::WitnessScriptHash).unwrap();
    engine.wrap(p2wsh, WrapKind::ScriptHash).unwrap()
}

fn script_key_order(template: &LockingScript) -> Vec<secp256k1::PublicKey> {
    match template.signing_policy() {
        SigningPolicy::Multisig { public_keys, .. } => public_keys,
        SigningPolicy::SingleKey { .. } => panic!("expected a multisig template"),
    }
}

#[test]
fn test_two_of_four_nested_segwit() -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let template = nested_multisig(&engine, 2, &public_keys(&provider));

    let utxo = UnspentOutput::for_template(OutPoint::new([0x11; 32], 0), 100_000, &template);
    let mut builder = engine.new_transaction();
    builder.add_input(&utxo)?;
    builder.add_output(template.to_bytes(), 99_900)?;
    assert_eq!(builder.fee()?, 100);

    let alice = named(&provider, "alice");
    let bob = named(&provider, "bob");
    builder.sign(0, bob, SighashType::All)?;
    builder.sign(0, alice, SighashType::All)?;
    assert!(builder.validate_signatures(0, None)?);
    builder.finalize_all()?;

    let bytes = builder.serialize()?;
    let tx = deserialize_transaction(&bytes)?;
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].value, 99_900);

    // [dummy, sig, sig, witness_script] with signatures in script key order
    let witness = &tx.inputs[0].witness;
    assert_eq!(witness.len(), 4);
    assert!(witness[0].is_empty());
    assert_eq!(witness[3], template.witness_script().unwrap());
    let expected: Vec<ByteString> = script_key_order(&template)
        .iter()
        .filter_map(|key| {
            builder
                .input(0)
                .unwrap()
                .signatures()
                .find(|record| record.public_key == *key)
                .map(|record| record.to_script_bytes())
        })
        .collect();
    assert_eq!(&witness[1..3], expected.as_slice());

    assert!(engine.verify_transaction(&tx, &builder.spent_outputs())?);
    Ok(())
}

#[test]
fn test_two_of_four_with_one_signature_is_insufficient() {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let template = nested_multisig(&engine, 2, &public_keys(&provider));

    let mut builder = engine.new_transaction();
    builder
        .add_input(&UnspentOutput::for_template(OutPoint::new([0x11; 32], 0), 100_000, &template))
        .unwrap();
    builder.add_output(template.to_bytes(), 99_900).unwrap();
    builder.sign(0, named(&provider, "alice"), SighashType::All).unwrap();

    assert_eq!(
        builder.finalize(0),
        Err(MultisigError::InsufficientSignatures {
            input: 0,
            required: 2,
            found: 1
        })
    );
    assert_eq!(builder.serialize(), Err(MultisigError::NotFinalized(0)));
}

/// 3-of-4 P2SH-P2WSH signed by the first, third and fourth cosigners
fn three_of_four_flow(utxo: UnspentOutput, template: &LockingScript, provider: &MemoryKeyProvider) -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let mut builder = engine.new_transaction();
    builder.add_input(&utxo)?;
    builder.add_output(template.to_bytes(), 20_000)?;

    for name in ["alice", "carol", "dave"] {
        builder.sign(0, named(provider, name), SighashType::All)?;
    }
    assert!(builder.validate_signatures(0, None)?);
    assert!(builder.validate_signatures(0, Some(&named(provider, "alice").public_key()))?);
    assert!(matches!(
        builder.validate_signatures(0, Some(&named(provider, "bob").public_key())),
        Err(MultisigError::NoSignatureForKey(_))
    ));

    builder.finalize_all()?;
    let tx = builder.extract_transaction()?;
    assert_eq!(tx.inputs[0].witness.len(), 5);
    assert!(engine.verify_transaction(&tx, &builder.spent_outputs())?);
    Ok(())
}

#[test]
fn test_three_of_four_with_spent_output() -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let template = nested_multisig(&engine, 3, &public_keys(&provider));
    let utxo = UnspentOutput::for_template(OutPoint::new([0x22; 32], 1), 50_000, &template);
    three_of_four_flow(utxo, &template, &provider)
}

#[test]
fn test_three_of_four_with_parent_transaction() -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let template = nested_multisig(&engine, 3, &public_keys(&provider));

    let parent = Transaction {
        version: 2,
        inputs: vec![TransactionInput {
            prevout: OutPoint::new([0x33; 32], 0),
            script_sig: vec![],
            sequence: SEQUENCE_FINAL,
            witness: vec![vec![0x01; 72], vec![0x02; 33]],
        }],
        outputs: vec![
            TransactionOutput {
                value: 10_000,
                script_pubkey: vec![0x51],
            },
            TransactionOutput {
                value: 50_000,
                script_pubkey: template.to_bytes(),
            },
        ],
        lock_time: 0,
    };
    let outpoint = OutPoint::new(txid(&parent), 1);
    let utxo = UnspentOutput::from_parent(outpoint, serialize_transaction(&parent))
        .with_scripts_of(&template);
    three_of_four_flow(utxo, &template, &provider)
}

#[test]
fn test_multiple_inputs_and_shapes() -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let keys = public_keys(&provider);
    let alice = named(&provider, "alice");

    let bare = engine.build_multisig(2, &keys[..3])?;
    let p2sh = engine.wrap(bare.clone(), WrapKind::ScriptHash)?;
    let p2wsh = engine.wrap(bare.clone(), WrapKind::WitnessScriptHash)?;
    let p2wpkh = LockingScript::p2wpkh(&alice.public_key());
    let p2pkh = LockingScript::p2pkh(&alice.public_key());
    let nested_single = engine.wrap(p2wpkh.clone(), WrapKind::ScriptHash)?;

    let templates = [bare, p2sh, p2wsh, p2wpkh, p2pkh, nested_single];
    let mut builder = engine.new_transaction();
    for (i, template) in templates.iter().enumerate() {
        builder.add_input(&UnspentOutput::for_template(
            OutPoint::new([0x44; 32], i as u32),
            25_000,
            template,
        ))?;
    }
    builder.add_output(vec![0x51], 100_000)?;
    builder.add_output(LockingScript::p2wpkh(&keys[3]).to_bytes(), 49_000)?;

    assert_eq!(builder.sign_all_inputs(alice, SighashType::All)?, 6);
    assert_eq!(builder.sign_all_inputs(named(&provider, "carol"), SighashType::All)?, 3);
    builder.finalize_all()?;

    let tx = builder.extract_transaction()?;
    assert!(tx.has_witness());
    assert!(tx.inputs[0].witness.is_empty());
    assert!(tx.inputs[4].witness.is_empty());
    assert!(tx.inputs[2].script_sig.is_empty());
    assert_eq!(deserialize_transaction(&serialize_transaction(&tx))?, tx);
    assert!(engine.verify_transaction(&tx, &builder.spent_outputs())?);
    Ok(())
}

#[test]
fn test_cosigners_sign_separate_copies() -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let template = nested_multisig(&engine, 2, &public_keys(&provider));

    let mut coordinator = engine.new_transaction();
    coordinator.add_input(&UnspentOutput::for_template(OutPoint::new([0x55; 32], 0), 80_000, &template))?;
    coordinator.add_output(vec![0x51], 79_500)?;

    let mut carol_copy = coordinator.clone();
    let mut dave_copy = coordinator.clone();
    carol_copy.sign(0, named(&provider, "carol"), SighashType::All)?;
    dave_copy.sign(0, named(&provider, "dave"), SighashType::All)?;

    coordinator.combine(&carol_copy)?;
    coordinator.combine(&dave_copy)?;
    assert_eq!(coordinator.stage(), BuildStage::Signing);
    coordinator.finalize_all()?;
    let tx = coordinator.extract_transaction()?;
    assert!(engine.verify_transaction(&tx, &coordinator.spent_outputs())?);
    Ok(())
}

#[test]
fn test_provider_signing_and_mixed_sighash() -> anyhow::Result<()> {
    let engine = MultisigEngine::new();
    let provider = cosigners();
    let template = nested_multisig(&engine, 3, &public_keys(&provider));

    let mut builder = engine.new_transaction();
    builder.add_input(&UnspentOutput::for_template(OutPoint::new([0x66; 32], 0), 40_000, &template))?;
    builder.add_output(vec![0x51], 39_000)?;

    builder.sign(0, named(&provider, "bob"), SighashType::AllPlusAnyoneCanPay)?;
    assert_eq!(builder.sign_with_provider(0, &provider, SighashType::All)?, 4);
    builder.sign(0, named(&provider, "bob"), SighashType::AllPlusAnyoneCanPay)?;
    assert!(builder.validate_signatures(0, None)?);

    builder.finalize_all()?;
    let tx = builder.extract_transaction()?;
    assert!(engine.verify_transaction(&tx, &builder.spent_outputs())?);
    Ok(())
}
