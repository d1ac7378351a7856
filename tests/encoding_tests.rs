//! Wire encoding tests against finalized transactions

use multisig_engine::encoding::*;
use multisig_engine::*;

fn key_pairs(n: u8) -> Vec<KeyPair> {
    (1..=n)
        .map(|i| KeyPair::from_secret_bytes(&[i; 32]).unwrap())
        .collect()
}

fn finalized(template: &LockingScript, signers: &[KeyPair]) -> Transaction {
    let mut builder = TransactionBuilder::new();
    builder
        .add_input(&UnspentOutput::for_template(OutPoint::new([0xaa; 32], 3), 70_000, template))
        .unwrap();
    builder.add_output(vec![0x51], 30_000).unwrap();
    builder.add_output(template.to_bytes(), 39_000).unwrap();
    for key in signers {
        builder.sign(0, key, SighashType::All).unwrap();
    }
    builder.finalize_all().unwrap();
    builder.extract_transaction().unwrap()
}

#[test]
fn test_roundtrip_finalized_shapes() {
    let keys = key_pairs(3);
    let pks: Vec<_> = keys.iter().map(|k| k.public_key()).collect();
    let multisig = script::build_multisig(2, &pks).unwrap();
    let p2wsh = script::wrap(multisig.clone(), WrapKind::WitnessScriptHash).unwrap();
    let shapes = [
        multisig.clone(),
        script::wrap(multisig, WrapKind::ScriptHash).unwrap(),
        p2wsh.clone(),
        script::wrap(p2wsh, WrapKind::ScriptHash).unwrap(),
    ];
    for template in &shapes {
        let tx = finalized(template, &keys[..2]);
        let bytes = serialize_transaction(&tx);
        assert_eq!(deserialize_transaction(&bytes).unwrap(), tx);
        assert_eq!(from_hex(&to_hex(&tx)).unwrap(), tx);
    }
}

#[test]
fn test_witness_changes_wtxid_not_txid() {
    let keys = key_pairs(2);
    let pks: Vec<_> = keys.iter().map(|k| k.public_key()).collect();
    let template = script::wrap(
        script::build_multisig(1, &pks).unwrap(),
        WrapKind::WitnessScriptHash,
    )
    .unwrap();
    let tx = finalized(&template, &keys[..1]);
    assert!(tx.has_witness());
    assert_ne!(txid(&tx), wtxid(&tx));

    let mut stripped = tx.clone();
    stripped.inputs[0].witness.clear();
    assert_eq!(txid(&stripped), txid(&tx));
    assert_eq!(txid(&stripped), wtxid(&stripped));
    assert!(transaction_weight(&tx) > transaction_weight(&stripped));
    assert!(virtual_size(&tx) < serialize_transaction(&tx).len());
}

#[test]
fn test_legacy_weight_is_four_times_size() {
    let keys = key_pairs(2);
    let tx = finalized(&LockingScript::p2pkh(&keys[0].public_key()), &keys[..1]);
    assert!(!tx.has_witness());
    let size = serialize_transaction(&tx).len();
    assert_eq!(transaction_weight(&tx), size * 4);
    assert_eq!(virtual_size(&tx), size);
}

#[test]
fn test_txid_display_order() {
    let txid_hex = "4ce18f49ba153a51bcda9bb80d0f8d2d3e7c1dd9f1f7c5c5c6e2b1ad2c3f4a55";
    let outpoint = OutPoint::from_txid_hex(txid_hex, 1).unwrap();
    assert_eq!(outpoint.hash[0], 0x55);
    assert_eq!(outpoint.txid_hex(), txid_hex);
    assert_eq!(display_hash(&outpoint.hash), txid_hex);
}

#[test]
fn test_trailing_and_truncated_bytes() {
    let keys = key_pairs(2);
    let tx = finalized(&LockingScript::p2wpkh(&keys[1].public_key()), &keys[1..]);
    let bytes = serialize_transaction(&tx);

    let mut trailing = bytes.clone();
    trailing.push(0x00);
    assert!(matches!(
        deserialize_transaction(&trailing),
        Err(MultisigError::MalformedEncoding(_))
    ));
    for cut in [1, 10, bytes.len() / 2, bytes.len() - 1] {
        assert!(matches!(
            deserialize_transaction(&bytes[..cut]),
            Err(MultisigError::MalformedEncoding(_))
        ));
    }
}
