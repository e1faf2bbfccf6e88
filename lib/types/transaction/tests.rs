use crate::crypto::PrivateKey;
use crate::test_helpers::{coinbase_tx, spend_tx};

#[test]
fn txid_is_stable_across_calls() {
    let sk = PrivateKey::new_key();
    let tx = coinbase_tx(1000, &sk.public_key().address());
    assert_eq!(tx.txid(), tx.txid());
}

#[test]
fn txid_excludes_signatures() {
    let sk = PrivateKey::new_key();
    let addr = sk.public_key().address();
    let funding = coinbase_tx(1000, &addr);

    let (mut tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);
    let txid_before = tx.txid();

    // Flip the signature's low-S normalization path by re-signing with a
    // fresh nonce (RFC6979 is deterministic, so produce a distinguishable
    // signature by signing a different — but irrelevant to identity —
    // message and splicing it in).
    let unrelated = crate::sha256::Hash::sha256(b"unrelated");
    tx.inputs[0].signature = crate::crypto::Signature::sign_hash(&unrelated, &sk);

    assert_eq!(tx.txid(), txid_before);
}

#[test]
fn signing_hash_differs_per_input_index() {
    let sk = PrivateKey::new_key();
    let addr = sk.public_key().address();
    let funding = coinbase_tx(1000, &addr);
    let (tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);

    assert_ne!(tx.signing_hash(0), tx.txid());
}

#[test]
fn coinbase_has_no_inputs() {
    let sk = PrivateKey::new_key();
    let tx = coinbase_tx(50, &sk.public_key().address());
    assert!(tx.is_coinbase());
    assert_eq!(tx.outputs.len(), 1);
}

#[test]
fn sign_input_produces_a_verifying_signature() {
    let sk = PrivateKey::new_key();
    let addr = sk.public_key().address();
    let funding = coinbase_tx(1000, &addr);
    let (tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);

    let input = &tx.inputs[0];
    let message = tx.signing_hash(0);
    assert!(input.signature.verify(&message, &input.pubkey));
}

#[test]
fn two_transactions_with_different_outputs_have_different_txids() {
    let sk = PrivateKey::new_key();
    let addr = sk.public_key().address();
    let tx1 = coinbase_tx(100, &addr);
    let tx2 = coinbase_tx(200, &addr);
    assert_ne!(tx1.txid(), tx2.txid());
}
