#[cfg(test)]
mod tests {
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, spend_tx};
    use crate::util::MerkleRoot;

    #[test]
    fn merkle_root_single_transaction_is_its_txid() {
        let tx = coinbase_tx(100, &PrivateKey::new_key().public_key().address());
        let root = MerkleRoot::calculate(&[tx.clone()]);
        assert_eq!(root.as_hash(), tx.txid());
    }

    #[test]
    fn merkle_root_two_transactions_combines_them() {
        let sk = PrivateKey::new_key();
        let tx1 = coinbase_tx(100, &sk.public_key().address());
        let tx2 = coinbase_tx(200, &sk.public_key().address());

        let root = MerkleRoot::calculate(&[tx1.clone(), tx2.clone()]);
        let expected = crate::sha256::Hash::combine(&tx1.txid(), &tx2.txid());
        assert_eq!(root.as_hash(), expected);
    }

    #[test]
    fn merkle_root_odd_count_duplicates_last() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let txs = vec![
            coinbase_tx(100, &addr),
            coinbase_tx(200, &addr),
            coinbase_tx(300, &addr),
        ];

        let root = MerkleRoot::calculate(&txs);

        let left = crate::sha256::Hash::combine(&txs[0].txid(), &txs[1].txid());
        let right = crate::sha256::Hash::combine(&txs[2].txid(), &txs[2].txid());
        let expected = crate::sha256::Hash::combine(&left, &right);
        assert_eq!(root.as_hash(), expected);
    }

    #[test]
    fn merkle_root_is_order_sensitive() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let tx1 = coinbase_tx(100, &addr);
        let tx2 = coinbase_tx(200, &addr);

        let root_ab = MerkleRoot::calculate(&[tx1.clone(), tx2.clone()]);
        let root_ba = MerkleRoot::calculate(&[tx2, tx1]);
        assert_ne!(root_ab, root_ba);
    }

    #[test]
    fn merkle_root_differs_for_different_transactions() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let root1 = MerkleRoot::calculate(&[coinbase_tx(100, &addr)]);
        let root2 = MerkleRoot::calculate(&[coinbase_tx(200, &addr)]);
        assert_ne!(root1, root2);
    }

    #[test]
    fn spend_tx_helper_produces_a_verifiable_signature() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let (tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);
        assert_eq!(tx.inputs.len(), 1);
    }
}
