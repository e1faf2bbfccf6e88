//! The UTXO set (C3): a concurrent map of outpoint → UTXO with atomic batch
//! application. Readers never block one another; writers serialize through
//! a single lock, mirroring the readers-writer discipline the engine's lock
//! order assumes everywhere else.

use crate::crypto::Address;
use crate::error::{BtcError, Result};
use crate::types::Outpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: Outpoint,
    pub amount: u64,
    pub script_pubkey: Address,
    pub height: u64,
    pub is_coinbase: bool,
}

#[derive(Default)]
pub struct UtxoSet {
    inner: RwLock<HashMap<Outpoint, Utxo>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        UtxoSet {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, outpoint: &Outpoint) -> Option<Utxo> {
        self.inner.read().unwrap().get(outpoint).cloned()
    }

    pub fn contains(&self, outpoint: &Outpoint) -> bool {
        self.inner.read().unwrap().contains_key(outpoint)
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.inner
            .read()
            .unwrap()
            .values()
            .filter(|utxo| &utxo.script_pubkey == address)
            .map(|utxo| utxo.amount)
            .sum()
    }

    pub fn utxos_for(&self, address: &Address) -> Vec<Utxo> {
        self.inner
            .read()
            .unwrap()
            .values()
            .filter(|utxo| &utxo.script_pubkey == address)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically removes `remove` and inserts `add`. All removals are
    /// validated and applied before any addition, and the whole batch is
    /// rejected — with no partial mutation — if any removal target is
    /// missing. No concurrent reader ever observes a partial state, since
    /// the entire batch runs under one write-lock acquisition.
    pub fn apply_batch(&self, remove: &[Outpoint], add: Vec<Utxo>) -> Result<()> {
        let mut set = self.inner.write().unwrap();
        for outpoint in remove {
            if !set.contains_key(outpoint) {
                return Err(BtcError::UnknownOutpoint);
            }
        }
        for outpoint in remove {
            set.remove(outpoint);
        }
        for utxo in add {
            set.insert(utxo.outpoint, utxo);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::sha256::Hash;

    fn utxo(addr: &Address, index: u32, amount: u64) -> Utxo {
        Utxo {
            outpoint: Outpoint::new(Hash::sha256(b"tx"), index),
            amount,
            script_pubkey: addr.clone(),
            height: 0,
            is_coinbase: false,
        }
    }

    #[test]
    fn apply_batch_adds_and_reads_back() {
        let set = UtxoSet::new();
        let addr = PrivateKey::new_key().public_key().address();
        let u = utxo(&addr, 0, 100);
        set.apply_batch(&[], vec![u.clone()]).unwrap();
        assert_eq!(set.get(&u.outpoint), Some(u));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn apply_batch_rejects_unknown_removal_and_discards_whole_batch() {
        let set = UtxoSet::new();
        let addr = PrivateKey::new_key().public_key().address();
        let known = utxo(&addr, 0, 100);
        set.apply_batch(&[], vec![known.clone()]).unwrap();

        let ghost = Outpoint::new(Hash::sha256(b"ghost"), 0);
        let new_one = utxo(&addr, 1, 50);
        let result = set.apply_batch(&[ghost, known.outpoint], vec![new_one]);

        assert_eq!(result, Err(BtcError::UnknownOutpoint));
        // Batch was fully discarded: `known` must still be present.
        assert!(set.contains(&known.outpoint));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn balance_sums_all_utxos_for_an_address() {
        let set = UtxoSet::new();
        let addr = PrivateKey::new_key().public_key().address();
        set.apply_batch(&[], vec![utxo(&addr, 0, 100), utxo(&addr, 1, 50)])
            .unwrap();
        assert_eq!(set.balance(&addr), 150);
    }

    #[test]
    fn apply_batch_removes_before_adding() {
        let set = UtxoSet::new();
        let addr = PrivateKey::new_key().public_key().address();
        let spent = utxo(&addr, 0, 100);
        set.apply_batch(&[], vec![spent.clone()]).unwrap();

        let change = utxo(&addr, 1, 60);
        set.apply_batch(&[spent.outpoint], vec![change.clone()])
            .unwrap();

        assert!(!set.contains(&spent.outpoint));
        assert!(set.contains(&change.outpoint));
    }
}
