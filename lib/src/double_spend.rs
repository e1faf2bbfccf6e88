//! The double-spend guard (C5): two disjoint sets of outpoints, `reserved`
//! (referenced by pending mempool transactions) and `spent` (consumed by
//! confirmed blocks). All four operations are guarded by one lock, and that
//! lock is always acquired before the UTXO set lock — reversing the order is
//! a deadlock bug, not a style choice.

use crate::error::{BtcError, Result};
use crate::types::{Outpoint, Transaction};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct DoubleSpendGuard {
    state: Mutex<GuardState>,
}

#[derive(Default)]
struct GuardState {
    reserved: HashSet<Outpoint>,
    spent: HashSet<Outpoint>,
}

fn outpoints(tx: &Transaction) -> impl Iterator<Item = Outpoint> + '_ {
    tx.inputs.iter().map(|input| input.prev_outpoint)
}

impl DoubleSpendGuard {
    pub fn new() -> Self {
        DoubleSpendGuard {
            state: Mutex::new(GuardState::default()),
        }
    }

    /// Succeeds iff every input outpoint of `tx` is in neither `reserved`
    /// nor `spent`; on success, all of them are inserted into `reserved`.
    /// Atomic: either every outpoint is reserved, or none are.
    pub fn try_reserve(&self, tx: &Transaction) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for outpoint in outpoints(tx) {
            if state.reserved.contains(&outpoint) || state.spent.contains(&outpoint) {
                return Err(BtcError::DoubleSpend);
            }
        }
        for outpoint in outpoints(tx) {
            state.reserved.insert(outpoint);
        }
        Ok(())
    }

    /// Moves `tx`'s outpoints from `reserved` to `spent`; called once `tx`
    /// is included in an accepted block.
    pub fn commit(&self, tx: &Transaction) {
        let mut state = self.state.lock().unwrap();
        for outpoint in outpoints(tx) {
            state.reserved.remove(&outpoint);
            state.spent.insert(outpoint);
        }
    }

    /// Releases `tx`'s outpoints from `reserved` without marking them spent
    /// — validation failed after the reservation was taken.
    pub fn rollback(&self, tx: &Transaction) {
        let mut state = self.state.lock().unwrap();
        for outpoint in outpoints(tx) {
            state.reserved.remove(&outpoint);
        }
    }

    /// Moves `tx`'s outpoints from `spent` back to `reserved` when the block
    /// that confirmed them is unwound during a reorg.
    pub fn reorg_release(&self, tx: &Transaction) {
        let mut state = self.state.lock().unwrap();
        for outpoint in outpoints(tx) {
            state.spent.remove(&outpoint);
            state.reserved.insert(outpoint);
        }
    }

    pub fn is_reserved(&self, outpoint: &Outpoint) -> bool {
        self.state.lock().unwrap().reserved.contains(outpoint)
    }

    pub fn is_spent(&self, outpoint: &Outpoint) -> bool {
        self.state.lock().unwrap().spent.contains(outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, spend_tx};

    #[test]
    fn second_reservation_of_same_outpoint_is_rejected() {
        let guard = DoubleSpendGuard::new();
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let (tx_a, _) = spend_tx(&funding, 0, &sk, 100, &addr);
        let (tx_b, _) = spend_tx(&funding, 0, &sk, 200, &addr);

        guard.try_reserve(&tx_a).unwrap();
        assert_eq!(guard.try_reserve(&tx_b), Err(BtcError::DoubleSpend));
    }

    #[test]
    fn commit_then_reorg_release_round_trips() {
        let guard = DoubleSpendGuard::new();
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let (tx, _) = spend_tx(&funding, 0, &sk, 100, &addr);
        let outpoint = tx.inputs[0].prev_outpoint;

        guard.try_reserve(&tx).unwrap();
        guard.commit(&tx);
        assert!(guard.is_spent(&outpoint));
        assert!(!guard.is_reserved(&outpoint));

        guard.reorg_release(&tx);
        assert!(!guard.is_spent(&outpoint));
        assert!(guard.is_reserved(&outpoint));
    }

    #[test]
    fn rollback_frees_the_outpoint_for_reuse() {
        let guard = DoubleSpendGuard::new();
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let (tx, _) = spend_tx(&funding, 0, &sk, 100, &addr);

        guard.try_reserve(&tx).unwrap();
        guard.rollback(&tx);
        assert!(guard.try_reserve(&tx).is_ok());
    }
}
