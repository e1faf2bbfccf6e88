//! The mempool (C4): a fee-rate-prioritized pool of valid-but-unconfirmed
//! transactions with capacity-driven eviction. One lock guards the whole
//! pool; nothing here ever talks to the network or holds the lock across
//! anything but in-memory bookkeeping.

use crate::sha256::Hash;
use crate::types::Transaction;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    RejectedBelowMin,
    RejectedFullNoEviction,
    RejectedDuplicate,
}

#[derive(Clone)]
struct Entry {
    tx: Transaction,
    fee: u64,
    size: usize,
    fee_rate: f64,
}

#[derive(Default)]
struct MempoolState {
    entries: HashMap<Hash, Entry>,
    total_bytes: usize,
}

pub struct Mempool {
    state: Mutex<MempoolState>,
    max_bytes: usize,
    min_fee_rate: f64,
}

impl Mempool {
    pub fn new(max_bytes: usize, min_fee_rate: f64) -> Self {
        Mempool {
            state: Mutex::new(MempoolState::default()),
            max_bytes,
            min_fee_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, txid: &Hash) -> bool {
        self.state.lock().unwrap().entries.contains_key(txid)
    }

    pub fn remove(&self, txid: &Hash) -> Option<Transaction> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.remove(txid)?;
        state.total_bytes -= entry.size;
        Some(entry.tx)
    }

    /// Admits `tx` paying `fee`. Computes `fee_rate = fee / size_bytes` and
    /// rejects below `min_fee_rate`; if the pool can't hold the new
    /// transaction, tries to evict the smallest-by-cumulative-size prefix
    /// of the ascending fee-rate order whose rates are all strictly below
    /// the incoming transaction's — if no such prefix covers the needed
    /// bytes, the transaction is rejected rather than evicting something
    /// that doesn't deserve to lose its slot.
    pub fn add(&self, tx: Transaction, fee: u64) -> AddOutcome {
        let size = tx.size_bytes();
        let fee_rate = fee as f64 / size as f64;
        let txid = tx.txid();
        if fee_rate < self.min_fee_rate {
            debug!(%txid, fee_rate, min_fee_rate = self.min_fee_rate, "rejecting transaction below minimum fee rate");
            return AddOutcome::RejectedBelowMin;
        }

        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(&txid) {
            debug!(%txid, "rejecting duplicate transaction");
            return AddOutcome::RejectedDuplicate;
        }

        let needed = (state.total_bytes + size).saturating_sub(self.max_bytes);
        if needed > 0 {
            let mut candidates: Vec<(Hash, f64, usize)> = state
                .entries
                .iter()
                .map(|(id, e)| (*id, e.fee_rate, e.size))
                .collect();
            candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

            let mut cumulative = 0usize;
            let mut to_evict = Vec::new();
            for (id, rate, entry_size) in candidates {
                if rate >= fee_rate {
                    break;
                }
                cumulative += entry_size;
                to_evict.push(id);
                if cumulative >= needed {
                    break;
                }
            }

            if cumulative < needed {
                debug!(%txid, needed, cumulative, "rejecting transaction, mempool full and no sufficient eviction set");
                return AddOutcome::RejectedFullNoEviction;
            }

            debug!(%txid, evicted = to_evict.len(), "evicting lower fee-rate transactions to admit incoming transaction");
            for id in to_evict {
                if let Some(evicted) = state.entries.remove(&id) {
                    state.total_bytes -= evicted.size;
                }
            }
        }

        state.total_bytes += size;
        state.entries.insert(
            txid,
            Entry {
                tx,
                fee,
                size,
                fee_rate,
            },
        );
        AddOutcome::Accepted
    }

    /// Packs transactions in descending fee-rate order (ties broken by
    /// lower txid first, for determinism) until `max_bytes` would be
    /// exceeded.
    pub fn select_for_block(&self, max_bytes: usize) -> Vec<Transaction> {
        let state = self.state.lock().unwrap();
        let mut candidates: Vec<&Entry> = state.entries.values().collect();
        candidates.sort_by(|a, b| {
            b.fee_rate
                .partial_cmp(&a.fee_rate)
                .unwrap()
                .then_with(|| a.tx.txid().cmp(&b.tx.txid()))
        });

        let mut total = 0usize;
        let mut selected = Vec::new();
        for entry in candidates {
            if total + entry.size > max_bytes {
                break;
            }
            total += entry.size;
            selected.push(entry.tx.clone());
        }
        selected
    }

    /// Fee a transaction currently in the pool would pay, if present.
    pub fn fee_of(&self, txid: &Hash) -> Option<u64> {
        self.state.lock().unwrap().entries.get(txid).map(|e| e.fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, spend_tx};

    fn tx_with_fee(fee: u64) -> (Transaction, u64) {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1_000_000, &addr);
        let (tx, _) = spend_tx(&funding, 0, &sk, 1000, &addr);
        (tx, fee)
    }

    #[test]
    fn rejects_below_minimum_fee_rate() {
        let pool = Mempool::new(1_000_000, 1.0);
        let (tx, _) = tx_with_fee(0);
        assert_eq!(pool.add(tx, 0), AddOutcome::RejectedBelowMin);
    }

    #[test]
    fn accepts_and_reports_duplicate() {
        let pool = Mempool::new(1_000_000, 0.0);
        let (tx, fee) = tx_with_fee(10);
        assert_eq!(pool.add(tx.clone(), fee), AddOutcome::Accepted);
        assert_eq!(pool.add(tx, fee), AddOutcome::RejectedDuplicate);
    }

    #[test]
    fn select_for_block_orders_by_fee_rate_descending() {
        let pool = Mempool::new(10_000_000, 0.0);
        let (low, low_fee) = tx_with_fee(1);
        let (high, high_fee) = tx_with_fee(1000);
        assert_eq!(pool.add(low.clone(), low_fee), AddOutcome::Accepted);
        assert_eq!(pool.add(high.clone(), high_fee), AddOutcome::Accepted);

        let selected = pool.select_for_block(10_000_000);
        assert_eq!(selected[0].txid(), high.txid());
        assert_eq!(selected[1].txid(), low.txid());
    }

    #[test]
    fn eviction_makes_room_for_a_higher_fee_rate_transaction() {
        // Capacity holds exactly one of the low-fee-rate transactions.
        let (filler, filler_fee) = tx_with_fee(10);
        let filler_size = filler.size_bytes();
        let pool = Mempool::new(filler_size, 0.0);
        assert_eq!(pool.add(filler.clone(), filler_fee), AddOutcome::Accepted);

        let (rich, rich_fee) = tx_with_fee(1_000_000);
        let outcome = pool.add(rich, rich_fee);
        assert_eq!(outcome, AddOutcome::Accepted);
        assert!(!pool.has(&filler.txid()));
    }
}
