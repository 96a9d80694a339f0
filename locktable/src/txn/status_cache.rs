// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Bounded cache of transaction push outcomes
//!
//! Populated by the push machinery through the lock table. Conflict checks
//! only read from it: a holder known to be finalized no longer blocks
//! anyone, and a holder known to be pushed above a reader's timestamp no
//! longer blocks that reader.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use super::state::{Transaction, TxnId};

/// Insertion-ordered, fixed-capacity map. Re-adding a key refreshes it.
#[derive(Debug)]
struct BoundedTxnMap {
    capacity: usize,
    order: VecDeque<TxnId>,
    entries: HashMap<TxnId, Transaction>,
}

impl BoundedTxnMap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&self, id: &TxnId) -> Option<&Transaction> {
        self.entries.get(id)
    }

    fn insert(&mut self, txn: Transaction) {
        if self.capacity == 0 {
            return;
        }
        let id = txn.id();
        if self.entries.insert(id, txn).is_some() {
            self.order.retain(|existing| *existing != id);
        }
        self.order.push_back(id);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn remove(&mut self, id: &TxnId) {
        if self.entries.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnStatusCacheStats {
    pub finalized_entries: usize,
    pub pending_entries: usize,
}

/// Last known status of recently pushed transactions
#[derive(Debug)]
pub struct TxnStatusCache {
    finalized: RwLock<BoundedTxnMap>,
    pending: RwLock<BoundedTxnMap>,
}

impl TxnStatusCache {
    pub fn new(finalized_capacity: usize, pending_capacity: usize) -> Self {
        Self {
            finalized: RwLock::new(BoundedTxnMap::new(finalized_capacity)),
            pending: RwLock::new(BoundedTxnMap::new(pending_capacity)),
        }
    }

    /// Record a push outcome
    ///
    /// Finalized transactions move out of the pending map. Pending records
    /// only ever ratchet their pushed timestamp forward.
    pub fn add(&self, txn: &Transaction) {
        if txn.is_finalized() {
            self.pending.write().remove(&txn.id());
            self.finalized.write().insert(txn.clone());
            return;
        }

        if self.finalized.read().get(&txn.id()).is_some() {
            // A stale pending report must not shadow a known outcome.
            return;
        }

        let mut pending = self.pending.write();
        let mut record = txn.clone();
        if let Some(existing) = pending.get(&txn.id()) {
            if existing.meta.epoch > record.meta.epoch {
                return;
            }
            if existing.meta.epoch == record.meta.epoch {
                record
                    .meta
                    .write_timestamp
                    .forward(existing.meta.write_timestamp);
            }
        }
        pending.insert(record);
    }

    /// The finalized record of `id`, if known
    pub fn finalized(&self, id: &TxnId) -> Option<Transaction> {
        self.finalized.read().get(id).cloned()
    }

    /// The pending record of `id`, if known
    pub fn pending(&self, id: &TxnId) -> Option<Transaction> {
        self.pending.read().get(id).cloned()
    }

    pub fn clear(&self) {
        self.finalized.write().clear();
        self.pending.write().clear();
    }

    pub fn stats(&self) -> TxnStatusCacheStats {
        TxnStatusCacheStats {
            finalized_entries: self.finalized.read().len(),
            pending_entries: self.pending.read().len(),
        }
    }
}
