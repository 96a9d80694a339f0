// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The lock table
//!
//! Keys are indexed in a persistent ordered map behind a reader-writer lock.
//! Scans take a structurally shared snapshot of the map, so a long scan never
//! blocks index mutation and a live snapshot costs only the nodes that have
//! changed since. The write lock is taken only to insert or remove keys; the
//! contents of a key are guarded by that key's own mutex. Internal locks are
//! always taken in the order enable flag, key index, key state, guard.

pub mod guard;
pub(crate) mod key_state;
pub mod query;
pub mod signal;

pub use guard::{ConflictInfo, LockTableGuard, WaitState};
pub use query::{
    LockHolderInfo, LockStateInfo, LockTableMetrics, LockWaiterInfo, QueryLimitReason,
    QueryLockTableOptions, QueryResumeState,
};
pub use signal::WaitSignal;

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::LockTableConfig;
use crate::error::{LockTableError, LockTableResult};
use crate::lock::{Durability, Strength, WaitPolicy};
use crate::request::{FoundLock, LockAcquisition, LockUpdate, Request};
use crate::txn::{Transaction, TxnId, TxnStatusCache};
use crate::types::{Key, Span};
use key_state::KeyLockState;

/// Identifies the lease under which discovered locks are reported
pub type LeaseEpoch = u64;

pub(crate) type KeyIndex = im::OrdMap<Key, Arc<KeyLockState>>;

#[derive(Debug, Clone, Copy)]
struct EnabledState {
    enabled: bool,
    lease_epoch: LeaseEpoch,
}

/// State shared between the table and the guards it hands out
#[derive(Debug)]
pub(crate) struct TableShared {
    config: LockTableConfig,
    enabled: RwLock<EnabledState>,
    index: RwLock<KeyIndex>,
    seq_num: AtomicU64,
    insertions: AtomicU64,
    forced_clears: AtomicU64,
    forced_cleared_keys: AtomicU64,
    pub(crate) status_cache: TxnStatusCache,
}

impl TableShared {
    fn next_seq(&self) -> u64 {
        self.seq_num.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self) -> Option<KeyIndex> {
        let enabled = self.enabled.read();
        if !enabled.enabled {
            return None;
        }
        let index = self.index.read();
        Some(index.clone())
    }

    fn lookup(&self, key: &Key) -> Option<Arc<KeyLockState>> {
        self.index.read().get(key).cloned()
    }

    /// Find the state for `key`, creating it if needed. Returns true in the
    /// second slot if this call inserted it.
    fn get_or_insert(&self, key: &Key) -> (Arc<KeyLockState>, bool) {
        if let Some(state) = self.lookup(key) {
            return (state, false);
        }
        let mut index = self.index.write();
        if let Some(state) = index.get(key) {
            return (Arc::clone(state), false);
        }
        let state = Arc::new(KeyLockState::new(key.clone()));
        index.insert(key.clone(), Arc::clone(&state));
        (state, true)
    }

    /// Count a key insertion; true when it is time to check the key cap
    fn note_insertion(&self) -> bool {
        let n = self.insertions.fetch_add(1, Ordering::Relaxed) + 1;
        n % self.config.lock_count_check_interval == 0
    }

    pub(crate) fn is_held_by(&self, key: &Key, txn: TxnId) -> bool {
        let index = self.index.read();
        index.get(key).map(|s| s.is_held_by(txn)).unwrap_or(false)
    }

    pub(crate) fn update_locks_internal(&self, update: &LockUpdate) {
        let end = update.span.upper_bound();
        if update.span.key >= end {
            return;
        }
        let states: Vec<(Key, Arc<KeyLockState>)> = {
            let index = self.index.read();
            index
                .range(update.span.key.clone()..end)
                .map(|(k, s)| (k.clone(), Arc::clone(s)))
                .collect()
        };
        let emptied: Vec<Key> = states
            .into_iter()
            .filter_map(|(key, state)| state.update(update).then_some(key))
            .collect();
        self.try_gc_keys(&emptied);
    }

    /// Remove the given keys from the index if they are still empty
    pub(crate) fn try_gc_keys(&self, keys: &[Key]) {
        if keys.is_empty() {
            return;
        }
        let mut index = self.index.write();
        for key in keys {
            // Marking under the key mutex keeps late acquisitions off the
            // detached state.
            let doomed = index
                .get(key)
                .map(|s| s.try_mark_removed())
                .unwrap_or(false);
            if doomed {
                index.remove(key);
            }
        }
    }

    /// Clear keys down to the low watermark once the cap is exceeded,
    /// uncontended keys first
    fn enforce_lock_limit(&self) {
        let mut index = self.index.write();
        let len = index.len();
        if len <= self.config.max_locks {
            return;
        }
        let target = self.config.low_watermark();
        let wanted = len - target;

        let mut cleared: BTreeSet<Key> = BTreeSet::new();
        for uncontended_only in [true, false] {
            for (key, state) in index.iter() {
                if cleared.len() >= wanted {
                    break;
                }
                if cleared.contains(key) || (uncontended_only && state.is_contended()) {
                    continue;
                }
                if state.try_clear(false) {
                    cleared.insert(key.clone());
                }
            }
        }

        for key in &cleared {
            index.remove(key);
        }
        self.forced_clears.fetch_add(1, Ordering::Relaxed);
        self.forced_cleared_keys
            .fetch_add(cleared.len() as u64, Ordering::Relaxed);
        warn!(
            "lock table tracked {} keys (max {}); cleared {} keys",
            len,
            self.config.max_locks,
            cleared.len()
        );
    }
}

/// In-memory table of locks held by transactions and of the requests
/// waiting on them
#[derive(Debug)]
pub struct LockTable {
    shared: Arc<TableShared>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::from_validated(LockTableConfig::default())
    }
}

impl LockTable {
    /// Create an enabled lock table at lease epoch 0
    pub fn new(config: LockTableConfig) -> LockTableResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    fn from_validated(config: LockTableConfig) -> Self {
        let status_cache =
            TxnStatusCache::new(config.finalized_txn_cache_size, config.pushed_txn_cache_size);
        Self {
            shared: Arc::new(TableShared {
                config,
                enabled: RwLock::new(EnabledState {
                    enabled: true,
                    lease_epoch: 0,
                }),
                index: RwLock::new(KeyIndex::new()),
                seq_num: AtomicU64::new(0),
                insertions: AtomicU64::new(0),
                forced_clears: AtomicU64::new(0),
                forced_cleared_keys: AtomicU64::new(0),
                status_cache,
            }),
        }
    }

    pub fn config(&self) -> &LockTableConfig {
        &self.shared.config
    }

    /// Scan the request's spans, queueing it wherever it conflicts
    ///
    /// Pass the guard from a previous call to resume after waiting; its
    /// sequence number and queue positions are kept. On error the guard has
    /// already been dequeued.
    pub fn scan_and_enqueue(
        &self,
        req: &Request,
        guard: Option<LockTableGuard>,
    ) -> LockTableResult<LockTableGuard> {
        let mut guard = match guard {
            Some(mut guard) => {
                guard.reset(req);
                guard
            }
            None => LockTableGuard::new(Arc::clone(&self.shared), self.shared.next_seq(), req),
        };

        let snapshot = if req.lock_spans.is_empty() {
            None
        } else {
            self.shared.snapshot()
        };
        guard.set_snapshot(snapshot);

        if req.wait_policy == WaitPolicy::SkipLocked {
            guard.finish_scan();
            return Ok(guard);
        }

        if let Err(e) = guard.resume_scan(true) {
            debug!("scan of request {} failed: {}", guard.seq_num(), e);
            drop(guard);
            return Err(e);
        }
        guard.finish_scan();
        Ok(guard)
    }

    /// Take a snapshot for optimistic evaluation without queueing anywhere
    pub fn scan_optimistic(&self, req: &Request) -> LockTableGuard {
        let mut guard =
            LockTableGuard::new(Arc::clone(&self.shared), self.shared.next_seq(), req);
        let snapshot = if req.lock_spans.is_empty() {
            None
        } else {
            self.shared.snapshot()
        };
        guard.set_snapshot(snapshot);
        guard
    }

    /// Remove a finished or abandoned request from every key it is queued at
    pub fn dequeue(&self, guard: LockTableGuard) {
        debug!("dequeue request {}", guard.seq_num());
        drop(guard);
    }

    /// Record a lock acquired by a transaction during evaluation
    pub fn acquire_lock(&self, acq: &LockAcquisition) -> LockTableResult<()> {
        if !acq.strength.is_locking() {
            return Err(LockTableError::assertion(format!(
                "lock on key {} acquired with strength None",
                acq.key
            )));
        }
        if acq.strength == Strength::Intent && acq.durability == Durability::Unreplicated {
            return Err(LockTableError::assertion(format!(
                "unreplicated intent acquired on key {}",
                acq.key
            )));
        }

        let enabled = self.shared.enabled.read();
        if !enabled.enabled {
            debug!("ignoring lock acquisition on key {}: table disabled", acq.key);
            return Ok(());
        }

        loop {
            let (state, inserted) = match self.shared.lookup(&acq.key) {
                Some(state) => (state, false),
                None if acq.durability == Durability::Replicated
                    && !self.shared.config.track_uncontended_replicated_locks =>
                {
                    return Ok(());
                }
                None => self.shared.get_or_insert(&acq.key),
            };

            match state.acquire(acq, &self.shared.status_cache) {
                Ok(true) => {
                    drop(enabled);
                    if inserted && self.shared.note_insertion() {
                        self.shared.enforce_lock_limit();
                    }
                    return Ok(());
                }
                // The key was removed from the index after the lookup.
                Ok(false) => continue,
                Err(e) => {
                    if inserted {
                        self.shared.try_gc_keys(std::slice::from_ref(&acq.key));
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Install a replicated lock found during evaluation
    ///
    /// Returns false if the discovery is stale (the lease changed) or the
    /// table is disabled. If the lock's transaction is already known to be
    /// finalized, or pushed above a reader's timestamp, the lock is not
    /// installed and the guard is told to resolve it instead.
    pub fn add_discovered_lock(
        &self,
        found: &FoundLock,
        lease_epoch: LeaseEpoch,
        guard: &mut LockTableGuard,
        consult_status_cache: bool,
    ) -> LockTableResult<bool> {
        let enabled = self.shared.enabled.read();
        if !enabled.enabled || lease_epoch != enabled.lease_epoch {
            debug!(
                "ignoring discovered lock on key {} at lease epoch {}",
                found.key, lease_epoch
            );
            return Ok(false);
        }

        let strength = guard.strength_for(&found.key);
        if consult_status_cache {
            if let Some(finalized) = self.shared.status_cache.finalized(&found.txn.id) {
                guard.push_discovered(LockUpdate::new(&finalized, Span::point(found.key.clone())));
                return Ok(true);
            }
            if !strength.is_locking() {
                if let Some(pushed) = self.shared.status_cache.pending(&found.txn.id) {
                    if guard.read_ts() < pushed.meta.write_timestamp {
                        guard.push_discovered(LockUpdate::new(
                            &pushed,
                            Span::point(found.key.clone()),
                        ));
                        return Ok(true);
                    }
                }
            }
        }

        let (pin, inserted) = loop {
            let (state, inserted) = self.shared.get_or_insert(&found.key);
            match state.discovered(found, &guard.key_scan(strength)) {
                Ok(Some(pin)) => break (pin, inserted),
                Ok(None) => continue,
                Err(e) => {
                    if inserted {
                        self.shared.try_gc_keys(std::slice::from_ref(&found.key));
                    }
                    return Err(e);
                }
            }
        };
        drop(enabled);

        if let Some(previous) = guard.set_pin(pin) {
            self.shared.try_gc_keys(&[previous]);
        }
        if inserted && self.shared.note_insertion() {
            self.shared.enforce_lock_limit();
        }
        Ok(true)
    }

    /// Apply a transaction's outcome to its locks in `update.span`
    pub fn update_locks(&self, update: &LockUpdate) {
        debug!(
            "update locks of txn {} in {} to {}",
            update.txn.id, update.span, update.status
        );
        self.shared.update_locks_internal(update);
    }

    /// Record a push result. Waiters pick it up on their next conflict check.
    pub fn pushed_transaction_updated(&self, txn: &Transaction) {
        self.shared.status_cache.add(txn);
    }

    /// Record that a transaction committed or aborted
    pub fn transaction_is_finalized(&self, txn: &Transaction) {
        if !txn.is_finalized() {
            warn!("txn {} reported finalized with status {}", txn.id(), txn.status);
            return;
        }
        self.shared.status_cache.add(txn);
    }

    /// Start tracking locks under a lease
    pub fn enable(&self, lease_epoch: LeaseEpoch) {
        let mut enabled = self.shared.enabled.write();
        if !enabled.enabled || enabled.lease_epoch != lease_epoch {
            info!(
                "lock table enabled at lease epoch {} (was {})",
                lease_epoch, enabled.lease_epoch
            );
            enabled.enabled = true;
            enabled.lease_epoch = lease_epoch;
        }
    }

    /// Drop every tracked key, releasing all waiters, and optionally stop
    /// tracking until the next `enable`
    pub fn clear(&self, disable: bool) {
        let mut enabled = self.shared.enabled.write();
        if disable {
            enabled.enabled = false;
        }
        let mut index = self.shared.index.write();
        let count = index.len();
        for state in index.values() {
            state.try_clear(true);
        }
        *index = KeyIndex::new();
        drop(index);
        self.shared.status_cache.clear();
        info!(
            "lock table cleared {} keys (disabled: {})",
            count, !enabled.enabled
        );
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled.read().enabled
    }

    pub fn lease_epoch(&self) -> LeaseEpoch {
        self.shared.enabled.read().lease_epoch
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.shared.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.shared.enabled.read();
        let index = self.shared.index.read().clone();
        writeln!(
            f,
            "enabled: {}, lease epoch: {}, num keys: {}",
            state.enabled,
            state.lease_epoch,
            index.len()
        )?;
        for state in index.values() {
            state.dump(f)?;
        }
        Ok(())
    }
}
