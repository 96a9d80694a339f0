// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-key lock state: holders, wait queues and the distinguished waiter
//!
//! Every key that is locked or has queued requests gets one
//! [`KeyLockState`]. Its holder list records which transactions hold the key
//! and at which strengths. Locking requests queue in sequence-number order;
//! a request that reaches the front of an unheld key without conflicting
//! with anything ahead of it stays in the queue as an inactive *claim*.
//! Non-locking readers only ever wait while the key is held.

use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::guard::{ConflictInfo, GuardShared, WaitState};
use super::query::{LockHolderInfo, LockStateInfo, LockTableMetrics, LockWaiterInfo};
use crate::error::{LockTableError, LockTableResult};
use crate::lock::{LockMode, Strength, TxnLock, WaitPolicy};
use crate::request::{FoundLock, LockAcquisition, LockUpdate};
use crate::txn::{TxnId, TxnMeta, TxnStatusCache};
use crate::types::{Key, Span, Timestamp};

fn same_txn(a: Option<TxnId>, b: Option<TxnId>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Whether holding `held` lets a transaction proceed with `wanted`
fn held_strength_suffices(held: Strength, wanted: Strength) -> bool {
    wanted <= held || (wanted == Strength::Intent && held == Strength::Exclusive)
}

/// One request's visit to a key during a scan
pub(crate) struct KeyScan<'a> {
    pub guard: &'a Arc<GuardShared>,
    pub txn: Option<&'a TxnMeta>,
    pub read_ts: Timestamp,
    pub strength: Strength,
    pub wait_policy: WaitPolicy,
    pub max_wait_queue_length: usize,
}

impl KeyScan<'_> {
    fn txn_id(&self) -> Option<TxnId> {
        self.txn.map(|t| t.id)
    }

    fn mode(&self) -> LockMode {
        let ts = match self.txn {
            Some(txn) if self.strength.is_locking() => txn.write_timestamp,
            _ => self.read_ts,
        };
        LockMode::new(self.strength, ts)
    }
}

/// Lock updates a scan found necessary, split by where they are applied
#[derive(Debug, Default)]
pub(crate) struct Resolutions {
    /// Applied by the external intent resolver
    pub replicated: Vec<LockUpdate>,
    /// Applied in-process once the scan completes
    pub unreplicated: Vec<LockUpdate>,
}

impl Resolutions {
    fn push(&mut self, update: LockUpdate, replicated: bool) {
        let list = if replicated {
            &mut self.replicated
        } else {
            &mut self.unreplicated
        };
        if !list
            .iter()
            .any(|u| u.txn.id == update.txn.id && u.span == update.span)
        {
            list.push(update);
        }
    }
}

/// Result of visiting a key
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyScanOutcome {
    pub wait: bool,
    /// The key may now be removable from the index
    pub emptied: bool,
}

impl KeyScanOutcome {
    fn proceed(emptied: bool) -> Self {
        Self {
            wait: false,
            emptied,
        }
    }

    fn wait() -> Self {
        Self {
            wait: true,
            emptied: false,
        }
    }
}

#[derive(Debug)]
struct QueuedLockingRequest {
    guard: Weak<GuardShared>,
    txn: Option<TxnMeta>,
    mode: LockMode,
    active: bool,
    since: Instant,
}

impl QueuedLockingRequest {
    fn txn_id(&self) -> Option<TxnId> {
        self.txn.as_ref().map(|t| t.id)
    }
}

#[derive(Debug)]
struct WaitingReader {
    guard: Weak<GuardShared>,
    txn: Option<TxnMeta>,
    mode: LockMode,
    since: Instant,
}

impl WaitingReader {
    fn txn_id(&self) -> Option<TxnId> {
        self.txn.as_ref().map(|t| t.id)
    }
}

#[derive(Debug, Default)]
struct KeyInner {
    holders: Vec<TxnLock>,
    holder_index: HashMap<TxnId, usize>,
    /// Locking requests by sequence number
    queued_locking: BTreeMap<u64, QueuedLockingRequest>,
    /// Non-empty only while the key is held
    waiting_readers: BTreeMap<u64, WaitingReader>,
    distinguished: Option<u64>,
    not_removable: u32,
    /// Detached from the index; nothing may be installed here any more
    removed: bool,
}

impl KeyInner {
    fn is_empty(&self) -> bool {
        self.holders.is_empty() && self.queued_locking.is_empty()
    }

    fn is_locked(&self) -> bool {
        !self.holders.is_empty()
    }

    fn is_gc_candidate(&self) -> bool {
        self.is_empty() && self.not_removable == 0
    }

    /// Anyone besides a lone claimant on an unheld key
    fn is_contended(&self) -> bool {
        !self.waiting_readers.is_empty()
            || (self.is_locked() && !self.queued_locking.is_empty())
            || self.queued_locking.len() > 1
    }

    fn holder_pos(&self, txn: &TxnId) -> Option<usize> {
        self.holder_index.get(txn).copied()
    }

    fn push_holder(&mut self, lock: TxnLock) {
        self.holder_index.insert(lock.txn_id(), self.holders.len());
        self.holders.push(lock);
    }

    fn remove_holder(&mut self, idx: usize) -> TxnLock {
        let removed = self.holders.remove(idx);
        self.holder_index = self
            .holders
            .iter()
            .enumerate()
            .map(|(i, h)| (h.txn_id(), i))
            .collect();
        removed
    }

    /// The transaction others ultimately wait for: the first holder, or the
    /// first transactional request in the queue if the key is unheld
    fn claimant(&self) -> Option<(TxnMeta, bool)> {
        if let Some(holder) = self.holders.first() {
            return Some((holder.txn().clone(), true));
        }
        self.queued_locking
            .values()
            .find_map(|req| req.txn.clone())
            .map(|txn| (txn, false))
    }

    fn conflict_info(&self, key: &Key, txn: TxnMeta, held: bool, strength: Strength) -> ConflictInfo {
        ConflictInfo {
            txn,
            key: key.clone(),
            held,
            guard_strength: strength,
            queued_locking_requests: self.queued_locking.len(),
            queued_readers: self.waiting_readers.len(),
        }
    }

    fn prune_dangling(&mut self, key: &Key) {
        let before = self.queued_locking.len() + self.waiting_readers.len();
        self.queued_locking.retain(|_, req| req.guard.strong_count() > 0);
        self.waiting_readers.retain(|_, r| r.guard.strong_count() > 0);
        let pruned = before - (self.queued_locking.len() + self.waiting_readers.len());
        if pruned > 0 {
            warn!("pruned {} requests at key {} whose guards were dropped", pruned, key);
        }
    }

    /// Release every waiter that no longer conflicts with the holders or the
    /// requests queued ahead of it, then refresh the remaining waiters
    fn recompute_wait_queues(&mut self, key: &Key) {
        self.prune_dangling(key);

        let holder_modes: Vec<(Option<TxnId>, LockMode)> = self
            .holders
            .iter()
            .map(|h| (Some(h.txn_id()), h.mode()))
            .collect();

        let released_readers: Vec<u64> = self
            .waiting_readers
            .iter()
            .filter(|(_, r)| {
                !holder_modes
                    .iter()
                    .any(|(txn, mode)| !same_txn(r.txn_id(), *txn) && r.mode.conflicts_with(mode))
            })
            .map(|(seq, _)| *seq)
            .collect();
        for seq in released_readers {
            if let Some(reader) = self.waiting_readers.remove(&seq) {
                if let Some(guard) = reader.guard.upgrade() {
                    guard.forget_key(key);
                    guard.done_actively_waiting();
                }
            }
        }

        let mut modes_so_far = holder_modes;
        let mut dequeued = Vec::new();
        for (seq, req) in self.queued_locking.iter_mut() {
            let conflicts = modes_so_far
                .iter()
                .any(|(txn, mode)| !same_txn(req.txn_id(), *txn) && req.mode.conflicts_with(mode));
            if !conflicts {
                if req.txn.is_none() {
                    dequeued.push(*seq);
                    continue;
                }
                if req.active {
                    req.active = false;
                    if let Some(guard) = req.guard.upgrade() {
                        guard.done_actively_waiting();
                    }
                    debug!("request {} claims key {}", seq, key);
                }
            }
            modes_so_far.push((req.txn_id(), req.mode));
        }
        for seq in dequeued {
            if let Some(req) = self.queued_locking.remove(&seq) {
                if let Some(guard) = req.guard.upgrade() {
                    guard.forget_key(key);
                    guard.done_actively_waiting();
                }
            }
        }

        self.inform_active_waiters(key);
    }

    /// Pick the distinguished waiter and tell every active waiter whom it is
    /// waiting for
    fn inform_active_waiters(&mut self, key: &Key) {
        let (claimant, held) = match self.claimant() {
            Some(claimant) => claimant,
            None => {
                self.distinguished = None;
                return;
            }
        };
        let claimant_id = Some(claimant.id);

        if let Some(seq) = self.distinguished {
            let still_eligible = match self.waiting_readers.get(&seq) {
                Some(reader) => !same_txn(reader.txn_id(), claimant_id),
                None => self
                    .queued_locking
                    .get(&seq)
                    .map(|req| req.active && !same_txn(req.txn_id(), claimant_id))
                    .unwrap_or(false),
            };
            if !still_eligible {
                self.distinguished = None;
            }
        }
        if self.distinguished.is_none() {
            self.distinguished = self
                .waiting_readers
                .iter()
                .find(|(_, r)| !same_txn(r.txn_id(), claimant_id))
                .map(|(seq, _)| *seq)
                .or_else(|| {
                    self.queued_locking
                        .iter()
                        .find(|(_, req)| req.active && !same_txn(req.txn_id(), claimant_id))
                        .map(|(seq, _)| *seq)
                });
        }

        let state_for = |seq: u64, txn: Option<TxnId>, strength: Strength| {
            if same_txn(txn, claimant_id) {
                WaitState::WaitSelf { key: key.clone() }
            } else {
                let info = self.conflict_info(key, claimant.clone(), held, strength);
                if self.distinguished == Some(seq) {
                    WaitState::WaitForDistinguished(info)
                } else {
                    WaitState::WaitFor(info)
                }
            }
        };

        for (seq, reader) in &self.waiting_readers {
            if let Some(guard) = reader.guard.upgrade() {
                guard.update_state(state_for(*seq, reader.txn_id(), Strength::None));
            }
        }
        for (seq, req) in &self.queued_locking {
            if !req.active {
                continue;
            }
            if let Some(guard) = req.guard.upgrade() {
                guard.update_state(state_for(*seq, req.txn_id(), req.mode.strength()));
            }
        }
    }
}

/// All lock table state for one key
#[derive(Debug)]
pub(crate) struct KeyLockState {
    key: Key,
    mu: Mutex<KeyInner>,
}

impl KeyLockState {
    pub(crate) fn new(key: Key) -> Self {
        Self {
            key,
            mu: Mutex::new(KeyInner::default()),
        }
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    /// Mark the state detached if it has no holders, no queued requests
    /// and no pin. The caller removes it from the index under the write lock.
    pub(crate) fn try_mark_removed(&self) -> bool {
        let mut inner = self.mu.lock();
        if inner.is_gc_candidate() {
            inner.removed = true;
        }
        inner.removed
    }

    pub(crate) fn is_contended(&self) -> bool {
        self.mu.lock().is_contended()
    }

    pub(crate) fn is_held_by(&self, txn: TxnId) -> bool {
        self.mu.lock().holder_pos(&txn).is_some()
    }

    /// Decide whether the visiting request may proceed past this key
    pub(crate) fn scan_and_maybe_enqueue(
        self: &Arc<Self>,
        req: &KeyScan<'_>,
        status_cache: &TxnStatusCache,
        resolutions: &mut Resolutions,
    ) -> LockTableResult<KeyScanOutcome> {
        let mut inner = self.mu.lock();
        if inner.is_empty() {
            return Ok(KeyScanOutcome::proceed(true));
        }

        let txn_id = req.txn_id();
        if let Some(id) = txn_id {
            if let Some(idx) = inner.holder_pos(&id) {
                let held = inner.holders[idx].highest_strength();
                if held_strength_suffices(held, req.strength) {
                    return Ok(KeyScanOutcome::proceed(false));
                }
                return Err(LockTableError::LockPromotionUnsupported {
                    key: self.key.clone(),
                    from: held,
                    to: req.strength,
                });
            }
        }

        let mode = req.mode();
        let mut blocking_holder: Option<usize> = None;
        for (idx, holder) in inner.holders.iter().enumerate() {
            if Some(holder.txn_id()) == txn_id {
                continue;
            }
            if let Some(finalized) = status_cache.finalized(&holder.txn_id()) {
                resolutions.push(
                    LockUpdate::new(&finalized, Span::point(self.key.clone())),
                    holder.is_held_replicated(),
                );
                continue;
            }
            if !mode.conflicts_with(&holder.mode()) {
                continue;
            }
            if !req.strength.is_locking() {
                if let Some(pushed) = status_cache.pending(&holder.txn_id()) {
                    if req.read_ts < pushed.meta.write_timestamp {
                        resolutions.push(
                            LockUpdate::new(&pushed, Span::point(self.key.clone())),
                            holder.is_held_replicated(),
                        );
                        continue;
                    }
                }
            }
            blocking_holder = Some(idx);
            break;
        }

        let seq = req.guard.seq;
        if !req.strength.is_locking() {
            return Ok(self.scan_reader(&mut inner, req, mode, blocking_holder));
        }

        let already_queued = inner.queued_locking.contains_key(&seq);
        if !already_queued
            && req.max_wait_queue_length > 0
            && inner.queued_locking.len() >= req.max_wait_queue_length
        {
            debug!(
                "request {} rejected at key {}: {} queued requests",
                seq,
                self.key,
                inner.queued_locking.len()
            );
            req.guard.wait_with(WaitState::QueueLengthExceeded {
                key: self.key.clone(),
                max_len: req.max_wait_queue_length,
            });
            return Ok(KeyScanOutcome::wait());
        }

        let holder_conflict = blocking_holder.map(|idx| (inner.holders[idx].txn().clone(), true));
        let queue_conflict = inner
            .queued_locking
            .range(..seq)
            .find(|(_, q)| !same_txn(q.txn_id(), txn_id) && mode.conflicts_with(&q.mode))
            .map(|(_, q)| q.txn.clone());
        let conflicting = holder_conflict.is_some() || queue_conflict.is_some();

        if conflicting && req.wait_policy == WaitPolicy::Error {
            let (txn, held) = match (holder_conflict, queue_conflict) {
                (Some(conflict), _) => conflict,
                (None, Some(Some(txn))) => (txn, false),
                _ => inner.claimant().ok_or_else(|| {
                    LockTableError::assertion(format!(
                        "request {} conflicts at key {} with no claimant",
                        seq, self.key
                    ))
                })?,
            };
            if inner.queued_locking.remove(&seq).is_some() {
                req.guard.forget_key(&self.key);
                inner.recompute_wait_queues(&self.key);
            }
            let info = inner.conflict_info(&self.key, txn, held, req.strength);
            req.guard.wait_with(WaitState::WaitFor(info));
            return Ok(KeyScanOutcome::wait());
        }

        if !conflicting && req.txn.is_none() {
            // Claims must be pushable, so requests without a transaction
            // never hold one.
            if inner.queued_locking.remove(&seq).is_some() {
                req.guard.forget_key(&self.key);
                inner.recompute_wait_queues(&self.key);
            }
            return Ok(KeyScanOutcome::proceed(inner.is_gc_candidate()));
        }

        let entry = inner
            .queued_locking
            .entry(seq)
            .or_insert_with(|| QueuedLockingRequest {
                guard: Arc::downgrade(req.guard),
                txn: req.txn.cloned(),
                mode,
                active: false,
                since: Instant::now(),
            });
        entry.txn = req.txn.cloned();
        entry.mode = mode;
        let was_active = entry.active;
        entry.active = conflicting;
        if conflicting && !was_active {
            entry.since = Instant::now();
        }
        req.guard.remember_key(&self.key, Arc::downgrade(self));

        if conflicting {
            req.guard.mark_start_wait();
            inner.inform_active_waiters(&self.key);
            debug!("request {} waiting at key {}", seq, self.key);
            Ok(KeyScanOutcome::wait())
        } else {
            if was_active && inner.distinguished == Some(seq) {
                inner.distinguished = None;
            }
            inner.inform_active_waiters(&self.key);
            Ok(KeyScanOutcome::proceed(false))
        }
    }

    fn scan_reader(
        self: &Arc<Self>,
        inner: &mut KeyInner,
        req: &KeyScan<'_>,
        mode: LockMode,
        blocking_holder: Option<usize>,
    ) -> KeyScanOutcome {
        let seq = req.guard.seq;
        let idx = match blocking_holder {
            Some(idx) => idx,
            None => {
                if inner.waiting_readers.remove(&seq).is_some() {
                    req.guard.forget_key(&self.key);
                    if inner.distinguished == Some(seq) {
                        inner.distinguished = None;
                    }
                    inner.inform_active_waiters(&self.key);
                }
                return KeyScanOutcome::proceed(false);
            }
        };

        if req.wait_policy == WaitPolicy::Error {
            let txn = inner.holders[idx].txn().clone();
            let info = inner.conflict_info(&self.key, txn, true, Strength::None);
            req.guard.wait_with(WaitState::WaitFor(info));
            return KeyScanOutcome::wait();
        }

        let reader = inner
            .waiting_readers
            .entry(seq)
            .or_insert_with(|| WaitingReader {
                guard: Arc::downgrade(req.guard),
                txn: req.txn.cloned(),
                mode,
                since: Instant::now(),
            });
        reader.txn = req.txn.cloned();
        reader.mode = mode;
        req.guard.remember_key(&self.key, Arc::downgrade(self));
        req.guard.mark_start_wait();
        inner.inform_active_waiters(&self.key);
        debug!("reader {} waiting at key {}", seq, self.key);
        KeyScanOutcome::wait()
    }

    /// Record a lock acquired by `acq.txn`
    ///
    /// Acquiring over a lock held by a conflicting transaction is only
    /// legal if that transaction is known to be finalized; its stale lock is
    /// dropped. Returns false if the state was removed from the index, in
    /// which case the caller looks the key up again.
    pub(crate) fn acquire(
        &self,
        acq: &LockAcquisition,
        status_cache: &TxnStatusCache,
    ) -> LockTableResult<bool> {
        let mut inner = self.mu.lock();
        if inner.removed {
            return Ok(false);
        }
        let mode = LockMode::new(acq.strength, acq.txn.write_timestamp);

        let mut stale = Vec::new();
        for (idx, holder) in inner.holders.iter().enumerate() {
            if holder.txn_id() == acq.txn.id || !mode.conflicts_with(&holder.mode()) {
                continue;
            }
            if status_cache.finalized(&holder.txn_id()).is_some() {
                stale.push(idx);
                continue;
            }
            return Err(LockTableError::assertion(format!(
                "txn {} acquired {} lock on key {} held by conflicting txn {}",
                acq.txn.id,
                acq.strength,
                self.key,
                holder.txn_id()
            )));
        }

        let updated = match inner.holder_pos(&acq.txn.id) {
            Some(idx) => {
                let mut lock = inner.holders[idx].clone();
                lock.reacquire(acq)?;
                Some((idx, lock))
            }
            None => None,
        };
        let fresh = match updated {
            Some(_) => None,
            None => {
                let mut lock = TxnLock::new(acq.txn.clone());
                lock.reacquire(acq)?;
                Some(lock)
            }
        };

        for idx in stale.into_iter().rev() {
            let dropped = inner.remove_holder(idx);
            debug!(
                "dropped lock of finalized txn {} at key {}",
                dropped.txn_id(),
                self.key
            );
        }
        match (updated, fresh) {
            (Some((_, lock)), _) => {
                // Indices may have shifted after dropping stale holders.
                if let Some(idx) = inner.holder_pos(&acq.txn.id) {
                    inner.holders[idx] = lock;
                }
            }
            (None, Some(lock)) => inner.push_holder(lock),
            (None, None) => {}
        }

        let own_requests: Vec<u64> = inner
            .queued_locking
            .iter()
            .filter(|(_, q)| same_txn(q.txn_id(), Some(acq.txn.id)))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in own_requests {
            if let Some(req) = inner.queued_locking.remove(&seq) {
                if let Some(guard) = req.guard.upgrade() {
                    guard.forget_key(&self.key);
                    if req.active {
                        guard.done_actively_waiting();
                    }
                }
            }
        }

        inner.recompute_wait_queues(&self.key);
        debug!(
            "txn {} acquired {} {} lock on key {}",
            acq.txn.id, acq.durability, acq.strength, self.key
        );
        Ok(true)
    }

    /// Install a replicated lock found during evaluation and queue the
    /// discovering request behind it, pinning the key until that request
    /// scans again. Returns `None` if the state was removed from the index.
    pub(crate) fn discovered(
        self: &Arc<Self>,
        found: &FoundLock,
        req: &KeyScan<'_>,
    ) -> LockTableResult<Option<NotRemovablePin>> {
        if req.txn_id() == Some(found.txn.id) {
            return Err(LockTableError::assertion(format!(
                "txn {} discovered its own lock on key {}",
                found.txn.id, self.key
            )));
        }

        let mut inner = self.mu.lock();
        if inner.removed {
            return Ok(None);
        }
        match inner.holder_pos(&found.txn.id) {
            Some(idx) => inner.holders[idx].discovered(found)?,
            None => {
                let mut lock = TxnLock::new(found.txn.clone());
                lock.discovered(found)?;
                inner.push_holder(lock);
            }
        }

        if req.strength.is_locking() {
            let seq = req.guard.seq;
            let mode = req.mode();
            let entry = inner
                .queued_locking
                .entry(seq)
                .or_insert_with(|| QueuedLockingRequest {
                    guard: Arc::downgrade(req.guard),
                    txn: req.txn.cloned(),
                    mode,
                    active: false,
                    since: Instant::now(),
                });
            entry.active = false;
            req.guard.remember_key(&self.key, Arc::downgrade(self));
        }

        inner.not_removable += 1;
        inner.recompute_wait_queues(&self.key);
        debug!(
            "discovered {} lock of txn {} on key {}",
            found.strength, found.txn.id, self.key
        );
        Ok(Some(NotRemovablePin {
            state: Arc::clone(self),
        }))
    }

    /// Apply a lock update. Returns true if the key may be removed.
    pub(crate) fn update(&self, update: &LockUpdate) -> bool {
        let mut inner = self.mu.lock();
        let idx = match inner.holder_pos(&update.txn.id) {
            Some(idx) => idx,
            None => return inner.is_gc_candidate(),
        };

        if update.status.is_finalized() {
            inner.remove_holder(idx);
            debug!(
                "released lock of {} txn {} on key {}",
                update.status, update.txn.id, self.key
            );
        } else {
            inner.holders[idx].update_pending(update);
            if !inner.holders[idx].is_held() {
                inner.remove_holder(idx);
            }
        }

        inner.recompute_wait_queues(&self.key);
        inner.is_gc_candidate()
    }

    /// Drop every reference to the request with sequence number `seq`.
    /// Returns true if the key may be removed.
    pub(crate) fn remove_guard(&self, seq: u64) -> bool {
        let mut inner = self.mu.lock();
        let removed_locking = inner.queued_locking.remove(&seq).is_some();
        let removed_reader = inner.waiting_readers.remove(&seq).is_some();
        if inner.distinguished == Some(seq) {
            inner.distinguished = None;
        }
        if removed_locking || removed_reader {
            inner.recompute_wait_queues(&self.key);
        }
        inner.is_gc_candidate()
    }

    /// Forget everything about this key, releasing its waiters
    ///
    /// Waiters on a replicated lock are told to push the holder directly;
    /// unreplicated locks have no other record, so their waiters are done.
    /// Unless forced, pinned keys are left alone. A cleared state is detached
    /// and the caller removes it from the index. Returns true if cleared.
    pub(crate) fn try_clear(&self, force: bool) -> bool {
        let mut inner = self.mu.lock();
        if !force && inner.not_removable > 0 {
            return false;
        }

        let terminal = match inner.holders.iter().find(|h| h.is_held_replicated()) {
            Some(holder) => WaitState::WaitElsewhere {
                txn: holder.txn().clone(),
                key: self.key.clone(),
                held: true,
            },
            None => WaitState::DoneWaiting,
        };
        for reader in inner.waiting_readers.values() {
            if let Some(guard) = reader.guard.upgrade() {
                guard.terminate_wait(&self.key, terminal.clone());
            }
        }
        for req in inner.queued_locking.values() {
            if let Some(guard) = req.guard.upgrade() {
                if req.active {
                    guard.terminate_wait(&self.key, terminal.clone());
                } else {
                    guard.forget_key(&self.key);
                }
            }
        }

        *inner = KeyInner {
            removed: true,
            ..KeyInner::default()
        };
        true
    }

    pub(crate) fn locked_by_conflicting_txn(
        &self,
        txn_id: Option<TxnId>,
        strength: Strength,
        read_ts: Timestamp,
    ) -> LockTableResult<Option<TxnMeta>> {
        let inner = self.mu.lock();
        if let Some(id) = txn_id {
            if let Some(idx) = inner.holder_pos(&id) {
                let held = inner.holders[idx].highest_strength();
                if held_strength_suffices(held, strength) {
                    return Ok(None);
                }
                return Err(LockTableError::LockPromotionUnsupported {
                    key: self.key.clone(),
                    from: held,
                    to: strength,
                });
            }
        }

        let mode = LockMode::new(strength, read_ts);
        if let Some(holder) = inner
            .holders
            .iter()
            .find(|h| mode.conflicts_with(&h.mode()))
        {
            return Ok(Some(holder.txn().clone()));
        }
        if strength.is_locking() {
            let claim = inner.queued_locking.values().find_map(|q| match &q.txn {
                Some(txn) if Some(txn.id) != txn_id && mode.conflicts_with(&q.mode) => {
                    Some(txn.clone())
                }
                _ => None,
            });
            return Ok(claim);
        }
        Ok(None)
    }

    pub(crate) fn has_optimistic_conflict(
        &self,
        txn_id: Option<TxnId>,
        strength: Strength,
        read_ts: Timestamp,
    ) -> bool {
        let inner = self.mu.lock();
        let mode = LockMode::new(strength, read_ts);
        inner.holders.iter().any(|h| {
            if Some(h.txn_id()) == txn_id {
                !held_strength_suffices(h.highest_strength(), strength)
            } else {
                mode.conflicts_with(&h.mode())
            }
        })
    }

    pub(crate) fn state_info(&self, include_uncontended: bool) -> Option<LockStateInfo> {
        let inner = self.mu.lock();
        if inner.is_empty() || (!include_uncontended && !inner.is_contended()) {
            return None;
        }
        let holders = inner
            .holders
            .iter()
            .map(|h| LockHolderInfo {
                txn: h.txn().clone(),
                strength: h.highest_strength(),
                durability: h.durability(),
                held_since: h.held_since(),
                hold_duration: h.hold_duration(),
            })
            .collect();
        let readers = inner.waiting_readers.iter().map(|(seq, r)| LockWaiterInfo {
            seq: *seq,
            txn: r.txn.clone(),
            strength: Strength::None,
            active: true,
            wait_duration: r.since.elapsed(),
        });
        let locking = inner.queued_locking.iter().map(|(seq, q)| LockWaiterInfo {
            seq: *seq,
            txn: q.txn.clone(),
            strength: q.mode.strength(),
            active: q.active,
            wait_duration: if q.active {
                q.since.elapsed()
            } else {
                Duration::ZERO
            },
        });
        Some(LockStateInfo {
            key: self.key.clone(),
            holders,
            waiters: readers.chain(locking).collect(),
        })
    }

    pub(crate) fn collect_metrics(&self, metrics: &mut LockTableMetrics) {
        let inner = self.mu.lock();
        metrics.locks += 1;
        if inner.is_locked() {
            metrics.locks_held += 1;
            for holder in &inner.holders {
                let held = holder.hold_duration();
                metrics.total_lock_hold_duration += held;
                metrics.max_lock_hold_duration = metrics.max_lock_hold_duration.max(held);
            }
        }
        let active_locking = inner.queued_locking.values().filter(|q| q.active).count();
        if !inner.waiting_readers.is_empty() || active_locking > 0 {
            metrics.locks_with_wait_queues += 1;
        }
        metrics.waiting_readers += inner.waiting_readers.len();
        metrics.queued_locking_requests += inner.queued_locking.len();
        metrics.active_locking_requests += active_locking;

        let waits = inner
            .waiting_readers
            .values()
            .map(|r| r.since.elapsed())
            .chain(
                inner
                    .queued_locking
                    .values()
                    .filter(|q| q.active)
                    .map(|q| q.since.elapsed()),
            );
        for wait in waits {
            metrics.total_wait_duration += wait;
            metrics.max_wait_duration = metrics.max_wait_duration.max(wait);
        }
    }

    /// Write a deterministic description of this key
    pub(crate) fn dump(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.mu.lock();
        writeln!(f, " key: {}", self.key)?;
        for holder in &inner.holders {
            write!(
                f,
                "  holder: txn: {} epoch: {}, ts: {}, info:",
                holder.txn_id(),
                holder.txn().epoch,
                holder.write_ts()
            )?;
            let repl = holder.replicated();
            if !repl.is_empty() {
                let strengths: Vec<&str> = [Strength::Intent, Strength::Exclusive, Strength::Shared]
                    .into_iter()
                    .filter(|s| repl.held(*s))
                    .map(|s| s.as_str())
                    .collect();
                write!(f, " repl [{}]", strengths.join(", "))?;
            }
            let unrepl = holder.unreplicated();
            if !unrepl.is_empty() {
                let strengths: Vec<String> = [Strength::Exclusive, Strength::Shared]
                    .into_iter()
                    .filter_map(|s| unrepl.seq(s).map(|seq| format!("{} seq: {}", s, seq)))
                    .collect();
                write!(f, " unrepl [{}]", strengths.join(", "))?;
            }
            writeln!(f)?;
        }
        if !inner.waiting_readers.is_empty() {
            writeln!(f, "   waiting readers:")?;
            for (seq, reader) in &inner.waiting_readers {
                writeln!(f, "    req: {}, txn: {}", seq, fmt_txn(reader.txn.as_ref()))?;
            }
        }
        if !inner.queued_locking.is_empty() {
            writeln!(f, "   queued locking requests:")?;
            for (seq, req) in &inner.queued_locking {
                writeln!(
                    f,
                    "    active: {} req: {}, strength: {}, txn: {}",
                    req.active,
                    seq,
                    req.mode.strength(),
                    fmt_txn(req.txn.as_ref())
                )?;
            }
        }
        if let Some(seq) = inner.distinguished {
            writeln!(f, "   distinguished req: {}", seq)?;
        }
        Ok(())
    }
}

fn fmt_txn(txn: Option<&TxnMeta>) -> String {
    match txn {
        Some(txn) => txn.id.to_string(),
        None => "none".to_string(),
    }
}

/// Keeps a key in the index while the request that discovered a lock on it
/// has not scanned again
#[derive(Debug)]
pub(crate) struct NotRemovablePin {
    state: Arc<KeyLockState>,
}

impl NotRemovablePin {
    pub(crate) fn key(&self) -> &Key {
        self.state.key()
    }
}

impl Drop for NotRemovablePin {
    fn drop(&mut self) {
        let mut inner = self.state.mu.lock();
        inner.not_removable = inner.not_removable.saturating_sub(1);
    }
}
