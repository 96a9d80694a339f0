// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Request guards and wait states
//!
//! A [`LockTableGuard`] is handed out by [`LockTable::scan_and_enqueue`] and
//! owned by the request. It remembers where the request's scan over its
//! declared spans stopped, so that after a wake-up the scan resumes at the key
//! it was waiting on instead of starting over.
//!
//! The part of the guard that key states need to reach (sequence number, wait
//! state, wake-up signal) lives in a separate [`GuardShared`] record. Key
//! states hold only weak references to it, and the guard holds only weak
//! references back to the keys it is queued at.
//!
//! [`LockTable::scan_and_enqueue`]: super::LockTable::scan_and_enqueue

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use super::key_state::{KeyLockState, KeyScan, NotRemovablePin, Resolutions};
use super::signal::WaitSignal;
use super::{KeyIndex, TableShared};
use crate::error::{LockTableError, LockTableResult};
use crate::lock::{Strength, WaitPolicy, STRENGTHS_STRONGEST_FIRST};
use crate::request::{LockSpans, LockUpdate, Request};
use crate::txn::TxnMeta;
use crate::types::{Key, Timestamp};

/// Who a waiting request is waiting for, and how crowded the key is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictInfo {
    /// Transaction holding or claiming the key
    pub txn: TxnMeta,
    pub key: Key,
    /// True if `txn` holds the lock, false if it only claims it
    pub held: bool,
    /// Strength the waiting request needs at `key`
    pub guard_strength: Strength,
    pub queued_locking_requests: usize,
    pub queued_readers: usize,
}

/// What a request should do next
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitState {
    /// Nothing left to wait for; re-scan and evaluate
    DoneWaiting,
    /// Waiting behind another transaction
    WaitFor(ConflictInfo),
    /// Waiting behind another transaction and responsible for pushing it
    WaitForDistinguished(ConflictInfo),
    /// Waiting behind a request of the same transaction
    WaitSelf { key: Key },
    /// The lock table stopped tracking the key; push `txn` directly
    WaitElsewhere { txn: TxnMeta, key: Key, held: bool },
    /// The key's wait queue is longer than the request tolerates
    QueueLengthExceeded { key: Key, max_len: usize },
}

impl WaitState {
    pub fn kind(&self) -> &'static str {
        match self {
            WaitState::DoneWaiting => "done_waiting",
            WaitState::WaitFor(_) => "wait_for",
            WaitState::WaitForDistinguished(_) => "wait_for_distinguished",
            WaitState::WaitSelf { .. } => "wait_self",
            WaitState::WaitElsewhere { .. } => "wait_elsewhere",
            WaitState::QueueLengthExceeded { .. } => "queue_length_exceeded",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, WaitState::DoneWaiting)
    }

    /// The key the request is waiting at, if any
    pub fn key(&self) -> Option<&Key> {
        match self {
            WaitState::DoneWaiting => None,
            WaitState::WaitFor(info) | WaitState::WaitForDistinguished(info) => Some(&info.key),
            WaitState::WaitSelf { key }
            | WaitState::WaitElsewhere { key, .. }
            | WaitState::QueueLengthExceeded { key, .. } => Some(key),
        }
    }

    /// The transaction the request is blocked on, if any
    pub fn conflicting_txn(&self) -> Option<&TxnMeta> {
        match self {
            WaitState::WaitFor(info) | WaitState::WaitForDistinguished(info) => Some(&info.txn),
            WaitState::WaitElsewhere { txn, .. } => Some(txn),
            _ => None,
        }
    }

    /// Translate a conflict into the error reported to requests that do not
    /// wait
    pub fn into_lock_not_available(self) -> Option<LockTableError> {
        match self {
            WaitState::WaitFor(info) | WaitState::WaitForDistinguished(info) => {
                Some(LockTableError::LockNotAvailable {
                    key: info.key,
                    txn: info.txn.id,
                })
            }
            WaitState::WaitElsewhere { txn, key, .. } => {
                Some(LockTableError::LockNotAvailable { key, txn: txn.id })
            }
            _ => None,
        }
    }
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitState::DoneWaiting => write!(f, "done waiting"),
            WaitState::WaitFor(info) | WaitState::WaitForDistinguished(info) => write!(
                f,
                "{} txn {} at key {} (held: {}, queued: {}, readers: {})",
                self.kind(),
                info.txn.id,
                info.key,
                info.held,
                info.queued_locking_requests,
                info.queued_readers
            ),
            WaitState::WaitSelf { key } => write!(f, "wait_self at key {}", key),
            WaitState::WaitElsewhere { txn, key, held } => write!(
                f,
                "wait_elsewhere txn {} at key {} (held: {})",
                txn.id, key, held
            ),
            WaitState::QueueLengthExceeded { key, max_len } => write!(
                f,
                "queue_length_exceeded at key {} (max: {})",
                key, max_len
            ),
        }
    }
}

#[derive(Debug)]
struct GuardMu {
    start_wait: bool,
    must_compute_wait_state: bool,
    state: WaitState,
    /// Keys whose queues reference this guard
    locks: HashMap<Key, Weak<KeyLockState>>,
}

/// The part of a guard visible to key states
#[derive(Debug)]
pub(crate) struct GuardShared {
    pub(crate) seq: u64,
    mu: Mutex<GuardMu>,
    signal: Arc<WaitSignal>,
}

impl GuardShared {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            mu: Mutex::new(GuardMu {
                start_wait: false,
                must_compute_wait_state: false,
                state: WaitState::DoneWaiting,
                locks: HashMap::new(),
            }),
            signal: Arc::new(WaitSignal::new()),
        }
    }

    /// Set a new wait state, waking the request if it changed
    pub(crate) fn update_state(&self, state: WaitState) {
        let mut mu = self.mu.lock();
        if mu.state != state {
            mu.state = state;
            drop(mu);
            self.signal.notify();
        }
    }

    /// The request must wait, in the given state
    pub(crate) fn wait_with(&self, state: WaitState) {
        self.mu.lock().start_wait = true;
        self.update_state(state);
    }

    pub(crate) fn mark_start_wait(&self) {
        self.mu.lock().start_wait = true;
    }

    /// The request stopped actively waiting at some key; it recomputes its
    /// state lazily on the next `current_state` call
    pub(crate) fn done_actively_waiting(&self) {
        self.mu.lock().must_compute_wait_state = true;
        self.signal.notify();
    }

    /// The key stopped tracking this request entirely
    pub(crate) fn terminate_wait(&self, key: &Key, state: WaitState) {
        let mut mu = self.mu.lock();
        mu.locks.remove(key);
        mu.must_compute_wait_state = false;
        mu.state = state;
        drop(mu);
        self.signal.notify();
    }

    pub(crate) fn remember_key(&self, key: &Key, state: Weak<KeyLockState>) {
        let mut mu = self.mu.lock();
        if !mu.locks.contains_key(key) {
            mu.locks.insert(key.clone(), state);
        }
    }

    pub(crate) fn forget_key(&self, key: &Key) {
        self.mu.lock().locks.remove(key);
    }

    fn finish_waiting(&self, notify: bool) {
        let mut mu = self.mu.lock();
        mu.state = WaitState::DoneWaiting;
        drop(mu);
        if notify {
            self.signal.notify();
        }
    }

    fn drain_keys(&self) -> Vec<(Key, Weak<KeyLockState>)> {
        self.mu.lock().locks.drain().collect()
    }
}

/// Position of a scan within the request's declared spans
#[derive(Debug, Clone, Default)]
struct ScanCursor {
    strength_idx: usize,
    span_idx: usize,
    /// Key to resume at within the current span
    key: Option<Key>,
}

/// Per-request handle into the lock table
///
/// Dropping the guard removes it from every key it is queued at, the same as
/// [`LockTable::dequeue`](super::LockTable::dequeue).
#[derive(Debug)]
pub struct LockTableGuard {
    shared: Arc<GuardShared>,
    table: Arc<TableShared>,
    txn: Option<TxnMeta>,
    read_ts: Timestamp,
    spans: LockSpans,
    wait_policy: WaitPolicy,
    max_wait_queue_length: usize,
    snapshot: Option<KeyIndex>,
    cursor: ScanCursor,
    resolutions: Resolutions,
    to_resolve: Vec<LockUpdate>,
    discovered: Vec<LockUpdate>,
    pin: Option<NotRemovablePin>,
}

impl LockTableGuard {
    pub(crate) fn new(table: Arc<TableShared>, seq: u64, req: &Request) -> Self {
        Self {
            shared: Arc::new(GuardShared::new(seq)),
            table,
            txn: req.txn.clone(),
            read_ts: req.read_timestamp,
            spans: req.lock_spans.clone(),
            wait_policy: req.wait_policy,
            max_wait_queue_length: req.max_wait_queue_length,
            snapshot: None,
            cursor: ScanCursor::default(),
            resolutions: Resolutions::default(),
            to_resolve: Vec::new(),
            discovered: Vec::new(),
            pin: None,
        }
    }

    /// Prepare for a fresh scan on re-entry. The sequence number and the
    /// queue positions the guard already holds are kept.
    pub(crate) fn reset(&mut self, req: &Request) {
        self.txn = req.txn.clone();
        self.read_ts = req.read_timestamp;
        self.spans = req.lock_spans.clone();
        self.wait_policy = req.wait_policy;
        self.max_wait_queue_length = req.max_wait_queue_length;
        self.cursor = ScanCursor::default();
        self.resolutions = Resolutions::default();
        self.to_resolve.clear();
        {
            let mut mu = self.shared.mu.lock();
            mu.start_wait = false;
            mu.must_compute_wait_state = false;
            mu.state = WaitState::DoneWaiting;
        }
        self.shared.signal.try_take();
    }

    pub(crate) fn set_snapshot(&mut self, snapshot: Option<KeyIndex>) {
        self.snapshot = snapshot;
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> Option<&KeyIndex> {
        self.snapshot.as_ref()
    }

    pub(crate) fn shared(&self) -> &Arc<GuardShared> {
        &self.shared
    }

    pub(crate) fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    /// Strongest strength this request declared for `key`
    pub(crate) fn strength_for(&self, key: &Key) -> Strength {
        self.spans
            .iter_strongest_first()
            .find(|(_, span)| span.contains_key(key))
            .map(|(strength, _)| strength)
            .unwrap_or(Strength::None)
    }

    pub(crate) fn key_scan(&self, strength: Strength) -> KeyScan<'_> {
        KeyScan {
            guard: &self.shared,
            txn: self.txn.as_ref(),
            read_ts: self.read_ts,
            strength,
            wait_policy: self.wait_policy,
            max_wait_queue_length: self.max_wait_queue_length,
        }
    }

    pub(crate) fn push_discovered(&mut self, update: LockUpdate) {
        let duplicate = self
            .discovered
            .iter()
            .any(|u| u.txn.id == update.txn.id && u.span == update.span);
        if !duplicate {
            self.discovered.push(update);
        }
    }

    /// Install a not-removable pin, returning the key of the pin it replaced
    pub(crate) fn set_pin(&mut self, pin: NotRemovablePin) -> Option<Key> {
        let previous = self.pin.replace(pin);
        previous.map(|old| {
            let key = old.key().clone();
            drop(old);
            key
        })
    }

    /// Continue the scan from the cursor until the request has to wait or
    /// every declared span has been visited
    pub(crate) fn resume_scan(&mut self, notify: bool) -> LockTableResult<()> {
        let snapshot = match &self.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => {
                self.shared.finish_waiting(notify);
                return Ok(());
            }
        };

        let mut emptied = Vec::new();
        while self.cursor.strength_idx < STRENGTHS_STRONGEST_FIRST.len() {
            let strength = STRENGTHS_STRONGEST_FIRST[self.cursor.strength_idx];
            let spans = self.spans.spans(strength);
            while self.cursor.span_idx < spans.len() {
                let span = &spans[self.cursor.span_idx];
                let start = self.cursor.key.clone().unwrap_or_else(|| span.key.clone());
                let end = span.upper_bound();
                if start < end {
                    for (key, state) in snapshot.range(start..end) {
                        self.cursor.key = Some(key.clone());
                        let visit = KeyScan {
                            guard: &self.shared,
                            txn: self.txn.as_ref(),
                            read_ts: self.read_ts,
                            strength,
                            wait_policy: self.wait_policy,
                            max_wait_queue_length: self.max_wait_queue_length,
                        };
                        let outcome = match state.scan_and_maybe_enqueue(
                            &visit,
                            &self.table.status_cache,
                            &mut self.resolutions,
                        ) {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                self.table.try_gc_keys(&emptied);
                                return Err(e);
                            }
                        };
                        if outcome.emptied {
                            emptied.push(key.clone());
                        }
                        if outcome.wait {
                            self.table.try_gc_keys(&emptied);
                            return Ok(());
                        }
                    }
                }
                self.cursor.key = None;
                self.cursor.span_idx += 1;
            }
            self.cursor.span_idx = 0;
            self.cursor.strength_idx += 1;
        }

        self.table.try_gc_keys(&emptied);
        self.shared.finish_waiting(notify);
        Ok(())
    }

    /// Apply resolutions of unreplicated locks found during the scan
    pub(crate) fn flush_unreplicated(&mut self) {
        let updates = std::mem::take(&mut self.resolutions.unreplicated);
        for update in &updates {
            self.table.update_locks_internal(update);
        }
    }

    /// Settle what the caller must resolve and drop the discovery pin
    pub(crate) fn finish_scan(&mut self) {
        self.flush_unreplicated();

        let replicated = std::mem::take(&mut self.resolutions.replicated);
        let table = &self.table;
        let mut to_resolve: Vec<LockUpdate> = replicated
            .into_iter()
            .filter(|up| table.is_held_by(&up.span.key, up.txn.id))
            .collect();
        for update in self.discovered.drain(..) {
            let duplicate = to_resolve
                .iter()
                .any(|u| u.txn.id == update.txn.id && u.span == update.span);
            if !duplicate {
                to_resolve.push(update);
            }
        }
        self.to_resolve = to_resolve;

        if let Some(pin) = self.pin.take() {
            let key = pin.key().clone();
            drop(pin);
            self.table.try_gc_keys(&[key]);
        }
    }

    fn release(&mut self) {
        let mut emptied = Vec::new();
        for (key, state) in self.shared.drain_keys() {
            if let Some(state) = state.upgrade() {
                if state.remove_guard(self.shared.seq) {
                    emptied.push(key);
                }
            }
        }
        if let Some(pin) = self.pin.take() {
            emptied.push(pin.key().clone());
            drop(pin);
        }
        self.flush_unreplicated();
        self.table.try_gc_keys(&emptied);
    }

    /// Sequence number assigned when the guard was created
    pub fn seq_num(&self) -> u64 {
        self.shared.seq
    }

    pub fn txn(&self) -> Option<&TxnMeta> {
        self.txn.as_ref()
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait_policy
    }

    /// Whether the request must drop its latches and wait, or resolve
    /// replicated locks before evaluating
    pub fn should_wait(&self) -> bool {
        self.shared.mu.lock().start_wait || !self.to_resolve.is_empty()
    }

    /// Wake-up signal fired whenever the wait state may have changed
    pub fn signal(&self) -> Arc<WaitSignal> {
        Arc::clone(&self.shared.signal)
    }

    /// The current wait state, resuming the scan first if a key released
    /// this request
    ///
    /// On error the caller must dequeue the guard.
    pub fn current_state(&mut self) -> LockTableResult<WaitState> {
        let must_compute = {
            let mut mu = self.shared.mu.lock();
            std::mem::replace(&mut mu.must_compute_wait_state, false)
        };
        if must_compute {
            self.resume_scan(false)?;
            self.flush_unreplicated();
        }
        Ok(self.shared.mu.lock().state.clone())
    }

    /// Lock updates that must be applied before the request scans again
    pub fn resolve_before_scanning(&self) -> &[LockUpdate] {
        &self.to_resolve
    }

    /// For skip-locked requests: the transaction holding or claiming `key`
    /// in a way that conflicts with `strength`, if any
    pub fn is_key_locked_by_conflicting_txn(
        &self,
        key: &Key,
        strength: Strength,
    ) -> LockTableResult<Option<TxnMeta>> {
        let state = match self.snapshot.as_ref().and_then(|s| s.get(key)) {
            Some(state) => state,
            None => return Ok(None),
        };
        state.locked_by_conflicting_txn(self.txn.as_ref().map(|t| t.id), strength, self.read_ts)
    }

    /// For optimistic evaluation: true if none of the spans the request
    /// actually touched conflict with a held lock
    pub fn check_optimistic_no_conflicts(&self, spans: &LockSpans) -> bool {
        let snapshot = match &self.snapshot {
            Some(snapshot) => snapshot,
            None => return true,
        };
        let txn_id = self.txn.as_ref().map(|t| t.id);
        for (strength, span) in spans.iter_strongest_first() {
            let end = span.upper_bound();
            if span.key >= end {
                continue;
            }
            for (_, state) in snapshot.range(span.key.clone()..end) {
                if state.has_optimistic_conflict(txn_id, strength, self.read_ts) {
                    return false;
                }
            }
        }
        true
    }
}

impl Drop for LockTableGuard {
    fn drop(&mut self) {
        self.release();
    }
}
