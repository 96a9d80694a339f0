// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! A single transaction's lock on a single key
//!
//! Aggregates the replicated and unreplicated holder records and applies the
//! epoch and sequence-number rules when the lock is re-acquired or updated.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use super::holder::{ReplicatedHolder, UnreplicatedHolder};
use super::strength::{Durability, LockMode, Strength};
use crate::error::{LockTableError, LockTableResult};
use crate::request::{FoundLock, LockAcquisition, LockUpdate};
use crate::txn::{TxnId, TxnMeta};
use crate::types::Timestamp;

/// Transaction lock entry held in a key's holder list
#[derive(Debug, Clone)]
pub struct TxnLock {
    txn: TxnMeta,
    unreplicated: UnreplicatedHolder,
    replicated: ReplicatedHolder,
    held_since: Instant,
    held_since_wall: DateTime<Utc>,
}

impl TxnLock {
    pub fn new(txn: TxnMeta) -> Self {
        Self {
            txn,
            unreplicated: UnreplicatedHolder::default(),
            replicated: ReplicatedHolder::default(),
            held_since: Instant::now(),
            held_since_wall: Utc::now(),
        }
    }

    pub fn txn(&self) -> &TxnMeta {
        &self.txn
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn.id
    }

    pub fn unreplicated(&self) -> &UnreplicatedHolder {
        &self.unreplicated
    }

    pub fn replicated(&self) -> &ReplicatedHolder {
        &self.replicated
    }

    pub fn is_held(&self) -> bool {
        self.is_held_replicated() || self.is_held_unreplicated()
    }

    pub fn is_held_replicated(&self) -> bool {
        !self.replicated.is_empty()
    }

    pub fn is_held_unreplicated(&self) -> bool {
        !self.unreplicated.is_empty()
    }

    /// Durability reported in listings: replicated wins when both are held
    pub fn durability(&self) -> Durability {
        if self.is_held_replicated() {
            Durability::Replicated
        } else {
            Durability::Unreplicated
        }
    }

    /// Strongest strength held across both durabilities
    pub fn highest_strength(&self) -> Strength {
        let repl = self.replicated.highest_strength();
        let unrepl = self.unreplicated.highest_strength();
        repl.max(unrepl).unwrap_or(Strength::None)
    }

    /// The lowest timestamp the lock is held at across both durabilities
    pub fn write_ts(&self) -> Timestamp {
        match (self.is_held_replicated(), self.is_held_unreplicated()) {
            (true, true) => {
                let mut ts = self.replicated.ts();
                ts.backward(self.unreplicated.ts());
                ts
            }
            (true, false) => self.replicated.ts(),
            (false, true) => self.unreplicated.ts(),
            (false, false) => self.txn.write_timestamp,
        }
    }

    /// Effective mode of the lock, as seen by other transactions
    pub fn mode(&self) -> LockMode {
        LockMode::new(self.highest_strength(), self.write_ts())
    }

    pub fn hold_duration(&self) -> Duration {
        self.held_since.elapsed()
    }

    pub fn held_since(&self) -> DateTime<Utc> {
        self.held_since_wall
    }

    /// Apply an acquisition by the owning transaction
    ///
    /// A newer epoch discards the unreplicated sequence tracking of the old
    /// one. An unreplicated acquisition from an older epoch is an ordering
    /// violation upstream.
    pub fn reacquire(&mut self, acq: &LockAcquisition) -> LockTableResult<()> {
        if acq.txn.id != self.txn.id {
            return Err(LockTableError::assertion(format!(
                "lock for txn {} re-acquired by txn {}",
                self.txn.id, acq.txn.id
            )));
        }

        if acq.txn.epoch < self.txn.epoch {
            if acq.durability == Durability::Unreplicated {
                return Err(LockTableError::assertion(format!(
                    "unreplicated lock on txn {} acquired at epoch {} after epoch {}",
                    self.txn.id, acq.txn.epoch, self.txn.epoch
                )));
            }
            // A durable write from an old epoch: mirror it without touching
            // the newer epoch's unreplicated state.
            return self.replicated.acquire(acq.strength, acq.txn.write_timestamp);
        }

        if acq.txn.epoch > self.txn.epoch {
            self.unreplicated.clear();
        } else {
            self.unreplicated
                .rollback_ignored_seqnums(&acq.ignored_seqnums);
        }

        match acq.durability {
            Durability::Unreplicated => {
                self.unreplicated
                    .acquire(acq.strength, acq.txn.sequence, acq.txn.write_timestamp)?;
            }
            Durability::Replicated => {
                self.replicated
                    .acquire(acq.strength, acq.txn.write_timestamp)?;
            }
        }

        let mut txn = acq.txn.clone();
        if txn.epoch == self.txn.epoch {
            txn.write_timestamp.forward(self.txn.write_timestamp);
        }
        self.txn = txn;
        Ok(())
    }

    /// Mirror a replicated lock found in durable storage
    pub fn discovered(&mut self, found: &FoundLock) -> LockTableResult<()> {
        if found.txn.epoch > self.txn.epoch {
            self.unreplicated.clear();
            self.txn = found.txn.clone();
        }
        self.replicated.acquire(found.strength, found.ts())
    }

    /// Apply a pending-status update
    ///
    /// Returns true if the visible state of the lock changed (released
    /// strengths or a moved timestamp).
    pub fn update_pending(&mut self, up: &LockUpdate) -> bool {
        let before_strength = self.highest_strength();
        let before_ts = self.write_ts();

        if up.txn.epoch > self.txn.epoch {
            // Locks from an older epoch are not carried into the new one; a
            // durable intent from the old epoch is removed on resolution.
            self.unreplicated.clear();
            self.replicated.clear();
        } else {
            self.unreplicated
                .rollback_ignored_seqnums(&up.ignored_seqnums);
            self.unreplicated.forward_ts(up.txn.write_timestamp);
            self.replicated.forward_ts(up.txn.write_timestamp);
        }

        if up.txn.epoch >= self.txn.epoch {
            let mut txn = up.txn.clone();
            txn.write_timestamp.forward(self.txn.write_timestamp);
            self.txn = txn;
        }

        self.highest_strength() != before_strength || self.write_ts() != before_ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{IgnoredSeqNumRange, TxnStatus};
    use crate::types::{Key, Span};

    fn meta(epoch: u32, seq: i32, ts: i64) -> TxnMeta {
        TxnMeta::new(TxnId::from_u128(7), epoch, seq, Timestamp::new(ts, 0))
    }

    fn acq(epoch: u32, seq: i32, ts: i64, strength: Strength, dur: Durability) -> LockAcquisition {
        LockAcquisition::new(meta(epoch, seq, ts), Key::from("k"), strength, dur)
    }

    #[test]
    fn test_reacquire_same_epoch_keeps_lowest_seq() {
        let mut lock = TxnLock::new(meta(0, 5, 10));
        lock.reacquire(&acq(0, 5, 10, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();
        lock.reacquire(&acq(0, 9, 12, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();
        assert_eq!(lock.unreplicated().seq(Strength::Exclusive), Some(5));
        assert_eq!(lock.write_ts(), Timestamp::new(12, 0));
    }

    #[test]
    fn test_reacquire_newer_epoch_clears_seq_tracking() {
        let mut lock = TxnLock::new(meta(0, 5, 10));
        lock.reacquire(&acq(0, 5, 10, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();
        lock.reacquire(&acq(1, 2, 10, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();
        assert_eq!(lock.unreplicated().seq(Strength::Exclusive), Some(2));
        assert_eq!(lock.txn().epoch, 1);
        assert_eq!(lock.write_ts(), Timestamp::new(10, 0));
    }

    #[test]
    fn test_reacquire_older_epoch_unreplicated_fails() {
        let mut lock = TxnLock::new(meta(2, 1, 10));
        lock.reacquire(&acq(2, 1, 10, Strength::Shared, Durability::Unreplicated))
            .unwrap();
        let err = lock
            .reacquire(&acq(1, 1, 10, Strength::Shared, Durability::Unreplicated))
            .unwrap_err();
        assert!(err.is_assertion_failure());
    }

    #[test]
    fn test_reacquire_prunes_rolled_back_seqs() {
        let mut lock = TxnLock::new(meta(0, 3, 10));
        lock.reacquire(&acq(0, 3, 10, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();
        let again = acq(0, 8, 10, Strength::Exclusive, Durability::Unreplicated)
            .with_ignored_seqnums(vec![IgnoredSeqNumRange::new(2, 4)]);
        lock.reacquire(&again).unwrap();
        assert_eq!(lock.unreplicated().seq(Strength::Exclusive), Some(8));
    }

    #[test]
    fn test_replicated_after_unreplicated_can_lower_write_ts() {
        let mut lock = TxnLock::new(meta(0, 1, 20));
        lock.reacquire(&acq(0, 1, 20, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();
        lock.reacquire(&acq(0, 2, 15, Strength::Intent, Durability::Replicated))
            .unwrap();
        assert_eq!(lock.highest_strength(), Strength::Intent);
        assert_eq!(lock.write_ts(), Timestamp::new(15, 0));
        assert_eq!(lock.durability(), Durability::Replicated);
    }

    #[test]
    fn test_update_pending_forwards_and_new_epoch_releases() {
        let mut lock = TxnLock::new(meta(0, 1, 10));
        lock.reacquire(&acq(0, 1, 10, Strength::Exclusive, Durability::Unreplicated))
            .unwrap();

        let pushed = LockUpdate::pending(meta(0, 1, 10), Span::point("k"), Timestamp::new(30, 0));
        assert!(lock.update_pending(&pushed));
        assert_eq!(lock.write_ts(), Timestamp::new(30, 0));

        let restarted = LockUpdate {
            txn: meta(1, 0, 30),
            span: Span::point("k"),
            status: TxnStatus::Pending,
            ignored_seqnums: vec![],
        };
        assert!(lock.update_pending(&restarted));
        assert!(!lock.is_held());
    }
}
