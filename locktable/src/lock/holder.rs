// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-durability bookkeeping for a transaction's lock on one key

use serde::Serialize;

use super::strength::Strength;
use crate::error::{LockTableError, LockTableResult};
use crate::txn::{seq_is_ignored, IgnoredSeqNumRange, SeqNum};
use crate::types::Timestamp;

const NUM_STRENGTHS: usize = 4;

/// Strengths an unreplicated lock can be held with
fn check_unreplicated_strength(strength: Strength) -> LockTableResult<()> {
    match strength {
        Strength::Shared | Strength::Exclusive => Ok(()),
        other => Err(LockTableError::assertion(format!(
            "unreplicated locks cannot be held with strength {}",
            other
        ))),
    }
}

/// Unreplicated lock state: held strengths and the lowest live sequence
/// number each was acquired at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnreplicatedHolder {
    seqs: [Option<SeqNum>; NUM_STRENGTHS],
    ts: Timestamp,
}

impl UnreplicatedHolder {
    pub fn is_empty(&self) -> bool {
        self.seqs.iter().all(Option::is_none)
    }

    pub fn held(&self, strength: Strength) -> bool {
        self.seqs[strength.index()].is_some()
    }

    /// Lowest sequence number the given strength is held at
    pub fn seq(&self, strength: Strength) -> Option<SeqNum> {
        self.seqs[strength.index()]
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    pub fn highest_strength(&self) -> Option<Strength> {
        [Strength::Exclusive, Strength::Shared]
            .into_iter()
            .find(|s| self.held(*s))
    }

    /// Record an acquisition. Sequence numbers never regress; the tracked
    /// timestamp only moves forward.
    pub fn acquire(&mut self, strength: Strength, seq: SeqNum, ts: Timestamp) -> LockTableResult<()> {
        check_unreplicated_strength(strength)?;
        let slot = &mut self.seqs[strength.index()];
        match *slot {
            Some(existing) if seq < existing => {
                return Err(LockTableError::assertion(format!(
                    "cannot acquire {} lock at seq {}: already held at higher seq {}",
                    strength, seq, existing
                )));
            }
            Some(_) => {}
            None => *slot = Some(seq),
        }
        if self.ts.is_empty() {
            self.ts = ts;
        } else {
            self.ts.forward(ts);
        }
        Ok(())
    }

    /// Drop strengths whose acquiring sequence number was rolled back.
    /// Returns true if anything was released.
    pub fn rollback_ignored_seqnums(&mut self, ignored: &[IgnoredSeqNumRange]) -> bool {
        if ignored.is_empty() {
            return false;
        }
        let mut released = false;
        for slot in self.seqs.iter_mut() {
            if let Some(seq) = *slot {
                if seq_is_ignored(seq, ignored) {
                    *slot = None;
                    released = true;
                }
            }
        }
        if self.is_empty() {
            self.ts = Timestamp::default();
        }
        released
    }

    pub fn forward_ts(&mut self, ts: Timestamp) -> bool {
        !self.is_empty() && self.ts.forward(ts)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Replicated lock state: held strengths and the timestamp of the durable
/// record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicatedHolder {
    held: [bool; NUM_STRENGTHS],
    ts: Timestamp,
}

impl ReplicatedHolder {
    pub fn is_empty(&self) -> bool {
        !self.held.iter().any(|h| *h)
    }

    pub fn held(&self, strength: Strength) -> bool {
        self.held[strength.index()]
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    pub fn highest_strength(&self) -> Option<Strength> {
        [Strength::Intent, Strength::Exclusive, Strength::Shared]
            .into_iter()
            .find(|s| self.held(*s))
    }

    /// Mirror a durable write. The timestamp is taken as-is.
    pub fn acquire(&mut self, strength: Strength, ts: Timestamp) -> LockTableResult<()> {
        if !strength.is_locking() {
            return Err(LockTableError::assertion(
                "replicated lock acquired with strength None",
            ));
        }
        self.held[strength.index()] = true;
        self.ts = ts;
        Ok(())
    }

    pub fn forward_ts(&mut self, ts: Timestamp) -> bool {
        !self.is_empty() && self.ts.forward(ts)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
