// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction identity and status
//!
//! This module defines the transaction metadata the lock table attaches to
//! every held lock and the status values reported by the push machinery.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

/// Per-transaction sequence number of a write or lock acquisition
pub type SeqNum = i32;

/// Transaction restart counter
pub type Epoch = u32;

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    /// Generate a new random transaction ID
    pub fn new() -> Self {
        TxnId(Uuid::new_v4())
    }

    /// Build a deterministic ID, mostly useful in tests and scripted workloads
    pub fn from_u128(id: u128) -> Self {
        TxnId(Uuid::from_u128(id))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, enough to tell transactions apart in dumps
    pub fn short(&self) -> String {
        let full = self.0.simple().to_string();
        full[..8].to_string()
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The part of a transaction record the lock table needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnMeta {
    pub id: TxnId,
    #[serde(default)]
    pub epoch: Epoch,
    #[serde(default)]
    pub sequence: SeqNum,
    pub write_timestamp: Timestamp,
}

impl TxnMeta {
    pub fn new(id: TxnId, epoch: Epoch, sequence: SeqNum, write_timestamp: Timestamp) -> Self {
        Self {
            id,
            epoch,
            sequence,
            write_timestamp,
        }
    }
}

/// Transaction lifecycle states as seen by the push machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    /// Transaction is still running, possibly pushed to a higher timestamp
    Pending,
    /// Transaction has been committed
    Committed,
    /// Transaction has been aborted
    Aborted,
}

impl TxnStatus {
    /// Committed and aborted transactions will never change status again
    pub fn is_finalized(&self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Pending => "PENDING",
            TxnStatus::Committed => "COMMITTED",
            TxnStatus::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inclusive range of sequence numbers rolled back by a savepoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredSeqNumRange {
    pub start: SeqNum,
    pub end: SeqNum,
}

impl IgnoredSeqNumRange {
    pub fn new(start: SeqNum, end: SeqNum) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, seq: SeqNum) -> bool {
        self.start <= seq && seq <= self.end
    }
}

/// Check whether `seq` was rolled back by any of the given ranges
pub fn seq_is_ignored(seq: SeqNum, ignored: &[IgnoredSeqNumRange]) -> bool {
    ignored.iter().any(|r| r.contains(seq))
}

/// A transaction record as delivered by push results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub meta: TxnMeta,
    pub status: TxnStatus,
    #[serde(default)]
    pub read_timestamp: Timestamp,
    #[serde(default)]
    pub ignored_seqnums: Vec<IgnoredSeqNumRange>,
}

impl Transaction {
    pub fn new(meta: TxnMeta, status: TxnStatus) -> Self {
        let read_timestamp = meta.write_timestamp;
        Self {
            meta,
            status,
            read_timestamp,
            ignored_seqnums: Vec::new(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.meta.id
    }

    pub fn is_finalized(&self) -> bool {
        self.status.is_finalized()
    }
}
