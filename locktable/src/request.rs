// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Inputs consumed from the request-evaluation pipeline and the push machinery

use serde::{Deserialize, Serialize};

use crate::lock::{Durability, Strength, WaitPolicy, STRENGTHS_STRONGEST_FIRST};
use crate::txn::{IgnoredSeqNumRange, Transaction, TxnMeta, TxnStatus};
use crate::types::{Key, Span, Timestamp};

/// Declared spans of a request, bucketed by strength
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpans {
    #[serde(default)]
    pub intent: Vec<Span>,
    #[serde(default)]
    pub exclusive: Vec<Span>,
    #[serde(default)]
    pub shared: Vec<Span>,
    #[serde(default)]
    pub none: Vec<Span>,
}

impl LockSpans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, strength: Strength, span: Span) -> Self {
        self.add(strength, span);
        self
    }

    pub fn add(&mut self, strength: Strength, span: Span) {
        self.spans_mut(strength).push(span);
    }

    pub fn spans(&self, strength: Strength) -> &[Span] {
        match strength {
            Strength::Intent => &self.intent,
            Strength::Exclusive => &self.exclusive,
            Strength::Shared => &self.shared,
            Strength::None => &self.none,
        }
    }

    fn spans_mut(&mut self, strength: Strength) -> &mut Vec<Span> {
        match strength {
            Strength::Intent => &mut self.intent,
            Strength::Exclusive => &mut self.exclusive,
            Strength::Shared => &mut self.shared,
            Strength::None => &mut self.none,
        }
    }

    pub fn is_empty(&self) -> bool {
        STRENGTHS_STRONGEST_FIRST
            .iter()
            .all(|s| self.spans(*s).is_empty())
    }

    /// Spans in scan order: strongest strength first, declaration order within
    pub fn iter_strongest_first(&self) -> impl Iterator<Item = (Strength, &Span)> + '_ {
        STRENGTHS_STRONGEST_FIRST
            .iter()
            .flat_map(move |s| self.spans(*s).iter().map(move |span| (*s, span)))
    }
}

/// A request's declared intent to access the lock table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub txn: Option<TxnMeta>,
    pub read_timestamp: Timestamp,
    #[serde(default)]
    pub lock_spans: LockSpans,
    #[serde(default)]
    pub wait_policy: WaitPolicy,
    /// Longest wait queue the request is willing to join; zero means unbounded
    #[serde(default)]
    pub max_wait_queue_length: usize,
}

impl Request {
    pub fn new(txn: Option<TxnMeta>, read_timestamp: Timestamp, lock_spans: LockSpans) -> Self {
        Self {
            txn,
            read_timestamp,
            lock_spans,
            wait_policy: WaitPolicy::Block,
            max_wait_queue_length: 0,
        }
    }

    pub fn with_wait_policy(mut self, wait_policy: WaitPolicy) -> Self {
        self.wait_policy = wait_policy;
        self
    }

    pub fn with_max_wait_queue_length(mut self, len: usize) -> Self {
        self.max_wait_queue_length = len;
        self
    }
}

/// A lock acquired by a transaction during evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockAcquisition {
    pub txn: TxnMeta,
    pub key: Key,
    pub strength: Strength,
    pub durability: Durability,
    #[serde(default)]
    pub ignored_seqnums: Vec<IgnoredSeqNumRange>,
}

impl LockAcquisition {
    pub fn new(txn: TxnMeta, key: impl Into<Key>, strength: Strength, durability: Durability) -> Self {
        Self {
            txn,
            key: key.into(),
            strength,
            durability,
            ignored_seqnums: Vec::new(),
        }
    }

    pub fn with_ignored_seqnums(mut self, ignored: Vec<IgnoredSeqNumRange>) -> Self {
        self.ignored_seqnums = ignored;
        self
    }
}

/// A replicated lock encountered during evaluation that the table did not know
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundLock {
    pub txn: TxnMeta,
    pub key: Key,
    pub strength: Strength,
}

impl FoundLock {
    pub fn new(txn: TxnMeta, key: impl Into<Key>, strength: Strength) -> Self {
        Self {
            txn,
            key: key.into(),
            strength,
        }
    }

    /// Write timestamp of the durable lock
    pub fn ts(&self) -> Timestamp {
        self.txn.write_timestamp
    }
}

/// Outcome of a transaction applied to the locks it holds in a span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockUpdate {
    pub txn: TxnMeta,
    pub span: Span,
    pub status: TxnStatus,
    #[serde(default)]
    pub ignored_seqnums: Vec<IgnoredSeqNumRange>,
}

impl LockUpdate {
    pub fn new(txn: &Transaction, span: Span) -> Self {
        Self {
            txn: txn.meta.clone(),
            span,
            status: txn.status,
            ignored_seqnums: txn.ignored_seqnums.clone(),
        }
    }

    /// Release every lock `txn` holds in `span`
    pub fn finalized(txn: TxnMeta, span: Span, status: TxnStatus) -> Self {
        debug_assert!(status.is_finalized());
        Self {
            txn,
            span,
            status,
            ignored_seqnums: Vec::new(),
        }
    }

    /// Move the locks `txn` holds in `span` to timestamp `ts`
    pub fn pending(mut txn: TxnMeta, span: Span, ts: Timestamp) -> Self {
        txn.write_timestamp.forward(ts);
        Self {
            txn,
            span,
            status: TxnStatus::Pending,
            ignored_seqnums: Vec::new(),
        }
    }
}
