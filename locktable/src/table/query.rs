// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Point-in-time lock state listings and table metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::LockTable;
use crate::lock::{Durability, Strength};
use crate::txn::{TxnMeta, TxnStatusCacheStats};
use crate::types::{Key, Span};

/// A transaction holding a lock
#[derive(Debug, Clone, Serialize)]
pub struct LockHolderInfo {
    pub txn: TxnMeta,
    pub strength: Strength,
    pub durability: Durability,
    pub held_since: DateTime<Utc>,
    pub hold_duration: Duration,
}

/// A request queued at a key
#[derive(Debug, Clone, Serialize)]
pub struct LockWaiterInfo {
    pub seq: u64,
    pub txn: Option<TxnMeta>,
    pub strength: Strength,
    /// False for claims that are not waiting
    pub active: bool,
    pub wait_duration: Duration,
}

/// Everything known about one key
#[derive(Debug, Clone, Serialize)]
pub struct LockStateInfo {
    pub key: Key,
    pub holders: Vec<LockHolderInfo>,
    pub waiters: Vec<LockWaiterInfo>,
}

/// Limits on a lock state listing; zero means unlimited
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLockTableOptions {
    pub max_locks: usize,
    pub target_bytes: usize,
    /// Also list keys nobody waits on
    pub include_uncontended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryLimitReason {
    MaxLocks,
    TargetBytes,
}

/// Where a paginated listing stopped
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResumeState {
    pub resume_key: Option<Key>,
    pub reason: Option<QueryLimitReason>,
    pub total_bytes: usize,
}

/// Aggregate lock table statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LockTableMetrics {
    /// Tracked keys
    pub locks: usize,
    pub locks_held: usize,
    pub locks_with_wait_queues: usize,
    pub waiting_readers: usize,
    pub queued_locking_requests: usize,
    pub active_locking_requests: usize,
    pub total_wait_duration: Duration,
    pub max_wait_duration: Duration,
    pub total_lock_hold_duration: Duration,
    pub max_lock_hold_duration: Duration,
    /// Times the key cap forced keys out of the table
    pub forced_clears: u64,
    pub forced_cleared_keys: u64,
    pub status_cache_finalized: usize,
    pub status_cache_pending: usize,
}

impl LockTableMetrics {
    fn with_status_cache(mut self, stats: TxnStatusCacheStats) -> Self {
        self.status_cache_finalized = stats.finalized_entries;
        self.status_cache_pending = stats.pending_entries;
        self
    }
}

fn estimated_size(info: &LockStateInfo) -> usize {
    serde_json::to_vec(info).map(|v| v.len()).unwrap_or(0)
}

impl LockTable {
    /// List lock state for keys in `span`
    ///
    /// The listing stops before the first key that would exceed a limit, and
    /// reports that key as `resume_key`. At least one key is listed when any
    /// match, even if it alone exceeds `target_bytes`.
    pub fn query_lock_table_state(
        &self,
        span: &Span,
        options: &QueryLockTableOptions,
    ) -> (Vec<LockStateInfo>, QueryResumeState) {
        let mut resume = QueryResumeState::default();
        let mut infos = Vec::new();
        let end = span.upper_bound();
        if span.key >= end {
            return (infos, resume);
        }

        let index = self.shared.index.read().clone();
        for (key, state) in index.range(span.key.clone()..end) {
            let info = match state.state_info(options.include_uncontended) {
                Some(info) => info,
                None => continue,
            };
            if options.max_locks > 0 && infos.len() >= options.max_locks {
                resume.resume_key = Some(key.clone());
                resume.reason = Some(QueryLimitReason::MaxLocks);
                break;
            }
            let size = estimated_size(&info);
            if options.target_bytes > 0
                && !infos.is_empty()
                && resume.total_bytes + size > options.target_bytes
            {
                resume.resume_key = Some(key.clone());
                resume.reason = Some(QueryLimitReason::TargetBytes);
                break;
            }
            resume.total_bytes += size;
            infos.push(info);
        }
        (infos, resume)
    }

    pub fn metrics(&self) -> LockTableMetrics {
        let index = self.shared.index.read().clone();
        let mut metrics = LockTableMetrics {
            forced_clears: self.shared.forced_clears.load(Ordering::Relaxed),
            forced_cleared_keys: self.shared.forced_cleared_keys.load(Ordering::Relaxed),
            ..LockTableMetrics::default()
        };
        for state in index.values() {
            state.collect_metrics(&mut metrics);
        }
        metrics.with_status_cache(self.shared.status_cache.stats())
    }
}
