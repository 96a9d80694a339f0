// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Workload script format
//!
//! A script declares named transactions and a list of steps. Steps refer to
//! transactions and request guards by name, so a script reads like a
//! timeline:
//!
//! ```json
//! {
//!   "txns": [{"name": "t1", "ts": 10}, {"name": "t2", "ts": 12}],
//!   "steps": [
//!     {"op": "acquire", "txn": "t1", "key": "a", "strength": "exclusive"},
//!     {"op": "scan", "guard": "r2", "txn": "t2",
//!      "spans": [{"strength": "exclusive", "key": "a"}]},
//!     {"op": "update", "txn": "t1", "key": "a", "status": "committed"},
//!     {"op": "state", "guard": "r2"}
//!   ]
//! }
//! ```

use locktable::{Durability, Strength, TxnStatus, WaitPolicy};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub txns: Vec<TxnDecl>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read script {}: {}", path.display(), e))?;
        Self::from_json(&raw).map_err(|e| format!("invalid script {}: {}", path.display(), e).into())
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A transaction the script refers to by name
#[derive(Debug, Clone, Deserialize)]
pub struct TxnDecl {
    pub name: String,
    /// Write timestamp, wall time only
    pub ts: i64,
    #[serde(default)]
    pub epoch: u32,
    #[serde(default)]
    pub seq: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpanDecl {
    pub strength: Strength,
    pub key: String,
    #[serde(default)]
    pub end_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Scan (or re-scan, if the guard exists) a request's spans
    Scan {
        guard: String,
        #[serde(default)]
        txn: Option<String>,
        /// Read timestamp; defaults to the transaction's write timestamp
        #[serde(default)]
        ts: Option<i64>,
        spans: Vec<SpanDecl>,
        #[serde(default)]
        wait_policy: WaitPolicy,
        #[serde(default)]
        max_wait_queue_length: usize,
    },
    /// Report a guard's current wait state
    State { guard: String },
    Acquire {
        txn: String,
        key: String,
        strength: Strength,
        #[serde(default = "default_durability")]
        durability: Durability,
        /// Overrides the declared epoch and sequence number
        #[serde(default)]
        epoch: Option<u32>,
        #[serde(default)]
        seq: Option<i32>,
    },
    /// Report a replicated lock found during a guard's evaluation
    Discover {
        guard: String,
        txn: String,
        key: String,
        #[serde(default = "default_discovered_strength")]
        strength: Strength,
        #[serde(default)]
        lease_epoch: Option<u64>,
        #[serde(default = "default_true")]
        consult_status_cache: bool,
    },
    /// Apply a transaction outcome to its locks in a span
    Update {
        txn: String,
        key: String,
        #[serde(default)]
        end_key: Option<String>,
        status: TxnStatus,
        /// New write timestamp for pending updates
        #[serde(default)]
        ts: Option<i64>,
        #[serde(default)]
        epoch: Option<u32>,
    },
    /// Record a push that moved a pending transaction's timestamp
    Pushed { txn: String, ts: i64 },
    /// Record a transaction outcome in the status cache only
    Finalized { txn: String, status: TxnStatus },
    Dequeue { guard: String },
    Enable { lease_epoch: u64 },
    Clear {
        #[serde(default)]
        disable: bool,
    },
    Query {
        key: String,
        #[serde(default)]
        end_key: Option<String>,
        #[serde(default)]
        max_locks: usize,
        #[serde(default)]
        target_bytes: usize,
        #[serde(default)]
        include_uncontended: bool,
    },
    Metrics,
    Dump,
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Scan { .. } => "scan",
            Step::State { .. } => "state",
            Step::Acquire { .. } => "acquire",
            Step::Discover { .. } => "discover",
            Step::Update { .. } => "update",
            Step::Pushed { .. } => "pushed",
            Step::Finalized { .. } => "finalized",
            Step::Dequeue { .. } => "dequeue",
            Step::Enable { .. } => "enable",
            Step::Clear { .. } => "clear",
            Step::Query { .. } => "query",
            Step::Metrics => "metrics",
            Step::Dump => "dump",
        }
    }
}

fn default_durability() -> Durability {
    Durability::Unreplicated
}

fn default_discovered_strength() -> Strength {
    Strength::Intent
}

fn default_true() -> bool {
    true
}
