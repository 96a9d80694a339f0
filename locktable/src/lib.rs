// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! LockTable - an in-memory transactional lock table
//!
//! LockTable tracks, per key, which transactions hold locks and which
//! requests wait on them. It is meant to sit between a request-evaluation
//! pipeline and a durable MVCC store.
//!
//! # Features
//!
//! - **Four lock strengths**: non-locking reads, shared, exclusive and write intents
//! - **Two durabilities**: replicated locks mirrored in storage, unreplicated locks held only here
//! - **Fair queueing**: per-key wait queues ordered by request sequence number, which keeps
//!   local waits acyclic
//! - **Push support**: one distinguished waiter per key drives conflict resolution
//! - **Bounded memory**: a soft cap on tracked keys with forced clearing
//!
//! # Usage
//!
//! ```ignore
//! use locktable::{LockSpans, LockTable, LockTableConfig, Request, Span, Strength};
//!
//! let table = LockTable::new(LockTableConfig::default())?;
//! let req = Request::new(Some(txn), ts, LockSpans::new().with(Strength::Exclusive, Span::point("k")));
//! let mut guard = table.scan_and_enqueue(&req, None)?;
//! while guard.should_wait() {
//!     guard.signal().wait();
//!     match guard.current_state()? {
//!         WaitState::DoneWaiting => guard = table.scan_and_enqueue(&req, Some(guard))?,
//!         other => push(other),
//!     }
//! }
//! // evaluate, acquire locks, then
//! table.dequeue(guard);
//! ```

pub mod config;
pub mod error;
pub mod request;
pub mod table;
pub mod types;

pub(crate) mod lock;
pub(crate) mod txn;

pub use config::LockTableConfig;
pub use error::{LockTableError, LockTableResult};
pub use lock::{Durability, LockMode, Strength, WaitPolicy};
pub use request::{FoundLock, LockAcquisition, LockSpans, LockUpdate, Request};
pub use table::{
    ConflictInfo, LeaseEpoch, LockHolderInfo, LockStateInfo, LockTable, LockTableGuard,
    LockTableMetrics, LockWaiterInfo, QueryLimitReason, QueryLockTableOptions, QueryResumeState,
    WaitSignal, WaitState,
};
pub use txn::{
    seq_is_ignored, Epoch, IgnoredSeqNumRange, SeqNum, Transaction, TxnId, TxnMeta, TxnStatus,
    TxnStatusCacheStats,
};
pub use types::{Key, Span, Timestamp};

/// LockTable version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// LockTable crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
