// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction metadata consumed by the lock table
//!
//! The lock table never resolves transactions itself. It only needs to know
//! who owns each lock and, when available, the last outcome reported by the
//! push machinery.

pub mod state;
pub mod status_cache;

pub use state::{
    seq_is_ignored, Epoch, IgnoredSeqNumRange, SeqNum, Transaction, TxnId, TxnMeta, TxnStatus,
};
pub use status_cache::{TxnStatusCache, TxnStatusCacheStats};
