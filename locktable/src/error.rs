// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock table error types

use thiserror::Error;

use crate::lock::Strength;
use crate::txn::TxnId;
use crate::types::Key;

/// Lock table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockTableError {
    #[error("lock promotion from {from} to {to} is not allowed on key {key}")]
    LockPromotionUnsupported { key: Key, from: Strength, to: Strength },

    #[error("lock not available: key {key} conflicts with transaction {txn}")]
    LockNotAvailable { key: Key, txn: TxnId },

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LockTableError {
    /// Invariant violations indicate a bug in the caller or in the lock
    /// table and must abort the enclosing request
    pub fn is_assertion_failure(&self) -> bool {
        matches!(self, LockTableError::AssertionFailed(_))
    }

    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("lock table assertion failed: {}", message);
        LockTableError::AssertionFailed(message)
    }
}

pub type LockTableResult<T> = Result<T, LockTableError>;
