// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lock strengths and the per-transaction lock records held on a key

pub mod holder;
pub mod strength;
pub mod txn_lock;

pub use strength::{Durability, LockMode, Strength, WaitPolicy, STRENGTHS_STRONGEST_FIRST};
pub use txn_lock::TxnLock;
