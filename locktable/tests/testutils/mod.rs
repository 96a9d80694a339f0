//! Test utilities for lock table integration tests
//!
//! `TableFixture` wraps a lock table built from the testing preset and hands
//! out transactions with stable ids, so tests can talk about "txn 1" and
//! "txn 2" instead of random uuids.

#![allow(dead_code)]

use locktable::{
    Durability, FoundLock, Key, LockAcquisition, LockSpans, LockTable, LockTableConfig,
    LockTableGuard, LockUpdate, Request, Span, Strength, Timestamp, Transaction, TxnId, TxnMeta,
    TxnStatus, WaitState,
};
use std::time::Duration;

/// Install a test logger once; later calls are no-ops
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn ts(wall_time: i64) -> Timestamp {
    Timestamp::new(wall_time, 0)
}

/// Transaction `id` at epoch 0 writing at `wall_time`
pub fn txn(id: u128, wall_time: i64) -> TxnMeta {
    TxnMeta::new(TxnId::from_u128(id), 0, 1, ts(wall_time))
}

pub fn spans(strength: Strength, keys: &[&str]) -> LockSpans {
    let mut spans = LockSpans::new();
    for key in keys {
        spans.add(strength, Span::point(*key));
    }
    spans
}

pub fn locking_request(txn: &TxnMeta, strength: Strength, keys: &[&str]) -> Request {
    Request::new(Some(txn.clone()), txn.write_timestamp, spans(strength, keys))
}

pub fn read_request(txn: Option<&TxnMeta>, read_ts: i64, keys: &[&str]) -> Request {
    Request::new(txn.cloned(), ts(read_ts), spans(Strength::None, keys))
}

pub struct TableFixture {
    pub table: LockTable,
}

impl TableFixture {
    pub fn new() -> Self {
        Self::with_config(LockTableConfig::for_testing())
    }

    pub fn with_config(config: LockTableConfig) -> Self {
        init_logger();
        let table = LockTable::new(config).expect("testing config is valid");
        Self { table }
    }

    pub fn acquire(&self, txn: &TxnMeta, key: &str, strength: Strength, durability: Durability) {
        self.table
            .acquire_lock(&LockAcquisition::new(txn.clone(), key, strength, durability))
            .expect("acquire_lock failed");
    }

    pub fn acquire_unreplicated(&self, txn: &TxnMeta, key: &str, strength: Strength) {
        self.acquire(txn, key, strength, Durability::Unreplicated)
    }

    pub fn scan(&self, req: &Request) -> LockTableGuard {
        self.table
            .scan_and_enqueue(req, None)
            .expect("scan_and_enqueue failed")
    }

    pub fn rescan(&self, req: &Request, guard: LockTableGuard) -> LockTableGuard {
        self.table
            .scan_and_enqueue(req, Some(guard))
            .expect("scan_and_enqueue failed")
    }

    pub fn discover(&self, guard: &mut LockTableGuard, txn: &TxnMeta, key: &str) -> bool {
        self.table
            .add_discovered_lock(
                &FoundLock::new(txn.clone(), key, Strength::Intent),
                self.table.lease_epoch(),
                guard,
                true,
            )
            .expect("add_discovered_lock failed")
    }

    pub fn finalize(&self, txn: &TxnMeta, key: &str, status: TxnStatus) {
        self.table
            .update_locks(&LockUpdate::finalized(txn.clone(), Span::point(key), status));
    }

    pub fn mark_finalized(&self, txn: &TxnMeta, status: TxnStatus) {
        self.table
            .transaction_is_finalized(&Transaction::new(txn.clone(), status));
    }

    pub fn dump(&self) -> String {
        self.table.to_string()
    }
}

/// Current wait state, panicking on error
pub fn state(guard: &mut LockTableGuard) -> WaitState {
    guard.current_state().expect("current_state failed")
}

/// Consume a pending wake-up, failing the test if none arrives
pub fn expect_signal(guard: &LockTableGuard) {
    assert!(
        guard.signal().wait_timeout(Duration::from_secs(5)),
        "request {} was never signaled",
        guard.seq_num()
    );
}

pub fn key(k: &str) -> Key {
    Key::from(k)
}
