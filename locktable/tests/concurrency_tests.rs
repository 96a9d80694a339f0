//! Multi-threaded and async waiting
//!
//! Worker threads serialize scan-then-acquire behind a single latch, the way
//! a request's latches would, and wait for locks with the latch released.

#[path = "testutils/mod.rs"]
mod testutils;

use locktable::{
    Durability, LockAcquisition, LockSpans, LockTable, LockTableConfig, LockUpdate, Request,
    Span, Strength, TxnId, TxnMeta, TxnStatus, WaitState,
};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use testutils::{init_logger, locking_request, state, ts, txn};

const KEYS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn random_request(id: u128, rng: &mut fastrand::Rng) -> (TxnMeta, Request) {
    let meta = TxnMeta::new(TxnId::from_u128(id), 0, 1, ts(rng.i64(1..100)));
    let mut spans = LockSpans::new();
    let count = rng.usize(1..=3);
    let mut keys: Vec<&str> = KEYS.to_vec();
    rng.shuffle(&mut keys);
    for k in keys.into_iter().take(count) {
        let strength = if rng.bool() {
            Strength::Exclusive
        } else {
            Strength::Shared
        };
        spans.add(strength, Span::point(k));
    }
    let req = Request::new(Some(meta.clone()), meta.write_timestamp, spans);
    (meta, req)
}

/// Run one transaction to completion: scan, wait as needed, acquire every
/// declared lock, then commit
fn run_txn(table: &LockTable, latch: &Mutex<()>, meta: &TxnMeta, req: &Request, deadline: Instant) {
    let mut guard = None;
    loop {
        assert!(Instant::now() < deadline, "txn {} never finished", meta.id);
        let latched = latch.lock();
        let mut g = table
            .scan_and_enqueue(req, guard.take())
            .expect("scan failed");
        if !g.should_wait() {
            for (strength, span) in req.lock_spans.iter_strongest_first() {
                table
                    .acquire_lock(&LockAcquisition::new(
                        meta.clone(),
                        span.key.clone(),
                        strength,
                        Durability::Unreplicated,
                    ))
                    .expect("acquire failed");
            }
            drop(latched);
            table.dequeue(g);
            break;
        }
        drop(latched);

        loop {
            assert!(Instant::now() < deadline, "txn {} never woke up", meta.id);
            g.signal().wait_timeout(Duration::from_millis(20));
            match g.current_state().expect("current_state failed") {
                WaitState::DoneWaiting => break,
                WaitState::WaitFor(_)
                | WaitState::WaitForDistinguished(_)
                | WaitState::WaitSelf { .. } => continue,
                other => panic!("unexpected state {}", other),
            }
        }
        guard = Some(g);
    }

    for (_, span) in req.lock_spans.iter_strongest_first() {
        table.update_locks(&LockUpdate::finalized(
            meta.clone(),
            span.clone(),
            TxnStatus::Committed,
        ));
    }
}

#[test]
#[serial]
fn test_concurrent_transactions_all_complete() {
    init_logger();
    let table = Arc::new(LockTable::new(LockTableConfig::for_testing()).unwrap());
    let latch = Arc::new(Mutex::new(()));
    let completed = Arc::new(AtomicUsize::new(0));
    let deadline = Instant::now() + Duration::from_secs(60);

    let threads = 8;
    let txns_per_thread = 50;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let table = Arc::clone(&table);
            let latch = Arc::clone(&latch);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(t as u64);
                for i in 0..txns_per_thread {
                    let id = (t * txns_per_thread + i + 1) as u128;
                    let (meta, req) = random_request(id, &mut rng);
                    run_txn(&table, &latch, &meta, &req, deadline);
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }
    assert_eq!(completed.load(Ordering::Relaxed), threads * txns_per_thread);
    assert!(table.is_empty(), "leftover state:\n{}", table);
}

#[test]
#[serial]
fn test_blocking_wait_across_threads() {
    init_logger();
    let table = Arc::new(LockTable::new(LockTableConfig::for_testing()).unwrap());
    let t1 = txn(1, 10);
    table
        .acquire_lock(&LockAcquisition::new(
            t1.clone(),
            "a",
            Strength::Exclusive,
            Durability::Unreplicated,
        ))
        .unwrap();

    let req = locking_request(&txn(2, 10), Strength::Exclusive, &["a"]);
    let mut guard = table.scan_and_enqueue(&req, None).unwrap();
    assert!(guard.should_wait());
    let signal = guard.signal();
    signal.try_take();

    let releaser = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            table.update_locks(&LockUpdate::finalized(
                t1,
                Span::point("a"),
                TxnStatus::Committed,
            ));
        })
    };

    assert!(signal.wait_timeout(Duration::from_secs(5)));
    assert_eq!(state(&mut guard), WaitState::DoneWaiting);
    releaser.join().unwrap();
}

#[tokio::test]
async fn test_async_wait_for_release() {
    init_logger();
    let table = Arc::new(LockTable::new(LockTableConfig::for_testing()).unwrap());
    let t1 = txn(1, 10);
    table
        .acquire_lock(&LockAcquisition::new(
            t1.clone(),
            "a",
            Strength::Exclusive,
            Durability::Unreplicated,
        ))
        .unwrap();

    let req = locking_request(&txn(2, 10), Strength::Exclusive, &["a"]);
    let mut guard = table.scan_and_enqueue(&req, None).unwrap();
    let signal = guard.signal();
    signal.try_take();

    let releaser = {
        let table = Arc::clone(&table);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            table.update_locks(&LockUpdate::finalized(
                t1,
                Span::point("a"),
                TxnStatus::Committed,
            ));
        })
    };

    tokio::time::timeout(Duration::from_secs(5), signal.notified())
        .await
        .expect("never woken");
    assert_eq!(state(&mut guard), WaitState::DoneWaiting);
    releaser.await.unwrap();
}
