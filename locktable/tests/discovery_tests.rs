//! Discovered replicated locks, the transaction status cache, and lease
//! changes

#[path = "testutils/mod.rs"]
mod testutils;

use locktable::{
    Durability, FoundLock, LockTableConfig, Strength, Transaction, TxnStatus, WaitState,
};
use testutils::{key, locking_request, read_request, state, ts, txn, TableFixture};

#[test]
fn test_discovered_lock_makes_request_wait() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    let t2 = txn(2, 10);

    let req = locking_request(&t2, Strength::Exclusive, &["a"]);
    let mut guard = fixture.scan(&req);
    assert!(!guard.should_wait());

    assert!(fixture.discover(&mut guard, &t1, "a"));
    assert_eq!(fixture.table.len(), 1);
    assert!(fixture.dump().contains("repl [Intent]"));

    let mut guard = fixture.rescan(&req, guard);
    assert!(guard.should_wait());
    match state(&mut guard) {
        WaitState::WaitForDistinguished(info) => {
            assert_eq!(info.txn.id, t1.id);
            assert!(info.held);
        }
        other => panic!("unexpected state {}", other),
    }

    fixture.finalize(&t1, "a", TxnStatus::Committed);
    assert_eq!(state(&mut guard), WaitState::DoneWaiting);
}

#[test]
fn test_discovered_lock_survives_until_rescan() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    let req = read_request(Some(&txn(2, 20)), 20, &["a"]);
    let mut guard = fixture.scan(&req);

    assert!(fixture.discover(&mut guard, &t1, "a"));
    // The holder commits before the reader scans again. The key stays pinned
    // so the reader's rescan still finds it.
    fixture.finalize(&t1, "a", TxnStatus::Committed);
    assert_eq!(fixture.table.len(), 1);

    let guard = fixture.rescan(&req, guard);
    assert!(!guard.should_wait());
    assert!(fixture.table.is_empty());
}

#[test]
fn test_discovery_at_stale_lease_is_ignored() {
    let fixture = TableFixture::new();
    fixture.table.enable(3);
    let req = locking_request(&txn(2, 10), Strength::Exclusive, &["a"]);
    let mut guard = fixture.scan(&req);

    let added = fixture
        .table
        .add_discovered_lock(
            &FoundLock::new(txn(1, 10), "a", Strength::Intent),
            2,
            &mut guard,
            true,
        )
        .unwrap();
    assert!(!added);
    assert!(fixture.table.is_empty());
}

#[test]
fn test_discovery_of_finalized_txn_is_resolved_instead() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.mark_finalized(&t1, TxnStatus::Aborted);

    let req = locking_request(&txn(2, 10), Strength::Exclusive, &["a"]);
    let mut guard = fixture.scan(&req);
    assert!(fixture.discover(&mut guard, &t1, "a"));
    assert!(fixture.table.is_empty());

    let guard = fixture.rescan(&req, guard);
    assert!(guard.should_wait());
    let to_resolve = guard.resolve_before_scanning();
    assert_eq!(to_resolve.len(), 1);
    assert_eq!(to_resolve[0].txn.id, t1.id);
    assert_eq!(to_resolve[0].status, TxnStatus::Aborted);
    assert_eq!(to_resolve[0].span.key, key("a"));
}

#[test]
fn test_discovery_without_status_cache_installs_lock() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.mark_finalized(&t1, TxnStatus::Committed);

    let req = locking_request(&txn(2, 10), Strength::Exclusive, &["a"]);
    let mut guard = fixture.scan(&req);
    let added = fixture
        .table
        .add_discovered_lock(
            &FoundLock::new(t1.clone(), "a", Strength::Intent),
            0,
            &mut guard,
            false,
        )
        .unwrap();
    assert!(added);
    assert_eq!(fixture.table.len(), 1);

    // The rescan learns from the cache that the holder is gone and hands the
    // replicated lock back for resolution.
    let guard = fixture.rescan(&req, guard);
    assert!(guard.should_wait());
    assert_eq!(guard.resolve_before_scanning().len(), 1);
}

#[test]
fn test_discovering_own_lock_is_assertion() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    let req = locking_request(&t1, Strength::Exclusive, &["a"]);
    let mut guard = fixture.scan(&req);
    let err = fixture
        .table
        .add_discovered_lock(
            &FoundLock::new(t1.clone(), "a", Strength::Intent),
            0,
            &mut guard,
            true,
        )
        .unwrap_err();
    assert!(err.is_assertion_failure());
    assert!(fixture.table.is_empty());
}

#[test]
fn test_finalized_replicated_holder_is_handed_back() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.acquire(&t1, "a", Strength::Intent, Durability::Replicated);
    fixture.mark_finalized(&t1, TxnStatus::Committed);

    let guard = fixture.scan(&locking_request(&txn(2, 10), Strength::Exclusive, &["a"]));
    assert!(guard.should_wait());
    let to_resolve = guard.resolve_before_scanning();
    assert_eq!(to_resolve.len(), 1);
    assert_eq!(to_resolve[0].status, TxnStatus::Committed);
}

#[test]
fn test_finalized_unreplicated_holder_is_released_in_place() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.acquire_unreplicated(&t1, "a", Strength::Exclusive);
    fixture.mark_finalized(&t1, TxnStatus::Aborted);

    let guard = fixture.scan(&locking_request(&txn(2, 10), Strength::Exclusive, &["a"]));
    assert!(!guard.should_wait());
    assert!(guard.resolve_before_scanning().is_empty());
    assert!(!fixture.dump().contains(&t1.id.to_string()));
}

#[test]
fn test_pushed_holder_no_longer_blocks_reader() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.acquire_unreplicated(&t1, "a", Strength::Exclusive);

    let mut pushed = Transaction::new(t1.clone(), TxnStatus::Pending);
    pushed.meta.write_timestamp = ts(30);
    fixture.table.pushed_transaction_updated(&pushed);

    let guard = fixture.scan(&read_request(None, 20, &["a"]));
    assert!(!guard.should_wait());
    assert!(fixture.dump().contains("ts: 30,0"));
}

#[test]
fn test_pushed_holder_still_blocks_writer() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.acquire_unreplicated(&t1, "a", Strength::Exclusive);

    let mut pushed = Transaction::new(t1.clone(), TxnStatus::Pending);
    pushed.meta.write_timestamp = ts(30);
    fixture.table.pushed_transaction_updated(&pushed);

    let guard = fixture.scan(&locking_request(&txn(2, 20), Strength::Exclusive, &["a"]));
    assert!(guard.should_wait());
}

#[test]
fn test_clear_and_disable_sends_waiters_elsewhere() {
    let fixture = TableFixture::new();
    let t1 = txn(1, 10);
    fixture.acquire(&t1, "a", Strength::Intent, Durability::Replicated);
    fixture.acquire_unreplicated(&t1, "b", Strength::Exclusive);

    let t2 = txn(2, 10);
    let mut on_repl = fixture.scan(&locking_request(&t2, Strength::Exclusive, &["a"]));
    let mut on_unrepl = fixture.scan(&locking_request(&txn(3, 10), Strength::Exclusive, &["b"]));
    assert!(on_repl.should_wait());
    assert!(on_unrepl.should_wait());

    fixture.table.clear(true);
    assert!(!fixture.table.enabled());
    assert!(fixture.table.is_empty());
    assert_eq!(
        state(&mut on_repl),
        WaitState::WaitElsewhere {
            txn: t1.clone(),
            key: key("a"),
            held: true
        }
    );
    assert_eq!(state(&mut on_unrepl), WaitState::DoneWaiting);

    // While disabled nothing is tracked.
    fixture.acquire_unreplicated(&t2, "c", Strength::Exclusive);
    assert!(fixture.table.is_empty());
    let guard = fixture.scan(&locking_request(&txn(4, 10), Strength::Exclusive, &["a"]));
    assert!(!guard.should_wait());
    let mut discovering = fixture.scan(&locking_request(&txn(5, 10), Strength::Exclusive, &["a"]));
    assert!(!fixture.discover(&mut discovering, &t1, "a"));

    fixture.table.enable(1);
    assert!(fixture.table.enabled());
    assert_eq!(fixture.table.lease_epoch(), 1);
    fixture.acquire_unreplicated(&t2, "c", Strength::Exclusive);
    assert_eq!(fixture.table.len(), 1);
}

#[test]
fn test_clear_without_disable_keeps_tracking() {
    let fixture = TableFixture::with_config(LockTableConfig::for_testing());
    let t1 = txn(1, 10);
    fixture.acquire_unreplicated(&t1, "a", Strength::Exclusive);
    fixture.table.clear(false);
    assert!(fixture.table.enabled());
    assert!(fixture.table.is_empty());

    fixture.acquire_unreplicated(&t1, "a", Strength::Exclusive);
    assert_eq!(fixture.table.len(), 1);
}
