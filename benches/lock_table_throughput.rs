/// Benchmark for lock table throughput
///
/// Measures the uncontended request path (scan, acquire, release), the
/// contended path where every request queues behind a single holder, and
/// concurrent scans over a shared key space.
use locktable::{
    Durability, LockAcquisition, LockSpans, LockTable, LockTableConfig, LockUpdate, Request, Span,
    Strength, Timestamp, TxnId, TxnMeta, TxnStatus,
};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn meta(id: u128) -> TxnMeta {
    TxnMeta::new(TxnId::from_u128(id), 0, 1, Timestamp::new(id as i64, 0))
}

fn exclusive(txn: &TxnMeta, key: &str) -> Request {
    Request::new(
        Some(txn.clone()),
        txn.write_timestamp,
        LockSpans::new().with(Strength::Exclusive, Span::point(key)),
    )
}

fn report(label: &str, ops: usize, start: Instant) -> f64 {
    let elapsed = start.elapsed();
    let ops_per_sec = ops as f64 / elapsed.as_secs_f64();
    println!("  {}: {} ops", label, ops);
    println!("  Time: {:?}", elapsed);
    println!("  Throughput: {:.0} ops/sec", ops_per_sec);
    println!();
    ops_per_sec
}

fn main() {
    println!("=== Lock Table Throughput Benchmark ===\n");

    let table = LockTable::new(LockTableConfig::default()).expect("default config is valid");

    // Uncontended: every transaction locks its own key
    println!("📊 Uncontended scan / acquire / release:");
    let iterations = 10_000;
    let start = Instant::now();
    for i in 0..iterations {
        let txn = meta(i as u128 + 1);
        let key = format!("key{:06}", i);
        let req = exclusive(&txn, &key);
        let guard = table.scan_and_enqueue(&req, None).expect("scan failed");
        table
            .acquire_lock(&LockAcquisition::new(
                txn.clone(),
                key.as_str(),
                Strength::Exclusive,
                Durability::Unreplicated,
            ))
            .expect("acquire failed");
        table.dequeue(guard);
        table.update_locks(&LockUpdate::finalized(
            txn,
            Span::point(key.as_str()),
            TxnStatus::Committed,
        ));
    }
    let uncontended = report("Transactions", iterations, start);

    // Contended: many requests queue behind one holder, then drain
    println!("📊 Contended queueing on a hot key:");
    let waiters = 2_000;
    let holder = meta(1_000_000);
    table
        .acquire_lock(&LockAcquisition::new(
            holder.clone(),
            "hot",
            Strength::Exclusive,
            Durability::Unreplicated,
        ))
        .expect("acquire failed");
    let start = Instant::now();
    let guards: Vec<_> = (0..waiters)
        .map(|i| {
            let txn = meta(2_000_000 + i as u128);
            table
                .scan_and_enqueue(&exclusive(&txn, "hot"), None)
                .expect("scan failed")
        })
        .collect();
    table.update_locks(&LockUpdate::finalized(
        holder,
        Span::point("hot"),
        TxnStatus::Committed,
    ));
    for guard in guards {
        table.dequeue(guard);
    }
    let contended = report("Queued requests", waiters, start);

    // Concurrent readers over a populated table
    println!("📊 Concurrent non-locking scans:");
    let table = Arc::new(LockTable::new(LockTableConfig::default()).expect("valid config"));
    for i in 0..1_000u128 {
        table
            .acquire_lock(&LockAcquisition::new(
                meta(i + 1),
                format!("key{:06}", i),
                Strength::Exclusive,
                Durability::Unreplicated,
            ))
            .expect("acquire failed");
    }
    let threads = 8;
    let scans_per_thread = 5_000;
    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                // Reads below every lock's timestamp never block.
                let req = Request::new(
                    None,
                    Timestamp::new(0, 1),
                    LockSpans::new().with(Strength::None, Span::range("key", "kez")),
                );
                for _ in 0..scans_per_thread {
                    let guard = table.scan_and_enqueue(&req, None).expect("scan failed");
                    table.dequeue(guard);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("scan thread panicked");
    }
    let concurrent = report("Scans", threads * scans_per_thread, start);

    println!("=== Summary ===");
    println!("  Uncontended:      {:.0} txns/sec", uncontended);
    println!("  Contended queue:  {:.0} requests/sec", contended);
    println!("  Concurrent scans: {:.0} scans/sec", concurrent);
}
