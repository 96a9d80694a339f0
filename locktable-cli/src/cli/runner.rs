// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Executes workload scripts against a lock table

use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;

use super::script::{Script, SpanDecl, Step, TxnDecl};
use locktable::{
    FoundLock, LockAcquisition, LockSpans, LockTable, LockTableConfig, LockTableError,
    LockTableGuard, LockUpdate, QueryLockTableOptions, Request, Span, Timestamp, Transaction,
    TxnId, TxnMeta, TxnStatus,
};

type RunResult<T> = Result<T, Box<dyn std::error::Error>>;

/// What one step did
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: usize,
    pub op: &'static str,
    pub ok: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StepOutcome {
    fn ok(step: usize, op: &'static str, detail: impl Into<String>) -> Self {
        Self {
            step,
            op,
            ok: true,
            detail: detail.into(),
            data: None,
        }
    }

    fn failed(step: usize, op: &'static str, err: &LockTableError) -> Self {
        Self {
            step,
            op,
            ok: false,
            detail: err.to_string(),
            data: None,
        }
    }

    fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

/// Replays a script step by step
///
/// Script mistakes (unknown names, a state query on a missing guard) abort
/// the run. Errors returned by the lock table are recorded as failed steps
/// and the run continues.
pub struct Runner {
    table: LockTable,
    txns: HashMap<String, TxnMeta>,
    guards: HashMap<String, LockTableGuard>,
}

impl Runner {
    pub fn new(config: LockTableConfig) -> RunResult<Self> {
        Ok(Self {
            table: LockTable::new(config)?,
            txns: HashMap::new(),
            guards: HashMap::new(),
        })
    }

    pub fn table(&self) -> &LockTable {
        &self.table
    }

    pub fn run(&mut self, script: &Script) -> RunResult<Vec<StepOutcome>> {
        for (i, decl) in script.txns.iter().enumerate() {
            self.declare(i, decl)?;
        }
        let mut outcomes = Vec::with_capacity(script.steps.len());
        for (i, step) in script.steps.iter().enumerate() {
            debug!("step {}: {}", i + 1, step.op());
            let outcome = self
                .apply(i + 1, step)
                .map_err(|e| format!("step {} ({}): {}", i + 1, step.op(), e))?;
            outcomes.push(outcome);
        }
        info!(
            "ran {} steps, {} failed",
            outcomes.len(),
            outcomes.iter().filter(|o| !o.ok).count()
        );
        Ok(outcomes)
    }

    fn declare(&mut self, index: usize, decl: &TxnDecl) -> RunResult<()> {
        if self.txns.contains_key(&decl.name) {
            return Err(format!("transaction {} declared twice", decl.name).into());
        }
        let meta = TxnMeta::new(
            TxnId::from_u128(index as u128 + 1),
            decl.epoch,
            decl.seq,
            Timestamp::new(decl.ts, 0),
        );
        self.txns.insert(decl.name.clone(), meta);
        Ok(())
    }

    fn txn(&self, name: &str) -> RunResult<TxnMeta> {
        self.txns
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown transaction {}", name).into())
    }

    fn guard_mut(&mut self, name: &str) -> RunResult<&mut LockTableGuard> {
        self.guards
            .get_mut(name)
            .ok_or_else(|| format!("unknown guard {}", name).into())
    }

    fn apply(&mut self, n: usize, step: &Step) -> RunResult<StepOutcome> {
        let op = step.op();
        let outcome = match step {
            Step::Scan {
                guard,
                txn,
                ts,
                spans,
                wait_policy,
                max_wait_queue_length,
            } => {
                let txn = txn.as_deref().map(|name| self.txn(name)).transpose()?;
                let read_ts = match (ts, &txn) {
                    (Some(ts), _) => Timestamp::new(*ts, 0),
                    (None, Some(txn)) => txn.write_timestamp,
                    (None, None) => return Err("scan without txn needs a ts".into()),
                };
                let request = Request::new(txn, read_ts, lock_spans(spans))
                    .with_wait_policy(*wait_policy)
                    .with_max_wait_queue_length(*max_wait_queue_length);
                let previous = self.guards.remove(guard);
                match self.table.scan_and_enqueue(&request, previous) {
                    Ok(mut g) => {
                        let outcome = scan_outcome(n, op, &mut g);
                        self.guards.insert(guard.clone(), g);
                        outcome
                    }
                    Err(e) => StepOutcome::failed(n, op, &e),
                }
            }

            Step::State { guard } => {
                let state = self.guard_mut(guard)?.current_state();
                match state {
                    Ok(state) => StepOutcome::ok(n, op, state.to_string()).with_data(&state),
                    Err(e) => {
                        self.guards.remove(guard);
                        StepOutcome::failed(n, op, &e)
                    }
                }
            }

            Step::Acquire {
                txn,
                key,
                strength,
                durability,
                epoch,
                seq,
            } => {
                let mut meta = self.txn(txn)?;
                if let Some(epoch) = epoch {
                    meta.epoch = *epoch;
                }
                if let Some(seq) = seq {
                    meta.sequence = *seq;
                }
                let acq = LockAcquisition::new(meta, key.as_str(), *strength, *durability);
                match self.table.acquire_lock(&acq) {
                    Ok(()) => StepOutcome::ok(
                        n,
                        op,
                        format!("{} acquired {} {} on {}", txn, durability, strength, key),
                    ),
                    Err(e) => StepOutcome::failed(n, op, &e),
                }
            }

            Step::Discover {
                guard,
                txn,
                key,
                strength,
                lease_epoch,
                consult_status_cache,
            } => {
                let found = FoundLock::new(self.txn(txn)?, key.as_str(), *strength);
                let lease_epoch = lease_epoch.unwrap_or_else(|| self.table.lease_epoch());
                let consult = *consult_status_cache;
                let table = &self.table;
                let held = self
                    .guards
                    .get_mut(guard)
                    .ok_or_else(|| format!("unknown guard {}", guard))?;
                match table.add_discovered_lock(&found, lease_epoch, held, consult) {
                    Ok(true) => StepOutcome::ok(n, op, format!("added lock of {} on {}", txn, key)),
                    Ok(false) => StepOutcome::ok(n, op, "ignored: stale lease or disabled"),
                    Err(e) => StepOutcome::failed(n, op, &e),
                }
            }

            Step::Update {
                txn,
                key,
                end_key,
                status,
                ts,
                epoch,
            } => {
                let mut meta = self.txn(txn)?;
                if let Some(epoch) = epoch {
                    meta.epoch = *epoch;
                }
                let span = span_of(key, end_key.as_deref());
                let update = match (status, ts) {
                    (TxnStatus::Pending, Some(ts)) => {
                        LockUpdate::pending(meta, span, Timestamp::new(*ts, 0))
                    }
                    (TxnStatus::Pending, None) => {
                        let ts = meta.write_timestamp;
                        LockUpdate::pending(meta, span, ts)
                    }
                    (status, _) => LockUpdate::finalized(meta, span, *status),
                };
                self.table.update_locks(&update);
                StepOutcome::ok(n, op, format!("{} {} in {}", txn, status, update.span))
            }

            Step::Pushed { txn, ts } => {
                let mut meta = self.txn(txn)?;
                meta.write_timestamp.forward(Timestamp::new(*ts, 0));
                self.table
                    .pushed_transaction_updated(&Transaction::new(meta, TxnStatus::Pending));
                StepOutcome::ok(n, op, format!("{} pushed to {},0", txn, ts))
            }

            Step::Finalized { txn, status } => {
                let meta = self.txn(txn)?;
                self.table
                    .transaction_is_finalized(&Transaction::new(meta, *status));
                StepOutcome::ok(n, op, format!("{} {}", txn, status))
            }

            Step::Dequeue { guard } => {
                let held = self
                    .guards
                    .remove(guard)
                    .ok_or_else(|| format!("unknown guard {}", guard))?;
                let seq = held.seq_num();
                self.table.dequeue(held);
                StepOutcome::ok(n, op, format!("dequeued {} (req {})", guard, seq))
            }

            Step::Enable { lease_epoch } => {
                self.table.enable(*lease_epoch);
                StepOutcome::ok(n, op, format!("enabled at lease epoch {}", lease_epoch))
            }

            Step::Clear { disable } => {
                self.table.clear(*disable);
                StepOutcome::ok(n, op, format!("cleared (disabled: {})", disable))
            }

            Step::Query {
                key,
                end_key,
                max_locks,
                target_bytes,
                include_uncontended,
            } => {
                let options = QueryLockTableOptions {
                    max_locks: *max_locks,
                    target_bytes: *target_bytes,
                    include_uncontended: *include_uncontended,
                };
                let span = span_of(key, end_key.as_deref());
                let (locks, resume) = self.table.query_lock_table_state(&span, &options);
                let detail = match &resume.resume_key {
                    Some(key) => format!("{} locks, resume at {}", locks.len(), key),
                    None => format!("{} locks", locks.len()),
                };
                StepOutcome::ok(n, op, detail).with_data(serde_json::json!({
                    "locks": locks,
                    "resume": resume,
                }))
            }

            Step::Metrics => {
                let metrics = self.table.metrics();
                StepOutcome::ok(
                    n,
                    op,
                    format!(
                        "{} keys, {} held, {} waiting",
                        metrics.locks,
                        metrics.locks_held,
                        metrics.waiting_readers + metrics.active_locking_requests
                    ),
                )
                .with_data(&metrics)
            }

            Step::Dump => StepOutcome::ok(n, op, self.table.to_string()),
        };
        Ok(outcome)
    }
}

fn span_of(key: &str, end_key: Option<&str>) -> Span {
    match end_key {
        Some(end) => Span::range(key, end),
        None => Span::point(key),
    }
}

fn lock_spans(decls: &[SpanDecl]) -> LockSpans {
    let mut spans = LockSpans::new();
    for decl in decls {
        spans.add(decl.strength, span_of(&decl.key, decl.end_key.as_deref()));
    }
    spans
}

fn scan_outcome(n: usize, op: &'static str, guard: &mut LockTableGuard) -> StepOutcome {
    let seq = guard.seq_num();
    if !guard.should_wait() {
        return StepOutcome::ok(n, op, format!("req {}: proceed", seq));
    }
    let to_resolve = guard.resolve_before_scanning().len();
    if to_resolve > 0 {
        return StepOutcome::ok(
            n,
            op,
            format!("req {}: resolve {} locks first", seq, to_resolve),
        )
        .with_data(guard.resolve_before_scanning());
    }
    match guard.current_state() {
        Ok(state) => {
            StepOutcome::ok(n, op, format!("req {}: {}", seq, state)).with_data(&state)
        }
        Err(e) => StepOutcome::failed(n, op, &e),
    }
}
