// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Single-slot wake-up signal for waiting requests
//!
//! At most one wake-up is buffered. Notifying an already-pending signal is a
//! no-op, since the woken request always re-derives its state from the lock
//! table. Both blocking threads and async tasks can wait on the same signal.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct WaitSignal {
    pending: Mutex<bool>,
    cond: Condvar,
    notify: Notify,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a wake-up. Returns false if one was already pending.
    pub fn notify(&self) -> bool {
        let mut pending = self.pending.lock();
        if *pending {
            return false;
        }
        *pending = true;
        drop(pending);
        self.cond.notify_all();
        self.notify.notify_one();
        true
    }

    /// Consume a pending wake-up without blocking
    pub fn try_take(&self) -> bool {
        let mut pending = self.pending.lock();
        std::mem::replace(&mut *pending, false)
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock()
    }

    /// Block the current thread until a wake-up is available, then consume it
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.cond.wait(&mut pending);
        }
        *pending = false;
    }

    /// Like `wait`, giving up after `timeout`. Returns true if a wake-up was
    /// consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *pending, false)
    }

    /// Wait asynchronously until a wake-up is available, then consume it
    pub async fn notified(&self) {
        loop {
            if self.try_take() {
                return;
            }
            // notify_one stores a permit when no task is parked, so a wake-up
            // racing with this await is not lost.
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wakeups_coalesce() {
        let signal = WaitSignal::new();
        assert!(signal.notify());
        assert!(!signal.notify());
        assert!(signal.try_take());
        assert!(!signal.try_take());
    }

    #[test]
    fn test_wait_timeout_without_notification() {
        let signal = WaitSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        signal.notify();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_pending());
    }

    #[test]
    fn test_wait_across_threads() {
        let signal = Arc::new(WaitSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(5));
        signal.notify();
        waiter.join().unwrap();
        assert!(!signal.is_pending());
    }

    #[tokio::test]
    async fn test_async_notified() {
        let signal = Arc::new(WaitSignal::new());
        let task = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.notified().await })
        };
        tokio::task::yield_now().await;
        signal.notify();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
