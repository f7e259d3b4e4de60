//! Concurrency limiter.
//!
//! One structure combines the three pieces every fan-out needs: a bounded
//! semaphore capping concurrent network calls, outstanding-task accounting
//! so a stage can wait for its producers, and a per-host error log that
//! collects failures without aborting peer hosts.
//!
//! Permits are RAII guards, so a slot is released on every path. Producers
//! must never hold a permit while pushing into an output channel; the permit
//! covers the network call only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore, SemaphorePermit};

use crate::error::Error;
use crate::hosts::Host;

/// Default limiter depth.
pub const DEFAULT_LIMIT: usize = 100;

/// One recorded per-host failure.
#[derive(Debug)]
pub struct HostError {
    pub host: Host,
    pub error: Error,
}

pub struct Limiter {
    sem: Semaphore,
    outstanding: AtomicUsize,
    idle: Notify,
    errs: Mutex<Vec<HostError>>,
}

impl Limiter {
    pub fn new(limit: usize) -> Arc<Limiter> {
        Arc::new(Limiter {
            sem: Semaphore::new(limit.max(1)),
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
            errs: Mutex::new(Vec::new()),
        })
    }

    /// Register `n` outstanding tasks. Must happen before the tasks are
    /// spawned so `wait` cannot observe a transient zero.
    pub fn add(&self, n: usize) {
        self.outstanding.fetch_add(n, Ordering::AcqRel);
    }

    /// Mark one task finished.
    pub fn done(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "done without matching add");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Acquire one slot. The returned permit releases the slot on drop.
    pub async fn lock(&self) -> SemaphorePermit<'_> {
        self.sem
            .acquire()
            .await
            .expect("limiter semaphore is never closed")
    }

    /// Block until every registered task has called `done`.
    pub async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Record a failure for one host.
    pub fn error(&self, host: Host, error: Error) {
        tracing::debug!(host = %host.full_name(), error = %error, "host error recorded");
        self.errs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HostError { host, error });
    }

    /// Snapshot of the collected errors. Meaningful after `wait`.
    pub fn errors(&self) -> Vec<HostError> {
        let mut errs = self.errs.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *errs)
    }

    /// Number of recorded errors without draining the log.
    pub fn error_count(&self) -> usize {
        self.errs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Currently available slots. Exposed for tests of the concurrency bound.
    pub fn available_slots(&self) -> usize {
        self.sem.available_permits()
    }
}

/// Ties `done` to task exit so every `add` is balanced even when a task
/// returns early or panics.
pub struct TaskGuard {
    limiter: Arc<Limiter>,
}

impl TaskGuard {
    /// Wrap an already-registered task (the caller has called `add`).
    pub fn new(limiter: Arc<Limiter>) -> TaskGuard {
        TaskGuard { limiter }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.limiter.done();
    }
}
