//! Delayed side effects
//!
//! Each scheduled job sleeps on the injected clock, then runs inside its own
//! spawned task. Failures are logged and counted; they never reach the
//! request that scheduled them.

use crate::clock::SharedClock;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Deferred task counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeferredStats {
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Scheduler for fire-and-forget work that runs after a delay
pub struct DeferredTasks {
    clock: SharedClock,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl DeferredTasks {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            handles: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `task` after `delay`
    pub fn schedule<F, E>(&self, label: &'static str, delay: Duration, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let clock = self.clock.clone();
        let counters = self.counters.clone();

        let handle = tokio::spawn(async move {
            clock.sleep(delay).await;
            match task.await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(task = label, "Deferred task completed");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(task = label, error = %e, "Deferred task failed");
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks scheduled but not yet finished
    pub fn pending(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every scheduled task, including ones scheduled meanwhile
    pub async fn drain(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Deferred task aborted");
                }
            }
        }
    }

    pub fn stats(&self) -> DeferredStats {
        DeferredStats {
            pending: self.pending(),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
