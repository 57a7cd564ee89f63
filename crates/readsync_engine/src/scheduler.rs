//! Debounce scheduler with a single pending slot.
//!
//! Scheduling replaces whatever is pending (latest wins). The pending task
//! runs once the window elapses without a newer schedule, or immediately on
//! [`Debouncer::flush_now`].

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Pending {
    id: u64,
    task: BoxFuture<'static, ()>,
    timer: JoinHandle<()>,
}

type Slot = Arc<Mutex<Option<Pending>>>;

/// Coalesces rapid triggers into one delayed task.
pub struct Debouncer {
    window: Duration,
    slot: Slot,
    next_id: AtomicU64,
}

impl Debouncer {
    /// Creates a debouncer with the given coalescing window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns the coalescing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules `task`, replacing any pending task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.slot.lock();

        // Still in the slot means its timer has not fired yet.
        if let Some(previous) = slot.take() {
            previous.timer.abort();
        }

        let timer = tokio::spawn(fire_after(self.slot.clone(), id, self.window));
        *slot = Some(Pending {
            id,
            task: Box::pin(task),
            timer,
        });
    }

    /// Runs the pending task now and waits for it.
    ///
    /// Returns `false` if nothing was pending.
    pub async fn flush_now(&self) -> bool {
        let pending = self.slot.lock().take();
        match pending {
            Some(pending) => {
                pending.timer.abort();
                pending.task.await;
                true
            }
            None => false,
        }
    }

    /// Drops the pending task without running it.
    ///
    /// Returns `false` if nothing was pending.
    pub fn cancel_pending(&self) -> bool {
        match self.slot.lock().take() {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Returns true if a task is waiting for its window to elapse.
    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

async fn fire_after(slot: Slot, id: u64, window: Duration) {
    tokio::time::sleep(window).await;
    let task = {
        let mut slot = slot.lock();
        match slot.as_ref() {
            Some(pending) if pending.id == id => slot.take().map(|p| p.task),
            _ => None,
        }
    };
    if let Some(task) = task {
        task.await;
    }
}
