//! Per-thread turn serialization.
//!
//! The assistant backend rejects new messages while a run is active on a
//! thread, so two turns on the same thread must not overlap. Turns on
//! different threads run in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maps each thread id to a `Semaphore(1)`.
///
/// Hold the permit for the whole turn; it releases on drop.
pub struct ThreadLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for ThreadLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive use of `thread_id`.
    pub async fn acquire(&self, thread_id: &str) -> Result<OwnedSemaphorePermit, ThreadBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(thread_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        if let Ok(permit) = sem.clone().try_acquire_owned() {
            return Ok(permit);
        }

        tracing::debug!(thread_id, "turn in progress on thread, waiting");
        sem.acquire_owned().await.map_err(|_| ThreadBusy)
    }

    /// Number of tracked threads.
    pub fn thread_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0 || Arc::strong_count(sem) > 1);
    }
}

/// The thread's lock was closed while waiting.
#[derive(Debug)]
pub struct ThreadBusy;

impl std::fmt::Display for ThreadBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a turn is already in progress on this thread")
    }
}

impl std::error::Error for ThreadBusy {}
