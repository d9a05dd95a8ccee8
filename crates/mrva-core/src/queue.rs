//! Bounded download queue.
//!
//! At most `concurrency` tasks run at once, process-wide, regardless of how
//! many repositories are ready. Admission is FIFO, tasks are never dropped,
//! and errors inside a task are the task's own responsibility to record.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

pub struct DownloadQueue {
    semaphore: Arc<Semaphore>,
    pending: AtomicUsize,
}

impl DownloadQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            pending: AtomicUsize::new(0),
        }
    }

    /// Run a task under the concurrency cap. Resolves once the task has run
    /// to completion, however long it waited for a slot.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // The semaphore is never closed, so acquisition only fails on
        // programmer error.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("download queue semaphore closed");
        let output = task.await;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        output
    }

    /// Number of tasks admitted but not yet finished (waiting or running).
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
