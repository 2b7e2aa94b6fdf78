//! Bounded worker pool for session tasks.
//!
//! At most `size` sessions run at once. Further connections are spawned
//! immediately but park on the semaphore until a worker frees up, which gives
//! the queueing behaviour of a fixed-size thread pool. Draining closes the
//! semaphore (queued connections are dropped without ever running), then
//! joins what is in flight under a grace period and aborts the rest.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Outcome of [`SessionPool::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that returned on their own within the grace period.
    pub completed: usize,
    /// Tasks still running at the deadline, aborted.
    pub cancelled: usize,
}

pub struct SessionPool {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    size: usize,
}

impl SessionPool {
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), tasks: Mutex::new(JoinSet::new()), size }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks spawned and not yet reaped, queued ones included.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Queue `work` for a worker slot. Returns immediately.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let mut tasks = self.lock_tasks();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "pool: session task failed");
            }
        }

        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
    }

    /// Stop admitting queued work, wait up to `grace` for in-flight tasks,
    /// then abort whatever is left.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        self.permits.close();
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        let mut report = DrainReport::default();

        let joined = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(()) => report.completed += 1,
                    Err(e) => error!(error = %e, "pool: session task failed during drain"),
                }
            }
        })
        .await;

        if joined.is_err() {
            report.cancelled = tasks.len();
            warn!(cancelled = report.cancelled, ?grace, "pool: drain deadline passed; aborting sessions");
            tasks.shutdown().await;
        }

        info!(completed = report.completed, cancelled = report.cancelled, "pool: drained");
        report
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod tests;
