use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;

use crate::error::ProvisioningError;

/// Runs registration work on the tokio runtime, at most `size` units at a time
#[derive(Debug)]
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: Mutex<Vec<AbortHandle>>,
    shutdown: AtomicBool,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tasks: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Spawn `work` once a slot is free and wait at most `limit` for its result,
    /// admission included. Work that overruns keeps running until [`close`](Self::close).
    pub(crate) async fn run<F, T>(
        &self,
        limit: Duration,
        what: &'static str,
        work: F,
    ) -> crate::Result<T>
    where
        F: Future<Output = crate::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let admitted = async {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ProvisioningError::PoolShutdown)?;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                work.await
            });
            self.track(handle.abort_handle()).await;

            handle
                .await
                .map_err(|e| ProvisioningError::Task(e.to_string()))?
        };

        match tokio::time::timeout(limit, admitted).await {
            Ok(result) => result,
            Err(_) => {
                debug!("{} did not complete within {:?}", what, limit);
                Err(ProvisioningError::Timeout(what))
            }
        }
    }

    async fn track(&self, task: AbortHandle) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Stop admitting work, then abort whatever is still running. Closing twice is a no-op.
    pub(crate) async fn close(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        self.permits.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let unfinished = tasks.iter().filter(|task| !task.is_finished()).count();
        for task in tasks {
            task.abort();
        }

        debug!("Worker pool shut down, aborted {} unfinished task(s)", unfinished);
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
