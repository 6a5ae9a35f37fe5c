use crate::domain::job::JobId;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs one dequeued job end to end. Failures are handled inside the run;
/// nothing is reported back to the pool.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, worker: usize, job_id: JobId);
}

/// Fixed set of workers draining one bounded FIFO of job ids.
///
/// Each worker runs at most one job at a time. Submission never waits:
/// when the queue is full the job id is refused and stays with the caller.
/// An id sits in the queue at most once.
pub struct WorkerPool {
    sender: mpsc::Sender<JobId>,
    waiting: Arc<Mutex<HashSet<JobId>>>,
    stop: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn lock(waiting: &Mutex<HashSet<JobId>>) -> MutexGuard<'_, HashSet<JobId>> {
    waiting.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    pub fn start(workers: usize, capacity: usize, executor: Arc<dyn JobExecutor>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let waiting = Arc::new(Mutex::new(HashSet::new()));
        let stop = CancellationToken::new();

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let executor = executor.clone();
                let waiting = waiting.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "settlement worker started");
                    loop {
                        let next = {
                            let mut rx = receiver.lock().await;
                            tokio::select! {
                                biased;
                                _ = stop.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job_id) = next else {
                            break;
                        };
                        lock(&waiting).remove(&job_id);
                        executor.execute(worker, job_id).await;
                    }
                    tracing::debug!(worker, "settlement worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = workers.max(1), capacity = capacity.max(1), "worker pool started");
        Self {
            sender,
            waiting,
            stop,
            handles: Mutex::new(handles),
        }
    }

    /// Offers a job id to the queue. `false` when the queue is full or the
    /// pool has been shut down. An id already waiting is not sent again and
    /// counts as accepted.
    pub fn try_submit(&self, job_id: JobId) -> bool {
        let mut waiting = lock(&self.waiting);
        if waiting.contains(&job_id) {
            tracing::debug!(%job_id, "job already waiting in the queue");
            return true;
        }
        match self.sender.try_send(job_id) {
            Ok(()) => {
                waiting.insert(job_id);
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%job_id, "job queue full, job stays QUEUED");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(%job_id, "job queue closed, job stays QUEUED");
                false
            }
        }
    }

    /// Whether `job_id` is sitting in the queue, not yet picked up.
    pub fn is_waiting(&self, job_id: JobId) -> bool {
        lock(&self.waiting).contains(&job_id)
    }

    /// Free slots left in the queue.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }

    /// Stops taking new work and waits for the running jobs to finish.
    /// Ids still sitting in the queue are left QUEUED.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "settlement worker panicked");
            }
        }
    }
}
