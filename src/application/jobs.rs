use crate::application::cancellation::CancellationRegistry;
use crate::application::scheduler::WorkerPool;
use crate::domain::job::{DateRange, Job, JobId, JobStatus};
use crate::domain::ports::{JobRepositoryRef, StoreSet, TransactionRepositoryRef, TransactionalRef};
use crate::error::{Result, SettlementError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Answer to a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Whether the job made it onto the queue right away.
    pub accepted: bool,
    pub message: String,
}

/// Poll view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub processed: u64,
    pub total: u64,
    pub progress: u32,
    pub result_path: Option<String>,
    pub download_url: Option<String>,
}

impl From<&Job> for JobReport {
    fn from(job: &Job) -> Self {
        let download_url =
            (job.status == JobStatus::Done).then(|| format!("/downloads/{}", job.job_id));
        Self {
            job_id: job.job_id,
            status: job.status,
            processed: job.processed,
            total: job.total,
            progress: job.progress,
            result_path: job.result_path.clone(),
            download_url,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// Not running: unknown, never dequeued, or already finished.
    NotFound,
}

/// Boundary operations on settlement jobs.
pub struct JobService {
    jobs: JobRepositoryRef,
    transactions: TransactionRepositoryRef,
    units: TransactionalRef,
    cancellations: Arc<CancellationRegistry>,
    pool: Arc<WorkerPool>,
}

impl JobService {
    /// Creates the service in front of a running worker pool.
    ///
    /// # Arguments
    ///
    /// * `stores` - The backend holding jobs and transactions.
    /// * `cancellations` - Registry shared with the runner executing the jobs.
    /// * `pool` - The pool submissions are offered to.
    pub fn new(
        stores: &StoreSet,
        cancellations: Arc<CancellationRegistry>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            jobs: stores.jobs.clone(),
            transactions: stores.transactions.clone(),
            units: stores.units.clone(),
            cancellations,
            pool,
        }
    }

    /// Creates a QUEUED job for `[from, to]` and offers it to the workers.
    ///
    /// Empty or malformed dates fail with `Validation` and create nothing.
    /// A range with `from` after `to` is recorded and cancelled at once.
    pub async fn submit(&self, from: &str, to: &str) -> Result<Submission> {
        let range = DateRange::parse(from, to)?;
        let total = if range.is_valid() {
            self.transactions.count_in_range(&range).await?
        } else {
            0
        };

        let job = Job::queued(range, total);
        let job_id = job.job_id;
        let mut unit = self.units.begin().await?;
        unit.create_job(&job).await?;
        unit.commit().await?;

        if !range.is_valid() {
            self.jobs.mark_cancelled(job_id).await?;
            tracing::warn!(%job_id, %from, %to, "rejected inverted date range");
            return Ok(Submission {
                job_id,
                status: JobStatus::Cancelled,
                accepted: false,
                message: "from must not be after to".to_string(),
            });
        }

        let accepted = self.pool.try_submit(job_id);
        tracing::info!(%job_id, total, accepted, "settlement job submitted");
        let message = if accepted {
            "job queued"
        } else {
            "queue full, job stays QUEUED until requeued"
        };
        Ok(Submission {
            job_id,
            status: JobStatus::Queued,
            accepted,
            message: message.to_string(),
        })
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobReport> {
        let job = self.find(job_id).await?;
        Ok(JobReport::from(&job))
    }

    /// Stops a running job. Anything not currently running is `NotFound`.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
        if !self.cancellations.signal(job_id) {
            return Ok(CancelOutcome::NotFound);
        }
        self.jobs.mark_cancelled(job_id).await?;
        tracing::info!(%job_id, "cancellation requested");
        Ok(CancelOutcome::Cancelled)
    }

    /// Artifact bytes of a DONE job.
    pub async fn download(&self, job_id: JobId) -> Result<Vec<u8>> {
        let job = self.find(job_id).await?;
        match (job.status, job.result_path) {
            (JobStatus::Done, Some(path)) => Ok(tokio::fs::read(path).await?),
            _ => Err(SettlementError::JobNotFound(job_id)),
        }
    }

    /// Offers QUEUED jobs that are not already waiting in the queue, oldest
    /// first, until it is full. Returns how many were accepted.
    pub async fn requeue_stalled(&self) -> Result<usize> {
        let stalled = self.jobs.list_by_status(JobStatus::Queued).await?;
        let mut accepted = 0;
        for job in stalled {
            if !job.range.is_valid() {
                self.jobs.mark_cancelled(job.job_id).await?;
                continue;
            }
            if self.pool.is_waiting(job.job_id) {
                continue;
            }
            if self.pool.available() == 0 || !self.pool.try_submit(job.job_id) {
                break;
            }
            accepted += 1;
        }
        if accepted > 0 {
            tracing::info!(accepted, "requeued stalled jobs");
        }
        Ok(accepted)
    }

    /// Runs [`requeue_stalled`](Self::requeue_stalled) every `interval`
    /// until `stop` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.requeue_stalled().await {
                            tracing::error!(error = %e, "stalled job sweep failed");
                        }
                    }
                }
            }
        })
    }

    async fn find(&self, job_id: JobId) -> Result<Job> {
        self.jobs
            .get_job(job_id)
            .await?
            .ok_or(SettlementError::JobNotFound(job_id))
    }
}
