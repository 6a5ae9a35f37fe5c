use crate::application::cancellation::CancellationRegistry;
use crate::application::scheduler::JobExecutor;
use crate::domain::job::{Job, JobId, JobStatus, progress_percent};
use crate::domain::ports::{JobRepositoryRef, StoreSet, TransactionRepositoryRef, TransactionalRef};
use crate::domain::settlement::SettlementAggregate;
use crate::error::Result;
use crate::interfaces::csv::settlement_writer;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a single execution of a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done { result_path: String },
    Cancelled,
    /// The job was missing or already claimed by another worker.
    Skipped,
}

/// Executes settlement jobs: scan, aggregate, write the artifact, merge.
pub struct SettlementJobRunner {
    jobs: JobRepositoryRef,
    transactions: TransactionRepositoryRef,
    units: TransactionalRef,
    cancellations: Arc<CancellationRegistry>,
    page_size: u32,
    result_dir: PathBuf,
}

impl SettlementJobRunner {
    /// Creates a runner over the stores of one backend.
    ///
    /// # Arguments
    ///
    /// * `stores` - The backend the jobs, transactions and settlements live in.
    /// * `cancellations` - Registry shared with the job service, so cancel
    ///   requests reach the run that owns the job.
    /// * `page_size` - Rows fetched per page, at least 1.
    /// * `result_dir` - Directory receiving one `<job_id>.csv` per finished job.
    pub fn new(
        stores: &StoreSet,
        cancellations: Arc<CancellationRegistry>,
        page_size: u32,
        result_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs: stores.jobs.clone(),
            transactions: stores.transactions.clone(),
            units: stores.units.clone(),
            cancellations,
            page_size: page_size.max(1),
            result_dir: result_dir.into(),
        }
    }

    /// Where the artifact of `job_id` is written.
    pub fn result_path(&self, job_id: JobId) -> PathBuf {
        artifact_path(&self.result_dir, job_id)
    }

    /// Claims and settles one dequeued job.
    ///
    /// Errors before the claim leave the job untouched for its owner or a
    /// later requeue. Once claimed, a failure ends the job CANCELLED.
    pub async fn run(&self, worker: usize, job_id: JobId) -> Result<RunOutcome> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            tracing::warn!(%job_id, worker, "dequeued unknown job");
            return Ok(RunOutcome::Skipped);
        };
        if job.status != JobStatus::Queued {
            tracing::debug!(%job_id, worker, status = %job.status, "job already claimed");
            return Ok(RunOutcome::Skipped);
        }
        if !job.range.is_valid() {
            tracing::warn!(%job_id, from = %job.range.from, to = %job.range.to, "invalid date range");
            self.jobs.mark_cancelled(job_id).await?;
            return Ok(RunOutcome::Cancelled);
        }

        // The token exists before the job reads RUNNING.
        let Some(token) = self.cancellations.register(job_id) else {
            tracing::debug!(%job_id, worker, "job held by another worker");
            return Ok(RunOutcome::Skipped);
        };
        match self.jobs.mark_running(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.cancellations.unregister(job_id);
                return Ok(RunOutcome::Skipped);
            }
            Err(e) => {
                self.cancellations.unregister(job_id);
                return Err(e);
            }
        }

        tracing::info!(%job_id, worker, total = job.total, "settlement job running");
        let outcome = self.settle(&job, &token).await;
        self.cancellations.unregister(job_id);
        if outcome.is_err()
            && let Err(e) = self.jobs.mark_cancelled(job_id).await
        {
            tracing::error!(%job_id, error = %e, "could not mark failed job cancelled");
        }
        outcome
    }

    async fn settle(&self, job: &Job, token: &CancellationToken) -> Result<RunOutcome> {
        let job_id = job.job_id;
        let Some(aggregate) = self.scan(job, token).await? else {
            return self.cancel(job_id).await;
        };

        // Past this point a cancel request reports "already finished".
        let live = self.cancellations.unregister(job_id).is_some();
        if !live || token.is_cancelled() {
            return self.cancel(job_id).await;
        }

        let path = self.result_path(job_id);
        self.write_artifact(&path, &aggregate).await?;
        let result_path = path.to_string_lossy().into_owned();

        let run_id = Uuid::new_v4();
        let mut unit = self.units.begin().await?;
        for (key, totals) in aggregate.iter() {
            unit.upsert_settlement(run_id, key, totals).await?;
        }
        if !unit.mark_done(job_id, &result_path).await? {
            // Cancelled concurrently; the unit of work is dropped unapplied.
            return Ok(RunOutcome::Cancelled);
        }
        unit.commit().await?;

        tracing::info!(%job_id, %run_id, keys = aggregate.len(), path = %result_path, "settlement job done");
        Ok(RunOutcome::Done { result_path })
    }

    /// Pages through the range in order. `None` when cancellation was
    /// observed at a page boundary.
    async fn scan(
        &self,
        job: &Job,
        token: &CancellationToken,
    ) -> Result<Option<SettlementAggregate>> {
        let job_id = job.job_id;
        let mut aggregate = SettlementAggregate::new();
        let mut processed = 0u64;
        let mut offset = 0u64;

        loop {
            if token.is_cancelled() {
                tracing::info!(%job_id, processed, "cancellation observed");
                return Ok(None);
            }

            let page = self
                .transactions
                .fetch_page(&job.range, self.page_size, offset)
                .await?;
            tracing::debug!(%job_id, offset, rows = page.len(), "fetched page");

            for tx in &page {
                if aggregate.record(tx) {
                    processed += 1;
                    self.jobs
                        .update_progress(job_id, processed, progress_percent(processed, job.total))
                        .await?;
                }
            }

            if page.len() < self.page_size as usize {
                return Ok(Some(aggregate));
            }
            offset += u64::from(self.page_size);
        }
    }

    async fn write_artifact(&self, path: &Path, aggregate: &SettlementAggregate) -> Result<()> {
        let bytes = settlement_writer::render(aggregate)?;
        tokio::fs::create_dir_all(&self.result_dir).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<RunOutcome> {
        self.jobs.mark_cancelled(job_id).await?;
        tracing::info!(%job_id, "settlement job cancelled");
        Ok(RunOutcome::Cancelled)
    }
}

pub(crate) fn artifact_path(result_dir: &Path, job_id: JobId) -> PathBuf {
    result_dir.join(format!("{job_id}.csv"))
}

#[async_trait]
impl JobExecutor for SettlementJobRunner {
    async fn execute(&self, worker: usize, job_id: JobId) {
        if let Err(e) = self.run(worker, job_id).await {
            tracing::error!(%job_id, worker, error = %e, "settlement job failed");
        }
    }
}
