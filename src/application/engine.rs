use crate::application::cancellation::CancellationRegistry;
use crate::application::jobs::JobService;
use crate::application::orders::OrderService;
use crate::application::scheduler::WorkerPool;
use crate::application::settlement::SettlementJobRunner;
use crate::config::EngineConfig;
use crate::domain::ports::StoreSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The main entry point of the settlement system.
///
/// `SettlementEngine` owns the worker pool, the cancellation registry and
/// the services built on top of one [`StoreSet`]. Must be started inside a
/// tokio runtime.
pub struct SettlementEngine {
    stores: StoreSet,
    jobs: Arc<JobService>,
    orders: OrderService,
    pool: Arc<WorkerPool>,
    sweeper: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SettlementEngine {
    /// Starts the workers and, when configured, the stalled-job sweeper.
    ///
    /// # Arguments
    ///
    /// * `stores` - The backend shared by every service.
    /// * `config` - Worker count, queue capacity, page size, artifact
    ///   directory and sweep interval.
    pub fn start(stores: StoreSet, config: EngineConfig) -> Self {
        let cancellations = Arc::new(CancellationRegistry::new());
        let runner = Arc::new(SettlementJobRunner::new(
            &stores,
            cancellations.clone(),
            config.page_size,
            config.result_dir.clone(),
        ));
        let pool = Arc::new(WorkerPool::start(
            config.workers,
            config.queue_capacity,
            runner,
        ));
        let jobs = Arc::new(JobService::new(&stores, cancellations, pool.clone()));
        let orders = OrderService::new(&stores);

        let sweeper = config.sweep_interval.map(|interval| {
            let stop = CancellationToken::new();
            let handle = jobs.clone().spawn_sweeper(interval, stop.clone());
            (stop, handle)
        });

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            page_size = config.page_size,
            result_dir = %config.result_dir.display(),
            "settlement engine started"
        );
        Self {
            stores,
            jobs,
            orders,
            pool,
            sweeper,
        }
    }

    pub fn jobs(&self) -> &JobService {
        &self.jobs
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Stops the sweeper and waits for running jobs to finish.
    pub async fn shutdown(self) {
        if let Some((stop, handle)) = self.sweeper {
            stop.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "sweeper panicked");
            }
        }
        self.pool.shutdown().await;
        tracing::info!("settlement engine stopped");
    }
}
