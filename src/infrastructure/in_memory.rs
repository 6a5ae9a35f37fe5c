use crate::domain::job::{DateRange, Job, JobId, JobStatus};
use crate::domain::order::{Order, OrderId, Product, ProductId};
use crate::domain::ports::{
    JobRepository, OrderRepository, ProductRepository, SettlementRepository, Transactional,
    TransactionRepository, UnitOfWork, UnitOfWorkBox,
};
use crate::domain::settlement::{Settlement, SettlementKey, SettlementTotals};
use crate::domain::transaction::Transaction;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, Job>,
    /// Kept sorted by `(paid_at, id)`.
    transactions: Vec<Transaction>,
    settlements: HashMap<SettlementKey, Settlement>,
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
}

impl Tables {
    fn mark_running(&mut self, job_id: JobId) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running;
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn can_mark_done(&self, job_id: JobId) -> bool {
        self.jobs
            .get(&job_id)
            .is_some_and(|job| job.status == JobStatus::Running)
    }

    fn mark_done(&mut self, job_id: JobId, result_path: &str) -> bool {
        match self.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Done;
                job.progress = job.final_progress();
                job.result_path = Some(result_path.to_string());
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn upsert_settlement(&mut self, run_id: Uuid, key: &SettlementKey, totals: &SettlementTotals) {
        self.settlements
            .entry(key.clone())
            .and_modify(|row| row.absorb(run_id, totals))
            .or_insert_with(|| Settlement::new(run_id, key.clone(), *totals));
    }
}

/// A thread-safe in-memory backend serving every port.
///
/// Tables sit behind one `RwLock`. Stock rows additionally get a per-product
/// mutex that a [`UnitOfWork`] holds from its conditional decrement until it
/// commits or is dropped, the same way a row lock behaves in a database.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<std::sync::Mutex<HashMap<ProductId, Arc<Mutex<()>>>>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn row_lock(&self, product_id: &ProductId) -> Arc<Mutex<()>> {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(product_id.clone()).or_default().clone()
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.jobs.contains_key(&job.job_id) {
            return Err(SettlementError::internal(format!(
                "job {} already exists",
                job.job_id
            )));
        }
        tables.jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.get(&job_id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    async fn mark_running(&self, job_id: JobId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.mark_running(job_id))
    }

    async fn update_progress(&self, job_id: JobId, processed: u64, progress: u32) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(job) = tables.jobs.get_mut(&job_id)
            && job.status != JobStatus::Done
        {
            job.processed = processed;
            job.progress = progress;
            if !job.status.is_terminal() {
                job.status = JobStatus::Running;
            }
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_done(&self, job_id: JobId, result_path: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.mark_done(job_id, result_path))
    }

    async fn mark_cancelled(&self, job_id: JobId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.jobs.get_mut(&job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Cancelled;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TransactionRepository for InMemoryStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut tables = self.tables.write().await;
        let position = tables
            .transactions
            .partition_point(|t| (t.paid_at, t.id.as_str()) <= (tx.paid_at, tx.id.as_str()));
        tables.transactions.insert(position, tx.clone());
        Ok(())
    }

    async fn count_in_range(&self, range: &DateRange) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .iter()
            .filter(|t| range.contains(t.paid_at))
            .count() as u64)
    }

    async fn fetch_page(
        &self,
        range: &DateRange,
        page_size: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        let start = range.start();
        let end = range.end_exclusive();
        let first = tables.transactions.partition_point(|t| t.paid_at < start);
        Ok(tables.transactions[first..]
            .iter()
            .take_while(|t| t.paid_at < end)
            .skip(offset as usize)
            .take(page_size as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SettlementRepository for InMemoryStore {
    async fn upsert_settlement(
        &self,
        run_id: Uuid,
        key: &SettlementKey,
        totals: &SettlementTotals,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.upsert_settlement(run_id, key, totals);
        Ok(())
    }

    async fn get_settlement(&self, key: &SettlementKey) -> Result<Option<Settlement>> {
        let tables = self.tables.read().await;
        Ok(tables.settlements.get(key).cloned())
    }

    async fn list_settlements(&self) -> Result<Vec<Settlement>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Settlement> = tables.settlements.values().cloned().collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let tables = self.tables.read().await;
        Ok(tables.products.get(product_id).cloned())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&order_id).cloned())
    }

    async fn orders_for_product(&self, product_id: &ProductId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|order| &order.product_id == product_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Transactional for InMemoryStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        Ok(Box::new(InMemoryUnitOfWork::new(self.clone())))
    }
}

enum StagedWrite {
    CreateJob(Job),
    MarkDone { job_id: JobId, result_path: String },
    InsertOrder(Order),
    UpsertSettlement {
        run_id: Uuid,
        key: SettlementKey,
        totals: SettlementTotals,
    },
}

/// Buffers writes and applies them under a single table lock on commit.
pub struct InMemoryUnitOfWork {
    store: InMemoryStore,
    row_guards: HashMap<ProductId, OwnedMutexGuard<()>>,
    reserved: HashMap<ProductId, u32>,
    staged: Vec<StagedWrite>,
    committed: bool,
}

impl InMemoryUnitOfWork {
    fn new(store: InMemoryStore) -> Self {
        Self {
            store,
            row_guards: HashMap::new(),
            reserved: HashMap::new(),
            staged: Vec::new(),
            committed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            return Err(SettlementError::internal("unit of work already committed"));
        }
        Ok(())
    }

    fn validate(&self, tables: &Tables) -> Result<()> {
        for (product_id, quantity) in &self.reserved {
            let stock = tables.products.get(product_id).map(|p| p.stock);
            if stock.is_none_or(|stock| stock < *quantity) {
                return Err(SettlementError::internal(format!(
                    "stock for {product_id} changed under a held row lock"
                )));
            }
        }
        for write in &self.staged {
            match write {
                StagedWrite::CreateJob(job) if tables.jobs.contains_key(&job.job_id) => {
                    return Err(SettlementError::internal(format!(
                        "job {} already exists",
                        job.job_id
                    )));
                }
                StagedWrite::MarkDone { job_id, .. } if !tables.can_mark_done(*job_id) => {
                    return Err(SettlementError::internal(format!(
                        "job {job_id} is no longer running"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn create_job(&mut self, job: &Job) -> Result<()> {
        self.ensure_open()?;
        self.staged.push(StagedWrite::CreateJob(job.clone()));
        Ok(())
    }

    async fn mark_done(&mut self, job_id: JobId, result_path: &str) -> Result<bool> {
        self.ensure_open()?;
        if !self.store.tables.read().await.can_mark_done(job_id) {
            return Ok(false);
        }
        self.staged.push(StagedWrite::MarkDone {
            job_id,
            result_path: result_path.to_string(),
        });
        Ok(true)
    }

    async fn decrement_stock_if_available(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        self.ensure_open()?;
        if !self.row_guards.contains_key(product_id) {
            let guard = self.store.row_lock(product_id).lock_owned().await;
            self.row_guards.insert(product_id.clone(), guard);
        }

        let already_reserved = self.reserved.get(product_id).copied().unwrap_or(0);
        let available = {
            let tables = self.store.tables.read().await;
            match tables.products.get(product_id) {
                Some(product) => product.stock.saturating_sub(already_reserved),
                None => return Ok(false),
            }
        };
        if available < quantity {
            return Ok(false);
        }

        *self.reserved.entry(product_id.clone()).or_insert(0) += quantity;
        Ok(true)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.ensure_open()?;
        self.staged.push(StagedWrite::InsertOrder(order.clone()));
        Ok(())
    }

    async fn upsert_settlement(
        &mut self,
        run_id: Uuid,
        key: &SettlementKey,
        totals: &SettlementTotals,
    ) -> Result<()> {
        self.ensure_open()?;
        self.staged.push(StagedWrite::UpsertSettlement {
            run_id,
            key: key.clone(),
            totals: *totals,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut tables = self.store.tables.write().await;
        self.validate(&tables)?;

        for (product_id, quantity) in self.reserved.drain() {
            if let Some(product) = tables.products.get_mut(&product_id) {
                product.stock -= quantity;
            }
        }
        for write in self.staged.drain(..) {
            match write {
                StagedWrite::CreateJob(job) => {
                    tables.jobs.insert(job.job_id, job);
                }
                StagedWrite::MarkDone {
                    job_id,
                    result_path,
                } => {
                    tables.mark_done(job_id, &result_path);
                }
                StagedWrite::InsertOrder(order) => {
                    tables.orders.insert(order.id, order);
                }
                StagedWrite::UpsertSettlement {
                    run_id,
                    key,
                    totals,
                } => tables.upsert_settlement(run_id, &key, &totals),
            }
        }
        drop(tables);

        self.committed = true;
        self.row_guards.clear();
        Ok(())
    }
}
