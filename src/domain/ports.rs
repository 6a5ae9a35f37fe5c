use super::job::{DateRange, Job, JobId, JobStatus};
use super::order::{Order, OrderId, Product, ProductId};
use super::settlement::{Settlement, SettlementKey, SettlementTotals};
use super::transaction::Transaction;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Durable job records. Status writes are guarded so that DONE and
/// CANCELLED are never left once reached.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>>;
    /// Jobs in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;
    /// QUEUED -> RUNNING. Returns whether this caller claimed the job.
    async fn mark_running(&self, job_id: JobId) -> Result<bool>;
    /// Writes counters and forces RUNNING unless the job is already terminal.
    async fn update_progress(&self, job_id: JobId, processed: u64, progress: u32) -> Result<()>;
    /// RUNNING -> DONE.
    async fn mark_done(&self, job_id: JobId, result_path: &str) -> Result<bool>;
    /// QUEUED | RUNNING -> CANCELLED.
    async fn mark_cancelled(&self, job_id: JobId) -> Result<bool>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()>;
    async fn count_in_range(&self, range: &DateRange) -> Result<u64>;
    /// Rows in `range` ordered by `paid_at` then `id`.
    async fn fetch_page(
        &self,
        range: &DateRange,
        page_size: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Adds `totals` onto the existing row, or inserts it. Only `run_id` is overwritten.
    async fn upsert_settlement(
        &self,
        run_id: Uuid,
        key: &SettlementKey,
        totals: &SettlementTotals,
    ) -> Result<()>;
    async fn get_settlement(&self, key: &SettlementKey) -> Result<Option<Settlement>>;
    async fn list_settlements(&self) -> Result<Vec<Settlement>>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;
    async fn orders_for_product(&self, product_id: &ProductId) -> Result<Vec<Order>>;
}

/// An atomic scope over the backing store.
///
/// Writes become visible together on [`UnitOfWork::commit`]; dropping the
/// unit of work without committing discards all of them.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn create_job(&mut self, job: &Job) -> Result<()>;
    async fn mark_done(&mut self, job_id: JobId, result_path: &str) -> Result<bool>;
    /// Reduces stock by `quantity` only if at least `quantity` is left. The
    /// check and the write are one step and the row stays locked until the
    /// unit of work ends.
    async fn decrement_stock_if_available(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool>;
    async fn insert_order(&mut self, order: &Order) -> Result<()>;
    async fn upsert_settlement(
        &mut self,
        run_id: Uuid,
        key: &SettlementKey,
        totals: &SettlementTotals,
    ) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
}

pub type UnitOfWorkBox = Box<dyn UnitOfWork>;

#[async_trait]
pub trait Transactional: Send + Sync {
    async fn begin(&self) -> Result<UnitOfWorkBox>;
}

pub type JobRepositoryRef = Arc<dyn JobRepository>;
pub type TransactionRepositoryRef = Arc<dyn TransactionRepository>;
pub type SettlementRepositoryRef = Arc<dyn SettlementRepository>;
pub type ProductRepositoryRef = Arc<dyn ProductRepository>;
pub type OrderRepositoryRef = Arc<dyn OrderRepository>;
pub type TransactionalRef = Arc<dyn Transactional>;

/// Every port the engine consumes, usually all served by one backend.
#[derive(Clone)]
pub struct StoreSet {
    pub jobs: JobRepositoryRef,
    pub transactions: TransactionRepositoryRef,
    pub settlements: SettlementRepositoryRef,
    pub products: ProductRepositoryRef,
    pub orders: OrderRepositoryRef,
    pub units: TransactionalRef,
}

impl StoreSet {
    pub fn from_backend<S>(store: S) -> Self
    where
        S: JobRepository
            + TransactionRepository
            + SettlementRepository
            + ProductRepository
            + OrderRepository
            + Transactional
            + 'static,
    {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            transactions: store.clone(),
            settlements: store.clone(),
            products: store.clone(),
            orders: store.clone(),
            units: store,
        }
    }
}
