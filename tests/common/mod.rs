#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use settlement_engine::application::jobs::{JobReport, JobService};
use settlement_engine::domain::job::{DateRange, JobId, JobStatus};
use settlement_engine::domain::money::Money;
use settlement_engine::domain::order::{Order, ProductId};
use settlement_engine::domain::ports::{
    StoreSet, Transactional, TransactionalRef, TransactionRepository, TransactionRepositoryRef,
    UnitOfWork, UnitOfWorkBox,
};
use settlement_engine::domain::settlement::{SettlementKey, SettlementTotals};
use settlement_engine::domain::transaction::{Transaction, TransactionStatus};
use settlement_engine::error::{Result, SettlementError};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub const HEADER: [&str; 7] = [
    "id",
    "order_id",
    "merchant_id",
    "amount",
    "fee",
    "status",
    "paid_at",
];

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

pub fn paid(id: &str, merchant: &str, amount: Decimal, fee: Decimal, paid_at: DateTime<Utc>) -> Transaction {
    Transaction {
        id: id.to_string(),
        order_id: format!("order-{id}"),
        merchant_id: merchant.to_string(),
        amount: Money::new(amount),
        fee: Money::new(fee),
        status: TransactionStatus::Paid,
        paid_at,
    }
}

pub async fn seed(stores: &StoreSet, transactions: &[Transaction]) {
    for tx in transactions {
        stores.transactions.insert_transaction(tx).await.unwrap();
    }
}

/// `count` paid rows of 10.00 with a 0.50 fee, one per minute from
/// 2024-03-01 00:00, spread over merchants m1..m3.
pub fn minute_series(count: usize) -> Vec<Transaction> {
    let start = at(2024, 3, 1, 0, 0, 0);
    (0..count)
        .map(|i| {
            paid(
                &format!("t{i:06}"),
                &format!("m{}", i % 3 + 1),
                Decimal::new(1000, 2),
                Decimal::new(50, 2),
                start + ChronoDuration::minutes(i as i64),
            )
        })
        .collect()
}

/// Random mix of statuses, merchants and days in March 2024.
pub fn random_transactions(count: usize, seed: u64) -> Vec<Transaction> {
    let mut rng = StdRng::seed_from_u64(seed);
    let statuses = [
        TransactionStatus::Paid,
        TransactionStatus::Paid,
        TransactionStatus::Paid,
        TransactionStatus::Pending,
        TransactionStatus::Failed,
        TransactionStatus::Refunded,
    ];
    (0..count)
        .map(|i| Transaction {
            id: format!("r{i:06}"),
            order_id: format!("order-r{i}"),
            merchant_id: format!("m{}", rng.gen_range(1..=5)),
            amount: Money::new(Decimal::new(rng.gen_range(100..100_000), 2)),
            fee: Money::new(Decimal::new(rng.gen_range(0..100), 2)),
            status: statuses[rng.gen_range(0..statuses.len())],
            paid_at: at(
                2024,
                3,
                rng.gen_range(1..=31),
                rng.gen_range(0..24),
                rng.gen_range(0..60),
                0,
            ),
        })
        .collect()
}

fn write_rows(path: &Path, rows: &[Transaction]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(HEADER)?;
    for tx in rows {
        wtr.write_record([
            tx.id.as_str(),
            tx.order_id.as_str(),
            tx.merchant_id.as_str(),
            &tx.amount.to_string(),
            &tx.fee.to_string(),
            tx.status.as_str(),
            &tx.paid_at.to_rfc3339(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes [`minute_series`] rows as CSV.
pub fn generate_csv(path: &Path, rows: usize) -> std::result::Result<(), Error> {
    write_rows(path, &minute_series(rows))
}

pub fn generate_random_csv(path: &Path, rows: usize, seed: u64) -> std::result::Result<(), Error> {
    write_rows(path, &random_transactions(rows, seed))
}

/// Polls until the job is DONE or CANCELLED.
pub async fn wait_terminal(jobs: &JobService, job_id: JobId) -> JobReport {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let report = jobs.status(job_id).await.unwrap();
            if report.status.is_terminal() {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

pub async fn wait_status(jobs: &JobService, job_id: JobId, status: JobStatus) -> JobReport {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let report = jobs.status(job_id).await.unwrap();
            if report.status == status {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach the expected status")
}

/// Reference totals computed straight from the rows.
pub fn expected_totals(rows: &[Transaction], range: &DateRange) -> Vec<(SettlementKey, SettlementTotals)> {
    let mut totals = std::collections::BTreeMap::<SettlementKey, SettlementTotals>::new();
    for tx in rows
        .iter()
        .filter(|t| t.status == TransactionStatus::Paid && range.contains(t.paid_at))
    {
        let entry = totals
            .entry(SettlementKey::new(tx.merchant_id.clone(), tx.settlement_date()))
            .or_default();
        entry.merge(&SettlementTotals {
            gross: tx.amount,
            fee: tx.fee,
            net: tx.amount - tx.fee,
            count: 1,
        });
    }
    totals.into_iter().collect()
}

/// Holds the first fetch at `offset` until released, so a test can act
/// while a job is known to be mid-scan.
pub struct GatedTransactions {
    inner: TransactionRepositoryRef,
    offset: u64,
    armed: AtomicBool,
    pub reached: Notify,
    pub release: Notify,
}

impl GatedTransactions {
    pub fn new(inner: TransactionRepositoryRef, offset: u64) -> Self {
        Self {
            inner,
            offset,
            armed: AtomicBool::new(true),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl TransactionRepository for GatedTransactions {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.inner.insert_transaction(tx).await
    }

    async fn count_in_range(&self, range: &DateRange) -> Result<u64> {
        self.inner.count_in_range(range).await
    }

    async fn fetch_page(&self, range: &DateRange, page_size: u32, offset: u64) -> Result<Vec<Transaction>> {
        if offset == self.offset && self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch_page(range, page_size, offset).await
    }
}

/// Fails every page fetch from `offset` on.
pub struct FailingTransactions {
    inner: TransactionRepositoryRef,
    offset: u64,
}

impl FailingTransactions {
    pub fn new(inner: TransactionRepositoryRef, offset: u64) -> Self {
        Self { inner, offset }
    }
}

#[async_trait]
impl TransactionRepository for FailingTransactions {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.inner.insert_transaction(tx).await
    }

    async fn count_in_range(&self, range: &DateRange) -> Result<u64> {
        self.inner.count_in_range(range).await
    }

    async fn fetch_page(&self, range: &DateRange, page_size: u32, offset: u64) -> Result<Vec<Transaction>> {
        if offset >= self.offset {
            return Err(SettlementError::Io(std::io::Error::other("connection reset")));
        }
        self.inner.fetch_page(range, page_size, offset).await
    }
}

/// Units of work that refuse to commit once a settlement was staged.
pub struct FailingMerge {
    inner: TransactionalRef,
}

impl FailingMerge {
    pub fn new(inner: TransactionalRef) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transactional for FailingMerge {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        Ok(Box::new(FailingMergeUnit {
            inner: self.inner.begin().await?,
            merging: false,
        }))
    }
}

struct FailingMergeUnit {
    inner: UnitOfWorkBox,
    merging: bool,
}

#[async_trait]
impl UnitOfWork for FailingMergeUnit {
    async fn create_job(&mut self, job: &settlement_engine::domain::job::Job) -> Result<()> {
        self.inner.create_job(job).await
    }

    async fn mark_done(&mut self, job_id: JobId, result_path: &str) -> Result<bool> {
        self.inner.mark_done(job_id, result_path).await
    }

    async fn decrement_stock_if_available(&mut self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        self.inner.decrement_stock_if_available(product_id, quantity).await
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.inner.insert_order(order).await
    }

    async fn upsert_settlement(&mut self, run_id: Uuid, key: &SettlementKey, totals: &SettlementTotals) -> Result<()> {
        self.merging = true;
        self.inner.upsert_settlement(run_id, key, totals).await
    }

    async fn commit(&mut self) -> Result<()> {
        if self.merging {
            return Err(SettlementError::internal("serialization failure"));
        }
        self.inner.commit().await
    }
}
