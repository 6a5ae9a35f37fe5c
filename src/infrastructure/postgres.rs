use crate::domain::job::{DateRange, Job, JobId, JobStatus};
use crate::domain::money::Money;
use crate::domain::order::{Order, OrderId, Product, ProductId};
use crate::domain::ports::{
    JobRepository, OrderRepository, ProductRepository, SettlementRepository, Transactional,
    TransactionRepository, UnitOfWork, UnitOfWorkBox,
};
use crate::domain::settlement::{Settlement, SettlementKey, SettlementTotals};
use crate::domain::transaction::Transaction;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, Row};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        price       NUMERIC NOT NULL,
        stock       BIGINT NOT NULL CHECK (stock >= 0),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id           UUID PRIMARY KEY,
        product_id   TEXT NOT NULL REFERENCES products (id),
        buyer_id     TEXT NOT NULL,
        quantity     BIGINT NOT NULL,
        total_price  NUMERIC NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id           TEXT PRIMARY KEY,
        order_id     TEXT NOT NULL,
        merchant_id  TEXT NOT NULL,
        amount       NUMERIC NOT NULL,
        fee          NUMERIC NOT NULL,
        status       TEXT NOT NULL,
        paid_at      TIMESTAMPTZ NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS transactions_paid_at_idx ON transactions (paid_at, id)",
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id           UUID PRIMARY KEY,
        job_id       UUID NOT NULL UNIQUE,
        status       TEXT NOT NULL,
        processed    BIGINT NOT NULL DEFAULT 0,
        total        BIGINT NOT NULL DEFAULT 0,
        progress     INTEGER NOT NULL DEFAULT 0,
        from_date    DATE NOT NULL,
        to_date      DATE NOT NULL,
        result_path  TEXT,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settlements (
        id            UUID PRIMARY KEY,
        merchant_id   TEXT NOT NULL,
        date          DATE NOT NULL,
        gross_amount  NUMERIC NOT NULL,
        fee_amount    NUMERIC NOT NULL,
        net_amount    NUMERIC NOT NULL,
        txn_count     BIGINT NOT NULL,
        run_id        UUID NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (merchant_id, date)
    )
    "#,
];

const JOB_COLUMNS: &str = "id, job_id, status, processed, total, progress, from_date, to_date, \
                           result_path, created_at, updated_at";

const UPSERT_SETTLEMENT: &str = r#"
    INSERT INTO settlements
        (id, merchant_id, date, gross_amount, fee_amount, net_amount, txn_count, run_id, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
    ON CONFLICT (merchant_id, date) DO UPDATE SET
        gross_amount = settlements.gross_amount + EXCLUDED.gross_amount,
        fee_amount = settlements.fee_amount + EXCLUDED.fee_amount,
        net_amount = settlements.net_amount + EXCLUDED.net_amount,
        txn_count = settlements.txn_count + EXCLUDED.txn_count,
        run_id = EXCLUDED.run_id,
        updated_at = NOW()
"#;

const MARK_DONE: &str = r#"
    UPDATE jobs
    SET status = 'DONE',
        progress = CASE WHEN total > 0 THEN 100 ELSE 0 END,
        result_path = $1,
        updated_at = NOW()
    WHERE job_id = $2 AND status = 'RUNNING'
"#;

const INSERT_JOB: &str = r#"
    INSERT INTO jobs
        (id, job_id, status, processed, total, progress, from_date, to_date, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

/// PostgreSQL backend serving every port from one connection pool.
///
/// Stock and settlement writes rely on the database's row-level locking,
/// so several processes may share the same tables.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables this crate uses when they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn row_to_job(row: &PgRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: row.try_get("id")?,
        job_id: JobId(row.try_get("job_id")?),
        status: status.parse()?,
        processed: to_u64(row.try_get("processed")?),
        total: to_u64(row.try_get("total")?),
        progress: u32::try_from(row.try_get::<i32, _>("progress")?).unwrap_or_default(),
        range: DateRange::new(row.try_get("from_date")?, row.try_get("to_date")?),
        result_path: row.try_get("result_path")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction> {
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        merchant_id: row.try_get("merchant_id")?,
        amount: Money::new(row.try_get("amount")?),
        fee: Money::new(row.try_get("fee")?),
        status: status.parse()?,
        paid_at: row.try_get("paid_at")?,
    })
}

fn row_to_settlement(row: &PgRow) -> Result<Settlement> {
    let merchant_id: String = row.try_get("merchant_id")?;
    let date: NaiveDate = row.try_get("date")?;
    Ok(Settlement {
        id: row.try_get("id")?,
        key: SettlementKey::new(merchant_id, date),
        totals: SettlementTotals {
            gross: Money::new(row.try_get("gross_amount")?),
            fee: Money::new(row.try_get("fee_amount")?),
            net: Money::new(row.try_get("net_amount")?),
            count: to_u64(row.try_get("txn_count")?),
        },
        run_id: row.try_get("run_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId(row.try_get("id")?),
        product_id: ProductId(row.try_get("product_id")?),
        buyer_id: row.try_get("buyer_id")?,
        quantity: u32::try_from(row.try_get::<i64, _>("quantity")?).unwrap_or_default(),
        total_price: Money::new(row.try_get("total_price")?),
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_job(conn: &mut PgConnection, job: &Job) -> Result<()> {
    sqlx::query(INSERT_JOB)
        .bind(job.id)
        .bind(job.job_id.0)
        .bind(job.status.as_str())
        .bind(to_i64(job.processed))
        .bind(to_i64(job.total))
        .bind(job.progress as i32)
        .bind(job.range.from)
        .bind(job.range.to)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(conn)
        .await?;
    Ok(())
}

async fn upsert_settlement(
    conn: &mut PgConnection,
    run_id: Uuid,
    key: &SettlementKey,
    totals: &SettlementTotals,
) -> Result<()> {
    sqlx::query(UPSERT_SETTLEMENT)
        .bind(Uuid::new_v4())
        .bind(&key.merchant_id)
        .bind(key.date)
        .bind(Decimal::from(totals.gross))
        .bind(Decimal::from(totals.fee))
        .bind(Decimal::from(totals.net))
        .bind(to_i64(totals.count))
        .bind(run_id)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl JobRepository for PgStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut conn, job).await
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY created_at, id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn mark_running(&self, job_id: JobId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'RUNNING', updated_at = NOW() \
             WHERE job_id = $1 AND status = 'QUEUED'",
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(&self, job_id: JobId, processed: u64, progress: u32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET processed = $1,
                progress = $2,
                status = CASE WHEN status = 'CANCELLED' THEN status ELSE 'RUNNING' END,
                updated_at = NOW()
            WHERE job_id = $3 AND status <> 'DONE'
            "#,
        )
        .bind(to_i64(processed))
        .bind(progress as i32)
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_done(&self, job_id: JobId, result_path: &str) -> Result<bool> {
        let result = sqlx::query(MARK_DONE)
            .bind(result_path)
            .bind(job_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_cancelled(&self, job_id: JobId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'CANCELLED', updated_at = NOW() \
             WHERE job_id = $1 AND status IN ('QUEUED', 'RUNNING')",
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TransactionRepository for PgStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, order_id, merchant_id, amount, fee, status, paid_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.order_id)
        .bind(&tx.merchant_id)
        .bind(Decimal::from(tx.amount))
        .bind(Decimal::from(tx.fee))
        .bind(tx.status.as_str())
        .bind(tx.paid_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_in_range(&self, range: &DateRange) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transactions WHERE paid_at >= $1 AND paid_at < $2",
        )
        .bind(range.start())
        .bind(range.end_exclusive())
        .fetch_one(&self.pool)
        .await?;
        Ok(to_u64(count))
    }

    async fn fetch_page(
        &self,
        range: &DateRange,
        page_size: u32,
        offset: u64,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, merchant_id, amount, fee, status, paid_at
            FROM transactions
            WHERE paid_at >= $1 AND paid_at < $2
            ORDER BY paid_at ASC, id ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(range.start())
        .bind(range.end_exclusive())
        .bind(i64::from(page_size))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_transaction).collect()
    }
}

#[async_trait]
impl SettlementRepository for PgStore {
    async fn upsert_settlement(
        &self,
        run_id: Uuid,
        key: &SettlementKey,
        totals: &SettlementTotals,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_settlement(&mut conn, run_id, key, totals).await
    }

    async fn get_settlement(&self, key: &SettlementKey) -> Result<Option<Settlement>> {
        let row = sqlx::query(
            r#"
            SELECT id, merchant_id, date, gross_amount, fee_amount, net_amount, txn_count, run_id, updated_at
            FROM settlements
            WHERE merchant_id = $1 AND date = $2
            "#,
        )
        .bind(&key.merchant_id)
        .bind(key.date)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_settlement).transpose()
    }

    async fn list_settlements(&self) -> Result<Vec<Settlement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, merchant_id, date, gross_amount, fee_amount, net_amount, txn_count, run_id, updated_at
            FROM settlements
            ORDER BY merchant_id, date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_settlement).collect()
    }
}

#[async_trait]
impl ProductRepository for PgStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, stock, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, price = EXCLUDED.price, stock = EXCLUDED.stock, updated_at = NOW()
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(Decimal::from(product.price))
        .bind(i64::from(product.stock))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price, stock FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Product {
                id: ProductId(row.try_get("id")?),
                name: row.try_get("name")?,
                price: Money::new(row.try_get("price")?),
                stock: u32::try_from(row.try_get::<i64, _>("stock")?).unwrap_or_default(),
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, product_id, buyer_id, quantity, total_price, created_at FROM orders WHERE id = $1",
        )
        .bind(order_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn orders_for_product(&self, product_id: &ProductId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT id, product_id, buyer_id, quantity, total_price, created_at \
             FROM orders WHERE product_id = $1 ORDER BY created_at",
        )
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }
}

#[async_trait]
impl Transactional for PgStore {
    async fn begin(&self) -> Result<UnitOfWorkBox> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }
}

/// A database transaction. Rolled back by sqlx when dropped uncommitted.
pub struct PgUnitOfWork {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| SettlementError::internal("unit of work already committed"))
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn create_job(&mut self, job: &Job) -> Result<()> {
        insert_job(self.conn()?, job).await
    }

    async fn mark_done(&mut self, job_id: JobId, result_path: &str) -> Result<bool> {
        let result = sqlx::query(MARK_DONE)
            .bind(result_path)
            .bind(job_id.0)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn decrement_stock_if_available(
        &mut self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let remaining = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE products
            SET stock = stock - $1, updated_at = NOW()
            WHERE id = $2 AND stock >= $1
            RETURNING stock
            "#,
        )
        .bind(i64::from(quantity))
        .bind(product_id.as_str())
        .fetch_optional(self.conn()?)
        .await?;
        Ok(remaining.is_some())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, product_id, buyer_id, quantity, total_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(order.id.0)
        .bind(order.product_id.as_str())
        .bind(&order.buyer_id)
        .bind(i64::from(order.quantity))
        .bind(Decimal::from(order.total_price))
        .bind(order.created_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn upsert_settlement(
        &mut self,
        run_id: Uuid,
        key: &SettlementKey,
        totals: &SettlementTotals,
    ) -> Result<()> {
        upsert_settlement(self.conn()?, run_id, key, totals).await
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| SettlementError::internal("unit of work already committed"))?;
        tx.commit().await?;
        Ok(())
    }
}

