use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use settlement_engine::application::engine::SettlementEngine;
use settlement_engine::config::{
    DEFAULT_PAGE_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESULT_DIR, EngineConfig, default_workers,
};
use settlement_engine::domain::job::JobStatus;
use settlement_engine::domain::ports::StoreSet;
use settlement_engine::infrastructure::in_memory::InMemoryStore;
use settlement_engine::interfaces::csv::transaction_reader::TransactionReader;
use settlement_engine::logging;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input transactions CSV file
    input: PathBuf,

    /// First settlement day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    from: String,

    /// Last settlement day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    to: String,

    /// Postgres connection string (optional). If provided, uses Postgres.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory receiving the settlement CSV artifacts
    #[arg(long, env = "SETTLEMENT_RESULT_DIR", default_value = DEFAULT_RESULT_DIR)]
    result_dir: PathBuf,

    /// Worker count, defaults to available parallelism
    #[arg(long, env = "SETTLEMENT_WORKERS")]
    workers: Option<usize>,

    #[arg(long, env = "SETTLEMENT_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    #[arg(long, env = "SETTLEMENT_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let stores = open_stores(cli.database_url.as_deref()).await?;

    // Seed transactions
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = TransactionReader::new(file);
    let mut loaded = 0usize;
    for tx_result in reader.transactions() {
        match tx_result {
            Ok(tx) => {
                if let Err(e) = stores.transactions.insert_transaction(&tx).await {
                    eprintln!("Error storing transaction: {}", e);
                } else {
                    loaded += 1;
                }
            }
            Err(e) => {
                eprintln!("Error reading transaction: {}", e);
            }
        }
    }
    tracing::info!(loaded, input = %cli.input.display(), "transactions loaded");

    let config = EngineConfig {
        workers: cli.workers.unwrap_or_else(default_workers),
        queue_capacity: cli.queue_capacity,
        page_size: cli.page_size,
        result_dir: cli.result_dir,
        sweep_interval: Some(Duration::from_millis(500)),
    };
    let engine = SettlementEngine::start(stores, config);

    let submission = engine.jobs().submit(&cli.from, &cli.to).await.into_diagnostic()?;
    let job_id = submission.job_id;
    tracing::info!(%job_id, accepted = submission.accepted, message = %submission.message, "job submitted");

    // Poll until the job settles
    let mut last_progress = None;
    let report = loop {
        let report = engine.jobs().status(job_id).await.into_diagnostic()?;
        if report.status.is_terminal() {
            break report;
        }
        if last_progress != Some(report.progress) {
            tracing::info!(%job_id, status = %report.status, progress = report.progress, processed = report.processed, total = report.total, "job progress");
            last_progress = Some(report.progress);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    tracing::info!(
        report = %serde_json::to_string(&report).into_diagnostic()?,
        "job finished"
    );

    let outcome = match report.status {
        JobStatus::Done => {
            let bytes = engine.jobs().download(job_id).await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(&bytes).into_diagnostic()?;
            out.flush().into_diagnostic()?;
            Ok(())
        }
        status => Err(miette!("settlement job {} ended {}", job_id, status)),
    };

    engine.shutdown().await;
    outcome
}

#[cfg(feature = "storage-postgres")]
async fn open_stores(database_url: Option<&str>) -> Result<StoreSet> {
    use settlement_engine::infrastructure::postgres::PgStore;

    match database_url {
        Some(url) => {
            let store = PgStore::connect(url).await.into_diagnostic()?;
            store.migrate().await.into_diagnostic()?;
            Ok(StoreSet::from_backend(store))
        }
        None => Ok(StoreSet::from_backend(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-postgres"))]
async fn open_stores(database_url: Option<&str>) -> Result<StoreSet> {
    if database_url.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --database-url, but 'storage-postgres' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(StoreSet::from_backend(InMemoryStore::new()))
}
