use chrono::Duration;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use mockable::DefaultClock;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use wallet_ledger::application::LedgerContext;
use wallet_ledger::config::LedgerConfig;
use wallet_ledger::domain::ports::UnitOfWorkRef;
use wallet_ledger::infrastructure::in_memory::InMemoryStore;
use wallet_ledger::infrastructure::telemetry::{self, TracingObserver};
use wallet_ledger::interfaces::csv::balance_writer::BalanceWriter;
use wallet_ledger::interfaces::csv::operation_reader::OperationReader;
use wallet_ledger::interfaces::csv::processor::OperationProcessor;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "LEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, env = "LEDGER_LOG", default_value = "warn")]
    log_level: String,

    /// Validity window, in days, of codes issued by the batch
    #[arg(long, default_value_t = 30)]
    code_validity_days: u32,
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            db_path: self.db_path.clone(),
            log_level: self.log_level.clone(),
            code_validity: Duration::days(i64::from(self.code_validity_days)),
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(config: &LedgerConfig) -> Result<UnitOfWorkRef> {
    use wallet_ledger::infrastructure::rocksdb::RocksDBStore;

    match &config.db_path {
        Some(db_path) => Ok(Arc::new(RocksDBStore::open(db_path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryStore::in_memory())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(config: &LedgerConfig) -> Result<UnitOfWorkRef> {
    if config.db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::in_memory()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config();
    telemetry::init(&config.log_level);

    let ctx = LedgerContext::new(
        open_store(&config)?,
        Arc::new(DefaultClock),
        Arc::new(TracingObserver),
    );
    let mut processor = OperationProcessor::new(ctx, &config);

    // Process operations
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for op_result in reader.operations() {
        match op_result {
            Ok(operation) => {
                if let Err(e) = processor.apply(operation).await {
                    eprintln!("Error processing operation: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }

    let balances = processor.balances().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(balances).into_diagnostic()?;

    Ok(())
}
