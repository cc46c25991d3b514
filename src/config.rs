use chrono::Duration;
use std::path::PathBuf;

/// Runtime settings of the batch binary.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// RocksDB directory; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// How long codes issued from a batch stay redeemable.
    pub code_validity: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: "warn".to_string(),
            code_validity: Duration::days(30),
        }
    }
}
