use crate::domain::ports::{LedgerEvent, LedgerObserver};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// Reports core events as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl LedgerObserver for TracingObserver {
    fn record(&self, event: LedgerEvent<'_>) {
        match event {
            LedgerEvent::EntryRecorded(entry) => info!(
                entry_id = %entry.entry_id,
                user_id = %entry.user_id,
                kind = %entry.kind,
                entry_type = ?entry.entry_type,
                status = ?entry.status,
                amount = entry.amount,
                balance_before = entry.balance_before,
                balance_after = entry.balance_after,
                correlation_id = %entry.correlation_id,
                "ledger entry recorded"
            ),
            LedgerEvent::CodeRedeemed {
                code,
                user_id,
                redemption_id,
            } => info!(code, %user_id, redemption_id, "code redeemed"),
            LedgerEvent::PaymentSettled {
                payment_request_id,
                status,
                total,
            } => info!(payment_request_id, %status, total, "payment settled"),
            LedgerEvent::Rejected { operation, error } => warn!(
                operation,
                error_kind = error.kind(),
                transient = error.is_transient(),
                error = %error,
                "operation rejected"
            ),
        }
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if let Err(e) = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }
}
