//! Application layer orchestrating the ledger's core operations.
//!
//! Each service is handed a `LedgerContext` holding the unit of work, the
//! clock and the observer. Every public operation opens its own transaction,
//! so services are cheap to clone and safe to share across tasks.

pub mod context;
pub mod ledger;
pub mod redemption;
pub mod settlement;

#[cfg(test)]
mod test_support;

pub use context::LedgerContext;
pub use ledger::{BalanceChange, BalanceLedger};
pub use redemption::{RedemptionCoordinator, RedemptionReceipt};
pub use settlement::{PaymentSettlement, ProcessPayment, SettlementReceipt};
