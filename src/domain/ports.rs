use super::balance::Balance;
use super::currency::{CurrencyKind, UserId};
use super::entry::LedgerEntry;
use super::payment::{PaymentRequest, PaymentStatus};
use super::redemption::{CodeRedemption, RedemptionCode};
use crate::error::{LedgerError, StoreError};
use async_trait::async_trait;
use std::sync::Arc;

/// Names of the persisted collections, as reported in [`StoreError`]s.
pub mod tables {
    pub const BALANCES: &str = "balances";
    pub const LEDGER_ENTRIES: &str = "ledger_entries";
    pub const LEDGER_ENTRIES_BY_USER: &str = "ledger_entries_by_user";
    pub const LEDGER_ENTRIES_BY_CORRELATION: &str = "ledger_entries_by_correlation";
    pub const REDEMPTION_CODES: &str = "redemption_codes";
    pub const CODE_REDEMPTIONS: &str = "code_redemptions";
    pub const PAYMENT_REQUESTS: &str = "payment_requests";
}

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Result of a conditional update: `Stale` means zero rows matched the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum UpdateOutcome {
    Applied,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum DeleteOutcome {
    Deleted,
    Missing,
    InUse,
}

#[async_trait]
pub trait BalanceRepository: Send {
    async fn find(&mut self, user_id: &UserId, kind: CurrencyKind) -> Result<Option<Balance>, StoreError>;
    /// Creates the row only if no row exists for (user, kind).
    async fn create(&mut self, balance: &Balance) -> Result<InsertOutcome, StoreError>;
    /// Replaces the row only if the stored version equals `expected_version`.
    async fn save(&mut self, balance: &Balance, expected_version: u64) -> Result<UpdateOutcome, StoreError>;
}

#[async_trait]
pub trait LedgerEntryRepository: Send {
    async fn append(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;
    async fn find(&mut self, entry_id: &str) -> Result<Option<LedgerEntry>, StoreError>;
    async fn find_by_correlation(&mut self, correlation_id: &str) -> Result<Vec<LedgerEntry>, StoreError>;
    async fn find_by_user(&mut self, user_id: &UserId) -> Result<Vec<LedgerEntry>, StoreError>;
}

#[async_trait]
pub trait RedemptionCodeRepository: Send {
    async fn find(&mut self, code: &str) -> Result<Option<RedemptionCode>, StoreError>;
    async fn create(&mut self, code: &RedemptionCode) -> Result<InsertOutcome, StoreError>;
    /// Replaces the code only if its stored use count equals `expected_uses`.
    async fn update(&mut self, code: &RedemptionCode, expected_uses: u32) -> Result<UpdateOutcome, StoreError>;
    async fn delete_if_unused(&mut self, code: &str) -> Result<DeleteOutcome, StoreError>;
    /// Inserts the redemption record, enforcing one row per (code, user).
    async fn insert_redemption(&mut self, redemption: &CodeRedemption) -> Result<InsertOutcome, StoreError>;
    async fn has_redeemed(&mut self, code: &str, user_id: &UserId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait PaymentRequestRepository: Send {
    async fn find(&mut self, payment_request_id: &str) -> Result<Option<PaymentRequest>, StoreError>;
    async fn create(&mut self, request: &PaymentRequest) -> Result<InsertOutcome, StoreError>;
    /// Replaces the request only while the stored one is still pending.
    async fn update(&mut self, request: &PaymentRequest) -> Result<UpdateOutcome, StoreError>;
}

/// One atomic storage transaction.
///
/// Nothing written through the repositories is visible to other
/// transactions until [`StoreTransaction::commit`] succeeds. Dropping the
/// transaction without committing discards every write, which is also what
/// happens when the owning future is cancelled.
#[async_trait]
pub trait StoreTransaction: Send {
    fn balances(&mut self) -> &mut dyn BalanceRepository;
    fn entries(&mut self) -> &mut dyn LedgerEntryRepository;
    fn codes(&mut self) -> &mut dyn RedemptionCodeRepository;
    fn payments(&mut self) -> &mut dyn PaymentRequestRepository;
    async fn commit(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

pub type UnitOfWorkRef = Arc<dyn UnitOfWork>;

/// Something worth reporting that happened inside the core.
#[derive(Debug)]
pub enum LedgerEvent<'a> {
    EntryRecorded(&'a LedgerEntry),
    CodeRedeemed {
        code: &'a str,
        user_id: &'a UserId,
        redemption_id: &'a str,
    },
    PaymentSettled {
        payment_request_id: &'a str,
        status: PaymentStatus,
        total: i64,
    },
    Rejected {
        operation: &'static str,
        error: &'a LedgerError,
    },
}

/// Receives core events; the logging/metrics side of the system.
pub trait LedgerObserver: Send + Sync {
    fn record(&self, event: LedgerEvent<'_>);
}

pub type ObserverRef = Arc<dyn LedgerObserver>;
