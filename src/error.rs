use crate::domain::currency::{CurrencyKind, UserId};
use crate::domain::payment::PaymentStatus;
use crate::domain::redemption::NotRedeemable;
use thiserror::Error;

/// Failures raised by the storage adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("record serialization error: {0}")]
    Codec(#[from] serde_json::Error),
    /// A guarded write found the stored record changed since it was read.
    #[error("write to {table} `{key}` lost a concurrent update")]
    Conflict { table: &'static str, key: String },
    /// A guarded insert found the key already committed by another writer.
    #[error("duplicate key `{key}` in {table}")]
    Duplicate { table: &'static str, key: String },
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("amount must be a positive integer, got {0}")]
    InvalidAmount(i64),
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },
    #[error("no {kind} balance for user {user_id}")]
    BalanceNotFound { user_id: UserId, kind: CurrencyKind },
    #[error("{entity} `{key}` was modified concurrently; re-read and resubmit")]
    OptimisticLockConflict { entity: &'static str, key: String },
    #[error("redemption code `{0}` not found")]
    CodeNotFound(String),
    #[error("redemption code `{code}` already exists")]
    CodeAlreadyExists { code: String },
    #[error("redemption code `{code}` cannot be redeemed: {reason}")]
    CodeNotRedeemable { code: String, reason: NotRedeemable },
    #[error("user {user_id} already redeemed code `{code}`")]
    UserAlreadyRedeemed { code: String, user_id: UserId },
    #[error("redemption code `{code}` has {current_uses} uses and cannot be deleted")]
    CodeCannotBeDeleted { code: String, current_uses: u32 },
    #[error("redemption code is invalid: {0}")]
    InvalidCode(String),
    #[error("payment request `{0}` not found")]
    PaymentRequestNotFound(String),
    #[error("payment request `{0}` already exists")]
    PaymentRequestAlreadyExists(String),
    #[error("payment request `{id}` is for {requested}, but {instructed} was instructed")]
    PaymentAmountMismatch {
        id: String,
        requested: i64,
        instructed: i64,
    },
    #[error("payment request `{id}` already processed ({status})")]
    PaymentRequestAlreadyProcessed { id: String, status: PaymentStatus },
    #[error("ledger entry `{0}` not found")]
    EntryNotFound(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl LedgerError {
    /// Whether re-running the whole operation from scratch may succeed.
    ///
    /// Business-rule violations are deterministic and never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::OptimisticLockConflict { .. } | Self::Storage(_))
    }

    /// Stable snake_case name of the error kind, used in telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::BalanceNotFound { .. } => "balance_not_found",
            Self::OptimisticLockConflict { .. } => "optimistic_lock_conflict",
            Self::CodeNotFound(_) => "code_not_found",
            Self::CodeAlreadyExists { .. } => "code_already_exists",
            Self::CodeNotRedeemable { .. } => "code_not_redeemable",
            Self::UserAlreadyRedeemed { .. } => "user_already_redeemed",
            Self::CodeCannotBeDeleted { .. } => "code_cannot_be_deleted",
            Self::InvalidCode(_) => "invalid_code",
            Self::PaymentRequestNotFound(_) => "payment_request_not_found",
            Self::PaymentRequestAlreadyExists(_) => "payment_request_already_exists",
            Self::PaymentAmountMismatch { .. } => "payment_amount_mismatch",
            Self::PaymentRequestAlreadyProcessed { .. } => "payment_request_already_processed",
            Self::EntryNotFound(_) => "entry_not_found",
            Self::Storage(_) => "storage_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
