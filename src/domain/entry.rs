use super::currency::{CurrencyKind, Metadata, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Grant,
    Consume,
    Payment,
    Redemption,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Consume => "consume",
            Self::Payment => "payment",
            Self::Redemption => "redemption",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Completed,
    Failed,
}

/// Immutable audit record of one balance mutation attempt.
///
/// For a given (user, kind), `balance_after` of an entry equals
/// `balance_before` of the next one in chronological order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub user_id: UserId,
    pub kind: CurrencyKind,
    pub entry_type: EntryType,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub status: EntryStatus,
    /// Groups the legs of one multi-step operation.
    pub correlation_id: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// How a mutation should be recorded; supplied by whoever drives the ledger.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub entry_id: String,
    pub entry_type: EntryType,
    pub correlation_id: String,
    pub metadata: Metadata,
}

impl EntryDraft {
    /// A standalone entry, correlated to itself.
    pub fn standalone(entry_type: EntryType, metadata: Metadata) -> Self {
        let entry_id = new_id();
        Self {
            correlation_id: entry_id.clone(),
            entry_id,
            entry_type,
            metadata,
        }
    }

    /// An entry belonging to a larger operation identified by `correlation_id`.
    pub fn correlated(
        entry_type: EntryType,
        correlation_id: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            entry_id: new_id(),
            entry_type,
            correlation_id: correlation_id.into(),
            metadata,
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
