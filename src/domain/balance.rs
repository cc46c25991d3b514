use super::currency::{Amount, CurrencyKind, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The balance of one currency kind held by one user.
///
/// `version` is the optimistic-concurrency token: a write is accepted only
/// when the caller's expected version matches the stored one, and every
/// accepted write advances it by exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub kind: CurrencyKind,
    pub amount: i64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// A freshly created row, at version 0, holding the first grant.
    pub fn opened(user_id: UserId, kind: CurrencyKind, amount: Amount, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kind,
            amount: amount.value(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A zero balance that has never been persisted.
    pub fn empty(user_id: UserId, kind: CurrencyKind, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kind,
            amount: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the next version of this balance with `amount` added.
    pub fn credited(&self, amount: Amount, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let total = self
            .amount
            .checked_add(amount.value())
            .ok_or(LedgerError::InvalidAmount(amount.value()))?;
        Ok(self.advanced(total, now))
    }

    /// Returns the next version of this balance with `amount` removed.
    pub fn debited(&self, amount: Amount, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        if amount.value() > self.amount {
            return Err(LedgerError::InsufficientBalance {
                requested: amount.value(),
                available: self.amount,
            });
        }
        Ok(self.advanced(self.amount - amount.value(), now))
    }

    fn advanced(&self, amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            amount,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        }
    }
}
