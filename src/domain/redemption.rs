use super::currency::{Amount, CurrencyKind, Metadata, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many times a code may be redeemed in total.
///
/// `Limited(0)` is a code that can never be redeemed; there is no sentinel
/// value standing in for "unlimited".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "max_uses")]
pub enum UsageLimit {
    Unlimited,
    Limited(u32),
}

impl UsageLimit {
    pub fn allows(&self, current_uses: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max_uses) => current_uses < *max_uses,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Active,
    Disabled,
}

/// Why a code cannot be redeemed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotRedeemable {
    Disabled,
    NotYetValid,
    Expired,
    Exhausted,
}

impl fmt::Display for NotRedeemable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Disabled => "code is disabled",
            Self::NotYetValid => "code is not valid yet",
            Self::Expired => "code has expired",
            Self::Exhausted => "code has no uses left",
        };
        f.write_str(reason)
    }
}

/// A promotional code that converts into a currency grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedemptionCode {
    pub code: String,
    pub code_kind: String,
    pub kind: CurrencyKind,
    pub amount: Amount,
    pub usage_limit: UsageLimit,
    pub current_uses: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub status: CodeStatus,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RedemptionCode {
    /// Checks every redeemability condition at instant `now`.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), NotRedeemable> {
        if self.status != CodeStatus::Active {
            return Err(NotRedeemable::Disabled);
        }
        if now < self.valid_from {
            return Err(NotRedeemable::NotYetValid);
        }
        if now > self.valid_until {
            return Err(NotRedeemable::Expired);
        }
        if !self.usage_limit.allows(self.current_uses) {
            return Err(NotRedeemable::Exhausted);
        }
        Ok(())
    }

    pub fn with_use_recorded(&self, now: DateTime<Utc>) -> Self {
        Self {
            current_uses: self.current_uses + 1,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: CodeStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Administrative request to issue a new code.
#[derive(Debug, Clone)]
pub struct NewRedemptionCode {
    pub code: String,
    pub code_kind: String,
    pub kind: CurrencyKind,
    pub amount: i64,
    pub usage_limit: UsageLimit,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub metadata: Metadata,
}

impl NewRedemptionCode {
    pub fn into_code(self, now: DateTime<Utc>) -> Result<RedemptionCode, LedgerError> {
        let amount = Amount::new(self.amount)?;
        if self.code.trim().is_empty() {
            return Err(LedgerError::InvalidCode("code must not be empty".to_string()));
        }
        if self.valid_from >= self.valid_until {
            return Err(LedgerError::InvalidCode(format!(
                "validity window of `{}` is empty",
                self.code
            )));
        }
        Ok(RedemptionCode {
            code: self.code,
            code_kind: self.code_kind,
            kind: self.kind,
            amount,
            usage_limit: self.usage_limit,
            current_uses: 0,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            status: CodeStatus::Active,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Proof that `user_id` redeemed `code`. At most one exists per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRedemption {
    pub redemption_id: String,
    pub code: String,
    pub user_id: UserId,
    pub entry_id: String,
    pub created_at: DateTime<Utc>,
}
