use super::currency::{Amount, CurrencyKind, Metadata, UserId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(status)
    }
}

/// An externally initiated request to pay with ledger currency.
///
/// Status only ever moves from `Pending` to one of the terminal states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub payment_request_id: String,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency_label: String,
    /// `None` pays with paid currency first, then free currency.
    pub kind: Option<CurrencyKind>,
    pub status: PaymentStatus,
    pub method_data: Metadata,
    pub details: Metadata,
    pub response: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    /// Moves the request into a terminal state.
    pub fn settled(
        &self,
        status: PaymentStatus,
        method_data: Metadata,
        details: Metadata,
        response: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        debug_assert!(status != PaymentStatus::Pending);
        Self {
            status,
            method_data,
            details,
            response,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentRequest {
    pub payment_request_id: String,
    pub user_id: UserId,
    pub amount: i64,
    pub currency_label: String,
    pub kind: Option<CurrencyKind>,
    pub details: Metadata,
}

impl NewPaymentRequest {
    pub fn into_request(self, now: DateTime<Utc>) -> Result<PaymentRequest, LedgerError> {
        Ok(PaymentRequest {
            amount: Amount::new(self.amount)?,
            payment_request_id: self.payment_request_id,
            user_id: self.user_id,
            currency_label: self.currency_label,
            kind: self.kind,
            status: PaymentStatus::Pending,
            method_data: Metadata::new(),
            details: self.details,
            response: Metadata::new(),
            created_at: now,
            updated_at: now,
        })
    }
}
