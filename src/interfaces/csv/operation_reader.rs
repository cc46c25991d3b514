use super::InputError;
use crate::domain::currency::{CurrencyKind, UserId};
use crate::domain::redemption::UsageLimit;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum OperationType {
    Grant,
    Consume,
    IssueCode,
    Redeem,
    Pay,
    DeleteCode,
}

impl OperationType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Consume => "consume",
            Self::IssueCode => "issue_code",
            Self::Redeem => "redeem",
            Self::Pay => "pay",
            Self::DeleteCode => "delete_code",
        }
    }
}

/// One raw CSV row. Which columns are required depends on `op`.
#[derive(Debug, Deserialize)]
struct OperationRecord {
    op: OperationType,
    user: Option<String>,
    kind: Option<String>,
    amount: Option<i64>,
    reference: Option<String>,
    max_uses: Option<u32>,
}

/// A validated batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Grant {
        user_id: UserId,
        kind: CurrencyKind,
        amount: i64,
    },
    Consume {
        user_id: UserId,
        kind: CurrencyKind,
        amount: i64,
    },
    IssueCode {
        code: String,
        kind: CurrencyKind,
        amount: i64,
        usage_limit: UsageLimit,
    },
    Redeem {
        user_id: UserId,
        code: String,
    },
    /// Creates the payment request and settles it right away.
    Pay {
        user_id: UserId,
        payment_request_id: String,
        /// `None` pays with paid currency first, then free currency.
        kind: Option<CurrencyKind>,
        amount: i64,
    },
    DeleteCode {
        code: String,
    },
}

impl Operation {
    /// The user whose balances the operation touches, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Grant { user_id, .. }
            | Self::Consume { user_id, .. }
            | Self::Redeem { user_id, .. }
            | Self::Pay { user_id, .. } => Some(user_id),
            Self::IssueCode { .. } | Self::DeleteCode { .. } => None,
        }
    }
}

impl TryFrom<OperationRecord> for Operation {
    type Error = InputError;

    fn try_from(record: OperationRecord) -> Result<Self, Self::Error> {
        let op = record.op.as_str();
        let required = |value: Option<String>, field: &'static str| {
            value
                .filter(|v| !v.is_empty())
                .ok_or(InputError::MissingField { op, field })
        };
        let user = |value: Option<String>| required(value, "user").map(UserId::new);
        let amount = |value: Option<i64>| value.ok_or(InputError::MissingField { op, field: "amount" });
        let kind = |value: Option<String>| -> Result<Option<CurrencyKind>, InputError> {
            match value.filter(|v| !v.is_empty()) {
                None => Ok(None),
                Some(raw) => raw.parse().map(Some).map_err(InputError::InvalidKind),
            }
        };
        let kind_required = |value: Option<String>| -> Result<CurrencyKind, InputError> {
            kind(value)?.ok_or(InputError::MissingField { op, field: "kind" })
        };

        Ok(match record.op {
            OperationType::Grant => Self::Grant {
                user_id: user(record.user)?,
                kind: kind_required(record.kind)?,
                amount: amount(record.amount)?,
            },
            OperationType::Consume => Self::Consume {
                user_id: user(record.user)?,
                kind: kind_required(record.kind)?,
                amount: amount(record.amount)?,
            },
            OperationType::IssueCode => Self::IssueCode {
                code: required(record.reference, "reference")?,
                kind: kind_required(record.kind)?,
                amount: amount(record.amount)?,
                usage_limit: record
                    .max_uses
                    .map_or(UsageLimit::Unlimited, UsageLimit::Limited),
            },
            OperationType::Redeem => Self::Redeem {
                user_id: user(record.user)?,
                code: required(record.reference, "reference")?,
            },
            OperationType::Pay => Self::Pay {
                user_id: user(record.user)?,
                payment_request_id: required(record.reference, "reference")?,
                kind: kind(record.kind)?,
                amount: amount(record.amount)?,
            },
            OperationType::DeleteCode => Self::DeleteCode {
                code: required(record.reference, "reference")?,
            },
        })
    }
}

/// Reads operations from a CSV source.
///
/// Fields are trimmed and trailing columns may be omitted.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates rows, one result per row.
    pub fn operations(self) -> impl Iterator<Item = Result<Operation, InputError>> {
        self.reader
            .into_deserialize::<OperationRecord>()
            .map(|result| Operation::try_from(result?))
    }
}
