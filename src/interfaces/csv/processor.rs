use super::balance_writer::UserBalances;
use super::operation_reader::Operation;
use crate::application::{
    BalanceLedger, LedgerContext, PaymentSettlement, ProcessPayment, RedemptionCoordinator,
};
use crate::config::LedgerConfig;
use crate::domain::currency::{CurrencyKind, Metadata, UserId};
use crate::domain::payment::NewPaymentRequest;
use crate::domain::redemption::NewRedemptionCode;
use crate::error::Result;
use chrono::Duration;
use std::collections::BTreeSet;

const BATCH_CODE_KIND: &str = "batch";
const BATCH_CURRENCY_LABEL: &str = "ledger";
const BATCH_METHOD: &str = "batch";

/// Applies batch operations in order and remembers which users they touched.
pub struct OperationProcessor {
    ctx: LedgerContext,
    ledger: BalanceLedger,
    redemptions: RedemptionCoordinator,
    settlement: PaymentSettlement,
    code_validity: Duration,
    touched: BTreeSet<UserId>,
}

impl OperationProcessor {
    pub fn new(ctx: LedgerContext, config: &LedgerConfig) -> Self {
        Self {
            ledger: BalanceLedger::new(ctx.clone()),
            redemptions: RedemptionCoordinator::new(ctx.clone()),
            settlement: PaymentSettlement::new(ctx.clone()),
            ctx,
            code_validity: config.code_validity,
            touched: BTreeSet::new(),
        }
    }

    /// Applies one operation. A failure leaves the touched set unchanged.
    pub async fn apply(&mut self, operation: Operation) -> Result<()> {
        let user_id = operation.user_id().cloned();
        match operation {
            Operation::Grant {
                user_id,
                kind,
                amount,
            } => {
                self.ledger
                    .grant(&user_id, kind, amount, batch_metadata())
                    .await?;
            }
            Operation::Consume {
                user_id,
                kind,
                amount,
            } => {
                self.ledger
                    .consume(&user_id, kind, amount, batch_metadata())
                    .await?;
            }
            Operation::IssueCode {
                code,
                kind,
                amount,
                usage_limit,
            } => {
                let valid_from = self.ctx.now();
                self.redemptions
                    .create_code(NewRedemptionCode {
                        code,
                        code_kind: BATCH_CODE_KIND.to_string(),
                        kind,
                        amount,
                        usage_limit,
                        valid_from,
                        valid_until: valid_from + self.code_validity,
                        metadata: batch_metadata(),
                    })
                    .await?;
            }
            Operation::Redeem { user_id, code } => {
                self.redemptions.redeem(&code, &user_id).await?;
            }
            Operation::Pay {
                user_id,
                payment_request_id,
                kind,
                amount,
            } => {
                self.pay(user_id, payment_request_id, kind, amount).await?;
            }
            Operation::DeleteCode { code } => {
                self.redemptions.delete_code(&code).await?;
            }
        }
        if let Some(user_id) = user_id {
            self.touched.insert(user_id);
        }
        Ok(())
    }

    /// Current balances of every touched user, sorted by user.
    pub async fn balances(&self) -> Result<Vec<UserBalances>> {
        let mut rows = Vec::with_capacity(self.touched.len());
        for user_id in &self.touched {
            let mut row = UserBalances {
                user: user_id.clone(),
                paid: 0,
                free: 0,
            };
            for balance in self.ledger.balances(user_id).await? {
                match balance.kind {
                    CurrencyKind::Paid => row.paid = balance.amount,
                    CurrencyKind::Free => row.free = balance.amount,
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    async fn pay(
        &mut self,
        user_id: UserId,
        payment_request_id: String,
        kind: Option<CurrencyKind>,
        amount: i64,
    ) -> Result<()> {
        self.settlement
            .create_payment_request(NewPaymentRequest {
                payment_request_id: payment_request_id.clone(),
                user_id: user_id.clone(),
                amount,
                currency_label: BATCH_CURRENCY_LABEL.to_string(),
                kind,
                details: Metadata::new(),
            })
            .await?;
        let outcome = self
            .settlement
            .process_payment(ProcessPayment {
                payment_request_id,
                user_id: user_id.clone(),
                method_name: BATCH_METHOD.to_string(),
                amount,
                currency_label: BATCH_CURRENCY_LABEL.to_string(),
                details: Metadata::new(),
            })
            .await;
        // A failed settlement is still recorded against the user.
        self.touched.insert(user_id);
        outcome.map(|_| ())
    }
}

fn batch_metadata() -> Metadata {
    Metadata::new().with("source", "csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::redemption::UsageLimit;
    use crate::error::LedgerError;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::infrastructure::telemetry::TracingObserver;
    use mockable::DefaultClock;
    use std::sync::Arc;

    fn processor() -> OperationProcessor {
        let ctx = LedgerContext::new(
            Arc::new(InMemoryStore::in_memory()),
            Arc::new(DefaultClock),
            Arc::new(TracingObserver),
        );
        OperationProcessor::new(ctx, &LedgerConfig::default())
    }

    fn grant(user: &str, kind: CurrencyKind, amount: i64) -> Operation {
        Operation::Grant {
            user_id: UserId::from(user),
            kind,
            amount,
        }
    }

    #[tokio::test]
    async fn test_batch_flow() {
        let mut processor = processor();
        processor
            .apply(grant("bob", CurrencyKind::Paid, 500))
            .await
            .unwrap();
        processor
            .apply(Operation::IssueCode {
                code: "WELCOME".to_string(),
                kind: CurrencyKind::Free,
                amount: 300,
                usage_limit: UsageLimit::Limited(1),
            })
            .await
            .unwrap();
        processor
            .apply(Operation::Redeem {
                user_id: UserId::from("bob"),
                code: "WELCOME".to_string(),
            })
            .await
            .unwrap();
        processor
            .apply(Operation::Pay {
                user_id: UserId::from("bob"),
                payment_request_id: "pr-1".to_string(),
                kind: None,
                amount: 700,
            })
            .await
            .unwrap();

        let rows = processor.balances().await.unwrap();
        assert_eq!(
            rows,
            vec![UserBalances {
                user: UserId::from("bob"),
                paid: 0,
                free: 100,
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_operation_does_not_touch_user() {
        let mut processor = processor();
        let result = processor
            .apply(Operation::Consume {
                user_id: UserId::from("carol"),
                kind: CurrencyKind::Paid,
                amount: 10,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
        assert!(processor.balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_payment_still_reports_user() {
        let mut processor = processor();
        let result = processor
            .apply(Operation::Pay {
                user_id: UserId::from("dave"),
                payment_request_id: "pr-9".to_string(),
                kind: Some(CurrencyKind::Paid),
                amount: 10,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
        let rows = processor.balances().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].paid, 0);
    }

    #[tokio::test]
    async fn test_rows_sorted_by_user() {
        let mut processor = processor();
        for user in ["zoe", "amy", "mia"] {
            processor
                .apply(grant(user, CurrencyKind::Free, 1))
                .await
                .unwrap();
        }
        let users: Vec<_> = processor
            .balances()
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.user.to_string())
            .collect();
        assert_eq!(users, vec!["amy", "mia", "zoe"]);
    }
}
