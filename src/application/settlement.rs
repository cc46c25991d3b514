use super::context::{LedgerContext, commit_error};
use super::ledger::{available_in, consume_in};
use crate::domain::currency::{Amount, Metadata, UserId};
use crate::domain::entry::{EntryDraft, EntryStatus, EntryType, LedgerEntry, new_id};
use crate::domain::payment::{NewPaymentRequest, PaymentRequest, PaymentStatus};
use crate::domain::planner::{self, ConsumptionPolicy};
use crate::domain::ports::{InsertOutcome, LedgerEvent, StoreTransaction, UpdateOutcome, tables};
use crate::error::{LedgerError, Result, StoreError};
use serde_json::json;

/// Instruction to pay a pending request with ledger currency.
#[derive(Debug, Clone)]
pub struct ProcessPayment {
    pub payment_request_id: String,
    pub user_id: UserId,
    pub method_name: String,
    pub amount: i64,
    pub currency_label: String,
    pub details: Metadata,
}

/// Outcome of a completed settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReceipt {
    pub payment: PaymentRequest,
    /// One entry per consumed currency kind, in consumption order.
    pub entries: Vec<LedgerEntry>,
    pub total_consumed: i64,
}

/// Settles payment requests against the user's balances.
#[derive(Clone)]
pub struct PaymentSettlement {
    ctx: LedgerContext,
}

impl PaymentSettlement {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    pub async fn create_payment_request(&self, request: NewPaymentRequest) -> Result<PaymentRequest> {
        let result = self.create_inner(request).await;
        self.ctx.report("create_payment_request", result)
    }

    pub async fn payment_request(&self, payment_request_id: &str) -> Result<PaymentRequest> {
        let mut tx = self.ctx.begin().await?;
        tx.payments()
            .find(payment_request_id)
            .await?
            .ok_or_else(|| LedgerError::PaymentRequestNotFound(payment_request_id.to_string()))
    }

    /// Pays a pending request.
    ///
    /// Every leg's balance update and entry, plus the request's terminal
    /// state, commit together. When the balances cannot cover the amount the
    /// request is marked failed (with a failed entry) in the same commit and
    /// `InsufficientBalance` is returned.
    pub async fn process_payment(&self, command: ProcessPayment) -> Result<SettlementReceipt> {
        let id = command.payment_request_id.clone();
        let mut result = self.process_inner(command).await;
        // A conflict caused by a concurrent settlement of the same request.
        if matches!(result, Err(LedgerError::OptimisticLockConflict { .. })) {
            match self.settled_meanwhile(&id).await {
                Ok(Some(status)) => {
                    result = Err(LedgerError::PaymentRequestAlreadyProcessed { id, status });
                }
                Ok(None) => {}
                Err(error) => {
                    self.ctx.reject("process_payment", &error);
                }
            }
        }
        self.ctx.report("process_payment", result)
    }

    async fn create_inner(&self, request: NewPaymentRequest) -> Result<PaymentRequest> {
        let request = request.into_request(self.ctx.now())?;
        let exists = || LedgerError::PaymentRequestAlreadyExists(request.payment_request_id.clone());

        let mut tx = self.ctx.begin().await?;
        if tx.payments().create(&request).await? == InsertOutcome::Duplicate {
            return Err(exists());
        }
        tx.commit().await.map_err(|err| match err {
            StoreError::Duplicate { .. } => exists(),
            other => commit_error(other),
        })?;
        Ok(request)
    }

    async fn process_inner(&self, command: ProcessPayment) -> Result<SettlementReceipt> {
        Amount::new(command.amount)?;
        let id = command.payment_request_id.as_str();
        let mut tx = self.ctx.begin().await?;

        let request = tx
            .payments()
            .find(id)
            .await?
            // A request is only visible to the user it was issued for.
            .filter(|request| request.user_id == command.user_id)
            .ok_or_else(|| LedgerError::PaymentRequestNotFound(id.to_string()))?;
        if !request.is_pending() {
            return Err(LedgerError::PaymentRequestAlreadyProcessed {
                id: id.to_string(),
                status: request.status,
            });
        }
        // The instruction must pay exactly what was requested.
        if command.amount != request.amount.value() {
            return Err(LedgerError::PaymentAmountMismatch {
                id: id.to_string(),
                requested: request.amount.value(),
                instructed: command.amount,
            });
        }
        let amount = request.amount;

        let policy = ConsumptionPolicy::for_kind(request.kind);
        let available = available_in(tx.as_mut(), &command.user_id).await?;
        let now = self.ctx.now();
        let method_data = Metadata::new().with("method", command.method_name.as_str());
        let leg_metadata = Metadata::new()
            .with("method", command.method_name.as_str())
            .with("currency_label", command.currency_label.as_str());

        let plan = match planner::plan(amount, policy, available) {
            Ok(plan) => plan,
            Err(LedgerError::InsufficientBalance {
                requested,
                available: total,
            }) => {
                let kind = policy.primary();
                let held = available.get(kind);
                let failed_entry = LedgerEntry {
                    entry_id: new_id(),
                    user_id: command.user_id.clone(),
                    kind,
                    entry_type: EntryType::Payment,
                    amount: requested,
                    balance_before: held,
                    balance_after: held,
                    status: EntryStatus::Failed,
                    correlation_id: id.to_string(),
                    metadata: leg_metadata,
                    created_at: now,
                };
                tx.entries().append(&failed_entry).await?;

                let response = Metadata::new()
                    .with("error", "insufficient_balance")
                    .with("requested", requested)
                    .with("available", total);
                let failed =
                    request.settled(PaymentStatus::Failed, method_data, command.details, response, now);
                self.finish(tx.as_mut(), &failed).await?;
                tx.commit().await.map_err(commit_error)?;

                self.ctx.emit(LedgerEvent::EntryRecorded(&failed_entry));
                self.ctx.emit(LedgerEvent::PaymentSettled {
                    payment_request_id: id,
                    status: PaymentStatus::Failed,
                    total: 0,
                });
                return Err(LedgerError::InsufficientBalance {
                    requested,
                    available: total,
                });
            }
            Err(other) => return Err(other),
        };

        let mut entries = Vec::with_capacity(plan.legs().len());
        for leg in plan.legs() {
            let draft = EntryDraft::correlated(EntryType::Payment, id, leg_metadata.clone());
            let change =
                consume_in(tx.as_mut(), &self.ctx, &command.user_id, leg.kind, leg.amount, draft)
                    .await?;
            entries.push(change.entry);
        }
        let total_consumed = plan.total();

        let legs: Vec<_> = entries
            .iter()
            .map(|entry| {
                json!({
                    "kind": entry.kind,
                    "amount": entry.amount,
                    "entry_id": entry.entry_id,
                })
            })
            .collect();
        let response = Metadata::new()
            .with("total_consumed", total_consumed)
            .with("legs", legs);
        let completed = request.settled(
            PaymentStatus::Completed,
            method_data,
            command.details,
            response,
            now,
        );
        self.finish(tx.as_mut(), &completed).await?;
        tx.commit().await.map_err(commit_error)?;

        for entry in &entries {
            self.ctx.emit(LedgerEvent::EntryRecorded(entry));
        }
        self.ctx.emit(LedgerEvent::PaymentSettled {
            payment_request_id: id,
            status: PaymentStatus::Completed,
            total: total_consumed,
        });

        Ok(SettlementReceipt {
            payment: completed,
            entries,
            total_consumed,
        })
    }

    /// Writes the terminal state, which only succeeds while the stored request is pending.
    async fn finish(&self, tx: &mut dyn StoreTransaction, settled: &PaymentRequest) -> Result<()> {
        if tx.payments().update(settled).await? == UpdateOutcome::Stale {
            return Err(LedgerError::OptimisticLockConflict {
                entity: tables::PAYMENT_REQUESTS,
                key: settled.payment_request_id.clone(),
            });
        }
        Ok(())
    }

    /// The terminal status of a request that is no longer pending.
    async fn settled_meanwhile(&self, payment_request_id: &str) -> Result<Option<PaymentStatus>> {
        let mut tx = self.ctx.begin().await?;
        let request = tx.payments().find(payment_request_id).await?;
        Ok(request
            .filter(|request| !request.is_pending())
            .map(|request| request.status))
    }
}
