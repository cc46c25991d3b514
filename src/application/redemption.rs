use super::context::{LedgerContext, commit_error};
use super::ledger::grant_in;
use crate::domain::balance::Balance;
use crate::domain::currency::{Metadata, UserId};
use crate::domain::entry::{EntryDraft, EntryType, new_id};
use crate::domain::ports::{DeleteOutcome, InsertOutcome, LedgerEvent, UpdateOutcome, tables};
use crate::domain::redemption::{CodeRedemption, CodeStatus, NewRedemptionCode, RedemptionCode};
use crate::error::{LedgerError, Result, StoreError};

/// What a successful redemption produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionReceipt {
    pub redemption_id: String,
    pub entry_id: String,
    pub code: RedemptionCode,
    pub balance: Balance,
}

/// Turns promotional codes into currency grants, once per user.
#[derive(Clone)]
pub struct RedemptionCoordinator {
    ctx: LedgerContext,
}

impl RedemptionCoordinator {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    pub async fn create_code(&self, request: NewRedemptionCode) -> Result<RedemptionCode> {
        let result = self.create_code_inner(request).await;
        self.ctx.report("create_code", result)
    }

    pub async fn code(&self, code: &str) -> Result<RedemptionCode> {
        let mut tx = self.ctx.begin().await?;
        tx.codes()
            .find(code)
            .await?
            .ok_or_else(|| LedgerError::CodeNotFound(code.to_string()))
    }

    pub async fn has_redeemed(&self, code: &str, user_id: &UserId) -> Result<bool> {
        let mut tx = self.ctx.begin().await?;
        Ok(tx.codes().has_redeemed(code, user_id).await?)
    }

    pub async fn disable_code(&self, code: &str) -> Result<RedemptionCode> {
        let result = self.set_status(code, CodeStatus::Disabled).await;
        self.ctx.report("disable_code", result)
    }

    pub async fn enable_code(&self, code: &str) -> Result<RedemptionCode> {
        let result = self.set_status(code, CodeStatus::Active).await;
        self.ctx.report("enable_code", result)
    }

    /// Deletes a code nobody has redeemed yet.
    pub async fn delete_code(&self, code: &str) -> Result<()> {
        let result = self.delete_code_inner(code).await;
        self.ctx.report("delete_code", result)
    }

    /// Redeems `code` for `user_id`.
    ///
    /// The redemption record, the use count, the balance and the ledger entry
    /// are committed together or not at all.
    pub async fn redeem(&self, code: &str, user_id: &UserId) -> Result<RedemptionReceipt> {
        let mut result = self.redeem_inner(code, user_id).await;
        // Losing a race to this same user's redemption is a duplicate, not a conflict.
        if matches!(result, Err(LedgerError::OptimisticLockConflict { .. })) {
            match self.has_redeemed(code, user_id).await {
                Ok(true) => {
                    result = Err(LedgerError::UserAlreadyRedeemed {
                        code: code.to_string(),
                        user_id: user_id.clone(),
                    });
                }
                Ok(false) => {}
                Err(error) => {
                    self.ctx.reject("redeem", &error);
                }
            }
        }
        self.ctx.report("redeem", result)
    }

    async fn redeem_inner(&self, code: &str, user_id: &UserId) -> Result<RedemptionReceipt> {
        let now = self.ctx.now();
        let mut tx = self.ctx.begin().await?;

        let current = tx
            .codes()
            .find(code)
            .await?
            .ok_or_else(|| LedgerError::CodeNotFound(code.to_string()))?;
        let already_redeemed = || LedgerError::UserAlreadyRedeemed {
            code: code.to_string(),
            user_id: user_id.clone(),
        };

        // A prior redemption by this user wins over exhaustion, so a repeated
        // attempt reports the duplicate rather than "no uses left".
        if tx.codes().has_redeemed(code, user_id).await? {
            return Err(already_redeemed());
        }
        current
            .check_redeemable(now)
            .map_err(|reason| LedgerError::CodeNotRedeemable {
                code: code.to_string(),
                reason,
            })?;

        let redemption_id = new_id();
        let metadata = Metadata::new()
            .with("code", current.code.as_str())
            .with("code_kind", current.code_kind.as_str());
        let draft = EntryDraft::correlated(EntryType::Redemption, redemption_id.as_str(), metadata);
        let redemption = CodeRedemption {
            redemption_id: redemption_id.clone(),
            code: current.code.clone(),
            user_id: user_id.clone(),
            entry_id: draft.entry_id.clone(),
            created_at: now,
        };

        // The uniqueness constraint is the authority, not the read above.
        if tx.codes().insert_redemption(&redemption).await? == InsertOutcome::Duplicate {
            return Err(already_redeemed());
        }

        let updated = current.with_use_recorded(now);
        if tx.codes().update(&updated, current.current_uses).await? == UpdateOutcome::Stale {
            return Err(LedgerError::OptimisticLockConflict {
                entity: tables::REDEMPTION_CODES,
                key: code.to_string(),
            });
        }

        let change = grant_in(
            tx.as_mut(),
            &self.ctx,
            user_id,
            current.kind,
            current.amount,
            draft,
        )
        .await?;

        tx.commit().await.map_err(|err| match err {
            StoreError::Duplicate { table, .. } if table == tables::CODE_REDEMPTIONS => {
                already_redeemed()
            }
            other => commit_error(other),
        })?;

        self.ctx.emit(LedgerEvent::CodeRedeemed {
            code,
            user_id,
            redemption_id: &redemption_id,
        });
        self.ctx.emit(LedgerEvent::EntryRecorded(&change.entry));

        Ok(RedemptionReceipt {
            redemption_id,
            entry_id: change.entry.entry_id,
            code: updated,
            balance: change.balance,
        })
    }

    async fn create_code_inner(&self, request: NewRedemptionCode) -> Result<RedemptionCode> {
        let code = request.into_code(self.ctx.now())?;
        let exists = || LedgerError::CodeAlreadyExists {
            code: code.code.clone(),
        };

        let mut tx = self.ctx.begin().await?;
        if tx.codes().create(&code).await? == InsertOutcome::Duplicate {
            return Err(exists());
        }
        tx.commit().await.map_err(|err| match err {
            StoreError::Duplicate { .. } => exists(),
            other => commit_error(other),
        })?;
        Ok(code)
    }

    async fn set_status(&self, code: &str, status: CodeStatus) -> Result<RedemptionCode> {
        let now = self.ctx.now();
        let mut tx = self.ctx.begin().await?;
        let current = tx
            .codes()
            .find(code)
            .await?
            .ok_or_else(|| LedgerError::CodeNotFound(code.to_string()))?;

        let updated = current.with_status(status, now);
        if tx.codes().update(&updated, current.current_uses).await? == UpdateOutcome::Stale {
            return Err(LedgerError::OptimisticLockConflict {
                entity: tables::REDEMPTION_CODES,
                key: code.to_string(),
            });
        }
        tx.commit().await.map_err(commit_error)?;
        Ok(updated)
    }

    async fn delete_code_inner(&self, code: &str) -> Result<()> {
        let mut tx = self.ctx.begin().await?;
        match tx.codes().delete_if_unused(code).await? {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::Missing => return Err(LedgerError::CodeNotFound(code.to_string())),
            DeleteOutcome::InUse => return Err(in_use(code, tx.codes().find(code).await?)),
        }
        match tx.commit().await {
            Ok(()) => Ok(()),
            // Redeemed between our read and the commit.
            Err(StoreError::Conflict { .. }) => {
                let mut fresh = self.ctx.begin().await?;
                Err(in_use(code, fresh.codes().find(code).await?))
            }
            Err(other) => Err(commit_error(other)),
        }
    }
}

fn in_use(code: &str, current: Option<RedemptionCode>) -> LedgerError {
    match current {
        Some(current) => LedgerError::CodeCannotBeDeleted {
            code: current.code,
            current_uses: current.current_uses,
        },
        None => LedgerError::CodeNotFound(code.to_string()),
    }
}
