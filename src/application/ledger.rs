use super::context::{LedgerContext, commit_error};
use crate::domain::balance::Balance;
use crate::domain::currency::{Amount, CurrencyKind, Metadata, UserId};
use crate::domain::entry::{EntryDraft, EntryStatus, EntryType, LedgerEntry};
use crate::domain::planner::Available;
use crate::domain::ports::{InsertOutcome, LedgerEvent, StoreTransaction, UpdateOutcome, tables};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};

/// Direction of a single-kind balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Grant,
    Consume,
}

impl Mutation {
    fn entry_type(self) -> EntryType {
        match self {
            Self::Grant => EntryType::Grant,
            Self::Consume => EntryType::Consume,
        }
    }
}

/// The balance and audit entry produced by one successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub balance: Balance,
    pub entry: LedgerEntry,
}

/// Reads, grants and consumes single-kind balances.
///
/// Conflicting writes are never retried here: an `OptimisticLockConflict`
/// goes back to the caller, who must re-read and resubmit.
#[derive(Clone)]
pub struct BalanceLedger {
    ctx: LedgerContext,
}

impl BalanceLedger {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    pub async fn read(&self, user_id: &UserId, kind: CurrencyKind) -> Result<Balance> {
        let mut tx = self.ctx.begin().await?;
        tx.balances()
            .find(user_id, kind)
            .await?
            .ok_or_else(|| LedgerError::BalanceNotFound {
                user_id: user_id.clone(),
                kind,
            })
    }

    /// Both balances of a user; kinds without a row are reported as zero.
    pub async fn balances(&self, user_id: &UserId) -> Result<Vec<Balance>> {
        let now = self.ctx.now();
        let mut tx = self.ctx.begin().await?;
        let mut balances = Vec::with_capacity(CurrencyKind::PRIORITY.len());
        for kind in CurrencyKind::PRIORITY {
            let balance = tx
                .balances()
                .find(user_id, kind)
                .await?
                .unwrap_or_else(|| Balance::empty(user_id.clone(), kind, now));
            balances.push(balance);
        }
        Ok(balances)
    }

    pub async fn grant(
        &self,
        user_id: &UserId,
        kind: CurrencyKind,
        amount: i64,
        metadata: Metadata,
    ) -> Result<BalanceChange> {
        let result = self
            .mutate(user_id, kind, amount, Mutation::Grant, metadata)
            .await;
        self.ctx.report("grant", result)
    }

    pub async fn consume(
        &self,
        user_id: &UserId,
        kind: CurrencyKind,
        amount: i64,
        metadata: Metadata,
    ) -> Result<BalanceChange> {
        let result = self
            .mutate(user_id, kind, amount, Mutation::Consume, metadata)
            .await;
        self.ctx.report("consume", result)
    }

    pub async fn entry(&self, entry_id: &str) -> Result<LedgerEntry> {
        let mut tx = self.ctx.begin().await?;
        tx.entries()
            .find(entry_id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))
    }

    /// Every entry of a user, oldest first.
    pub async fn history(&self, user_id: &UserId) -> Result<Vec<LedgerEntry>> {
        let mut tx = self.ctx.begin().await?;
        Ok(tx.entries().find_by_user(user_id).await?)
    }

    /// The legs of one multi-step operation, oldest first.
    pub async fn entries_for(&self, correlation_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut tx = self.ctx.begin().await?;
        Ok(tx.entries().find_by_correlation(correlation_id).await?)
    }

    async fn mutate(
        &self,
        user_id: &UserId,
        kind: CurrencyKind,
        amount: i64,
        mutation: Mutation,
        metadata: Metadata,
    ) -> Result<BalanceChange> {
        let amount = Amount::new(amount)?;
        let draft = EntryDraft::standalone(mutation.entry_type(), metadata);

        let mut tx = self.ctx.begin().await?;
        let change = match mutation {
            Mutation::Grant => grant_in(tx.as_mut(), &self.ctx, user_id, kind, amount, draft).await?,
            Mutation::Consume => {
                consume_in(tx.as_mut(), &self.ctx, user_id, kind, amount, draft).await?
            }
        };
        tx.commit().await.map_err(commit_error)?;

        self.ctx.emit(LedgerEvent::EntryRecorded(&change.entry));
        Ok(change)
    }
}

fn lock_conflict(user_id: &UserId, kind: CurrencyKind) -> LedgerError {
    LedgerError::OptimisticLockConflict {
        entity: tables::BALANCES,
        key: format!("{user_id}/{kind}"),
    }
}

fn completed_entry(
    draft: EntryDraft,
    balance: &Balance,
    amount: Amount,
    balance_before: i64,
    now: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry {
        entry_id: draft.entry_id,
        user_id: balance.user_id.clone(),
        kind: balance.kind,
        entry_type: draft.entry_type,
        amount: amount.value(),
        balance_before,
        balance_after: balance.amount,
        status: EntryStatus::Completed,
        correlation_id: draft.correlation_id,
        metadata: draft.metadata,
        created_at: now,
    }
}

/// Adds `amount` inside an open transaction and appends its entry.
///
/// A missing row is created at version 0; otherwise the row is saved
/// conditionally on the version that was just read. Timestamps are taken
/// after that read.
pub(crate) async fn grant_in(
    tx: &mut dyn StoreTransaction,
    ctx: &LedgerContext,
    user_id: &UserId,
    kind: CurrencyKind,
    amount: Amount,
    draft: EntryDraft,
) -> Result<BalanceChange> {
    let current = tx.balances().find(user_id, kind).await?;
    let now = ctx.now();
    let (balance, before) = match current {
        None => {
            let opened = Balance::opened(user_id.clone(), kind, amount, now);
            if tx.balances().create(&opened).await? == InsertOutcome::Duplicate {
                return Err(lock_conflict(user_id, kind));
            }
            (opened, 0)
        }
        Some(current) => {
            let next = current.credited(amount, now)?;
            if tx.balances().save(&next, current.version).await? == UpdateOutcome::Stale {
                return Err(lock_conflict(user_id, kind));
            }
            (next, current.amount)
        }
    };

    let entry = completed_entry(draft, &balance, amount, before, now);
    tx.entries().append(&entry).await?;
    Ok(BalanceChange { balance, entry })
}

/// Removes `amount` inside an open transaction and appends its entry.
///
/// Nothing is written when the balance is too small; a missing row counts
/// as a zero balance.
pub(crate) async fn consume_in(
    tx: &mut dyn StoreTransaction,
    ctx: &LedgerContext,
    user_id: &UserId,
    kind: CurrencyKind,
    amount: Amount,
    draft: EntryDraft,
) -> Result<BalanceChange> {
    let current = tx.balances().find(user_id, kind).await?.ok_or(
        LedgerError::InsufficientBalance {
            requested: amount.value(),
            available: 0,
        },
    )?;
    let now = ctx.now();
    let next = current.debited(amount, now)?;
    if tx.balances().save(&next, current.version).await? == UpdateOutcome::Stale {
        return Err(lock_conflict(user_id, kind));
    }

    let entry = completed_entry(draft, &next, amount, current.amount, now);
    tx.entries().append(&entry).await?;
    Ok(BalanceChange {
        balance: next,
        entry,
    })
}

/// Current amounts of both kinds as seen by `tx`.
pub(crate) async fn available_in(
    tx: &mut dyn StoreTransaction,
    user_id: &UserId,
) -> Result<Available> {
    let mut available = Available::default();
    for kind in CurrencyKind::PRIORITY {
        if let Some(balance) = tx.balances().find(user_id, kind).await? {
            available.set(kind, balance.amount);
        }
    }
    Ok(available)
}
