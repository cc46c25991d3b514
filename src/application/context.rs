use crate::domain::ports::{LedgerEvent, ObserverRef, StoreTransaction, UnitOfWorkRef};
use crate::error::{LedgerError, Result, StoreError};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Collaborators every core operation is handed explicitly.
///
/// Nothing here is cached between operations: each call opens its own
/// transaction and reads fresh state.
#[derive(Clone)]
pub struct LedgerContext {
    store: UnitOfWorkRef,
    clock: SharedClock,
    observer: ObserverRef,
}

impl LedgerContext {
    pub fn new(store: UnitOfWorkRef, clock: SharedClock, observer: ObserverRef) -> Self {
        Self {
            store,
            clock,
            observer,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub(crate) async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(self.store.begin().await?)
    }

    pub(crate) fn emit(&self, event: LedgerEvent<'_>) {
        self.observer.record(event);
    }

    /// Passes `result` through, reporting a failure to the observer.
    pub(crate) fn report<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            self.reject(operation, error);
        }
        result
    }

    pub(crate) fn reject(&self, operation: &'static str, error: &LedgerError) {
        self.observer
            .record(LedgerEvent::Rejected { operation, error });
    }
}

/// Maps a failed commit onto the error the caller should see.
///
/// A guard that failed at commit time means another writer got there
/// first, which is an optimistic-lock conflict on that record.
pub(crate) fn commit_error(err: StoreError) -> LedgerError {
    match err {
        StoreError::Conflict { table, key } | StoreError::Duplicate { table, key } => {
            LedgerError::OptimisticLockConflict { entity: table, key }
        }
        other => LedgerError::Storage(other),
    }
}
