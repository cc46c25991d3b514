#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use mockable::Clock;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wallet_ledger::application::LedgerContext;
use wallet_ledger::domain::balance::Balance;
use wallet_ledger::domain::currency::{CurrencyKind, Metadata, UserId};
use wallet_ledger::domain::ports::{
    BalanceRepository, InsertOutcome, LedgerEntryRepository, LedgerEvent, LedgerObserver,
    PaymentRequestRepository, RedemptionCodeRepository, StoreTransaction, UnitOfWork,
    UnitOfWorkRef, UpdateOutcome,
};
use wallet_ledger::domain::redemption::{NewRedemptionCode, UsageLimit};
use wallet_ledger::error::StoreError;
use wallet_ledger::infrastructure::in_memory::InMemoryStore;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.0.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Moves one second backwards on every reading.
#[derive(Default)]
pub struct RewindingClock {
    readings: AtomicI64,
}

impl Clock for RewindingClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        now() - Duration::seconds(self.readings.fetch_add(1, Ordering::SeqCst))
    }
}

/// Counts events by type.
#[derive(Default)]
pub struct CountingObserver {
    pub entries: Mutex<usize>,
    pub redemptions: Mutex<usize>,
    pub rejections: Mutex<Vec<&'static str>>,
}

impl LedgerObserver for CountingObserver {
    fn record(&self, event: LedgerEvent<'_>) {
        match event {
            LedgerEvent::EntryRecorded(_) => *self.entries.lock().unwrap() += 1,
            LedgerEvent::CodeRedeemed { .. } => *self.redemptions.lock().unwrap() += 1,
            LedgerEvent::PaymentSettled { .. } => {}
            LedgerEvent::Rejected { error, .. } => {
                self.rejections.lock().unwrap().push(error.kind())
            }
        }
    }
}

pub fn context() -> (LedgerContext, Arc<CountingObserver>) {
    context_over(Arc::new(InMemoryStore::in_memory()))
}

pub fn context_over(store: UnitOfWorkRef) -> (LedgerContext, Arc<CountingObserver>) {
    let observer = Arc::new(CountingObserver::default());
    let ctx = LedgerContext::new(store, Arc::new(FixedClock(now())), observer.clone());
    (ctx, observer)
}

/// Wraps a store to make balance saves of one kind go stale, or to refuse
/// new transactions once a budget is spent.
pub struct FaultyStore {
    inner: InMemoryStore,
    stale_kind: Option<CurrencyKind>,
    begins_left: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            stale_kind: None,
            begins_left: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn stale_on(mut self, kind: CurrencyKind) -> Self {
        self.stale_kind = Some(kind);
        self
    }

    pub fn failing_after(self, begins: usize) -> Self {
        self.begins_left.store(begins, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl UnitOfWork for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let allowed = self
            .begins_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StoreError::backend(std::io::Error::other(
                "store unavailable",
            )));
        }
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            stale_kind: self.stale_kind,
        }))
    }
}

struct FaultyTransaction {
    inner: Box<dyn StoreTransaction>,
    stale_kind: Option<CurrencyKind>,
}

#[async_trait]
impl StoreTransaction for FaultyTransaction {
    fn balances(&mut self) -> &mut dyn BalanceRepository {
        self
    }

    fn entries(&mut self) -> &mut dyn LedgerEntryRepository {
        self.inner.entries()
    }

    fn codes(&mut self) -> &mut dyn RedemptionCodeRepository {
        self.inner.codes()
    }

    fn payments(&mut self) -> &mut dyn PaymentRequestRepository {
        self.inner.payments()
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit().await
    }
}

#[async_trait]
impl BalanceRepository for FaultyTransaction {
    async fn find(
        &mut self,
        user_id: &UserId,
        kind: CurrencyKind,
    ) -> Result<Option<Balance>, StoreError> {
        self.inner.balances().find(user_id, kind).await
    }

    async fn create(&mut self, balance: &Balance) -> Result<InsertOutcome, StoreError> {
        self.inner.balances().create(balance).await
    }

    async fn save(
        &mut self,
        balance: &Balance,
        expected_version: u64,
    ) -> Result<UpdateOutcome, StoreError> {
        if self.stale_kind == Some(balance.kind) {
            return Ok(UpdateOutcome::Stale);
        }
        self.inner.balances().save(balance, expected_version).await
    }
}

/// A code valid from yesterday until tomorrow.
pub fn promo(code: &str, kind: CurrencyKind, amount: i64, usage_limit: UsageLimit) -> NewRedemptionCode {
    NewRedemptionCode {
        code: code.to_string(),
        code_kind: "promo".to_string(),
        kind,
        amount,
        usage_limit,
        valid_from: now() - Duration::days(1),
        valid_until: now() + Duration::days(1),
        metadata: Metadata::new(),
    }
}

pub const HEADER: [&str; 6] = ["op", "user", "kind", "amount", "reference", "max_uses"];

/// Writes a batch granting one paid unit per row, spread over `users` users.
pub fn generate_csv(path: &Path, rows: usize, users: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(HEADER)?;
    for i in 0..rows {
        let user = format!("user{:03}", i % users);
        wtr.write_record(["grant", user.as_str(), "paid", "1", "", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
