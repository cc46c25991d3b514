//! Transactional repositories over a plain key/value backend.
//!
//! A [`StagedTransaction`] buffers every write in an overlay that only it can
//! see. Each write carries a [`Guard`] describing the committed state it was
//! based on. On commit the store's commit lock is taken, every guard is
//! re-checked against committed state and the whole overlay is handed to the
//! backend as one atomic batch. Dropping a transaction discards its overlay.
//!
//! Entry indexes are keyed by a commit sequence assigned under the commit
//! lock, so index order is commit order. The next sequence is persisted in
//! the meta table with every batch that uses it.

use crate::domain::balance::Balance;
use crate::domain::currency::{CurrencyKind, UserId};
use crate::domain::entry::LedgerEntry;
use crate::domain::payment::PaymentRequest;
use crate::domain::ports::{
    BalanceRepository, DeleteOutcome, InsertOutcome, LedgerEntryRepository,
    PaymentRequestRepository, RedemptionCodeRepository, StoreTransaction, UnitOfWork,
    UpdateOutcome, tables,
};
use crate::domain::redemption::{CodeRedemption, RedemptionCode};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

const SEP: char = '\u{1f}';
const META_TABLE: &str = "meta";
const SEQUENCE_KEY: &[u8] = b"entry_sequence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Balances,
    Entries,
    EntriesByUser,
    EntriesByCorrelation,
    Codes,
    Redemptions,
    Payments,
    Meta,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Balances,
        Table::Entries,
        Table::EntriesByUser,
        Table::EntriesByCorrelation,
        Table::Codes,
        Table::Redemptions,
        Table::Payments,
        Table::Meta,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Balances => tables::BALANCES,
            Self::Entries => tables::LEDGER_ENTRIES,
            Self::EntriesByUser => tables::LEDGER_ENTRIES_BY_USER,
            Self::EntriesByCorrelation => tables::LEDGER_ENTRIES_BY_CORRELATION,
            Self::Codes => tables::REDEMPTION_CODES,
            Self::Redemptions => tables::CODE_REDEMPTIONS,
            Self::Payments => tables::PAYMENT_REQUESTS,
            Self::Meta => META_TABLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Put {
        table: Table,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: Vec<u8>,
    },
}

/// Raw storage underneath the staged repositories.
///
/// `apply` must make the whole batch visible atomically.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
    async fn apply(&self, writes: Vec<KvWrite>) -> Result<(), StoreError>;
}

/// Precondition a staged write was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Unconditional,
    Absent,
    BalanceVersion(u64),
    CodeUses(u32),
    PaymentPending,
}

impl Guard {
    fn holds(&self, current: Option<&[u8]>) -> Result<bool, StoreError> {
        let holds = match (self, current) {
            (Self::Unconditional, _) => true,
            (Self::Absent, current) => current.is_none(),
            (_, None) => false,
            (Self::BalanceVersion(expected), Some(bytes)) => {
                serde_json::from_slice::<Balance>(bytes)?.version == *expected
            }
            (Self::CodeUses(expected), Some(bytes)) => {
                serde_json::from_slice::<RedemptionCode>(bytes)?.current_uses == *expected
            }
            (Self::PaymentPending, Some(bytes)) => {
                serde_json::from_slice::<PaymentRequest>(bytes)?.is_pending()
            }
        };
        Ok(holds)
    }

    fn violation(&self, table: Table, key: &[u8]) -> StoreError {
        let key = String::from_utf8_lossy(key).replace(SEP, "/");
        match self {
            Self::Absent => StoreError::Duplicate {
                table: table.name(),
                key,
            },
            _ => StoreError::Conflict {
                table: table.name(),
                key,
            },
        }
    }
}

struct Staged {
    value: Option<Vec<u8>>,
    /// Guard of the first write to this key, the one based on committed state.
    guard: Guard,
}

/// State only touched while the commit lock is held.
#[derive(Default)]
struct CommitState {
    /// Next index sequence; loaded from the meta table on first use.
    next_sequence: Option<u64>,
}

struct Shared<B> {
    backend: B,
    commit_lock: Mutex<CommitState>,
}

/// A [`UnitOfWork`] over any [`KvBackend`]. Cloning shares the backend.
pub struct StagedStore<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for StagedStore<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: KvBackend> StagedStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                commit_lock: Mutex::new(CommitState::default()),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }
}

#[async_trait]
impl<B: KvBackend> UnitOfWork for StagedStore<B> {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(StagedTransaction {
            shared: Arc::clone(&self.shared),
            overlay: HashMap::new(),
            order: Vec::new(),
            pending_index: Vec::new(),
        }))
    }
}

pub struct StagedTransaction<B> {
    shared: Arc<Shared<B>>,
    overlay: HashMap<(Table, Vec<u8>), Staged>,
    /// Staging order, so guards are checked in the order writes were made.
    order: Vec<(Table, Vec<u8>)>,
    /// Index rows awaiting a commit sequence: (index table, owner, entry id).
    pending_index: Vec<(Table, String, Vec<u8>)>,
}

impl<B: KvBackend> StagedTransaction<B> {
    async fn read(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.overlay.get(&(table, key.to_vec())) {
            return Ok(staged.value.clone());
        }
        self.shared.backend.get(table, key).await
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        table: Table,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        match self.read(table, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Values under `prefix`, in key order, with this transaction's writes applied.
    async fn scan(&self, table: Table, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut rows: BTreeMap<Vec<u8>, Vec<u8>> = self
            .shared
            .backend
            .scan_prefix(table, prefix)
            .await?
            .into_iter()
            .collect();
        for ((staged_table, key), staged) in &self.overlay {
            if *staged_table != table || !key.starts_with(prefix) {
                continue;
            }
            match &staged.value {
                Some(value) => rows.insert(key.clone(), value.clone()),
                None => rows.remove(key),
            };
        }
        Ok(rows.into_values().collect())
    }

    fn stage(&mut self, table: Table, key: Vec<u8>, value: Option<Vec<u8>>, guard: Guard) {
        let slot = (table, key);
        if let Some(staged) = self.overlay.get_mut(&slot) {
            staged.value = value;
            return;
        }
        self.order.push(slot.clone());
        self.overlay.insert(slot, Staged { value, guard });
    }

    /// Stages `value` under `key` if `guard` holds against what this
    /// transaction currently sees.
    async fn put_if<T: Serialize + Sync>(
        &mut self,
        table: Table,
        key: Vec<u8>,
        value: &T,
        guard: Guard,
    ) -> Result<bool, StoreError> {
        let current = self.read(table, &key).await?;
        if !guard.holds(current.as_deref())? {
            return Ok(false);
        }
        let bytes = serde_json::to_vec(value)?;
        self.stage(table, key, Some(bytes), guard);
        Ok(true)
    }

    async fn entries_from_index(
        &self,
        table: Table,
        owner: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut ids = self.scan(table, index_prefix(owner).as_bytes()).await?;
        // Uncommitted entries will sort after everything already committed.
        ids.extend(
            self.pending_index
                .iter()
                .filter(|(pending_table, pending_owner, _)| {
                    *pending_table == table && pending_owner == owner
                })
                .map(|(_, _, id)| id.clone()),
        );
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.read_json::<LedgerEntry>(Table::Entries, &id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

impl<B> Drop for StagedTransaction<B> {
    fn drop(&mut self) {
        if !self.order.is_empty() {
            tracing::debug!(writes = self.order.len(), "transaction rolled back");
        }
    }
}

fn balance_key(user_id: &UserId, kind: CurrencyKind) -> Vec<u8> {
    format!("{user_id}{SEP}{kind}").into_bytes()
}

fn redemption_key(code: &str, user_id: &UserId) -> Vec<u8> {
    format!("{code}{SEP}{user_id}").into_bytes()
}

fn index_prefix(owner: &str) -> String {
    format!("{owner}{SEP}")
}

fn index_key(owner: &str, sequence: u64) -> Vec<u8> {
    format!("{}{sequence:020}", index_prefix(owner)).into_bytes()
}

async fn load_sequence<B: KvBackend>(backend: &B) -> Result<u64, StoreError> {
    match backend.get(Table::Meta, SEQUENCE_KEY).await? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => Ok(0),
    }
}

#[async_trait]
impl<B: KvBackend> BalanceRepository for StagedTransaction<B> {
    async fn find(
        &mut self,
        user_id: &UserId,
        kind: CurrencyKind,
    ) -> Result<Option<Balance>, StoreError> {
        self.read_json(Table::Balances, &balance_key(user_id, kind))
            .await
    }

    async fn create(&mut self, balance: &Balance) -> Result<InsertOutcome, StoreError> {
        let key = balance_key(&balance.user_id, balance.kind);
        let inserted = self
            .put_if(Table::Balances, key, balance, Guard::Absent)
            .await?;
        Ok(if inserted {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn save(
        &mut self,
        balance: &Balance,
        expected_version: u64,
    ) -> Result<UpdateOutcome, StoreError> {
        let key = balance_key(&balance.user_id, balance.kind);
        let applied = self
            .put_if(
                Table::Balances,
                key,
                balance,
                Guard::BalanceVersion(expected_version),
            )
            .await?;
        Ok(if applied {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Stale
        })
    }
}

#[async_trait]
impl<B: KvBackend> LedgerEntryRepository for StagedTransaction<B> {
    async fn append(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let key = entry.entry_id.clone().into_bytes();
        if !self.put_if(Table::Entries, key, entry, Guard::Absent).await? {
            return Err(Guard::Absent.violation(Table::Entries, entry.entry_id.as_bytes()));
        }
        let id = entry.entry_id.clone().into_bytes();
        self.pending_index.push((
            Table::EntriesByUser,
            entry.user_id.as_str().to_string(),
            id.clone(),
        ));
        self.pending_index.push((
            Table::EntriesByCorrelation,
            entry.correlation_id.clone(),
            id,
        ));
        Ok(())
    }

    async fn find(&mut self, entry_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.read_json(Table::Entries, entry_id.as_bytes()).await
    }

    async fn find_by_correlation(
        &mut self,
        correlation_id: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.entries_from_index(Table::EntriesByCorrelation, correlation_id)
            .await
    }

    async fn find_by_user(&mut self, user_id: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.entries_from_index(Table::EntriesByUser, user_id.as_str())
            .await
    }
}

#[async_trait]
impl<B: KvBackend> RedemptionCodeRepository for StagedTransaction<B> {
    async fn find(&mut self, code: &str) -> Result<Option<RedemptionCode>, StoreError> {
        self.read_json(Table::Codes, code.as_bytes()).await
    }

    async fn create(&mut self, code: &RedemptionCode) -> Result<InsertOutcome, StoreError> {
        let key = code.code.clone().into_bytes();
        let inserted = self.put_if(Table::Codes, key, code, Guard::Absent).await?;
        Ok(if inserted {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn update(
        &mut self,
        code: &RedemptionCode,
        expected_uses: u32,
    ) -> Result<UpdateOutcome, StoreError> {
        let key = code.code.clone().into_bytes();
        let applied = self
            .put_if(Table::Codes, key, code, Guard::CodeUses(expected_uses))
            .await?;
        Ok(if applied {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Stale
        })
    }

    async fn delete_if_unused(&mut self, code: &str) -> Result<DeleteOutcome, StoreError> {
        let current = self.read(Table::Codes, code.as_bytes()).await?;
        if current.is_none() {
            return Ok(DeleteOutcome::Missing);
        }
        if !Guard::CodeUses(0).holds(current.as_deref())? {
            return Ok(DeleteOutcome::InUse);
        }
        self.stage(
            Table::Codes,
            code.as_bytes().to_vec(),
            None,
            Guard::CodeUses(0),
        );
        Ok(DeleteOutcome::Deleted)
    }

    async fn insert_redemption(
        &mut self,
        redemption: &CodeRedemption,
    ) -> Result<InsertOutcome, StoreError> {
        let key = redemption_key(&redemption.code, &redemption.user_id);
        let inserted = self
            .put_if(Table::Redemptions, key, redemption, Guard::Absent)
            .await?;
        Ok(if inserted {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn has_redeemed(&mut self, code: &str, user_id: &UserId) -> Result<bool, StoreError> {
        let key = redemption_key(code, user_id);
        Ok(self.read(Table::Redemptions, &key).await?.is_some())
    }
}

#[async_trait]
impl<B: KvBackend> PaymentRequestRepository for StagedTransaction<B> {
    async fn find(&mut self, payment_request_id: &str) -> Result<Option<PaymentRequest>, StoreError> {
        self.read_json(Table::Payments, payment_request_id.as_bytes())
            .await
    }

    async fn create(&mut self, request: &PaymentRequest) -> Result<InsertOutcome, StoreError> {
        let key = request.payment_request_id.clone().into_bytes();
        let inserted = self
            .put_if(Table::Payments, key, request, Guard::Absent)
            .await?;
        Ok(if inserted {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn update(&mut self, request: &PaymentRequest) -> Result<UpdateOutcome, StoreError> {
        let key = request.payment_request_id.clone().into_bytes();
        let applied = self
            .put_if(Table::Payments, key, request, Guard::PaymentPending)
            .await?;
        Ok(if applied {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Stale
        })
    }
}

#[async_trait]
impl<B: KvBackend> StoreTransaction for StagedTransaction<B> {
    fn balances(&mut self) -> &mut dyn BalanceRepository {
        self
    }

    fn entries(&mut self) -> &mut dyn LedgerEntryRepository {
        self
    }

    fn codes(&mut self) -> &mut dyn RedemptionCodeRepository {
        self
    }

    fn payments(&mut self) -> &mut dyn PaymentRequestRepository {
        self
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.order.is_empty() {
            return Ok(());
        }
        let order = std::mem::take(&mut self.order);
        let mut overlay = std::mem::take(&mut self.overlay);
        let pending_index = std::mem::take(&mut self.pending_index);

        let mut state = self.shared.commit_lock.lock().await;
        for (table, key) in &order {
            let Some(staged) = overlay.get(&(*table, key.clone())) else {
                continue;
            };
            let current = self.shared.backend.get(*table, key).await?;
            if !staged.guard.holds(current.as_deref())? {
                return Err(staged.guard.violation(*table, key));
            }
        }

        let mut writes: Vec<KvWrite> = order
            .into_iter()
            .filter_map(|slot| {
                let staged = overlay.remove(&slot)?;
                let (table, key) = slot;
                Some(match staged.value {
                    Some(value) => KvWrite::Put { table, key, value },
                    None => KvWrite::Delete { table, key },
                })
            })
            .collect();

        if pending_index.is_empty() {
            return self.shared.backend.apply(writes).await;
        }
        let mut sequence = match state.next_sequence {
            Some(sequence) => sequence,
            None => load_sequence(&self.shared.backend).await?,
        };
        for (table, owner, id) in pending_index {
            writes.push(KvWrite::Put {
                table,
                key: index_key(&owner, sequence),
                value: id,
            });
            sequence += 1;
        }
        writes.push(KvWrite::Put {
            table: Table::Meta,
            key: SEQUENCE_KEY.to_vec(),
            value: serde_json::to_vec(&sequence)?,
        });
        self.shared.backend.apply(writes).await?;
        state.next_sequence = Some(sequence);
        Ok(())
    }
}
