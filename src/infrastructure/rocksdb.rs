use super::staged::{KvBackend, KvWrite, StagedStore, Table};
use crate::error::StoreError;
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;

/// A persistent key/value backend using RocksDB.
///
/// Every [`Table`] lives in its own column family. A committed transaction
/// becomes one `WriteBatch`, so it is applied atomically and survives a crash
/// either completely or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBBackend {
    db: Arc<DB>,
}

impl RocksDBBackend {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors).map_err(StoreError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, table: Table) -> Result<&ColumnFamily, StoreError> {
        self.db.cf_handle(table.name()).ok_or_else(|| {
            StoreError::backend(std::io::Error::other(format!(
                "column family `{}` not found",
                table.name()
            )))
        })
    }
}

#[async_trait]
impl KvBackend for RocksDBBackend {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(table)?;
        self.db.get_cf(cf, key).map_err(StoreError::backend)
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.cf(table)?;
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(StoreError::backend)?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.into_vec(), value.into_vec()));
        }
        Ok(rows)
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for write in &writes {
            match write {
                KvWrite::Put { table, key, value } => batch.put_cf(self.cf(*table)?, key, value),
                KvWrite::Delete { table, key } => batch.delete_cf(self.cf(*table)?, key),
            }
        }
        self.db.write(batch).map_err(StoreError::backend)
    }
}

/// Staged transactions persisted in RocksDB.
pub type RocksDBStore = StagedStore<RocksDBBackend>;

impl StagedStore<RocksDBBackend> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::new(RocksDBBackend::open(path)?))
    }
}
