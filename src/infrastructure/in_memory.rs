use super::staged::{KvBackend, KvWrite, StagedStore, Table};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Tables = HashMap<Table, BTreeMap<Vec<u8>, Vec<u8>>>;

/// A thread-safe in-memory key/value backend.
///
/// Uses `Arc<RwLock<..>>` so clones share the same data; a batch is applied
/// under a single write lock, which makes it atomic for readers.
/// Ideal for testing or short-lived batch runs where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn apply(&self, writes: Vec<KvWrite>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for write in writes {
            match write {
                KvWrite::Put { table, key, value } => {
                    tables.entry(table).or_default().insert(key, value);
                }
                KvWrite::Delete { table, key } => {
                    if let Some(rows) = tables.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}

/// The default store: staged transactions over [`InMemoryBackend`].
pub type InMemoryStore = StagedStore<InMemoryBackend>;

impl StagedStore<InMemoryBackend> {
    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }
}
