//! In-memory storage engine

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CrudEngine, StoreError};

type Table = BTreeMap<String, Vec<u8>>;

/// Tables held in process memory
#[derive(Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a table
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// Whether a table holds no records
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

#[async_trait]
impl CrudEngine for MemoryEngine {
    async fn create(&self, table: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let records = tables.entry(table.to_string()).or_default();
        if records.contains_key(key) {
            return Err(StoreError::RecordAlreadyExists {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.read().get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn read_all(&self, table: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn update(&self, table: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .get_mut(table)
            .map_or(false, |t| t.remove(key).is_some()))
    }

    async fn delete_all(&self, table: &str) -> Result<(), StoreError> {
        self.tables.write().remove(table);
        Ok(())
    }
}
