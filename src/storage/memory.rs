//! In-memory storage adapter.
//!
//! Reads are pure map lookups. `execute` stages writes in a transaction
//! buffer that is merged into the main store on success and discarded on
//! error. Interior mutability via `parking_lot::Mutex` keeps the adapter
//! `Send + Sync` without an async surface.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{KintoError, Result};
use crate::types::Record;

use super::traits::{matches_filters, sort_records, ListParams, StorageAdapter, StorageProxy};

#[derive(Default)]
pub struct MemoryAdapter {
    /// record id → record
    records: Mutex<HashMap<String, Record>>,
    last_modified: Mutex<Option<u64>>,
    metadata: Mutex<Option<Value>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Transaction proxy
// ============================================================================

/// Buffered writes for one `execute` call. `None` marks a deletion.
struct MemoryTransaction {
    /// Rows eagerly loaded for this transaction; the only ids `get` may read.
    preloaded: HashMap<String, Record>,
    /// Ids that exist in the committed store (for duplicate-create checks).
    existing: std::collections::HashSet<String>,
    buffer: Vec<(String, Option<Record>)>,
}

impl MemoryTransaction {
    fn buffered(&self, id: &str) -> Option<&Option<Record>> {
        self.buffer.iter().rev().find(|(bid, _)| bid == id).map(|(_, r)| r)
    }
}

impl StorageProxy for MemoryTransaction {
    fn create(&mut self, record: Record) -> Result<()> {
        let exists_in_buffer = matches!(self.buffered(&record.id), Some(Some(_)));
        let deleted_in_buffer = matches!(self.buffered(&record.id), Some(None));
        if exists_in_buffer || (self.existing.contains(&record.id) && !deleted_in_buffer) {
            return Err(KintoError::ConflictingCreate(record.id));
        }
        self.buffer.push((record.id.clone(), Some(record)));
        Ok(())
    }

    fn update(&mut self, record: Record) -> Result<()> {
        self.buffer.push((record.id.clone(), Some(record)));
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        self.buffer.push((id.to_string(), None));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Record>> {
        if let Some(entry) = self.buffered(id) {
            return Ok(entry.clone());
        }
        if !self.preloaded.contains_key(id) && self.existing.contains(id) {
            return Err(KintoError::storage(format!(
                "record {id} was not preloaded for this transaction"
            )));
        }
        Ok(self.preloaded.get(id).cloned())
    }
}

// ============================================================================
// StorageAdapter implementation
// ============================================================================

impl StorageAdapter for MemoryAdapter {
    fn clear(&self) -> Result<()> {
        self.records.lock().clear();
        Ok(())
    }

    fn execute(
        &self,
        preload: &[String],
        body: &mut dyn FnMut(&mut dyn StorageProxy) -> Result<()>,
    ) -> Result<()> {
        let mut tx = {
            let records = self.records.lock();
            MemoryTransaction {
                preloaded: preload
                    .iter()
                    .filter_map(|id| records.get(id).map(|r| (id.clone(), r.clone())))
                    .collect(),
                existing: records.keys().cloned().collect(),
                buffer: Vec::new(),
            }
        };

        body(&mut tx)?;

        // Commit: apply buffered writes in emission order.
        let mut records = self.records.lock();
        for (id, entry) in tx.buffer {
            match entry {
                Some(record) => {
                    records.insert(id, record);
                }
                None => {
                    records.remove(&id);
                }
            }
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn list(&self, params: &ListParams) -> Result<Vec<Record>> {
        let records = self.records.lock();
        let mut matched: Vec<Record> = records
            .values()
            .filter(|r| matches_filters(&r.to_json(), &params.filters))
            .cloned()
            .collect();
        drop(records);
        sort_records(&mut matched, &params.order);
        Ok(matched)
    }

    fn save_last_modified(&self, last_modified: Option<u64>) -> Result<Option<u64>> {
        *self.last_modified.lock() = last_modified;
        Ok(last_modified)
    }

    fn get_last_modified(&self) -> Result<Option<u64>> {
        Ok(*self.last_modified.lock())
    }

    fn import_bulk(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut store = self.records.lock();
        for record in &records {
            store.insert(record.id.clone(), record.clone());
        }
        Ok(records)
    }

    fn save_metadata(&self, metadata: Option<Value>) -> Result<Option<Value>> {
        *self.metadata.lock() = metadata.clone();
        Ok(metadata)
    }

    fn get_metadata(&self) -> Result<Option<Value>> {
        Ok(self.metadata.lock().clone())
    }
}
