//! Synchronous CRUD proxy handed to `Collection::execute` bodies.
//!
//! Wraps the storage proxy with the collection's lifecycle rules (status
//! transitions, id validation) and queues one change target per write so the
//! collection can emit a single coalesced `change` event after commit.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{KintoError, Result};
use crate::events::{ChangeAction, ChangeTarget};
use crate::id::IdSchema;
use crate::storage::StorageProxy;
use crate::sync::Updated;
use crate::types::{data_equal, Record, RecordStatus};

// ============================================================================
// Input parsing
// ============================================================================

/// Split a caller-supplied JSON object into `(id?, last_modified?, data)`.
/// Any `_status` key is discarded: status is owned by the lifecycle rules.
pub(crate) fn split_input(record: Value) -> Result<(Option<String>, Option<u64>, Map<String, Value>)> {
    let mut obj = match record {
        Value::Object(o) => o,
        _ => return Err(KintoError::NotAnObject),
    };
    let id = match obj.remove("id") {
        None => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => return Err(KintoError::InvalidId(other.to_string())),
    };
    let last_modified = obj.remove("last_modified").and_then(|v| v.as_u64());
    obj.remove("_status");
    Ok((id, last_modified, obj))
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Compute the stored form of an update/upsert against the previous version.
///
/// - an existing timestamp is never lost;
/// - a content-identical update of a synced record stays synced;
/// - a never-synced record stays `created`;
/// - everything else becomes `updated` (tombstones included: updating one is
///   the explicit resurrection path).
pub(crate) fn update_raw(
    old: Option<&Record>,
    id: String,
    last_modified: Option<u64>,
    data: Map<String, Value>,
    synced: bool,
    local_fields: &[String],
) -> Record {
    let last_modified = last_modified.or_else(|| old.and_then(|o| o.last_modified));
    let identical = old.map_or(false, |o| data_equal(&o.data, &data, local_fields));
    let keep_synced = identical && old.map_or(false, |o| o.status == RecordStatus::Synced);
    let never_synced = old.map_or(true, |o| o.status == RecordStatus::Created);
    let status = if keep_synced || synced {
        RecordStatus::Synced
    } else if never_synced {
        RecordStatus::Created
    } else {
        RecordStatus::Updated
    };
    Record::new(id, last_modified, status, data)
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Mark the result `synced` instead of `updated`.
    pub synced: bool,
    /// Merge into the existing record instead of replacing it.
    pub patch: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Soft deletion keeps a tombstone so the deletion can be propagated to
    /// the remote; `soft: false` removes the record outright.
    pub soft: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self { soft: true }
    }
}

// ============================================================================
// CollectionTransaction
// ============================================================================

pub struct CollectionTransaction<'a> {
    proxy: &'a mut dyn StorageProxy,
    id_schema: Arc<dyn IdSchema>,
    local_fields: Vec<String>,
    targets: Vec<ChangeTarget>,
}

impl<'a> CollectionTransaction<'a> {
    pub(crate) fn new(
        proxy: &'a mut dyn StorageProxy,
        id_schema: Arc<dyn IdSchema>,
        local_fields: Vec<String>,
    ) -> Self {
        Self {
            proxy,
            id_schema,
            local_fields,
            targets: Vec::new(),
        }
    }

    pub(crate) fn into_targets(self) -> Vec<ChangeTarget> {
        self.targets
    }

    fn validate_id(&self, id: &str) -> Result<()> {
        if !self.id_schema.validate(id) {
            return Err(KintoError::InvalidId(id.to_string()));
        }
        Ok(())
    }

    fn queue(&mut self, action: ChangeAction, data: Record, old_record: Option<Record>) {
        self.targets.push(ChangeTarget {
            action,
            data,
            old_record,
        });
    }

    /// Non-throwing read, tombstones included. Restricted to preloaded ids.
    pub fn get_any(&self, id: &str) -> Result<Option<Record>> {
        self.proxy.get(id)
    }

    /// Read a live record; errors on missing or tombstoned ids unless
    /// `include_deleted` is set.
    pub fn get(&self, id: &str, include_deleted: bool) -> Result<Record> {
        self.validate_id(id)?;
        match self.proxy.get(id)? {
            Some(record) if !record.is_tombstone() || include_deleted => Ok(record),
            _ => Err(KintoError::RecordNotFound(id.to_string())),
        }
    }

    /// Store a fully-formed record under a fresh id. The id must already be
    /// assigned; ids held by live records or tombstones are rejected.
    pub fn create(&mut self, record: Record) -> Result<Record> {
        if record.id.is_empty() {
            return Err(KintoError::MissingId);
        }
        self.validate_id(&record.id)?;
        self.proxy.create(record.clone())?;
        self.queue(ChangeAction::Create, record.clone(), None);
        Ok(record)
    }

    /// Update an existing record (tombstones are resurrected).
    pub fn update(&mut self, record: Value, options: UpdateOptions) -> Result<Updated> {
        let (id, last_modified, data) = split_input(record)?;
        let id = id.ok_or(KintoError::MissingId)?;
        self.validate_id(&id)?;

        let old = self
            .proxy
            .get(&id)?
            .ok_or_else(|| KintoError::RecordNotFound(id.clone()))?;

        let data = if options.patch {
            let mut merged = old.data.clone();
            for (k, v) in data {
                merged.insert(k, v);
            }
            merged
        } else {
            data
        };

        let updated = update_raw(
            Some(&old),
            id,
            last_modified,
            data,
            options.synced,
            &self.local_fields,
        );
        self.proxy.update(updated.clone())?;
        self.queue(ChangeAction::Update, updated.clone(), Some(old.clone()));
        Ok(Updated {
            old,
            new: updated,
        })
    }

    /// Create or update as appropriate. A tombstone under this id is
    /// resurrected, reported as a creation.
    pub fn upsert(&mut self, record: Value) -> Result<Record> {
        let (id, last_modified, data) = split_input(record)?;
        let id = id.ok_or(KintoError::MissingId)?;
        self.validate_id(&id)?;

        let old = self.proxy.get(&id)?;
        let stored = update_raw(
            old.as_ref(),
            id,
            last_modified,
            data,
            false,
            &self.local_fields,
        );
        self.proxy.update(stored.clone())?;
        let had_live_record = old.as_ref().map_or(false, |p| !p.is_tombstone());
        if had_live_record {
            self.queue(ChangeAction::Update, stored.clone(), old);
        } else {
            self.queue(ChangeAction::Create, stored.clone(), None);
        }
        Ok(stored)
    }

    /// Delete a record. Soft deletion of an existing tombstone is idempotent
    /// and emits no event.
    pub fn delete(&mut self, id: &str, options: DeleteOptions) -> Result<Record> {
        self.validate_id(id)?;
        let existing = self
            .proxy
            .get(id)?
            .ok_or_else(|| KintoError::RecordNotFound(id.to_string()))?;

        if options.soft {
            if existing.is_tombstone() {
                return Ok(existing);
            }
            let tombstone = Record::new(
                existing.id.clone(),
                existing.last_modified,
                RecordStatus::Deleted,
                existing.data.clone(),
            );
            self.proxy.update(tombstone.clone())?;
            self.queue(ChangeAction::Delete, tombstone.clone(), Some(existing));
            Ok(tombstone)
        } else {
            self.proxy.delete(id)?;
            self.queue(ChangeAction::Delete, existing.clone(), Some(existing.clone()));
            Ok(existing)
        }
    }

    /// Soft-delete if a live record exists; no-op on missing ids and
    /// existing tombstones. Returns the tombstone when a deletion happened.
    pub fn delete_any(&mut self, id: &str) -> Result<Option<Record>> {
        self.validate_id(id)?;
        match self.proxy.get(id)? {
            Some(existing) if !existing.is_tombstone() => {
                Ok(Some(self.delete(id, DeleteOptions::default())?))
            }
            _ => Ok(None),
        }
    }
}
