//! The local collection: transactional CRUD over a storage adapter, bound to
//! a `(bucket, name)` pair on a remote.
//!
//! All create/read/update/delete operations are local; reconciliation with
//! the remote happens only through the explicitly invoked [`Collection::sync`]
//! (see the `sync` submodule). Operations on one collection are serialized by
//! the caller.

pub mod sync;
pub mod transaction;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{KintoError, Result};
use crate::events::{ChangeAction, CollectionEvent, Emitter};
use crate::hooks::IncomingHook;
use crate::id::{IdSchema, UuidSchema};
use crate::remote::RemoteClient;
use crate::storage::{ListParams, StorageAdapter};
use crate::sync::Updated;
use crate::transformer::RecordTransformer;
use crate::types::{Conflict, Record, RecordStatus, RemoteRecord};

pub use transaction::{CollectionTransaction, DeleteOptions, UpdateOptions};

use transaction::split_input;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Keep the id supplied on the record instead of generating one.
    pub use_record_id: bool,
    /// Store the record as already acknowledged by the remote.
    pub synced: bool,
}

/// Construction-time configuration. Everything defaults to off/empty; the
/// id schema defaults to UUIDs.
#[derive(Default)]
pub struct CollectionOptions {
    pub id_schema: Option<Arc<dyn IdSchema>>,
    /// Encode/decode pairs applied at the remote boundary, in order.
    pub remote_transformers: Vec<Arc<dyn RecordTransformer>>,
    /// Transformations applied to incoming change batches before import.
    pub hooks: Vec<Arc<dyn IncomingHook>>,
    /// Fields stored locally but stripped before publish and ignored when
    /// comparing against remote versions.
    pub local_fields: Vec<String>,
    pub events: Option<Arc<Emitter>>,
}

// ============================================================================
// Collection
// ============================================================================

pub struct Collection {
    bucket: String,
    name: String,
    adapter: Arc<dyn StorageAdapter>,
    remote: Arc<dyn RemoteClient>,
    events: Arc<Emitter>,
    id_schema: Arc<dyn IdSchema>,
    remote_transformers: Vec<Arc<dyn RecordTransformer>>,
    hooks: Vec<Arc<dyn IncomingHook>>,
    local_fields: Vec<String>,
    /// High-water mark across all records last successfully pulled.
    last_modified: Mutex<Option<u64>>,
}

impl Collection {
    pub fn new(
        bucket: impl Into<String>,
        name: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
        remote: Arc<dyn RemoteClient>,
        options: CollectionOptions,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            adapter,
            remote,
            events: options.events.unwrap_or_default(),
            id_schema: options.id_schema.unwrap_or_else(|| Arc::new(UuidSchema)),
            remote_transformers: options.remote_transformers,
            hooks: options.hooks,
            local_fields: options.local_fields,
            last_modified: Mutex::new(None),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &Arc<Emitter> {
        &self.events
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    pub(crate) fn id_schema(&self) -> &Arc<dyn IdSchema> {
        &self.id_schema
    }

    pub(crate) fn transformers(&self) -> &[Arc<dyn RecordTransformer>] {
        &self.remote_transformers
    }

    pub(crate) fn hooks(&self) -> &[Arc<dyn IncomingHook>] {
        &self.hooks
    }

    pub(crate) fn local_fields(&self) -> &[String] {
        &self.local_fields
    }

    /// The collection timestamp, `None` until the first successful pull.
    pub fn last_modified(&self) -> Option<u64> {
        *self.last_modified.lock()
    }

    pub(crate) fn set_last_modified(&self, value: Option<u64>) {
        *self.last_modified.lock() = value;
    }

    fn validate_id(&self, id: &str) -> Result<()> {
        if !self.id_schema.validate(id) {
            return Err(KintoError::InvalidId(id.to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run several CRUD operations in one adapter transaction. `preload_ids`
    /// names every id the body reads. Events are coalesced: one per-action
    /// event per write, then a single `change` event for the whole batch.
    pub fn execute<T>(
        &self,
        preload_ids: &[String],
        body: impl FnOnce(&mut CollectionTransaction) -> Result<T>,
    ) -> Result<T> {
        let mut body = Some(body);
        let mut output: Option<T> = None;
        let mut targets = Vec::new();

        self.adapter.execute(preload_ids, &mut |proxy| {
            let mut tx = CollectionTransaction::new(
                proxy,
                Arc::clone(&self.id_schema),
                self.local_fields.clone(),
            );
            let body = body
                .take()
                .ok_or_else(|| KintoError::storage("transaction body invoked twice"))?;
            output = Some(body(&mut tx)?);
            targets = tx.into_targets();
            Ok(())
        })?;

        for target in &targets {
            let event = match target.action {
                ChangeAction::Create => CollectionEvent::Create {
                    data: target.data.clone(),
                },
                ChangeAction::Update => CollectionEvent::Update {
                    data: target.data.clone(),
                    old_record: target
                        .old_record
                        .clone()
                        .unwrap_or_else(|| target.data.clone()),
                },
                ChangeAction::Delete => CollectionEvent::Delete {
                    data: target.data.clone(),
                },
            };
            self.events.emit(&event);
        }
        if !targets.is_empty() {
            self.events.emit(&CollectionEvent::Change { targets });
        }

        output.ok_or_else(|| KintoError::storage("transaction produced no result"))
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Create a record. The id is generated unless `use_record_id` or
    /// `synced` is set, in which case the record must carry one. Ids held by
    /// live records or tombstones are rejected; resurrection goes through
    /// `update`.
    pub fn create(&self, record: Value, options: CreateOptions) -> Result<Record> {
        let (id, last_modified, data) = split_input(record)?;

        if (options.synced || options.use_record_id) && id.is_none() {
            return Err(KintoError::MissingId);
        }
        if !options.synced && !options.use_record_id && id.is_some() {
            return Err(KintoError::ExtraneousId);
        }

        let id = match id {
            Some(id) => id,
            None => self.id_schema.generate(Some(&data)),
        };
        self.validate_id(&id)?;

        let record = Record::new(
            id.clone(),
            if options.synced { last_modified } else { None },
            if options.synced {
                RecordStatus::Synced
            } else {
                RecordStatus::Created
            },
            data,
        );
        self.execute(&[id], |tx| tx.create(record))
    }

    /// Update an existing record (or resurrect a tombstone). `patch` merges
    /// into the stored record instead of replacing it.
    pub fn update(&self, record: Value, options: UpdateOptions) -> Result<Updated> {
        let id = record
            .as_object()
            .ok_or(KintoError::NotAnObject)?
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or(KintoError::MissingId)?
            .to_string();
        self.validate_id(&id)?;
        self.execute(&[id], |tx| tx.update(record, options))
    }

    /// Create or update, whichever applies.
    pub fn upsert(&self, record: Value) -> Result<Record> {
        let id = record
            .as_object()
            .ok_or(KintoError::NotAnObject)?
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or(KintoError::MissingId)?
            .to_string();
        self.validate_id(&id)?;
        self.execute(&[id], |tx| tx.upsert(record))
    }

    /// Read a live record. Tombstones surface only with `include_deleted`.
    pub fn get(&self, id: &str, include_deleted: bool) -> Result<Record> {
        self.validate_id(id)?;
        match self.adapter.get(id)? {
            Some(record) if !record.is_tombstone() || include_deleted => Ok(record),
            _ => Err(KintoError::RecordNotFound(id.to_string())),
        }
    }

    /// Non-throwing variant of `get`, tombstones included.
    pub fn get_any(&self, id: &str) -> Result<Option<Record>> {
        self.adapter.get(id)
    }

    /// Delete a record. Soft deletion (the default) keeps a tombstone and is
    /// idempotent; the second call emits no event.
    pub fn delete(&self, id: &str, options: DeleteOptions) -> Result<Record> {
        self.validate_id(id)?;
        self.execute(&[id.to_string()], |tx| tx.delete(id, options))
    }

    /// Like `delete`, but a no-op on missing or already-deleted records.
    pub fn delete_any(&self, id: &str) -> Result<Option<Record>> {
        self.validate_id(id)?;
        self.execute(&[id.to_string()], |tx| tx.delete_any(id))
    }

    /// Soft-delete every live record in one transaction.
    pub fn delete_all(&self) -> Result<Vec<Record>> {
        let live = self.list(ListParams::default(), false)?;
        let ids: Vec<String> = live.iter().map(|r| r.id.clone()).collect();
        self.execute(&ids, |tx| {
            ids.iter()
                .map(|id| tx.delete(id, DeleteOptions::default()))
                .collect()
        })
    }

    /// List records, tombstones excluded unless requested.
    pub fn list(&self, params: ListParams, include_deleted: bool) -> Result<Vec<Record>> {
        let records = self.adapter.list(&params)?;
        Ok(records
            .into_iter()
            .filter(|r| include_deleted || !r.is_tombstone())
            .collect())
    }

    /// Number of live records.
    pub fn total_records(&self) -> Result<usize> {
        Ok(self.list(ListParams::default(), false)?.len())
    }

    /// Discard all records and reset the collection timestamp. Metadata is
    /// kept.
    pub fn clear(&self) -> Result<()> {
        self.adapter.clear()?;
        self.adapter.save_last_modified(None)?;
        self.set_last_modified(None);
        Ok(())
    }

    /// Opaque metadata of the remote collection, as of the last sync.
    pub fn metadata(&self) -> Result<Option<Value>> {
        self.adapter.get_metadata()
    }

    // ------------------------------------------------------------------
    // Dumps
    // ------------------------------------------------------------------

    /// Import a dump of server-shaped records as `synced`, skipping entries
    /// that are not newer than a locally synced copy.
    pub fn load_dump(&self, records: Vec<RemoteRecord>) -> Result<Vec<Record>> {
        for record in &records {
            if !self.id_schema.validate(&record.id) {
                return Err(KintoError::InvalidId(record.id.clone()));
            }
            if record.last_modified.is_none() {
                return Err(KintoError::storage(format!(
                    "imported record {} has no last_modified",
                    record.id
                )));
            }
        }

        let to_import: Vec<Record> = records
            .into_iter()
            .filter(|record| match self.adapter.get(&record.id) {
                Ok(Some(local)) => {
                    local.status == RecordStatus::Synced
                        && local.last_modified.is_some()
                        && record.last_modified > local.last_modified
                }
                Ok(None) => true,
                Err(_) => true,
            })
            .map(|record| record.into_record(RecordStatus::Synced))
            .collect();

        self.adapter.import_bulk(to_import)
    }

    // ------------------------------------------------------------------
    // Conflict resolution
    // ------------------------------------------------------------------

    /// Settle a conflict with the given resolution. The stored record takes
    /// the remote's `last_modified` so the next publish carries a valid
    /// precondition, and stays pending (`updated`) so it gets published.
    pub fn resolve(&self, conflict: &Conflict, resolution: Value) -> Result<Record> {
        let (_, _, data) = split_input(resolution)?;
        let resolved = Record::new(
            conflict.local.id.clone(),
            conflict.remote.as_ref().and_then(|r| r.last_modified),
            RecordStatus::Updated,
            data,
        );
        let id = resolved.id.clone();
        let record = resolved.clone();
        self.adapter
            .execute(&[id], &mut |proxy| proxy.update(record.clone()))?;
        Ok(resolved)
    }

    /// Forget everything about past syncs: drop local tombstones, mark every
    /// record `created` without a timestamp, and reset the collection
    /// timestamp. The next sync re-publishes all records as creations.
    pub fn reset_sync_status(&self) -> Result<()> {
        let all = self.adapter.list(&ListParams {
            filters: Map::new(),
            order: String::new(),
        })?;
        self.adapter.execute(&[], &mut |proxy| {
            for record in &all {
                if record.is_tombstone() {
                    proxy.delete(&record.id)?;
                } else {
                    proxy.update(Record::new(
                        record.id.clone(),
                        None,
                        RecordStatus::Created,
                        record.data.clone(),
                    ))?;
                }
            }
            Ok(())
        })?;
        self.adapter.save_last_modified(None)?;
        self.set_last_modified(None);
        Ok(())
    }
}
