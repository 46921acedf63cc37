//! Bi-directional synchronization: change pulling, conflict detection and
//! resolution, change publishing with optimistic concurrency, and result
//! aggregation.
//!
//! The driver is a pull → push → pull sequence awaited in order; the whole
//! run executes as one task so the collection timestamp only ever moves
//! forward. Callers must not start a second sync on the same collection
//! before the first settles.

use chrono::Utc;
use serde_json::{json, Map};
use tracing::{debug, trace, warn};

use crate::error::{KintoError, Result};
use crate::events::CollectionEvent;
use crate::hooks::dispatch_incoming;
use crate::remote::{
    BatchOpKind, BatchOperation, BatchOptions, BatchResponse, CallOptions, ListChangesOptions,
    Precondition,
};
use crate::storage::ListParams;
use crate::sync::{ErrorPhase, SyncErrorEntry, SyncOptions, SyncResult, SyncStrategy, Updated};
use crate::transformer::{decode_record, encode_record};
use crate::types::{
    records_equal, ChangeBatch, Conflict, ConflictKind, Record, RecordStatus, RemoteRecord,
    Resolution,
};

use super::Collection;

// ============================================================================
// Import outcomes
// ============================================================================

enum ImportOutcome {
    Created(Record),
    Updated(Updated),
    Deleted(Record),
    Skipped(Record),
    Conflicted(Conflict),
    Void,
}

/// Decide and apply what one remote change means for the local store.
fn import_one(
    proxy: &mut dyn crate::storage::StorageProxy,
    remote: &RemoteRecord,
    local_fields: &[String],
) -> Result<ImportOutcome> {
    let local = proxy.get(&remote.id)?;

    let Some(local) = local else {
        if remote.deleted {
            // Nothing to delete locally.
            return Ok(ImportOutcome::Skipped(
                remote.clone().into_record(RecordStatus::Deleted),
            ));
        }
        let created = remote.clone().into_record(RecordStatus::Synced);
        proxy.create(created.clone())?;
        return Ok(ImportOutcome::Created(created));
    };

    if local.status == RecordStatus::Synced {
        if remote.deleted {
            proxy.delete(&remote.id)?;
            return Ok(ImportOutcome::Deleted(local));
        }
        if records_equal(&local, remote, local_fields) {
            return Ok(ImportOutcome::Void);
        }
        let new = remote.clone().into_record(RecordStatus::Synced);
        proxy.update(new.clone())?;
        return Ok(ImportOutcome::Updated(Updated { old: local, new }));
    }

    // Local record has a pending change.
    if local.is_tombstone() && remote.deleted {
        // Convergent deletion.
        return Ok(ImportOutcome::Skipped(local));
    }
    if local.is_tombstone() {
        return Ok(ImportOutcome::Conflicted(Conflict {
            kind: ConflictKind::Incoming,
            local,
            remote: Some(remote.clone()),
        }));
    }
    if local.last_modified.is_some() && local.last_modified == remote.last_modified {
        // The pending change was made on top of this very remote version;
        // keep it for the publish phase.
        return Ok(ImportOutcome::Void);
    }
    if records_equal(&local, remote, local_fields) {
        // Identical content on both sides: reconcile silently.
        let new = remote.clone().into_record(RecordStatus::Synced);
        proxy.update(new.clone())?;
        return Ok(ImportOutcome::Updated(Updated { old: local, new }));
    }
    Ok(ImportOutcome::Conflicted(Conflict {
        kind: ConflictKind::Incoming,
        local,
        remote: Some(remote.clone()),
    }))
}

// ============================================================================
// Sync driver
// ============================================================================

impl Collection {
    /// Reconcile the local collection with the remote authority: pull
    /// changes, publish local ones (unless the strategy is pull-only), and
    /// pull once more if anything was published.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncResult> {
        if !options.ignore_backoff {
            if let Some(remaining) = self.remote().backoff_remaining() {
                let remaining = remaining.as_secs_f64().ceil() as u64;
                warn!(remaining, "sync refused: server asked clients to back off");
                return Err(KintoError::Backoff { remaining });
            }
        }

        match self.sync_inner(&options).await {
            Ok(result) => {
                self.events().emit(&CollectionEvent::SyncSuccess {
                    at: Utc::now(),
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(error) => {
                self.events().emit(&CollectionEvent::SyncError {
                    at: Utc::now(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn sync_inner(&self, options: &SyncOptions) -> Result<SyncResult> {
        let bucket = options.bucket.clone().unwrap_or_else(|| self.bucket().to_string());
        let name = options
            .collection
            .clone()
            .unwrap_or_else(|| self.name().to_string());

        // Refresh the collection timestamp from the store.
        self.set_last_modified(self.adapter().get_last_modified()?);
        debug!(
            bucket = %bucket,
            collection = %name,
            since = ?self.last_modified(),
            "sync started"
        );

        let mut result = SyncResult::new();
        self.pull_changes(&mut result, &bucket, &name, options).await?;

        // Unresolved conflicts suspend publishing until the caller settles
        // them.
        if !result.conflicts.is_empty() {
            debug!(
                conflicts = result.conflicts.len(),
                "sync stopped before publish"
            );
            return Ok(result);
        }

        if options.strategy != SyncStrategy::PullOnly {
            let to_sync = self.gather_local_changes()?;
            trace!(pending = to_sync.len(), "local changes gathered");
            self.push_changes(to_sync, &mut result, &bucket, &name, options, true)
                .await?;

            // Capture server-side modifications induced by the publish.
            if !result.published.is_empty() {
                self.pull_changes(&mut result, &bucket, &name, options).await?;
            }
        }

        // Bookkeeping is persisted last: a metadata fetch failure leaves the
        // pull/push effects above already committed.
        self.pull_metadata(&bucket, &name, options).await?;
        if result.ok() {
            if let Some(ts) = result.last_modified {
                self.adapter().save_last_modified(Some(ts))?;
                self.set_last_modified(Some(ts));
            }
        }
        debug!(ok = result.ok(), published = result.published.len(), "sync finished");
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    async fn pull_metadata(&self, bucket: &str, name: &str, options: &SyncOptions) -> Result<()> {
        let call = CallOptions {
            headers: options.headers.clone(),
            retry: options.retry,
        };
        let metadata = self.remote().collection_metadata(bucket, name, &call).await?;
        self.adapter().save_metadata(Some(metadata))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    async fn pull_changes(
        &self,
        result: &mut SyncResult,
        bucket: &str,
        name: &str,
        options: &SyncOptions,
    ) -> Result<()> {
        let since = self.last_modified();
        let page = self
            .remote()
            .list_changes(
                bucket,
                name,
                &ListChangesOptions {
                    since,
                    expected_timestamp: options.expected_timestamp,
                    headers: options.headers.clone(),
                    retry: options.retry,
                },
            )
            .await?;
        trace!(changes = page.data.len(), last_modified = ?page.last_modified, "changes pulled");

        // A pristine server advertising a newer timestamp than the one we
        // synced up to means it lost its data since then.
        if let (Some(since_ts), Some(server_ts)) = (since, page.last_modified) {
            if server_ts > since_ts && page.data.is_empty() {
                warn!(since_ts, server_ts, "server appears to have been flushed");
                return Err(KintoError::ServerFlushed);
            }
        }

        let batch = ChangeBatch {
            changes: page.data,
            last_modified: page.last_modified,
        };

        // Hooks and decoders failing abandon the batch; the failure lands in
        // the result instead of aborting the sync.
        let batch = match dispatch_incoming(self.hooks(), batch).await {
            Ok(batch) => batch,
            Err(error) => {
                result.add_error(SyncErrorEntry {
                    phase: ErrorPhase::Incoming,
                    record_id: None,
                    message: error.to_string(),
                    response: None,
                });
                return Ok(());
            }
        };

        let mut decoded = Vec::with_capacity(batch.changes.len());
        for change in batch.changes {
            let id = change.id.clone();
            match decode_record(self.transformers(), change).await {
                Ok(change) => decoded.push(change),
                Err(error) => {
                    result.add_error(SyncErrorEntry {
                        phase: ErrorPhase::Incoming,
                        record_id: Some(id),
                        message: error.to_string(),
                        response: None,
                    });
                    return Ok(());
                }
            }
        }

        self.import_changes(result, decoded)?;
        self.handle_conflicts(result, options.strategy)?;

        // The collection timestamp advances only on conflict-free,
        // error-free batches.
        if result.ok() {
            if let Some(ts) = batch.last_modified {
                let advanced = self.last_modified().map_or(ts, |current| current.max(ts));
                result.last_modified = Some(advanced);
                self.adapter().save_last_modified(Some(advanced))?;
                self.set_last_modified(Some(advanced));
            }
        }
        Ok(())
    }

    pub(crate) fn import_changes(
        &self,
        result: &mut SyncResult,
        changes: Vec<RemoteRecord>,
    ) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // The identifier schema gates remote import too.
        let (valid, invalid): (Vec<_>, Vec<_>) = changes
            .into_iter()
            .partition(|change| self.id_schema().validate(&change.id));
        for change in invalid {
            result.add_error(SyncErrorEntry {
                phase: ErrorPhase::Incoming,
                record_id: Some(change.id.clone()),
                message: KintoError::InvalidId(change.id).to_string(),
                response: None,
            });
        }
        if valid.is_empty() {
            return Ok(());
        }

        // A paginated pull can repeat an id; keep the newest version only.
        let mut indices: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut unique: Vec<RemoteRecord> = Vec::with_capacity(valid.len());
        for change in valid {
            match indices.get(&change.id) {
                Some(&i) if unique[i].last_modified >= change.last_modified => {}
                Some(&i) => unique[i] = change,
                None => {
                    indices.insert(change.id.clone(), unique.len());
                    unique.push(change);
                }
            }
        }
        let valid = unique;

        let ids: Vec<String> = valid.iter().map(|change| change.id.clone()).collect();
        let mut outcomes = Vec::with_capacity(valid.len());
        let local_fields = self.local_fields().to_vec();
        self.adapter().execute(&ids, &mut |proxy| {
            outcomes.clear();
            for change in &valid {
                outcomes.push(import_one(proxy, change, &local_fields)?);
            }
            Ok(())
        })?;

        for outcome in outcomes {
            match outcome {
                ImportOutcome::Created(record) => result.add_created(record),
                ImportOutcome::Updated(pair) => result.add_updated(pair),
                ImportOutcome::Deleted(record) => result.add_deleted(record),
                ImportOutcome::Skipped(record) => result.add_skipped(record),
                ImportOutcome::Conflicted(conflict) => result.add_conflict(conflict),
                ImportOutcome::Void => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conflict handling
    // ------------------------------------------------------------------

    /// Settle recorded conflicts according to the strategy. Under
    /// `ServerWins`/`PullOnly` the remote version lands locally as synced;
    /// under `ClientWins` the local version is kept, stamped with the
    /// remote's timestamp so the next publish passes its precondition.
    fn handle_conflicts(&self, result: &mut SyncResult, strategy: SyncStrategy) -> Result<()> {
        if strategy == SyncStrategy::Manual || result.conflicts.is_empty() {
            return Ok(());
        }

        let conflicts = std::mem::take(&mut result.conflicts);
        let ids: Vec<String> = conflicts.iter().map(|c| c.local.id.clone()).collect();
        let mut resolutions = Vec::with_capacity(conflicts.len());

        self.adapter().execute(&ids, &mut |proxy| {
            resolutions.clear();
            for conflict in &conflicts {
                let resolution = match strategy {
                    SyncStrategy::ServerWins | SyncStrategy::PullOnly => match &conflict.remote {
                        Some(remote) if !remote.deleted => {
                            let accepted = remote.clone().into_record(RecordStatus::Synced);
                            proxy.update(accepted.clone())?;
                            Resolution {
                                accepted,
                                rejected: conflict.local.clone(),
                            }
                        }
                        remote => {
                            // The server's version is a deletion (or it was
                            // not attached at all): accept the absence.
                            proxy.delete(&conflict.local.id)?;
                            let accepted = match remote {
                                Some(remote) => remote.clone().into_record(RecordStatus::Deleted),
                                None => Record::new(
                                    conflict.local.id.clone(),
                                    None,
                                    RecordStatus::Deleted,
                                    Map::new(),
                                ),
                            };
                            Resolution {
                                accepted,
                                rejected: conflict.local.clone(),
                            }
                        }
                    },
                    SyncStrategy::ClientWins => {
                        let remote_ts = conflict.remote.as_ref().and_then(|r| r.last_modified);
                        let status = if conflict.local.is_tombstone() {
                            RecordStatus::Deleted
                        } else {
                            RecordStatus::Updated
                        };
                        let accepted = Record::new(
                            conflict.local.id.clone(),
                            remote_ts,
                            status,
                            conflict.local.data.clone(),
                        );
                        proxy.update(accepted.clone())?;
                        let rejected = match &conflict.remote {
                            Some(remote) => {
                                let status = if remote.deleted {
                                    RecordStatus::Deleted
                                } else {
                                    RecordStatus::Synced
                                };
                                remote.clone().into_record(status)
                            }
                            None => Record::new(
                                conflict.local.id.clone(),
                                None,
                                RecordStatus::Deleted,
                                Map::new(),
                            ),
                        };
                        Resolution { accepted, rejected }
                    }
                    SyncStrategy::Manual => unreachable!("manual strategy never resolves"),
                };
                resolutions.push(resolution);
            }
            Ok(())
        })?;

        for resolution in resolutions {
            result.add_resolved(resolution);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// Every record carrying a pending local change, tombstones included.
    pub(crate) fn gather_local_changes(&self) -> Result<Vec<Record>> {
        let mut filters = Map::new();
        filters.insert(
            "_status".to_string(),
            json!(["created", "updated", "deleted"]),
        );
        self.adapter().list(&ListParams {
            filters,
            order: String::new(),
        })
    }

    /// Publish local changes and reconcile the server's responses locally.
    async fn push_changes(
        &self,
        records: Vec<Record>,
        result: &mut SyncResult,
        bucket: &str,
        name: &str,
        options: &SyncOptions,
        allow_recurse: bool,
    ) -> Result<()> {
        // Tombstones the server never saw have nothing to propagate; purge
        // them locally.
        let (to_delete, to_send): (Vec<Record>, Vec<Record>) = records
            .into_iter()
            .partition(|r| r.is_tombstone() && r.last_modified.is_none());

        if !to_delete.is_empty() {
            trace!(purged = to_delete.len(), "dropping never-acknowledged tombstones");
            self.adapter().execute(&[], &mut |proxy| {
                for record in &to_delete {
                    proxy.delete(&record.id)?;
                }
                Ok(())
            })?;
        }

        if to_send.is_empty() {
            return Ok(());
        }

        let call = CallOptions {
            headers: options.headers.clone(),
            retry: options.retry,
        };
        let info = self.remote().server_info(&call).await?;
        if info.settings.readonly {
            return Err(KintoError::ReadonlyServer);
        }

        // Encode outbound records. Outgoing transformer failures abort the
        // sync; nothing has been sent yet.
        let mut operations = Vec::with_capacity(to_send.len());
        for record in &to_send {
            let mut wire = RemoteRecord::from_record(record);
            let local_fields = self.local_fields();
            wire.data.retain(|key, _| !local_fields.iter().any(|f| f == key));
            let encoded = encode_record(self.transformers(), wire).await?;
            operations.push(BatchOperation {
                id: encoded.id.clone(),
                precondition: match encoded.last_modified {
                    Some(ts) => Precondition::IfMatch(ts),
                    None => Precondition::IfNoneMatch,
                },
                kind: if encoded.deleted {
                    BatchOpKind::Delete
                } else {
                    BatchOpKind::Put { data: encoded.data }
                },
            });
        }

        let responses = self
            .remote()
            .batch(
                bucket,
                name,
                operations,
                &BatchOptions {
                    safe: true,
                    headers: options.headers.clone(),
                    retry: options.retry,
                },
            )
            .await?;
        if responses.len() != to_send.len() {
            return Err(KintoError::transport(
                0,
                format!(
                    "batch returned {} responses for {} operations",
                    responses.len(),
                    to_send.len()
                ),
            ));
        }

        // Classify responses.
        let mut published_wire: Vec<RemoteRecord> = Vec::new();
        let mut missing_remotely: Vec<RemoteRecord> = Vec::new();
        for (local, response) in to_send.iter().zip(&responses) {
            match response.status {
                200..=299 => match response.record() {
                    Some(body) => published_wire.push(body),
                    None => result.add_error(publish_error(local, response)),
                },
                // Deleting something already gone is a success of sorts.
                404 => {
                    result.add_skipped(local.clone());
                    missing_remotely.push(RemoteRecord::tombstone(local.id.clone(), None));
                }
                412 => result.add_conflict(Conflict {
                    kind: ConflictKind::Outgoing,
                    local: local.clone(),
                    remote: response.existing_record(),
                }),
                _ => result.add_error(publish_error(local, response)),
            }
        }
        trace!(
            published = published_wire.len(),
            skipped = missing_remotely.len(),
            conflicts = result.conflicts.len(),
            "publish responses classified"
        );

        // Decode the authoritative bodies, then reflect everything locally
        // in one transaction.
        let mut decoded = Vec::with_capacity(published_wire.len());
        for wire in published_wire {
            decoded.push(decode_record(self.transformers(), wire).await?);
        }

        let to_apply: Vec<RemoteRecord> = decoded
            .iter()
            .cloned()
            .chain(missing_remotely.into_iter())
            .collect();
        self.adapter().execute(&[], &mut |proxy| {
            for wire in &to_apply {
                if wire.deleted {
                    proxy.delete(&wire.id)?;
                } else {
                    proxy.update(wire.clone().into_record(RecordStatus::Synced))?;
                }
            }
            Ok(())
        })?;

        for wire in decoded {
            let record = if wire.deleted {
                Record::new(wire.id, wire.last_modified, RecordStatus::Deleted, Map::new())
            } else {
                wire.into_record(RecordStatus::Synced)
            };
            result.add_published(record);
        }

        self.handle_conflicts(result, options.strategy)?;

        // Under client-wins, conflict resolutions stay pending locally;
        // publish them through one guarded recursion.
        if allow_recurse && options.strategy == SyncStrategy::ClientWins && !result.resolved.is_empty()
        {
            let mut to_repush = Vec::new();
            for resolution in &result.resolved {
                if let Some(fresh) = self.adapter().get(&resolution.accepted.id)? {
                    if fresh.status != RecordStatus::Synced {
                        to_repush.push(fresh);
                    }
                }
            }
            if !to_repush.is_empty() {
                debug!(records = to_repush.len(), "re-publishing client-wins resolutions");
                Box::pin(self.push_changes(to_repush, result, bucket, name, options, false))
                    .await?;
            }
        }
        Ok(())
    }
}

fn publish_error(local: &Record, response: &BatchResponse) -> SyncErrorEntry {
    SyncErrorEntry {
        phase: ErrorPhase::Outgoing,
        record_id: Some(local.id.clone()),
        message: format!("HTTP {}", response.status),
        response: response.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{make_collection, VALID_ID};
    use super::*;
    use serde_json::json;

    use crate::collection::CreateOptions;
    use crate::collection::DeleteOptions;
    use crate::collection::UpdateOptions;

    fn remote_record(id: &str, lm: u64, data: serde_json::Value) -> RemoteRecord {
        RemoteRecord {
            id: id.to_string(),
            last_modified: Some(lm),
            deleted: false,
            data: data.as_object().unwrap().clone(),
        }
    }

    fn remote_tombstone(id: &str, lm: u64) -> RemoteRecord {
        RemoteRecord::tombstone(id.to_string(), Some(lm))
    }

    // ------------------------------------------------------------------
    // import_changes — the incoming decision table
    // ------------------------------------------------------------------

    #[test]
    fn import_creates_unknown_records_as_synced() {
        let collection = make_collection();
        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(VALID_ID, 10, json!({"title": "foo"}))])
            .unwrap();

        assert_eq!(result.created.len(), 1);
        let stored = collection.get(VALID_ID, false).unwrap();
        assert_eq!(stored.status, RecordStatus::Synced);
        assert_eq!(stored.last_modified, Some(10));
        assert!(result.ok());
    }

    #[test]
    fn import_skips_tombstone_for_unknown_record() {
        let collection = make_collection();
        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_tombstone(VALID_ID, 10)])
            .unwrap();

        assert_eq!(result.skipped.len(), 1);
        assert!(collection.get_any(VALID_ID).unwrap().is_none());
    }

    #[test]
    fn import_overwrites_synced_record() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "old", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(VALID_ID, 10, json!({"title": "new"}))])
            .unwrap();

        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].old.data["title"], json!("old"));
        let stored = collection.get(VALID_ID, false).unwrap();
        assert_eq!(stored.data["title"], json!("new"));
        assert_eq!(stored.last_modified, Some(10));
    }

    #[test]
    fn import_identical_synced_record_is_a_noop() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "same", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(VALID_ID, 9, json!({"title": "same"}))])
            .unwrap();

        assert!(result.updated.is_empty());
        assert!(result.ok());
        // Untouched, including the timestamp.
        assert_eq!(collection.get(VALID_ID, false).unwrap().last_modified, Some(5));
    }

    #[test]
    fn import_deletes_synced_record_on_tombstone() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "foo", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_tombstone(VALID_ID, 10)])
            .unwrap();

        assert_eq!(result.deleted.len(), 1);
        assert!(collection.get_any(VALID_ID).unwrap().is_none());
    }

    #[test]
    fn import_conflicts_with_pending_local_change() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "base", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();
        collection
            .update(json!({"id": VALID_ID, "title": "local"}), UpdateOptions::default())
            .unwrap();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(VALID_ID, 10, json!({"title": "remote"}))])
            .unwrap();

        assert!(!result.ok());
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Incoming);
        assert_eq!(conflict.local.data["title"], json!("local"));
        assert_eq!(conflict.remote.as_ref().unwrap().data["title"], json!("remote"));
        // Local store untouched.
        assert_eq!(collection.get(VALID_ID, false).unwrap().data["title"], json!("local"));
    }

    #[test]
    fn import_conflicts_with_local_tombstone() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "base", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();
        collection.delete(VALID_ID, DeleteOptions::default()).unwrap();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(VALID_ID, 10, json!({"title": "remote"}))])
            .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        assert!(result.conflicts[0].local.is_tombstone());
    }

    #[test]
    fn import_convergent_delete_is_skipped() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "base", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();
        collection.delete(VALID_ID, DeleteOptions::default()).unwrap();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_tombstone(VALID_ID, 10)])
            .unwrap();

        assert_eq!(result.skipped.len(), 1);
        assert!(result.ok());
        // The tombstone stays until the local deletion is acknowledged.
        assert!(collection.get(VALID_ID, true).unwrap().is_tombstone());
    }

    #[test]
    fn import_keeps_pending_change_based_on_same_version() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "base", "last_modified": 10}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();
        collection
            .update(json!({"id": VALID_ID, "title": "local"}), UpdateOptions::default())
            .unwrap();

        // The remote re-sends the very version the local change builds on.
        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(VALID_ID, 10, json!({"title": "base"}))])
            .unwrap();

        assert!(result.ok());
        let stored = collection.get(VALID_ID, false).unwrap();
        assert_eq!(stored.status, RecordStatus::Updated);
        assert_eq!(stored.data["title"], json!("local"));
    }

    #[test]
    fn import_reconciles_identical_pending_content() {
        let collection = make_collection();
        collection
            .create(json!({"title": "same"}), CreateOptions::default())
            .unwrap();
        let id = collection.list(Default::default(), false).unwrap()[0].id.clone();

        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record(&id, 10, json!({"title": "same"}))])
            .unwrap();

        assert!(result.ok());
        assert_eq!(result.updated.len(), 1);
        let stored = collection.get(&id, false).unwrap();
        assert_eq!(stored.status, RecordStatus::Synced);
        assert_eq!(stored.last_modified, Some(10));
    }

    #[test]
    fn import_rejects_invalid_remote_ids() {
        let collection = make_collection();
        let mut result = SyncResult::new();
        collection
            .import_changes(&mut result, vec![remote_record("not-a-uuid", 10, json!({"title": "x"}))])
            .unwrap();

        assert!(!result.ok());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].phase, ErrorPhase::Incoming);
    }

    // ------------------------------------------------------------------
    // gather_local_changes
    // ------------------------------------------------------------------

    #[test]
    fn gather_returns_pending_records_and_tombstones() {
        let collection = make_collection();
        collection
            .create(
                json!({"id": VALID_ID, "title": "synced", "last_modified": 5}),
                CreateOptions { synced: true, ..Default::default() },
            )
            .unwrap();
        let created = collection
            .create(json!({"title": "created"}), CreateOptions::default())
            .unwrap();
        let doomed = collection
            .create(json!({"title": "doomed"}), CreateOptions::default())
            .unwrap();
        collection.delete(&doomed.id, DeleteOptions::default()).unwrap();

        let gathered = collection.gather_local_changes().unwrap();
        let mut ids: Vec<&str> = gathered.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        let mut expected = vec![created.id.as_str(), doomed.id.as_str()];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
