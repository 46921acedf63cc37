//! Core record types shared across storage, collection, and sync layers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{KintoError, Result};

// ============================================================================
// RecordStatus
// ============================================================================

/// Local lifecycle status of a record. Never transmitted to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Created,
    Updated,
    Deleted,
    Synced,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Created => "created",
            RecordStatus::Updated => "updated",
            RecordStatus::Deleted => "deleted",
            RecordStatus::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Option<RecordStatus> {
        match s {
            "created" => Some(RecordStatus::Created),
            "updated" => Some(RecordStatus::Updated),
            "deleted" => Some(RecordStatus::Deleted),
            "synced" => Some(RecordStatus::Synced),
            _ => None,
        }
    }
}

// ============================================================================
// Record — local representation
// ============================================================================

/// A locally stored record. `status` and `last_modified` are kept as typed
/// fields; `data` holds the user-defined fields (never `id`, `_status` or
/// `last_modified`).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    /// Server-assigned timestamp; present iff the record was ever
    /// acknowledged by the remote.
    pub last_modified: Option<u64>,
    pub status: RecordStatus,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(
        id: String,
        last_modified: Option<u64>,
        status: RecordStatus,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            last_modified,
            status,
            data,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.status == RecordStatus::Deleted
    }

    /// Full JSON view of the record, including `id`, `_status` and
    /// `last_modified`. This is the shape filters and storage backends see.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".to_string(), Value::String(self.id.clone()));
        if let Some(lm) = self.last_modified {
            obj.insert("last_modified".to_string(), Value::from(lm));
        }
        obj.insert(
            "_status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        for (k, v) in &self.data {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }

    /// Parse a stored JSON object back into a `Record`.
    pub fn from_json(value: Value) -> Result<Record> {
        let mut obj = match value {
            Value::Object(o) => o,
            _ => return Err(KintoError::NotAnObject),
        };
        let id = match obj.remove("id") {
            Some(Value::String(s)) => s,
            _ => return Err(KintoError::MissingId),
        };
        let last_modified = match obj.remove("last_modified") {
            Some(v) => v.as_u64(),
            None => None,
        };
        let status = obj
            .remove("_status")
            .and_then(|v| v.as_str().and_then(RecordStatus::parse))
            .ok_or_else(|| KintoError::storage(format!("record {id} has no valid _status")))?;
        Ok(Record {
            id,
            last_modified,
            status,
            data: obj,
        })
    }
}

// ============================================================================
// RemoteRecord — wire representation
// ============================================================================

/// A record as exchanged with the server. `_status` never appears here;
/// tombstone notifications carry `deleted: true` and no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RemoteRecord {
    pub fn from_record(record: &Record) -> RemoteRecord {
        RemoteRecord {
            id: record.id.clone(),
            last_modified: record.last_modified,
            deleted: record.is_tombstone(),
            data: record.data.clone(),
        }
    }

    /// Convert into a local record carrying the given status.
    pub fn into_record(self, status: RecordStatus) -> Record {
        Record {
            id: self.id,
            last_modified: self.last_modified,
            status,
            data: self.data,
        }
    }

    /// Tombstone notification shape: `{id, last_modified, deleted: true}`.
    pub fn tombstone(id: String, last_modified: Option<u64>) -> RemoteRecord {
        RemoteRecord {
            id,
            last_modified,
            deleted: true,
            data: Map::new(),
        }
    }
}

// ============================================================================
// Conflicts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Produced while importing remote changes over a pending local change.
    Incoming,
    /// Produced when a publish fails its optimistic-concurrency precondition.
    Outgoing,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Incoming => "incoming",
            ConflictKind::Outgoing => "outgoing",
        }
    }
}

/// A record pair describing a divergence between the two authorities.
/// Never stored durably.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub local: Record,
    /// The server's version; `None` when a precondition failure came back
    /// without the existing record attached.
    pub remote: Option<RemoteRecord>,
}

/// A settled conflict: what was kept and what was discarded.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub accepted: Record,
    pub rejected: Record,
}

// ============================================================================
// Change batches
// ============================================================================

/// A batch of changes pulled from the server, before import.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub changes: Vec<RemoteRecord>,
    pub last_modified: Option<u64>,
}

// ============================================================================
// Equality modulo sync fields
// ============================================================================

/// Compare two payloads ignoring the collection's local-only fields.
/// `status` and `last_modified` never participate (they live outside `data`).
pub fn data_equal(a: &Map<String, Value>, b: &Map<String, Value>, local_fields: &[String]) -> bool {
    let relevant = |m: &Map<String, Value>| -> Map<String, Value> {
        m.iter()
            .filter(|(k, _)| !local_fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    relevant(a) == relevant(b)
}

/// Whether a local record and a remote record hold the same content.
pub fn records_equal(local: &Record, remote: &RemoteRecord, local_fields: &[String]) -> bool {
    local.id == remote.id && data_equal(&local.data, &remote.data, local_fields)
}
