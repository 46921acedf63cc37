//! Wire shapes for the remote facade.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::RemoteRecord;

// ============================================================================
// Server info
// ============================================================================

fn default_batch_max_requests() -> usize {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_batch_max_requests")]
    pub batch_max_requests: usize,
    #[serde(default)]
    pub readonly: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            batch_max_requests: default_batch_max_requests(),
            readonly: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub settings: ServerSettings,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    #[serde(default)]
    pub user: Option<Value>,
}

// ============================================================================
// Call options
// ============================================================================

/// Options common to every remote call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub headers: HashMap<String, String>,
    pub retry: u32,
}

/// Options for `list_changes`.
#[derive(Debug, Clone, Default)]
pub struct ListChangesOptions {
    pub since: Option<u64>,
    /// Precondition: fail the request if the server collection timestamp
    /// does not match.
    pub expected_timestamp: Option<u64>,
    pub headers: HashMap<String, String>,
    pub retry: u32,
}

/// Options for `batch`.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Attach per-operation concurrency preconditions.
    pub safe: bool,
    pub headers: HashMap<String, String>,
    pub retry: u32,
}

// ============================================================================
// Changes page
// ============================================================================

/// One page of changes from `list_changes`. Entries may carry
/// `deleted: true` (tombstone notifications).
#[derive(Debug, Clone, Default)]
pub struct ChangesPage {
    pub last_modified: Option<u64>,
    pub data: Vec<RemoteRecord>,
    /// Opaque continuation token, when the implementation did not exhaust
    /// pagination itself.
    pub next: Option<String>,
}

// ============================================================================
// Batch operations
// ============================================================================

/// Optimistic-concurrency precondition attached to a batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The server's record must carry this timestamp (`If-Match`).
    IfMatch(u64),
    /// No record with this id may exist (`If-None-Match: *`).
    IfNoneMatch,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOpKind {
    /// Replace the record body. Bodies never carry `_status` or
    /// `last_modified`.
    Put { data: Map<String, Value> },
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperation {
    pub id: String,
    pub kind: BatchOpKind,
    pub precondition: Precondition,
}

/// One response per operation, in operation order.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub status: u16,
    pub path: String,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
}

impl BatchResponse {
    /// The record in a success body (`{"data": {...}}`).
    pub fn record(&self) -> Option<RemoteRecord> {
        let data = self.body.as_ref()?.get("data")?.clone();
        serde_json::from_value(data).ok()
    }

    /// The server's existing record attached to a 412 body
    /// (`{"details": {"existing": {...}}}`).
    pub fn existing_record(&self) -> Option<RemoteRecord> {
        let existing = self.body.as_ref()?.get("details")?.get("existing")?.clone();
        serde_json::from_value(existing).ok()
    }
}
