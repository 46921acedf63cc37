//! Storage adapter contract.
//!
//! An adapter is a durable record store for one `(bucket, collection)` pair:
//! keyed records, a transaction primitive, last-modified bookkeeping, and an
//! opaque metadata slot. Adapters are synchronous and object-safe so the
//! collection can hold them as `Arc<dyn StorageAdapter>`.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::Record;

// ============================================================================
// Listing parameters
// ============================================================================

/// Filtering and ordering for `list`. Filtering is in-memory: keys may be
/// dotted paths into the record's JSON view (which includes `id`, `_status`
/// and `last_modified`); a scalar value means equality, a sequence means
/// membership.
#[derive(Debug, Clone)]
pub struct ListParams {
    pub filters: Map<String, Value>,
    /// Field to order by; a leading `-` means descending. An empty string
    /// disables ordering.
    pub order: String,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            filters: Map::new(),
            order: "-last_modified".to_string(),
        }
    }
}

impl ListParams {
    pub fn filtered(filters: Map<String, Value>) -> Self {
        Self {
            filters,
            ..Default::default()
        }
    }
}

// ============================================================================
// Transaction proxy
// ============================================================================

/// Synchronous write proxy handed to `execute` bodies. All writes either all
/// commit or none do. `get` is restricted to the ids preloaded by `execute`:
/// the underlying store's transactions forbid late reads once opened, so
/// required rows are loaded eagerly.
pub trait StorageProxy {
    fn create(&mut self, record: Record) -> Result<()>;
    fn update(&mut self, record: Record) -> Result<()>;
    fn delete(&mut self, id: &str) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<Record>>;
}

// ============================================================================
// Adapter
// ============================================================================

pub trait StorageAdapter: Send + Sync {
    /// Discard every record. Metadata and the last-modified bookkeeping are
    /// kept; callers clear those explicitly when needed.
    fn clear(&self) -> Result<()>;

    /// Run `body` inside a transaction. `preload` names the ids the body may
    /// read through the proxy.
    fn execute(
        &self,
        preload: &[String],
        body: &mut dyn FnMut(&mut dyn StorageProxy) -> Result<()>,
    ) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Record>>;

    fn list(&self, params: &ListParams) -> Result<Vec<Record>>;

    fn save_last_modified(&self, last_modified: Option<u64>) -> Result<Option<u64>>;

    fn get_last_modified(&self) -> Result<Option<u64>>;

    /// Bulk-write records as-is, overwriting existing ids. Returns the
    /// written records.
    fn import_bulk(&self, records: Vec<Record>) -> Result<Vec<Record>>;

    fn save_metadata(&self, metadata: Option<Value>) -> Result<Option<Value>>;

    fn get_metadata(&self) -> Result<Option<Value>>;
}

// ============================================================================
// In-memory filtering and ordering
// ============================================================================

/// Look up a dotted path (`"author.name"`) inside a JSON value.
pub fn get_dotted<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether a record's JSON view matches every filter.
pub fn matches_filters(json: &Value, filters: &Map<String, Value>) -> bool {
    filters.iter().all(|(path, expected)| {
        let actual = get_dotted(json, path);
        match expected {
            Value::Array(candidates) => match actual {
                Some(v) => candidates.contains(v),
                None => false,
            },
            _ => actual == Some(expected),
        }
    })
}

fn value_cmp(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        // Records missing the field sort after those carrying it.
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => match (x, y) {
            (Value::Number(nx), Value::Number(ny)) => nx
                .as_f64()
                .partial_cmp(&ny.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(sx), Value::String(sy)) => sx.cmp(sy),
            (Value::Bool(bx), Value::Bool(by)) => bx.cmp(by),
            _ => Ordering::Equal,
        },
    }
}

/// Sort records by an order clause (`"field"` ascending, `"-field"` descending).
pub fn sort_records(records: &mut [Record], order: &str) {
    if order.is_empty() {
        return;
    }
    let (field, descending) = match order.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (order, false),
    };
    let field = field.to_string();
    records.sort_by(|a, b| {
        let ja = a.to_json();
        let jb = b.to_json();
        let ordering = value_cmp(get_dotted(&ja, &field), get_dotted(&jb, &field));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}
