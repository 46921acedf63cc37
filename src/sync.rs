//! Sync strategy, options, and the per-run result accumulator.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{Conflict, Record, Resolution};

// ============================================================================
// Strategy
// ============================================================================

/// Conflict-resolution policy applied during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// Conflicts are reported in the result; nothing is resolved.
    #[default]
    Manual,
    /// The remote version wins every conflict.
    ServerWins,
    /// The local version wins every conflict and is re-published.
    ClientWins,
    /// Like `ServerWins`, and the publish phase is skipped entirely.
    PullOnly,
}

// ============================================================================
// Options
// ============================================================================

/// Options for a single `sync` invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    /// Extra headers forwarded on every remote call.
    pub headers: HashMap<String, String>,
    /// Proceed even if the server is in a back-off period.
    pub ignore_backoff: bool,
    /// Sync against another bucket than the collection's own.
    pub bucket: Option<String>,
    /// Sync against another remote collection name.
    pub collection: Option<String>,
    /// Precondition for the pull phase: fail if the server collection
    /// timestamp does not match.
    pub expected_timestamp: Option<u64>,
    /// How many times the remote facade may retry throttled requests.
    pub retry: u32,
}

impl SyncOptions {
    pub fn with_strategy(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }
}

// ============================================================================
// Error entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    Incoming,
    Outgoing,
}

/// A per-item failure recorded in the result rather than aborting the run.
#[derive(Debug, Clone)]
pub struct SyncErrorEntry {
    pub phase: ErrorPhase,
    pub record_id: Option<String>,
    pub message: String,
    /// Server response body for publish failures, when available.
    pub response: Option<Value>,
}

// ============================================================================
// Updated pairs
// ============================================================================

#[derive(Debug, Clone)]
pub struct Updated {
    pub old: Record,
    pub new: Record,
}

// ============================================================================
// SyncResult
// ============================================================================

/// Accumulator for per-phase outcomes of a sync run.
///
/// Within each outcome list a record id appears at most once; a later entry
/// for the same id replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub last_modified: Option<u64>,
    pub errors: Vec<SyncErrorEntry>,
    pub created: Vec<Record>,
    pub updated: Vec<Updated>,
    pub deleted: Vec<Record>,
    pub published: Vec<Record>,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<Record>,
    pub resolved: Vec<Resolution>,
}

fn upsert_by_id<T>(list: &mut Vec<T>, entry: T, id_of: impl Fn(&T) -> &str) {
    let id = id_of(&entry).to_string();
    if let Some(existing) = list.iter_mut().find(|e| id_of(e) == id) {
        *existing = entry;
    } else {
        list.push(entry);
    }
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` iff any error or unresolved conflict was recorded.
    pub fn ok(&self) -> bool {
        self.errors.is_empty() && self.conflicts.is_empty()
    }

    pub fn add_error(&mut self, entry: SyncErrorEntry) {
        self.errors.push(entry);
    }

    pub fn add_created(&mut self, record: Record) {
        upsert_by_id(&mut self.created, record, |r| &r.id);
    }

    pub fn add_updated(&mut self, pair: Updated) {
        upsert_by_id(&mut self.updated, pair, |p| &p.new.id);
    }

    pub fn add_deleted(&mut self, record: Record) {
        upsert_by_id(&mut self.deleted, record, |r| &r.id);
    }

    pub fn add_published(&mut self, record: Record) {
        upsert_by_id(&mut self.published, record, |r| &r.id);
    }

    pub fn add_conflict(&mut self, conflict: Conflict) {
        upsert_by_id(&mut self.conflicts, conflict, |c| &c.local.id);
    }

    pub fn add_skipped(&mut self, record: Record) {
        upsert_by_id(&mut self.skipped, record, |r| &r.id);
    }

    pub fn add_resolved(&mut self, resolution: Resolution) {
        upsert_by_id(&mut self.resolved, resolution, |r| &r.accepted.id);
    }

    /// Drop every recorded conflict (after a strategy has settled them).
    pub fn reset_conflicts(&mut self) {
        self.conflicts.clear();
    }
}
