//! Collection event surface.
//!
//! CRUD emits one event per operation plus a single coalesced `change` event
//! per transaction. Sync completion is reported with `sync:success` /
//! `sync:error`. Listeners are plain callbacks behind an `RwLock`, so
//! emission never allocates beyond the event itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::sync::SyncResult;
use crate::types::Record;

// ============================================================================
// Event payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// One entry of a coalesced `change` event.
#[derive(Debug, Clone)]
pub struct ChangeTarget {
    pub action: ChangeAction,
    pub data: Record,
    pub old_record: Option<Record>,
}

#[derive(Debug, Clone)]
pub enum CollectionEvent {
    /// Coalesced per transaction: every write the transaction performed,
    /// in the order it was emitted.
    Change { targets: Vec<ChangeTarget> },
    Create { data: Record },
    Update { data: Record, old_record: Record },
    Delete { data: Record },
    SyncSuccess { at: DateTime<Utc>, result: SyncResult },
    SyncError { at: DateTime<Utc>, error: String },
}

// ============================================================================
// Emitter
// ============================================================================

pub type Listener = Arc<dyn Fn(&CollectionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// Listener registry. Cheap to clone handles around via `Arc<Emitter>`.
#[derive(Default)]
pub struct Emitter {
    listeners: RwLock<Vec<(usize, Listener)>>,
    next_id: AtomicUsize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, listener: Listener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        ListenerId(id)
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id.0);
    }

    pub fn emit(&self, event: &CollectionEvent) {
        // Snapshot listeners so a callback can (un)subscribe without deadlock.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Map;

    use crate::types::RecordStatus;

    fn record(id: &str) -> Record {
        Record::new(id.to_string(), None, RecordStatus::Created, Map::new())
    }

    #[test]
    fn emits_to_all_listeners() {
        let emitter = Emitter::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            emitter.on(Arc::new(move |event| {
                if let CollectionEvent::Create { data } = event {
                    seen.lock().push(format!("{tag}:{}", data.id));
                }
            }));
        }

        emitter.emit(&CollectionEvent::Create { data: record("r1") });
        assert_eq!(*seen.lock(), vec!["a:r1".to_string(), "b:r1".to_string()]);
    }

    #[test]
    fn off_removes_listener() {
        let emitter = Emitter::new();
        let count = Arc::new(Mutex::new(0usize));
        let c = Arc::clone(&count);
        let id = emitter.on(Arc::new(move |_| *c.lock() += 1));

        emitter.emit(&CollectionEvent::Create { data: record("r1") });
        emitter.off(id);
        emitter.emit(&CollectionEvent::Create { data: record("r2") });

        assert_eq!(*count.lock(), 1);
    }
}
