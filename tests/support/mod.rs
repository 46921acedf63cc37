//! In-process remote double: a tiny Kinto-like server held in memory,
//! implementing the `RemoteClient` facade with real timestamp and
//! precondition semantics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use kinto_offline::{
    BatchOpKind, BatchOperation, BatchOptions, BatchResponse, CallOptions, ChangesPage,
    Collection, CollectionOptions, Kinto, KintoOptions, KintoError, ListChangesOptions,
    Precondition, RemoteClient, RemoteEvents, Result, ServerInfo, ServerSettings,
};

// ============================================================================
// Server state
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub data: Map<String, Value>,
    pub last_modified: u64,
    pub deleted: bool,
}

#[derive(Debug)]
struct ServerState {
    records: BTreeMap<String, ServerRecord>,
    timestamp: u64,
    settings: ServerSettings,
    metadata: Value,
    /// Writes applied right after the next `list_changes` call, to simulate
    /// a concurrent writer racing the publish phase.
    post_pull_writes: Vec<(String, Map<String, Value>)>,
    fail_metadata: bool,
}

pub struct MockRemote {
    state: Mutex<ServerState>,
    events: RemoteEvents,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                records: BTreeMap::new(),
                timestamp: 1000,
                settings: ServerSettings::default(),
                metadata: json!({"id": "articles", "displayName": "Articles"}),
                post_pull_writes: Vec::new(),
                fail_metadata: false,
            }),
            events: RemoteEvents::new(),
        }
    }

    /// Write a record server-side, bumping the collection timestamp.
    pub fn insert(&self, id: &str, data: Value) -> u64 {
        let mut state = self.state.lock();
        state.timestamp += 1;
        let ts = state.timestamp;
        state.records.insert(
            id.to_string(),
            ServerRecord {
                data: data.as_object().cloned().unwrap_or_default(),
                last_modified: ts,
                deleted: false,
            },
        );
        ts
    }

    /// Delete a record server-side, leaving a tombstone notification.
    pub fn remove(&self, id: &str) -> u64 {
        let mut state = self.state.lock();
        state.timestamp += 1;
        let ts = state.timestamp;
        if let Some(record) = state.records.get_mut(id) {
            record.deleted = true;
            record.data = Map::new();
            record.last_modified = ts;
        }
        ts
    }

    /// Wipe all data while the timestamp keeps moving forward, like a server
    /// whose collection was flushed and recreated.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.timestamp += 1000;
    }

    pub fn set_readonly(&self, readonly: bool) {
        self.state.lock().settings.readonly = readonly;
    }

    /// Make the next `collection_metadata` calls fail.
    pub fn set_metadata_failure(&self, fail: bool) {
        self.state.lock().fail_metadata = fail;
    }

    /// Schedule a concurrent write to land between the pull and the publish.
    pub fn write_after_next_pull(&self, id: &str, data: Value) {
        self.state.lock().post_pull_writes.push((
            id.to_string(),
            data.as_object().cloned().unwrap_or_default(),
        ));
    }

    pub fn announce_backoff(&self, seconds: u64) {
        self.events.notify_backoff(seconds);
    }

    pub fn timestamp(&self) -> u64 {
        self.state.lock().timestamp
    }

    pub fn record(&self, id: &str) -> Option<ServerRecord> {
        self.state.lock().records.get(id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().records.values().filter(|r| !r.deleted).count()
    }

    fn body_for(id: &str, record: &ServerRecord) -> Value {
        let mut data = Map::new();
        data.insert("id".to_string(), json!(id));
        data.insert("last_modified".to_string(), json!(record.last_modified));
        if record.deleted {
            data.insert("deleted".to_string(), json!(true));
        } else {
            for (k, v) in &record.data {
                data.insert(k.clone(), v.clone());
            }
        }
        Value::Object(data)
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn server_info(&self, _options: &CallOptions) -> Result<ServerInfo> {
        Ok(ServerInfo {
            settings: self.state.lock().settings.clone(),
            ..Default::default()
        })
    }

    async fn list_changes(
        &self,
        _bucket: &str,
        _collection: &str,
        options: &ListChangesOptions,
    ) -> Result<ChangesPage> {
        let mut state = self.state.lock();

        if let Some(expected) = options.expected_timestamp {
            if expected != state.timestamp {
                return Err(KintoError::transport(
                    412,
                    format!("expected timestamp {expected}, found {}", state.timestamp),
                ));
            }
        }

        let since = options.since.unwrap_or(0);
        let mut data: Vec<(u64, Value)> = state
            .records
            .iter()
            .filter(|(_, record)| record.last_modified > since)
            .map(|(id, record)| (record.last_modified, Self::body_for(id, record)))
            .collect();
        // Newest first, the way the server pages them out.
        data.sort_by(|a, b| b.0.cmp(&a.0));

        let page = ChangesPage {
            last_modified: Some(state.timestamp),
            data: data
                .into_iter()
                .map(|(_, body)| serde_json::from_value(body).expect("wire record"))
                .collect(),
            next: None,
        };

        // Simulate a concurrent writer racing the sync.
        let pending: Vec<_> = state.post_pull_writes.drain(..).collect();
        for (id, fields) in pending {
            state.timestamp += 1;
            let ts = state.timestamp;
            state.records.insert(
                id,
                ServerRecord {
                    data: fields,
                    last_modified: ts,
                    deleted: false,
                },
            );
        }

        Ok(page)
    }

    async fn batch(
        &self,
        bucket: &str,
        collection: &str,
        operations: Vec<BatchOperation>,
        options: &BatchOptions,
    ) -> Result<Vec<BatchResponse>> {
        assert!(options.safe, "publish must request preconditions");
        let mut state = self.state.lock();
        let mut responses = Vec::with_capacity(operations.len());

        for op in operations {
            let path = format!("/buckets/{bucket}/collections/{collection}/records/{}", op.id);
            let existing = state.records.get(&op.id).cloned();

            // Optimistic concurrency checks.
            let precondition_failed = match op.precondition {
                Precondition::IfMatch(ts) => {
                    existing.as_ref().map(|r| r.last_modified) != Some(ts)
                }
                Precondition::IfNoneMatch => {
                    existing.as_ref().map(|r| !r.deleted).unwrap_or(false)
                }
                Precondition::None => false,
            };
            if precondition_failed {
                let body = existing.as_ref().map(|record| {
                    json!({"details": {"existing": Self::body_for(&op.id, record)}})
                });
                responses.push(BatchResponse {
                    status: 412,
                    path,
                    body,
                    headers: HashMap::new(),
                });
                continue;
            }

            match op.kind {
                BatchOpKind::Put { data } => {
                    let created = existing.map(|r| r.deleted).unwrap_or(true);
                    state.timestamp += 1;
                    let ts = state.timestamp;
                    let record = ServerRecord {
                        data,
                        last_modified: ts,
                        deleted: false,
                    };
                    let body = json!({"data": Self::body_for(&op.id, &record)});
                    state.records.insert(op.id.clone(), record);
                    responses.push(BatchResponse {
                        status: if created { 201 } else { 200 },
                        path,
                        body: Some(body),
                        headers: HashMap::new(),
                    });
                }
                BatchOpKind::Delete => {
                    let gone = existing.as_ref().map(|r| r.deleted).unwrap_or(true);
                    if gone {
                        responses.push(BatchResponse {
                            status: 404,
                            path,
                            body: None,
                            headers: HashMap::new(),
                        });
                        continue;
                    }
                    state.timestamp += 1;
                    let ts = state.timestamp;
                    let record = ServerRecord {
                        data: Map::new(),
                        last_modified: ts,
                        deleted: true,
                    };
                    let body = json!({"data": Self::body_for(&op.id, &record)});
                    state.records.insert(op.id.clone(), record);
                    responses.push(BatchResponse {
                        status: 200,
                        path,
                        body: Some(body),
                        headers: HashMap::new(),
                    });
                }
            }
        }
        Ok(responses)
    }

    async fn collection_metadata(
        &self,
        _bucket: &str,
        _collection: &str,
        _options: &CallOptions,
    ) -> Result<Value> {
        let state = self.state.lock();
        if state.fail_metadata {
            return Err(KintoError::transport(503, "metadata unavailable"));
        }
        Ok(state.metadata.clone())
    }

    fn events(&self) -> &RemoteEvents {
        &self.events
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Harness {
    pub server: Arc<MockRemote>,
    pub collection: Collection,
}

/// A collection over in-memory storage talking to a fresh mock server.
pub fn harness() -> Harness {
    harness_with(CollectionOptions::default())
}

pub fn harness_with(options: CollectionOptions) -> Harness {
    let server = Arc::new(MockRemote::new());
    let kinto = Kinto::new(
        Arc::clone(&server) as Arc<dyn RemoteClient>,
        KintoOptions::default(),
    );
    let collection = kinto.collection("articles", options).expect("collection");
    Harness { server, collection }
}
