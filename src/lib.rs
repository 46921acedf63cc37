//! Offline-first client for a Kinto-style remote store.
//!
//! Records live in a local durable store (buckets → collections → records)
//! and every create/read/update/delete is local and transactional. A
//! separate, explicitly invoked [`Collection::sync`] reconciles the local
//! store with the remote authority over a narrow async facade: pull changes,
//! detect and resolve conflicts, publish local changes under optimistic
//! concurrency, and report everything in a [`SyncResult`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use kinto_offline::{Kinto, KintoOptions, CollectionOptions, CreateOptions, SyncOptions};
//! # use serde_json::json;
//! # async fn demo(remote: Arc<dyn kinto_offline::RemoteClient>) -> kinto_offline::Result<()> {
//! let kinto = Kinto::new(remote, KintoOptions::default());
//! let articles = kinto.collection("articles", CollectionOptions::default())?;
//!
//! articles.create(json!({ "title": "foo" }), CreateOptions::default())?;
//! let result = articles.sync(SyncOptions::default()).await?;
//! assert!(result.ok());
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod error;
pub mod events;
pub mod hooks;
pub mod id;
pub mod kinto;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod transformer;
pub mod types;

pub use collection::{
    Collection, CollectionOptions, CollectionTransaction, CreateOptions, DeleteOptions,
    UpdateOptions,
};
pub use error::{KintoError, Result};
pub use events::{ChangeAction, ChangeTarget, CollectionEvent, Emitter};
pub use hooks::IncomingHook;
pub use id::{IdSchema, UuidSchema};
pub use kinto::{AdapterFactory, Kinto, KintoOptions};
pub use remote::{
    BackoffTracker, BatchOpKind, BatchOperation, BatchOptions, BatchResponse, CallOptions,
    ChangesPage, ListChangesOptions, Precondition, RemoteClient, RemoteEvent, RemoteEvents,
    ServerInfo, ServerSettings,
};
pub use storage::{ListParams, MemoryAdapter, StorageAdapter, StorageProxy};
#[cfg(feature = "sqlite")]
pub use storage::SqliteAdapter;
pub use sync::{SyncErrorEntry, SyncOptions, SyncResult, SyncStrategy, Updated};
pub use transformer::RecordTransformer;
pub use types::{
    ChangeBatch, Conflict, ConflictKind, Record, RecordStatus, RemoteRecord, Resolution,
};
