//! Entry point tying buckets, collections, storage and the remote together.

use std::sync::Arc;

use crate::collection::{Collection, CollectionOptions};
use crate::error::{KintoError, Result};
use crate::events::Emitter;
use crate::remote::RemoteClient;
use crate::storage::{MemoryAdapter, StorageAdapter};

/// Builds one storage adapter per collection. The argument is the
/// `"bucket/collection"` pair so distinct collections never share state.
pub type AdapterFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn StorageAdapter>> + Send + Sync>;

#[derive(Default)]
pub struct KintoOptions {
    /// Bucket the collections belong to. Defaults to `"default"`.
    pub bucket: Option<String>,
    /// Storage factory. Defaults to one in-memory adapter per collection.
    pub adapter: Option<AdapterFactory>,
    /// Event bus shared by every constructed collection. A fresh one is
    /// created when not provided.
    pub events: Option<Arc<Emitter>>,
}

/// Constructs collections bound to a bucket and a remote.
///
/// The remote facade is injected once and handed to every collection, which
/// is how the collection↔facade cycle is broken: collections never reach
/// back into `Kinto`.
pub struct Kinto {
    bucket: String,
    remote: Arc<dyn RemoteClient>,
    adapter_factory: AdapterFactory,
    events: Arc<Emitter>,
}

impl Kinto {
    pub fn new(remote: Arc<dyn RemoteClient>, options: KintoOptions) -> Self {
        Self {
            bucket: options.bucket.unwrap_or_else(|| "default".to_string()),
            remote,
            adapter_factory: options
                .adapter
                .unwrap_or_else(|| Arc::new(|_| Ok(Arc::new(MemoryAdapter::new())))),
            events: options.events.unwrap_or_default(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn events(&self) -> &Arc<Emitter> {
        &self.events
    }

    /// Build a collection bound to this bucket and remote. Transformers,
    /// hooks, id schema and local fields are per-collection concerns carried
    /// by `options`.
    pub fn collection(&self, name: &str, mut options: CollectionOptions) -> Result<Collection> {
        if name.is_empty() {
            return Err(KintoError::storage("missing collection name"));
        }
        let adapter = (self.adapter_factory)(&format!("{}/{}", self.bucket, name))?;
        options.events.get_or_insert_with(|| Arc::clone(&self.events));
        Ok(Collection::new(
            self.bucket.clone(),
            name,
            adapter,
            Arc::clone(&self.remote),
            options,
        ))
    }
}
