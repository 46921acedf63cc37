pub mod backoff;
pub mod client;
pub mod types;

pub use backoff::{BackoffTracker, RemoteEvent, RemoteEvents};
pub use client::{chunk_operations, RemoteClient};
pub use types::{
    BatchOpKind, BatchOperation, BatchOptions, BatchResponse, CallOptions, ChangesPage,
    ListChangesOptions, Precondition, ServerInfo, ServerSettings,
};
