//! The narrow asynchronous interface the sync core requires from a remote.
//!
//! The low-level HTTP client (request shaping, retry/backoff header parsing,
//! pagination) lives outside this crate; implementations of [`RemoteClient`]
//! wrap it. Tests use an in-process implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::backoff::RemoteEvents;
use super::types::{
    BatchOperation, BatchOptions, BatchResponse, CallOptions, ChangesPage, ListChangesOptions,
    ServerInfo,
};

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Server settings, capabilities and the authenticated user.
    async fn server_info(&self, options: &CallOptions) -> Result<ServerInfo>;

    /// Changes in `(bucket, collection)` since a timestamp. Entries may be
    /// tombstone notifications. Implementations exhaust pagination unless
    /// they surface a `next` token.
    async fn list_changes(
        &self,
        bucket: &str,
        collection: &str,
        options: &ListChangesOptions,
    ) -> Result<ChangesPage>;

    /// Submit operations as a batch, one response per operation in order.
    /// Implementations must chunk into several transport requests when the
    /// server's `batch_max_requests` is smaller than the operation count, and
    /// concatenate the responses preserving order (see [`chunk_operations`]).
    async fn batch(
        &self,
        bucket: &str,
        collection: &str,
        operations: Vec<BatchOperation>,
        options: &BatchOptions,
    ) -> Result<Vec<BatchResponse>>;

    /// Opaque metadata of the remote collection.
    async fn collection_metadata(
        &self,
        bucket: &str,
        collection: &str,
        options: &CallOptions,
    ) -> Result<Value>;

    /// Transport event registry (`backoff`, `retry-after`, `deprecated`).
    fn events(&self) -> &RemoteEvents;

    /// Time left in the current server back-off window, if any.
    fn backoff_remaining(&self) -> Option<Duration> {
        self.events().backoff_remaining()
    }
}

/// Split operations into server-acceptable chunks, preserving order.
pub fn chunk_operations(
    operations: Vec<BatchOperation>,
    batch_max_requests: usize,
) -> Vec<Vec<BatchOperation>> {
    if operations.is_empty() {
        return Vec::new();
    }
    if batch_max_requests == 0 {
        return vec![operations];
    }
    let mut chunks = Vec::with_capacity(operations.len().div_ceil(batch_max_requests));
    let mut current = Vec::with_capacity(batch_max_requests.min(operations.len()));
    for op in operations {
        if current.len() == batch_max_requests {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(op);
    }
    chunks.push(current);
    chunks
}

#[cfg(test)]
mod tests {
    use super::super::types::{BatchOpKind, Precondition};
    use super::*;

    fn op(id: &str) -> BatchOperation {
        BatchOperation {
            id: id.to_string(),
            kind: BatchOpKind::Delete,
            precondition: Precondition::None,
        }
    }

    #[test]
    fn chunks_preserve_order() {
        let ops: Vec<BatchOperation> = (0..7).map(|i| op(&format!("r{i}"))).collect();
        let chunks = chunk_operations(ops, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 3);
        assert_eq!(chunks[2].len(), 1);
        let flattened: Vec<String> = chunks.into_iter().flatten().map(|o| o.id).collect();
        let expected: Vec<String> = (0..7).map(|i| format!("r{i}")).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn empty_and_unlimited_inputs() {
        assert!(chunk_operations(Vec::new(), 3).is_empty());
        let chunks = chunk_operations(vec![op("a"), op("b")], 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 2);
    }
}
