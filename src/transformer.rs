//! Record transformers applied at the remote boundary.
//!
//! Push: record → encode(t1) → encode(t2) → … → wire
//! Pull: wire → … → decode(t2) → decode(t1) → record
//!
//! Transformers must preserve `id` and `last_modified`, and must satisfy
//! `decode(encode(r)) == r` for any record they accept. A transformer may
//! clear `deleted` on encode to publish a local deletion as a remote keep,
//! and may set `deleted` on decode to turn a remote keep into a local
//! deletion. The reverse is not supported: tombstones carry no payload to
//! decode a real record out of.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::RemoteRecord;

/// An encode/decode pair applied to records crossing the remote boundary.
#[async_trait]
pub trait RecordTransformer: Send + Sync {
    async fn encode(&self, record: RemoteRecord) -> Result<RemoteRecord>;

    async fn decode(&self, record: RemoteRecord) -> Result<RemoteRecord>;
}

/// Run a record through every transformer's `encode`, in declared order.
pub async fn encode_record(
    transformers: &[Arc<dyn RecordTransformer>],
    record: RemoteRecord,
) -> Result<RemoteRecord> {
    let mut record = record;
    for transformer in transformers {
        record = transformer.encode(record).await?;
    }
    Ok(record)
}

/// Run a record through every transformer's `decode`, in reverse order.
pub async fn decode_record(
    transformers: &[Arc<dyn RecordTransformer>],
    record: RemoteRecord,
) -> Result<RemoteRecord> {
    let mut record = record;
    for transformer in transformers.iter().rev() {
        record = transformer.decode(record).await?;
    }
    Ok(record)
}
