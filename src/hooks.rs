//! Hooks applied to incoming change batches before import.
//!
//! Hooks are chained in registration order; each sees the output of the
//! previous one. The only phase today is `incoming-changes`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChangeBatch;

/// An asynchronous transformation of an incoming change batch.
#[async_trait]
pub trait IncomingHook: Send + Sync {
    async fn apply(&self, batch: ChangeBatch) -> Result<ChangeBatch>;
}

/// Run a batch through every hook, in registration order.
pub async fn dispatch_incoming(
    hooks: &[Arc<dyn IncomingHook>],
    batch: ChangeBatch,
) -> Result<ChangeBatch> {
    let mut batch = batch;
    for hook in hooks {
        batch = hook.apply(batch).await?;
    }
    Ok(batch)
}
