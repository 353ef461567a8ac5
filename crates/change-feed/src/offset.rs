//! Committed feed positions per consumer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use event_store::Offset;
use tokio::sync::RwLock;

use crate::Result;

/// Remembers the last offset each named consumer finished with.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Returns the last committed offset for `consumer`, if any.
    async fn load(&self, consumer: &str) -> Result<Option<Offset>>;

    /// Records that `consumer` delivered everything up to `offset`.
    async fn commit(&self, consumer: &str, offset: Offset) -> Result<()>;
}

/// In-memory offset store. Offsets never move backwards.
#[derive(Clone, Default)]
pub struct InMemoryOffsetStore {
    offsets: Arc<RwLock<HashMap<String, Offset>>>,
}

impl InMemoryOffsetStore {
    /// Creates an empty offset store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self, consumer: &str) -> Result<Option<Offset>> {
        Ok(self.offsets.read().await.get(consumer).copied())
    }

    async fn commit(&self, consumer: &str, offset: Offset) -> Result<()> {
        let mut offsets = self.offsets.write().await;
        let current = offsets.entry(consumer.to_string()).or_insert(offset);
        if offset > *current {
            *current = offset;
        }
        Ok(())
    }
}
