use std::sync::Arc;
use std::time::Duration;

use aura_models::{WorkflowId, WorkflowRecord};
use moka::future::Cache;

/// Hot cache of recently archived or fetched records.
///
/// Archived records never change, so a cached entry is always current;
/// TTL only bounds memory.
pub struct RecordCache {
    inner: Cache<WorkflowId, Arc<WorkflowRecord>>,
}

impl RecordCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, id: &WorkflowId) -> Option<Arc<WorkflowRecord>> {
        self.inner.get(id).await
    }

    pub async fn insert(&self, record: Arc<WorkflowRecord>) {
        self.inner.insert(record.workflow_id(), record).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aura_models::TriggerMetadata;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = RecordCache::new(100, Duration::from_secs(60));
        let record = Arc::new(WorkflowRecord::new("SPY", TriggerMetadata::manual()));
        cache.insert(record.clone()).await;

        let hit = cache.get(&record.workflow_id()).await;
        assert_eq!(hit.as_deref(), Some(record.as_ref()));
    }

    #[tokio::test]
    async fn get_missing() {
        let cache = RecordCache::new(100, Duration::from_secs(60));
        assert!(cache.get(&WorkflowId::new()).await.is_none());
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = RecordCache::new(100, Duration::from_millis(50));
        let record = Arc::new(WorkflowRecord::new("SPY", TriggerMetadata::manual()));
        let id = record.workflow_id();
        cache.insert(record).await;

        assert!(cache.get(&id).await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get(&id).await.is_none());
    }
}
