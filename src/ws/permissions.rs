use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::db::store::{Access, CollabStore, StoreError};

/// Short-lived cache of document access levels, keyed by `(document_id, user_id)`.
///
/// Every lock, edit and unlock intent asks for the caller's access, so lookups are cached
/// for a few seconds. A revoked collaborator keeps their access until the entry expires.
#[derive(Clone)]
pub struct PermissionCache {
    store: Arc<dyn CollabStore>,
    cache: Cache<(i64, i64), Access>,
}

impl PermissionCache {
    pub fn new(store: Arc<dyn CollabStore>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        info!("Permission cache initialized with a ttl of {}s", ttl.as_secs());
        Self { store, cache }
    }

    pub async fn access(&self, document_id: i64, user_id: i64) -> Result<Access, StoreError> {
        if let Some(access) = self.cache.get(&(document_id, user_id)) {
            return Ok(access);
        }

        debug!("Permission cache miss for user {} on document {}", user_id, document_id);
        let access = self.store.document_access(document_id, user_id).await?;
        self.cache.insert((document_id, user_id), access);
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemoryCollabStore;

    #[tokio::test]
    async fn access_is_cached_until_the_ttl_passes() {
        let store = Arc::new(MemoryCollabStore::new());
        store.insert_document(10, "Paper", 1);
        store.add_collaborator(10, 2, Access::View);
        let permissions = PermissionCache::new(store.clone(), Duration::from_millis(200));

        assert_eq!(permissions.access(10, 1).await.unwrap(), Access::Edit);
        assert_eq!(permissions.access(10, 2).await.unwrap(), Access::View);
        assert_eq!(permissions.access(10, 3).await.unwrap(), Access::None);

        store.add_collaborator(10, 2, Access::Edit);
        assert_eq!(permissions.access(10, 2).await.unwrap(), Access::View);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(permissions.access(10, 2).await.unwrap(), Access::Edit);
    }
}
