use crate::coalesce::Coalescer;
use crate::keys::{LIST_USERS_KEY, USER_KEY_PREFIX};
use crate::{KvStore, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct ListUsersOperation {
    store: Arc<dyn KvStore>,
    coalescer: Arc<Coalescer<Vec<String>>>,
}

#[derive(Debug, Clone)]
pub struct ListUsersOperationResult {
    /// User keys, sorted and without duplicates.
    pub keys: Vec<String>,
}

impl ListUsersOperation {
    pub fn new(store: Arc<dyn KvStore>, coalescer: Arc<Coalescer<Vec<String>>>) -> Self {
        Self { store, coalescer }
    }

    pub async fn run(&self) -> Result<ListUsersOperationResult> {
        let store = self.store.clone();
        let keys = self
            .coalescer
            .run(LIST_USERS_KEY, move || async move {
                store.keys_with_prefix(USER_KEY_PREFIX).await
            })
            .await?;

        tracing::debug!("Listed {} user keys", keys.len());
        Ok(ListUsersOperationResult { keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestStore;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_list_only_returns_user_keys() {
        let store = Arc::new(TestStore::new());
        store.set("user:alice", "alice", None).await.unwrap();
        store.set("user:bob", "bob", None).await.unwrap();
        store
            .set_if_absent("lock:user:alice", "token", Duration::from_secs(5))
            .await
            .unwrap();
        let list = ListUsersOperation::new(store, Arc::new(Coalescer::new()));

        let mut keys = list.run().await.unwrap().keys;
        keys.sort();
        assert_eq!(keys, vec!["user:alice".to_string(), "user:bob".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_lists_share_one_scan() {
        let store = Arc::new(TestStore::with_get_delay(Duration::from_millis(30)));
        store.set("user:vic", "vic", None).await.unwrap();
        let list = ListUsersOperation::new(store.clone(), Arc::new(Coalescer::new()));

        let (a, b, c) = tokio::join!(list.run(), list.run(), list.run());
        assert_eq!(a.unwrap().keys, b.unwrap().keys);
        assert_eq!(c.unwrap().keys, vec!["user:vic".to_string()]);
        assert_eq!(store.scans.load(Ordering::SeqCst), 1);
    }
}
