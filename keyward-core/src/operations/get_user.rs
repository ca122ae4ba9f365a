use super::UserRecord;
use crate::coalesce::Coalescer;
use crate::keys::{normalize_username, user_key};
use crate::{KvStore, Result};
use std::sync::Arc;

/// Reads one record. Concurrent reads of the same key share one store round
/// trip, so a reader may see a value fetched slightly before its own request.
#[derive(Clone)]
pub struct GetUserOperation {
    store: Arc<dyn KvStore>,
    coalescer: Arc<Coalescer<Option<String>>>,
}

#[derive(Debug, Clone)]
pub struct GetUserOperationRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetUserOperationOutcome {
    Found(UserRecord),
    NotFound { key: String },
}

impl GetUserOperation {
    pub fn new(store: Arc<dyn KvStore>, coalescer: Arc<Coalescer<Option<String>>>) -> Self {
        Self { store, coalescer }
    }

    pub async fn run(&self, request: GetUserOperationRequest) -> Result<GetUserOperationOutcome> {
        let id = normalize_username(&request.id)?;
        let key = user_key(&id);

        let store = self.store.clone();
        let fetch_key = key.clone();
        let value = self
            .coalescer
            .run(&key, move || async move { store.get(&fetch_key).await })
            .await?;

        let Some(username) = value else {
            return Ok(GetUserOperationOutcome::NotFound { key });
        };

        Ok(GetUserOperationOutcome::Found(UserRecord { id, key, username }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_found_and_not_found() {
        let store = Arc::new(TestStore::new());
        store.set("user:alice", "alice2", None).await.unwrap();
        let get = GetUserOperation::new(store.clone(), Arc::new(Coalescer::new()));

        let found = get
            .run(GetUserOperationRequest {
                id: "alice".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            found,
            GetUserOperationOutcome::Found(UserRecord {
                id: "alice".to_string(),
                key: "user:alice".to_string(),
                username: "alice2".to_string(),
            })
        );

        let missing = get
            .run(GetUserOperationRequest {
                id: "bob".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            missing,
            GetUserOperationOutcome::NotFound {
                key: "user:bob".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_gets_issue_one_store_read() {
        let store = Arc::new(TestStore::with_get_delay(Duration::from_millis(50)));
        store.set("user:uma", "uma", None).await.unwrap();
        let get = GetUserOperation::new(store.clone(), Arc::new(Coalescer::new()));

        let mut tasks = Vec::new();
        for _ in 0..40 {
            let get = get.clone();
            tasks.push(tokio::spawn(async move {
                get.run(GetUserOperationRequest {
                    id: "uma".to_string(),
                })
                .await
            }));
        }

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap().unwrap());
        }

        assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(matches!(outcomes[0], GetUserOperationOutcome::Found(_)));
        assert_eq!(store.gets(), 1);
    }
}
