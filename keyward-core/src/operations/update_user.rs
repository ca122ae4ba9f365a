use super::{UserPolicy, UserRecord, run_detached};
use crate::keys::{Mutation, lock_name, normalize_username, user_key};
use crate::{KvStore, LockManager, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct UpdateUserOperation {
    store: Arc<dyn KvStore>,
    locks: Arc<LockManager>,
    policy: UserPolicy,
}

#[derive(Debug, Clone)]
pub struct UpdateUserOperationRequest {
    /// Username the record was created under; determines the key.
    pub id: String,
    /// New value stored at the key.
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateUserOperationOutcome {
    Updated(UserRecord),
    NotFound { key: String },
}

impl UpdateUserOperation {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<LockManager>, policy: UserPolicy) -> Self {
        Self {
            store,
            locks,
            policy,
        }
    }

    pub async fn run(
        &self,
        request: UpdateUserOperationRequest,
    ) -> Result<UpdateUserOperationOutcome> {
        let id = normalize_username(&request.id)?;
        let username = normalize_username(&request.username)?;
        let key = user_key(&id);
        let lock = lock_name(self.policy.lock_scope, Mutation::Update, &key);
        let operation = self.clone();

        run_detached(async move {
            operation
                .locks
                .with_lock(&lock, operation.policy.lock_lease, || {
                    operation.update_locked(&id, &key, &username)
                })
                .await
        })
        .await
    }

    async fn update_locked(
        &self,
        id: &str,
        key: &str,
        username: &str,
    ) -> Result<UpdateUserOperationOutcome> {
        // Update never recreates a record that is gone or expired.
        if !self.store.exists(key).await? {
            tracing::info!("Refusing to update {}: not found", key);
            return Ok(UpdateUserOperationOutcome::NotFound {
                key: key.to_string(),
            });
        }

        self.store.set(key, username, self.policy.record_ttl).await?;
        tracing::info!("Updated {}", key);

        Ok(UpdateUserOperationOutcome::Updated(UserRecord {
            id: id.to_string(),
            key: key.to_string(),
            username: username.to_string(),
        }))
    }
}
