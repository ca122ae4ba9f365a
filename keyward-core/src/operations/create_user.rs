use super::{UserPolicy, UserRecord, run_detached};
use crate::keys::{Mutation, lock_name, normalize_username, user_key};
use crate::{KvStore, LockManager, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct CreateUserOperation {
    store: Arc<dyn KvStore>,
    locks: Arc<LockManager>,
    policy: UserPolicy,
}

#[derive(Debug, Clone)]
pub struct CreateUserOperationRequest {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateUserOperationOutcome {
    Created(UserRecord),
    Conflict { key: String },
}

impl CreateUserOperation {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<LockManager>, policy: UserPolicy) -> Self {
        Self {
            store,
            locks,
            policy,
        }
    }

    pub async fn run(
        &self,
        request: CreateUserOperationRequest,
    ) -> Result<CreateUserOperationOutcome> {
        let username = normalize_username(&request.username)?;
        let key = user_key(&username);
        let lock = lock_name(self.policy.lock_scope, Mutation::Create, &key);
        let operation = self.clone();

        run_detached(async move {
            operation
                .locks
                .with_lock(&lock, operation.policy.lock_lease, || {
                    operation.create_locked(&key, &username)
                })
                .await
        })
        .await
    }

    async fn create_locked(&self, key: &str, username: &str) -> Result<CreateUserOperationOutcome> {
        if self.store.exists(key).await? {
            tracing::info!("Refusing to create {}: already exists", key);
            return Ok(CreateUserOperationOutcome::Conflict {
                key: key.to_string(),
            });
        }

        self.store.set(key, username, self.policy.record_ttl).await?;
        tracing::info!("Created {} (ttl={:?})", key, self.policy.record_ttl);

        Ok(CreateUserOperationOutcome::Created(UserRecord {
            id: username.to_string(),
            key: key.to_string(),
            username: username.to_string(),
        }))
    }
}
