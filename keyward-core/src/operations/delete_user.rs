use super::{UserPolicy, run_detached};
use crate::keys::{Mutation, lock_name, normalize_username, user_key};
use crate::{KvStore, LockManager, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteUserOperation {
    store: Arc<dyn KvStore>,
    locks: Arc<LockManager>,
    policy: UserPolicy,
}

#[derive(Debug, Clone)]
pub struct DeleteUserOperationRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteUserOperationOutcome {
    Deleted { key: String },
    NotFound { key: String },
}

impl DeleteUserOperation {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<LockManager>, policy: UserPolicy) -> Self {
        Self {
            store,
            locks,
            policy,
        }
    }

    pub async fn run(
        &self,
        request: DeleteUserOperationRequest,
    ) -> Result<DeleteUserOperationOutcome> {
        let id = normalize_username(&request.id)?;
        let key = user_key(&id);
        let lock = lock_name(self.policy.lock_scope, Mutation::Delete, &key);
        let operation = self.clone();

        run_detached(async move {
            operation
                .locks
                .with_lock(&lock, operation.policy.lock_lease, || {
                    operation.delete_locked(&key)
                })
                .await
        })
        .await
    }

    async fn delete_locked(&self, key: &str) -> Result<DeleteUserOperationOutcome> {
        if !self.store.exists(key).await? {
            return Ok(DeleteUserOperationOutcome::NotFound {
                key: key.to_string(),
            });
        }

        // The record can still expire between the check and the delete.
        if !self.store.delete(key).await? {
            tracing::debug!("{} expired before it could be deleted", key);
            return Ok(DeleteUserOperationOutcome::NotFound {
                key: key.to_string(),
            });
        }

        tracing::info!("Deleted {}", key);
        Ok(DeleteUserOperationOutcome::Deleted {
            key: key.to_string(),
        })
    }
}
