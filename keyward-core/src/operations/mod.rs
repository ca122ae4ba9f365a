pub mod create_user;
pub mod delete_user;
pub mod get_user;
pub mod list_users;
pub mod update_user;

pub use create_user::{
    CreateUserOperation, CreateUserOperationOutcome, CreateUserOperationRequest,
};
pub use delete_user::{
    DeleteUserOperation, DeleteUserOperationOutcome, DeleteUserOperationRequest,
};
pub use get_user::{GetUserOperation, GetUserOperationOutcome, GetUserOperationRequest};
pub use list_users::{ListUsersOperation, ListUsersOperationResult};
pub use update_user::{
    UpdateUserOperation, UpdateUserOperationOutcome, UpdateUserOperationRequest,
};

use crate::keys::LockScope;
use crate::{KeywardError, Result};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Expiration and locking rules applied to every user mutation.
#[derive(Debug, Clone)]
pub struct UserPolicy {
    /// Expiration set by every create and update. `None` stores records
    /// without expiration.
    pub record_ttl: Option<Duration>,
    pub lock_lease: Duration,
    pub lock_scope: LockScope,
}

impl Default for UserPolicy {
    fn default() -> Self {
        Self {
            record_ttl: None,
            lock_lease: Duration::from_secs(8),
            lock_scope: LockScope::Key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub key: String,
    pub username: String,
}

/// Runs a locked mutation on its own task. If the request that started it is
/// dropped, the critical section and the lock release still run to the end.
pub(crate) async fn run_detached<T, Fut>(work: Fut) -> Result<T>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|error| KeywardError::Internal(format!("mutation task failed: {}", error)))?
}
