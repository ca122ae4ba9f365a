use crate::coalesce::Coalescer;
use crate::operations::{
    CreateUserOperation, CreateUserOperationOutcome, CreateUserOperationRequest,
    DeleteUserOperation, DeleteUserOperationOutcome, DeleteUserOperationRequest, GetUserOperation,
    GetUserOperationOutcome, GetUserOperationRequest, ListUsersOperation, UpdateUserOperation,
    UpdateUserOperationOutcome, UpdateUserOperationRequest, UserPolicy,
};
use crate::{KvStore, LockManager, Result};
use std::sync::Arc;

/// User records on the shared store. Mutations are serialized per key by the
/// lock manager; reads are coalesced and never take a lock.
pub struct UserService {
    list: ListUsersOperation,
    get: GetUserOperation,
    create: CreateUserOperation,
    update: UpdateUserOperation,
    delete: DeleteUserOperation,
}

impl UserService {
    pub fn new(store: Arc<dyn KvStore>, locks: Arc<LockManager>, policy: UserPolicy) -> Self {
        let listing = Arc::new(Coalescer::new());
        let reads = Arc::new(Coalescer::new());

        Self {
            list: ListUsersOperation::new(store.clone(), listing),
            get: GetUserOperation::new(store.clone(), reads),
            create: CreateUserOperation::new(store.clone(), locks.clone(), policy.clone()),
            update: UpdateUserOperation::new(store.clone(), locks.clone(), policy.clone()),
            delete: DeleteUserOperation::new(store, locks, policy),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<String>> {
        Ok(self.list.run().await?.keys)
    }

    pub async fn get_user(&self, id: &str) -> Result<GetUserOperationOutcome> {
        self.get
            .run(GetUserOperationRequest { id: id.to_string() })
            .await
    }

    pub async fn create_user(&self, username: &str) -> Result<CreateUserOperationOutcome> {
        self.create
            .run(CreateUserOperationRequest {
                username: username.to_string(),
            })
            .await
    }

    pub async fn update_user(
        &self,
        id: &str,
        username: &str,
    ) -> Result<UpdateUserOperationOutcome> {
        self.update
            .run(UpdateUserOperationRequest {
                id: id.to_string(),
                username: username.to_string(),
            })
            .await
    }

    pub async fn delete_user(&self, id: &str) -> Result<DeleteUserOperationOutcome> {
        self.delete
            .run(DeleteUserOperationRequest { id: id.to_string() })
            .await
    }
}
