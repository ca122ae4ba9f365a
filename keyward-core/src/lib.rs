//! Keyward Core - user records on a shared key-value store
//!
//! Mutations are serialized across server processes by leased, quorum-based
//! distributed locks; concurrent identical reads are coalesced into a single
//! store round trip.

pub mod coalesce;
pub mod error;
pub mod keys;
pub mod lock;
pub mod operations;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use coalesce::Coalescer;
pub use error::{KeywardError, Result};
pub use keys::{LockScope, Mutation, lock_name, normalize_username, user_key};
pub use lock::{LockHandle, LockManager, LockManagerOptions};
pub use operations::{
    CreateUserOperationOutcome, DeleteUserOperationOutcome, GetUserOperationOutcome,
    UpdateUserOperationOutcome, UserPolicy, UserRecord,
};
pub use service::UserService;
pub use store::{KvStore, MemoryStore, RedisStore, StoreBuilder};
