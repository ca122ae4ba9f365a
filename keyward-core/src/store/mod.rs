//! Shared key-value store backends for Keyward
//!
//! Every operation is a single-key atomic operation on the backend. There are
//! no cross-key transactions; coordination across processes is layered on top
//! by the lock manager.

pub mod factory;
pub mod memory;
pub mod redis;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use factory::StoreBuilder;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns `None` when the key does not exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value`, replacing any previous value and expiration. `None`
    /// stores the key without expiration.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Writes `value` with `ttl` only when `key` is absent.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Removes `key` only when it currently holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;
}
