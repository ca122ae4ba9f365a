//! Store doubles shared by the unit tests.

use crate::store::{KvStore, MemoryStore};
use crate::{KeywardError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a `MemoryStore`, counting calls and injecting latency or failures.
#[derive(Default)]
pub struct TestStore {
    inner: MemoryStore,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub scans: AtomicUsize,
    get_delay: Option<Duration>,
    unreachable: AtomicBool,
    failing_sets: AtomicUsize,
    failing_gets: AtomicUsize,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get_delay(delay: Duration) -> Self {
        Self {
            get_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        let store = Self::default();
        store.unreachable.store(true, Ordering::SeqCst);
        store
    }

    pub fn fail_next_sets(&self, count: usize) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(KeywardError::Store("connection refused".to_string()));
        }
        Ok(())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl KvStore for TestStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_reachable()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.failing_gets) {
            return Err(KeywardError::Store("injected get failure".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check_reachable()?;
        if Self::take_failure(&self.failing_sets) {
            return Err(KeywardError::Store("injected set failure".to_string()));
        }
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_reachable()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_reachable()?;
        self.inner.exists(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_reachable()?;
        self.scans.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.keys_with_prefix(prefix).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_reachable()?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        self.check_reachable()?;
        self.inner.delete_if_equals(key, value).await
    }
}
