//! Leased distributed mutexes over one or more key-value store instances
//!
//! A lock is a key holding a random ownership token with a TTL (the lease).
//! With several independent instances the lock is only considered held when
//! a majority accepted the token, so a single unreachable instance can never
//! produce two owners. Leases expire on their own: a crashed holder blocks
//! others for at most one lease.

mod handle;

pub use handle::LockHandle;

use crate::store::KvStore;
use crate::{KeywardError, Result};
use futures_util::FutureExt;
use futures_util::future::join_all;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use ulid::Ulid;

const DRIFT_FLOOR: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct LockManagerOptions {
    /// How long `acquire` keeps retrying before giving up.
    pub acquire_timeout: Duration,
    /// Base pause between attempts; a random jitter of up to the same amount
    /// is added to spread contending processes apart.
    pub retry_delay: Duration,
}

impl Default for LockManagerOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(50),
        }
    }
}

pub struct LockManager {
    instances: Vec<Arc<dyn KvStore>>,
    quorum: usize,
    options: LockManagerOptions,
}

impl LockManager {
    pub fn new(instances: Vec<Arc<dyn KvStore>>, options: LockManagerOptions) -> Result<Self> {
        if instances.is_empty() {
            return Err(KeywardError::Config(
                "lock manager needs at least one store instance".to_string(),
            ));
        }

        let quorum = instances.len() / 2 + 1;
        Ok(Self {
            instances,
            quorum,
            options,
        })
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Blocks until `name` is held on a quorum of instances or the acquire
    /// timeout elapses. Never returns without either a handle or an error.
    pub async fn acquire(&self, name: &str, lease: Duration) -> Result<LockHandle> {
        let deadline = Instant::now() + self.options.acquire_timeout;
        let drift = lease / 100 + DRIFT_FLOOR;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let token = Ulid::new().to_string();
            let started = Instant::now();

            let votes = join_all(
                self.instances
                    .iter()
                    .map(|instance| instance.set_if_absent(name, &token, lease)),
            )
            .await;

            let mut granted = 0usize;
            let mut last_error = None;
            for vote in votes {
                match vote {
                    Ok(true) => granted += 1,
                    Ok(false) => {}
                    Err(error) => last_error = Some(error),
                }
            }

            let validity = lease
                .checked_sub(started.elapsed() + drift)
                .filter(|validity| !validity.is_zero());

            if granted >= self.quorum {
                if let Some(validity) = validity {
                    tracing::debug!(
                        "Acquired lock {} on {}/{} instances after {} attempt(s)",
                        name,
                        granted,
                        self.instances.len(),
                        attempts
                    );
                    return Ok(LockHandle::new(
                        name.to_string(),
                        token,
                        lease,
                        started,
                        validity,
                    ));
                }
            }

            if granted > 0 {
                self.release_token(name, &token).await;
            }

            let now = Instant::now();
            if now >= deadline {
                let reason = match last_error {
                    Some(error) => format!(
                        "quorum of {} not reached after {} attempt(s): {}",
                        self.quorum, attempts, error
                    ),
                    None => format!(
                        "still held elsewhere after {} attempt(s) over {:?}",
                        attempts, self.options.acquire_timeout
                    ),
                };
                tracing::warn!("Giving up on lock {}: {}", name, reason);
                return Err(KeywardError::LockAcquisitionFailed {
                    name: name.to_string(),
                    reason,
                });
            }

            let pause = (self.options.retry_delay + self.jitter()).min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }

    /// Releases `handle` on every instance that still holds its token.
    ///
    /// Safe to call more than once, and after the lease expired: keys that
    /// vanished or now belong to another holder are left alone. Errors only
    /// when no instance could be reached at all.
    pub async fn release(&self, handle: &LockHandle) -> Result<()> {
        if !handle.mark_released() {
            tracing::debug!("Lock {} already released", handle.name());
            return Ok(());
        }

        let results = join_all(
            self.instances
                .iter()
                .map(|instance| instance.delete_if_equals(handle.name(), handle.token())),
        )
        .await;

        let mut removed = 0usize;
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(error) => errors.push(error.to_string()),
            }
        }

        if errors.len() == self.instances.len() {
            return Err(KeywardError::Store(format!(
                "release of lock {} failed on every instance: {}",
                handle.name(),
                errors.join("; ")
            )));
        }

        if removed == 0 {
            tracing::debug!(
                "Lock {} was no longer held at release (lease expired)",
                handle.name()
            );
        }

        Ok(())
    }

    /// Runs `critical` while holding `name`. The lock is released on every
    /// exit path, including errors and panics inside `critical`.
    pub async fn with_lock<T, F, Fut>(&self, name: &str, lease: Duration, critical: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire(name, lease).await?;
        let outcome = AssertUnwindSafe(critical()).catch_unwind().await;

        if handle.is_expired() {
            tracing::warn!(
                "Critical section under lock {} outlived its validity of {:?} (lease {:?})",
                name,
                handle.validity(),
                handle.lease()
            );
        }

        if let Err(error) = self.release(&handle).await {
            tracing::warn!("Failed to release lock {}: {}", name, error);
        }

        match outcome {
            Ok(result) => result,
            Err(_) => Err(KeywardError::Internal(format!(
                "critical section under lock {} panicked",
                name
            ))),
        }
    }

    async fn release_token(&self, name: &str, token: &str) {
        let results = join_all(
            self.instances
                .iter()
                .map(|instance| instance.delete_if_equals(name, token)),
        )
        .await;

        for error in results.into_iter().filter_map(|result| result.err()) {
            tracing::debug!("Rollback of partial lock {} failed: {}", name, error);
        }
    }

    fn jitter(&self) -> Duration {
        let span = self.options.retry_delay.as_millis();
        if span == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis((Ulid::new().random() % span) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::TestStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LEASE: Duration = Duration::from_secs(2);

    fn options(timeout_ms: u64) -> LockManagerOptions {
        LockManagerOptions {
            acquire_timeout: Duration::from_millis(timeout_ms),
            retry_delay: Duration::from_millis(5),
        }
    }

    fn single(store: Arc<dyn KvStore>, timeout_ms: u64) -> LockManager {
        LockManager::new(vec![store], options(timeout_ms)).unwrap()
    }

    #[test]
    fn test_quorum_is_majority() {
        let build = |n: usize| {
            let instances: Vec<Arc<dyn KvStore>> = (0..n)
                .map(|_| Arc::new(MemoryStore::new()) as Arc<dyn KvStore>)
                .collect();
            LockManager::new(instances, LockManagerOptions::default())
                .unwrap()
                .quorum()
        };
        assert_eq!(build(1), 1);
        assert_eq!(build(2), 2);
        assert_eq!(build(3), 2);
        assert_eq!(build(5), 3);

        let empty = LockManager::new(Vec::new(), LockManagerOptions::default());
        assert!(matches!(empty, Err(KeywardError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_second_holder_until_timeout() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let locks = single(store.clone(), 100);

        let first = locks.acquire("lock:user:alice", LEASE).await.unwrap();
        assert_eq!(
            store.get("lock:user:alice").await.unwrap().as_deref(),
            Some(first.token())
        );

        let second = locks.acquire("lock:user:alice", LEASE).await;
        assert!(matches!(
            second,
            Err(KeywardError::LockAcquisitionFailed { ref name, .. }) if name == "lock:user:alice"
        ));

        // Different names never contend.
        let other = locks.acquire("lock:user:bob", LEASE).await.unwrap();
        locks.release(&other).await.unwrap();

        locks.release(&first).await.unwrap();
        let third = locks.acquire("lock:user:alice", LEASE).await.unwrap();
        assert_ne!(third.token(), first.token());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_gets_lock_once_released() {
        let locks = Arc::new(single(Arc::new(MemoryStore::new()), 1_000));
        let held = locks.acquire("lock:user:erin", LEASE).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("lock:user:erin", LEASE).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        locks.release(&held).await.unwrap();
        let acquired = waiter.await.unwrap().unwrap();
        assert_eq!(acquired.name(), "lock:user:erin");
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_idempotent() {
        let locks = single(Arc::new(MemoryStore::new()), 100);
        let handle = locks.acquire("lock:user:frank", LEASE).await.unwrap();

        locks.release(&handle).await.unwrap();
        assert!(handle.is_released());
        locks.release(&handle).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_expiry_keeps_new_owner() {
        let locks = single(Arc::new(MemoryStore::new()), 50);
        let stale = locks
            .acquire("lock:user:gina", Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(stale.is_expired());

        let fresh = locks.acquire("lock:user:gina", LEASE).await.unwrap();
        locks.release(&stale).await.unwrap();

        // The stale release must not have freed the new owner's lock.
        let contender = locks.acquire("lock:user:gina", LEASE).await;
        assert!(contender.is_err());

        locks.release(&fresh).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_quorum_tolerates_minority_failure() {
        let instances: Vec<Arc<dyn KvStore>> = vec![
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(TestStore::unreachable()),
        ];
        let locks = LockManager::new(instances, options(100)).unwrap();

        let handle = locks.acquire("lock:user:hank", LEASE).await.unwrap();
        locks.release(&handle).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_quorum_fails_with_majority_unreachable() {
        let healthy = Arc::new(MemoryStore::new());
        let instances: Vec<Arc<dyn KvStore>> = vec![
            healthy.clone(),
            Arc::new(TestStore::unreachable()),
            Arc::new(TestStore::unreachable()),
        ];
        let locks = LockManager::new(instances, options(100)).unwrap();

        let result = locks.acquire("lock:user:iris", LEASE).await;
        match result {
            Err(KeywardError::LockAcquisitionFailed { reason, .. }) => {
                assert!(reason.contains("connection refused"), "{}", reason);
            }
            other => panic!("expected lock failure, got {:?}", other),
        }

        // The partial grant on the healthy instance was rolled back.
        assert!(!healthy.exists("lock:user:iris").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_errors_when_no_instance_reachable() {
        let flaky = Arc::new(TestStore::new());
        let locks = single(flaky.clone(), 100);
        let handle = locks.acquire("lock:user:jack", LEASE).await.unwrap();

        let dead = single(Arc::new(TestStore::unreachable()), 100);
        assert!(matches!(
            dead.release(&handle).await,
            Err(KeywardError::Store(_))
        ));
        // Second call is a no-op even though the first failed.
        dead.release(&handle).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_serializes_critical_sections() {
        let locks = Arc::new(single(Arc::new(MemoryStore::new()), 5_000));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let locks = locks.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            tasks.push(tokio::spawn(async move {
                locks
                    .with_lock("lock:user:kate", LEASE, || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_releases_on_error_and_panic() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let locks = single(store.clone(), 100);

        let failed: Result<()> = locks
            .with_lock("lock:user:liam", LEASE, || async {
                Err(KeywardError::Store("write failed".to_string()))
            })
            .await;
        assert!(matches!(failed, Err(KeywardError::Store(_))));
        assert!(!store.exists("lock:user:liam").await.unwrap());

        let panicked: Result<()> = locks
            .with_lock("lock:user:liam", LEASE, || async {
                if store.exists("lock:user:liam").await? {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert!(matches!(panicked, Err(KeywardError::Internal(_))));
        assert!(!store.exists("lock:user:liam").await.unwrap());
    }
}
