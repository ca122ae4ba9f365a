//! In-flight read deduplication
//!
//! Concurrent callers asking for the same coalescing key share one upstream
//! fetch. The fetch runs on its own task, so it completes and publishes even
//! if the caller that started it goes away. Nothing is cached: the entry is
//! removed the moment the fetch finishes, and the next caller fetches again.

use crate::{KeywardError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type Slot<T> = Option<Result<T>>;
type Registry<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

struct InFlight<T> {
    id: u64,
    result: watch::Receiver<Slot<T>>,
}

/// Removes its registry entry when the fetch task finishes or unwinds.
struct InFlightGuard<T> {
    registry: Registry<T>,
    key: String,
    id: u64,
}

impl<T> Drop for InFlightGuard<T> {
    fn drop(&mut self) {
        let mut inflight = lock_registry(&self.registry);
        if inflight.get(&self.key).is_some_and(|call| call.id == self.id) {
            inflight.remove(&self.key);
        }
    }
}

fn lock_registry<T>(
    registry: &Mutex<HashMap<String, InFlight<T>>>,
) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Coalescer<T> {
    inflight: Registry<T>,
    next_id: AtomicU64,
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        lock_registry(&self.inflight).len()
    }

    /// Returns the result of the fetch in flight for `key`, starting one with
    /// `fetch` if there is none. `fetch` is only invoked by the caller that
    /// starts the call; every overlapping caller sees the same value or error.
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let joined = {
            let inflight = lock_registry(&self.inflight);
            inflight.get(key).map(|call| call.result.clone())
        };

        let mut result = match joined {
            Some(result) => {
                tracing::trace!("Joined in-flight fetch for {}", key);
                result
            }
            None => self.start(key, fetch),
        };

        let published = result
            .wait_for(Option::is_some)
            .await
            .map_err(|_| KeywardError::Internal(format!("coalesced fetch aborted for {}", key)))?;

        published.as_ref().cloned().unwrap_or_else(|| {
            Err(KeywardError::Internal(format!(
                "coalesced fetch for {} published nothing",
                key
            )))
        })
    }

    fn start<F, Fut>(&self, key: &str, fetch: F) -> watch::Receiver<Slot<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (sender, receiver, id) = {
            let mut inflight = lock_registry(&self.inflight);

            // Another caller may have registered between our lookup and now.
            if let Some(call) = inflight.get(key) {
                return call.result.clone();
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (sender, receiver) = watch::channel(None);
            inflight.insert(
                key.to_string(),
                InFlight {
                    id,
                    result: receiver.clone(),
                },
            );
            (sender, receiver, id)
        };

        let guard = InFlightGuard {
            registry: self.inflight.clone(),
            key: key.to_string(),
            id,
        };
        let pending = fetch();

        tokio::spawn(async move {
            let outcome = pending.await;
            drop(guard);
            // All callers may have been cancelled; nobody left to tell.
            let _ = sender.send(Some(outcome));
        });

        receiver
    }
}
