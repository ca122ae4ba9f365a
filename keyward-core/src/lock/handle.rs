use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Proof of ownership for a named lease. The token is what the store holds
/// under the lock name; release only removes keys that still carry it.
#[derive(Debug)]
pub struct LockHandle {
    name: String,
    token: String,
    lease: Duration,
    acquired_at: Instant,
    validity: Duration,
    released: AtomicBool,
}

impl LockHandle {
    pub(crate) fn new(
        name: String,
        token: String,
        lease: Duration,
        acquired_at: Instant,
        validity: Duration,
    ) -> Self {
        Self {
            name,
            token,
            lease,
            acquired_at,
            validity,
            released: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Time the holder may assume exclusive ownership, measured from
    /// `acquired_at`. Shorter than the lease by the acquisition round-trip
    /// and clock drift allowance.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.validity
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Returns true for the first caller only.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }
}
