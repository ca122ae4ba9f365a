use keyward_core::{KeywardError, LockManagerOptions, LockScope, Result, UserPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub store: StoreConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub users: UsersConfig,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// Shared store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Independent redis instances used for quorum locking. Empty reuses the
    /// shared store as the only instance.
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub scope: LockScope,
}

fn default_lease_ms() -> u64 {
    8_000
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    50
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            lease_ms: default_lease_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            scope: LockScope::default(),
        }
    }
}

impl LockConfig {
    pub fn manager_options(&self) -> LockManagerOptions {
        LockManagerOptions {
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersConfig {
    /// Expiration applied on every create and update; 0 or absent disables it.
    #[serde(default)]
    pub record_ttl_secs: Option<u64>,
}

impl Config {
    /// Loads `path` and applies `KEYWARD_*` overrides, e.g.
    /// `KEYWARD_LOCK__LEASE_MS=3000`.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(path, Self::environment())
    }

    fn environment() -> ::config::Environment {
        ::config::Environment::with_prefix("KEYWARD")
            .prefix_separator("_")
            .separator("__")
    }

    fn load(path: &str, environment: ::config::Environment) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(environment)
            .build()
            .map_err(|e| KeywardError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| KeywardError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Redis && self.store.redis.is_none() {
            return Err(KeywardError::Config(
                "redis configuration is required for redis backend".to_string(),
            ));
        }

        if self.lock.lease_ms == 0 {
            return Err(KeywardError::Config(
                "lock.lease_ms must be greater than zero".to_string(),
            ));
        }

        if self.lock.retry_delay_ms == 0 {
            return Err(KeywardError::Config(
                "lock.retry_delay_ms must be greater than zero".to_string(),
            ));
        }

        if self.lock.lease_ms <= self.lock.acquire_timeout_ms {
            tracing::warn!(
                "lock.lease_ms ({}) is not longer than lock.acquire_timeout_ms ({}); a waiter can outlast a holder's lease",
                self.lock.lease_ms,
                self.lock.acquire_timeout_ms
            );
        }

        Ok(())
    }

    pub fn user_policy(&self) -> UserPolicy {
        UserPolicy {
            record_ttl: self
                .users
                .record_ttl_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            lock_lease: Duration::from_millis(self.lock.lease_ms),
            lock_scope: self.lock.scope,
        }
    }
}
