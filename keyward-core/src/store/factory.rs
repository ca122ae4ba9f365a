use super::{KvStore, memory::MemoryStore, redis::RedisStore};
use crate::{KeywardError, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    backend: Option<String>,
    redis_url: Option<String>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(KeywardError::Config(
                "store backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    pub async fn build(&self) -> Result<Arc<dyn KvStore>> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "redis" => {
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(KeywardError::Config(
                        "redis url is required for redis backend".to_string(),
                    ));
                }

                let store = RedisStore::connect(url).await?;
                Ok(Arc::new(store))
            }
            "memory" => {
                tracing::warn!("Using in-process memory store; locks only cover this process");
                Ok(Arc::new(MemoryStore::new()))
            }
            other => Err(KeywardError::Config(format!(
                "unsupported store backend: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_memory_backend() {
        let store = StoreBuilder::new().backend(" Memory ").build().await.unwrap();
        store.set("user:dave", "dave", None).await.unwrap();
        assert!(store.exists("user:dave").await.unwrap());
    }

    #[tokio::test]
    async fn test_build_rejects_bad_backend_config() {
        let missing = StoreBuilder::new().build().await;
        assert!(matches!(missing, Err(KeywardError::Config(_))));

        let unknown = StoreBuilder::new().backend("etcd").build().await;
        assert!(matches!(unknown, Err(KeywardError::Config(_))));

        let no_url = StoreBuilder::new().backend("redis").build().await;
        assert!(matches!(no_url, Err(KeywardError::Config(_))));
    }
}
