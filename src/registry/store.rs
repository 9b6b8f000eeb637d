//! Source registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::config::{RegistryConfig, SourceConfig};
use super::error::RegistryError;
use super::key::StreamKey;
use crate::media::MediaSource;

/// Registry of live sources
///
/// Thread-safe via `RwLock`. Lookups (readers attaching) take the read lock;
/// only registration and cleanup write.
pub struct SourceRegistry {
    sources: RwLock<HashMap<StreamKey, Arc<MediaSource>>>,
    config: RegistryConfig,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a source under `key` with the registry's source config.
    ///
    /// A closed source under the same key is replaced; a live one is an error.
    pub async fn register(&self, key: &StreamKey) -> Result<Arc<MediaSource>, RegistryError> {
        self.register_with(key, self.config.source.clone()).await
    }

    /// Create a source under `key` with an explicit config
    pub async fn register_with(
        &self,
        key: &StreamKey,
        config: SourceConfig,
    ) -> Result<Arc<MediaSource>, RegistryError> {
        let mut sources = self.sources.write().await;

        if let Some(existing) = sources.get(key) {
            if !existing.is_closed() {
                return Err(RegistryError::StreamAlreadyPublishing(key.clone()));
            }
            tracing::debug!(stream = %key, "replacing closed source");
        }

        let source = MediaSource::new(key.clone(), config);
        sources.insert(key.clone(), Arc::clone(&source));
        tracing::info!(stream = %key, "source registered");
        Ok(source)
    }

    /// Look up a live source
    pub async fn find(&self, key: &StreamKey) -> Result<Arc<MediaSource>, RegistryError> {
        let sources = self.sources.read().await;
        let source = sources
            .get(key)
            .ok_or_else(|| RegistryError::StreamNotFound(key.clone()))?;
        if source.is_closed() {
            return Err(RegistryError::StreamClosed(key.clone()));
        }
        Ok(Arc::clone(source))
    }

    /// Close and remove the source under `key`
    pub async fn unregister(&self, key: &StreamKey) -> Option<Arc<MediaSource>> {
        let removed = self.sources.write().await.remove(key);
        if let Some(source) = &removed {
            source.close();
            tracing::info!(stream = %key, "source unregistered");
        }
        removed
    }

    pub async fn contains(&self, key: &StreamKey) -> bool {
        self.find(key).await.is_ok()
    }

    /// Number of registered sources (closed ones included until cleanup)
    pub async fn source_count(&self) -> usize {
        self.sources.read().await.len()
    }

    /// Remove closed sources
    pub async fn cleanup(&self) {
        let mut sources = self.sources.write().await;
        sources.retain(|key, source| {
            let keep = !source.is_closed();
            if !keep {
                tracing::info!(stream = %key, "source removed by cleanup");
            }
            keep
        });
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
