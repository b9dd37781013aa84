//! RAG configuration storage trait

use async_trait::async_trait;

use crate::config::RagConfiguration;
use crate::error::Result;

/// Source of the current [`RagConfiguration`]
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Current configuration; defaults when nothing valid is stored
    async fn get(&self) -> Result<RagConfiguration>;

    /// Validate and store a new configuration
    async fn update(&self, config: &RagConfiguration) -> Result<()>;

    /// Drop the stored configuration so defaults apply again
    async fn reset(&self) -> Result<()>;
}

/// Fixed configuration, useful when no store is wired in
#[derive(Debug, Clone, Default)]
pub struct StaticConfiguration(pub RagConfiguration);

#[async_trait]
impl ConfigurationStore for StaticConfiguration {
    async fn get(&self) -> Result<RagConfiguration> {
        Ok(self.0.clone())
    }

    async fn update(&self, _config: &RagConfiguration) -> Result<()> {
        Err(crate::error::Error::config("static configuration cannot be updated"))
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}
