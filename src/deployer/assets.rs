//! Publishing of stack assets.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::stack::StackArtifact;

/// Uploads the files and images a stack refers to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetPublisher: Send + Sync {
    /// Template parameters pointing at the published assets.
    ///
    /// # Errors
    ///
    /// Returns an error if the asset locations cannot be determined.
    async fn asset_parameters(&self, artifact: &StackArtifact) -> Result<BTreeMap<String, String>>;

    /// Publishes every asset of `artifact`.
    ///
    /// # Errors
    ///
    /// Returns an error if an upload fails.
    async fn publish(&self, artifact: &StackArtifact) -> Result<()>;
}

/// Publisher for stacks without assets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAssetPublisher;

#[async_trait]
impl AssetPublisher for NoopAssetPublisher {
    async fn asset_parameters(&self, _artifact: &StackArtifact) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    async fn publish(&self, _artifact: &StackArtifact) -> Result<()> {
        Ok(())
    }
}
