//! Package metadata refresh: npm registry entries and npms.io scores.

mod npmsio;
mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::error::Result;

pub use npmsio::{NpmsioConfig, NpmsioScoreFetcher, npmsio_scores_from_response};
pub use registry::{NpmRegistryRefresher, RegistryConfig, registry_entries_from_document};

/// Keeps stored package metadata current ahead of fan-out and scoring.
#[async_trait]
pub trait MetadataRefresher: Send + Sync {
    /// Fetches data for packages that have none stored yet.
    async fn fetch_missing(&self) -> Result<()>;

    /// Re-fetches and stores data for `names`.
    async fn refresh_packages(&self, names: &[String]) -> Result<()>;
}

/// Runs several refreshers concurrently; the first error wins.
#[derive(Clone)]
pub struct CombinedRefresher {
    refreshers: Vec<Arc<dyn MetadataRefresher>>,
}

impl fmt::Debug for CombinedRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedRefresher")
            .field(
                "refreshers",
                &self
                    .refreshers
                    .iter()
                    .map(|refresher| std::any::type_name_of_val(refresher.as_ref()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CombinedRefresher {
    pub fn new(refreshers: Vec<Arc<dyn MetadataRefresher>>) -> Self {
        Self { refreshers }
    }
}

#[async_trait]
impl MetadataRefresher for CombinedRefresher {
    async fn fetch_missing(&self) -> Result<()> {
        try_join_all(self.refreshers.iter().map(|refresher| refresher.fetch_missing())).await?;
        Ok(())
    }

    async fn refresh_packages(&self, names: &[String]) -> Result<()> {
        try_join_all(
            self.refreshers
                .iter()
                .map(|refresher| refresher.refresh_packages(names)),
        )
        .await?;
        Ok(())
    }
}
