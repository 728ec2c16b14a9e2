use async_trait::async_trait;
use std::time::Duration;

use crate::document::BulkEntry;
use crate::error::Result;

/// Elasticsearch client over HTTP
#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
/// Recording client for testing
pub mod memory;

#[cfg(feature = "elasticsearch")]
pub use elasticsearch::ElasticsearchClient;
pub use memory::MemoryClient;

/// Client for a bulk-ingest document store
#[async_trait]
pub trait BulkClient: Send + Sync + 'static {
    /// Check that the store is reachable
    async fn ping(&self, timeout: Option<Duration>) -> Result<()>;

    /// Submit action/document pairs in a single request
    async fn bulk(&self, entries: &[BulkEntry]) -> Result<()>;

    /// Get a name for this client
    fn name(&self) -> &str;
}
