//! A periodic exporter shipping metric collection snapshots to a
//! bulk-ingest document store

pub mod client;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod metric;
pub mod reporter;
pub mod retry;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::client::{BulkClient, MemoryClient};
    #[cfg(feature = "elasticsearch")]
    pub use crate::client::ElasticsearchClient;
    pub use crate::collection::{Collection, CollectionRegistry, MemoryCollection};
    pub use crate::config::{ReporterConfig, ReporterConfigBuilder};
    pub use crate::document::{BulkEntry, translate};
    pub use crate::error::{ReporterError, Result};
    pub use crate::metric::{Metric, MetricKind, classify};
    pub use crate::reporter::{Reporter, ReporterEvent, ReporterState};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
