//! Metric collections and the registry of collections being exported
use serde_json::Value;

/// In-memory collection for tests and embedding
pub mod memory;
mod registry;

pub use memory::MemoryCollection;
pub use registry::CollectionRegistry;

/// A group of metrics that can be snapshotted as a whole
///
/// The snapshot is the collection's own JSON rendering: an object mapping
/// metric names to raw values. A named collection nests that object under
/// its name, so the translator unwraps `snapshot[name]` before reading it.
pub trait Collection: Send + Sync + 'static {
    /// Optional name, used as a `name.` prefix for every metric
    fn name(&self) -> Option<&str> {
        None
    }

    /// Current values of all metrics in the collection
    fn snapshot(&self) -> Value;

    /// Release any resources held by the collection's metrics
    fn release(&self) {}
}
