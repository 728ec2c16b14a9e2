use serde_json::{Map, Value};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::Collection;
use crate::error::{ReporterError, Result};

/// A minimal in-memory collection holding raw metric values
///
/// Values are stored exactly as a metrics library would render them, so any
/// shape the classifier understands can be placed here directly.
pub struct MemoryCollection {
    name: Option<String>,
    metrics: RwLock<Map<String, Value>>,
    releases: AtomicUsize,
}

impl MemoryCollection {
    /// Create an anonymous collection
    pub fn new() -> Self {
        Self {
            name: None,
            metrics: RwLock::new(Map::new()),
            releases: AtomicUsize::new(0),
        }
    }

    /// Create a named collection
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Set the raw value of a metric, keeping its position if it exists
    pub fn set(&self, metric: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let mut metrics = self
            .metrics
            .write()
            .map_err(|_| ReporterError::poisoned("collection"))?;
        metrics.insert(metric.into(), value.into());
        Ok(())
    }

    /// Remove a metric, returning its last value
    pub fn remove(&self, metric: &str) -> Result<Option<Value>> {
        let mut metrics = self
            .metrics
            .write()
            .map_err(|_| ReporterError::poisoned("collection"))?;
        Ok(metrics.shift_remove(metric))
    }

    /// Number of times `release` has been called
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection for MemoryCollection {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn snapshot(&self) -> Value {
        // a poisoned writer cannot leave the map half-updated
        let metrics = self
            .metrics
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        match &self.name {
            Some(name) => {
                let mut nested = Map::new();
                nested.insert(name.clone(), Value::Object(metrics));
                Value::Object(nested)
            }
            None => Value::Object(metrics),
        }
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
