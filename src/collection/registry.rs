use log::trace;
use std::sync::{Arc, RwLock};

use super::Collection;
use crate::error::{ReporterError, Result};

/// Registry of the collections currently being exported
///
/// Membership keeps insertion order and may hold the same collection more
/// than once. Entries are compared by pointer identity.
pub struct CollectionRegistry {
    collections: RwLock<Vec<Arc<dyn Collection>>>,
}

impl CollectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Vec::new()),
        }
    }

    /// Append a collection
    pub fn add(&self, collection: Arc<dyn Collection>) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| ReporterError::poisoned("registry"))?;
        trace!(
            "Adding collection {:?} to registry",
            collection.name().unwrap_or("<anonymous>")
        );
        collections.push(collection);
        Ok(())
    }

    /// Remove the first entry that is the given collection.
    /// Returns whether anything was removed.
    pub fn remove<C: Collection + ?Sized>(&self, collection: &Arc<C>) -> Result<bool> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| ReporterError::poisoned("registry"))?;

        let position = collections
            .iter()
            .position(|c| std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(collection)));

        match position {
            Some(index) => {
                collections.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Copy of the current members, in insertion order
    pub fn snapshot_all(&self) -> Result<Vec<Arc<dyn Collection>>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| ReporterError::poisoned("registry"))?;
        Ok(collections.clone())
    }

    /// Members with repeated entries collapsed, first occurrence kept
    pub fn distinct(&self) -> Result<Vec<Arc<dyn Collection>>> {
        let mut distinct: Vec<Arc<dyn Collection>> = Vec::new();
        for collection in self.snapshot_all()? {
            let seen = distinct
                .iter()
                .any(|c| std::ptr::addr_eq(Arc::as_ptr(c), Arc::as_ptr(&collection)));
            if !seen {
                distinct.push(collection);
            }
        }
        Ok(distinct)
    }

    pub fn len(&self) -> Result<usize> {
        let collections = self
            .collections
            .read()
            .map_err(|_| ReporterError::poisoned("registry"))?;
        Ok(collections.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
