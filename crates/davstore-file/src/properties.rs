//! Lazily opened property stores for homes, collections and resources.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use davstore_props::{FilePropertyStore, PropertyStore};

use crate::error::StoreResult;
use crate::lock;
use crate::transaction::Staging;

/// The property store slot of one entity.
///
/// The store is opened on first access, and that first access also stages
/// a flush on the owning transaction so changes are persisted at commit.
pub(crate) struct LazyProperties {
    slot: Mutex<Option<Arc<FilePropertyStore>>>,
}

impl LazyProperties {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn open<F>(
        &self,
        staging: &Staging,
        owner: &str,
        locate: F,
    ) -> StoreResult<Arc<FilePropertyStore>>
    where
        F: Fn() -> PathBuf + Send + Sync + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(FilePropertyStore::new(locate));
        // A finished transaction can still read; there is just nothing to flush.
        if staging.is_open() {
            let flushing = Arc::clone(&store);
            staging.add_operation(format!("flush properties of {owner}"), move |_| {
                flushing.flush()?;
                Ok(None)
            })?;
        }
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    /// The store, if it has been opened.
    pub(crate) fn loaded(&self) -> Option<Arc<FilePropertyStore>> {
        lock(&self.slot).clone()
    }

    /// Drop unflushed changes of an entity that is going away.
    pub(crate) fn discard(&self) -> StoreResult<()> {
        if let Some(store) = self.loaded() {
            store.discard()?;
        }
        Ok(())
    }

    /// Persist pending changes now, if the store has been opened.
    pub(crate) fn flush(&self) -> StoreResult<()> {
        if let Some(store) = self.loaded() {
            store.flush()?;
        }
        Ok(())
    }
}
