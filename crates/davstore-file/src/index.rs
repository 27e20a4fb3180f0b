//! Per-collection resource index.
//!
//! The [`ResourceIndex`] maps resource names to the UIDs of their
//! components and is kept in `<child>/.index.json`. It answers existence and
//! UID queries without parsing every resource. The index is advisory:
//! lookups through it are always verified against the resource itself.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::layout::{write_atomic, EntryPath, INDEX_FILE_NAME};

const INDEX_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    /// Resource name to component UID.
    resources: BTreeMap<String, String>,
}

pub struct ResourceIndex {
    location: Arc<EntryPath>,
    /// `None` until the index file has been read.
    entries: Mutex<Option<BTreeMap<String, String>>>,
}

impl ResourceIndex {
    /// Index of an existing collection, read on first use.
    pub(crate) fn open(location: Arc<EntryPath>) -> Self {
        Self {
            location,
            entries: Mutex::new(None),
        }
    }

    /// Initialize an empty index inside a newly created collection directory.
    pub(crate) fn create(location: Arc<EntryPath>) -> StoreResult<Self> {
        let index = Self {
            location,
            entries: Mutex::new(Some(BTreeMap::new())),
        };
        index.save(&BTreeMap::new())?;
        Ok(index)
    }

    fn path(&self) -> PathBuf {
        self.location.path().join(INDEX_FILE_NAME)
    }

    pub fn uid_for_name(&self, name: &str) -> StoreResult<Option<String>> {
        let entries = self.loaded()?;
        Ok(entries.as_ref().and_then(|e| e.get(name).cloned()))
    }

    pub fn name_for_uid(&self, uid: &str) -> StoreResult<Option<String>> {
        let entries = self.loaded()?;
        Ok(entries.as_ref().and_then(|e| {
            e.iter()
                .find(|(_, indexed)| indexed.as_str() == uid)
                .map(|(name, _)| name.clone())
        }))
    }

    /// Number of indexed resources.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.loaded()?.as_ref().map_or(0, BTreeMap::len))
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub(crate) fn add_resource(&self, name: &str, uid: &str) -> StoreResult<()> {
        let mut entries = self.loaded()?;
        let map = entries.get_or_insert_with(BTreeMap::new);
        map.insert(name.to_string(), uid.to_string());
        self.save(map)?;
        debug!(resource = name, uid, "indexed resource");
        Ok(())
    }

    pub(crate) fn delete_resource(&self, name: &str) -> StoreResult<()> {
        let mut entries = self.loaded()?;
        let map = entries.get_or_insert_with(BTreeMap::new);
        if map.remove(name).is_some() {
            self.save(map)?;
        }
        Ok(())
    }

    fn loaded(&self) -> StoreResult<MutexGuard<'_, Option<BTreeMap<String, String>>>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.is_none() {
            *entries = Some(self.read()?);
        }
        Ok(entries)
    }

    fn read(&self) -> StoreResult<BTreeMap<String, String>> {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<IndexFile>(&bytes) {
            Ok(file) => Ok(file.resources),
            Err(e) => {
                // Lookups verify every hit, so a bad index only costs speed.
                warn!(path = %path.display(), error = %e, "ignoring unreadable resource index");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save(&self, resources: &BTreeMap<String, String>) -> StoreResult<()> {
        let file = IndexFile {
            version: INDEX_VERSION,
            resources: resources.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path(), &bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for ResourceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceIndex")
            .field("path", &self.path())
            .finish()
    }
}
