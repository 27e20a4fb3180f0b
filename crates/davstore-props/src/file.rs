//! File-backed property store.
//!
//! [`FilePropertyStore`] keeps one entry's properties in a hidden JSON side
//! file. The file is read lazily on first access, changes are buffered in
//! memory, and [`flush`](PropertyStore::flush) replaces the file atomically
//! (write to a temporary sibling, then rename over it).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use davstore_types::{PropertyName, PropertyValue};
use tracing::debug;

use crate::atomic::{remove_if_exists, write_atomic};
use crate::error::{PropertyError, PropertyResult};
use crate::traits::PropertyStore;

type Entries = BTreeMap<PropertyName, PropertyValue>;

#[derive(Default)]
struct State {
    /// `None` until the side file has been read.
    entries: Option<Entries>,
    /// Set when `entries` differs from what is on disk.
    dirty: bool,
}

/// A [`PropertyStore`] persisted as a JSON side file.
///
/// The side file location is resolved through a locator closure each time it
/// is needed, so an entry that is renamed (for example a collection moved
/// from its temporary directory to its final name) keeps its properties
/// without the store having to be rebuilt.
pub struct FilePropertyStore {
    locator: Box<dyn Fn() -> PathBuf + Send + Sync>,
    state: Mutex<State>,
}

impl FilePropertyStore {
    /// Create a store whose side file is wherever `locator` says it is.
    pub fn new(locator: impl Fn() -> PathBuf + Send + Sync + 'static) -> Self {
        Self {
            locator: Box::new(locator),
            state: Mutex::new(State::default()),
        }
    }

    /// Create a store with a fixed side file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(move || path.clone())
    }

    /// Current side file location.
    pub fn path(&self) -> PathBuf {
        (self.locator)()
    }

    /// Returns `true` if there are changes that have not been flushed.
    pub fn is_dirty(&self) -> PropertyResult<bool> {
        Ok(self.lock()?.dirty)
    }

    /// Drop buffered changes and forget the loaded state.
    ///
    /// Used when the owning entry is deleted, so a later flush does not
    /// recreate its side file.
    pub fn discard(&self) -> PropertyResult<()> {
        let mut state = self.lock()?;
        state.entries = None;
        state.dirty = false;
        Ok(())
    }

    /// Write one property straight through to the side file.
    ///
    /// Only `name` is merged into what is currently on disk. Other buffered
    /// changes stay in memory and keep the store dirty, so they are still
    /// persisted (or dropped) by the owner's flush.
    pub fn persist(&self, name: PropertyName, value: PropertyValue) -> PropertyResult<()> {
        let mut state = self.lock()?;
        let path = self.path();
        let mut on_disk = read_side_file(&path)?;
        on_disk.insert(name.clone(), value.clone());
        write_side_file(&path, &on_disk)?;
        match state.entries.as_mut() {
            Some(entries) => {
                entries.insert(name, value);
            }
            None => state.entries = Some(on_disk),
        }
        Ok(())
    }

    fn lock(&self) -> PropertyResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| PropertyError::Poisoned)
    }

    /// Run `f` against the loaded entries, reading the side file first if
    /// needed.
    fn with_entries<R>(&self, f: impl FnOnce(&mut Entries, &mut bool) -> R) -> PropertyResult<R> {
        let mut state = self.lock()?;
        if state.entries.is_none() {
            state.entries = Some(read_side_file(&self.path())?);
        }
        let State { entries, dirty } = &mut *state;
        Ok(f(entries.get_or_insert_with(Entries::new), dirty))
    }
}

impl PropertyStore for FilePropertyStore {
    fn get(&self, name: &PropertyName) -> PropertyResult<PropertyValue> {
        self.with_entries(|entries, _| entries.get(name).cloned())?
            .ok_or_else(|| PropertyError::NotFound(name.clone()))
    }

    fn set(&self, name: PropertyName, value: PropertyValue) -> PropertyResult<()> {
        self.with_entries(|entries, dirty| {
            if entries.get(&name) != Some(&value) {
                entries.insert(name, value);
                *dirty = true;
            }
        })
    }

    fn delete(&self, name: &PropertyName) -> PropertyResult<bool> {
        self.with_entries(|entries, dirty| {
            let existed = entries.remove(name).is_some();
            *dirty |= existed;
            existed
        })
    }

    fn contains(&self, name: &PropertyName) -> PropertyResult<bool> {
        self.with_entries(|entries, _| entries.contains_key(name))
    }

    fn list(&self) -> PropertyResult<Vec<PropertyName>> {
        self.with_entries(|entries, _| entries.keys().cloned().collect())
    }

    fn flush(&self) -> PropertyResult<()> {
        let mut state = self.lock()?;
        if !state.dirty {
            return Ok(());
        }
        if let Some(entries) = &state.entries {
            write_side_file(&self.path(), entries)?;
        }
        state.dirty = false;
        Ok(())
    }
}

impl std::fmt::Debug for FilePropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePropertyStore")
            .field("path", &self.path())
            .finish()
    }
}

fn read_side_file(path: &Path) -> PropertyResult<Entries> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| PropertyError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Entries::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_side_file(path: &Path, entries: &Entries) -> PropertyResult<()> {
    let Some(parent) = path.parent().filter(|p| p.is_dir()) else {
        // The entry itself is gone (removed or moved to trash).
        debug!(path = %path.display(), "property owner no longer exists; skipping flush");
        return Ok(());
    };

    if entries.is_empty() {
        return Ok(remove_if_exists(path)?);
    }

    let bytes = serde_json::to_vec_pretty(entries)
        .map_err(|e| PropertyError::Serialization(e.to_string()))?;
    write_atomic(path, &bytes)?;

    debug!(path = %path.display(), count = entries.len(), "flushed properties");
    Ok(())
}
