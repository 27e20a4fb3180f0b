//! On-disk layout: where entries live and the filesystem primitives used to
//! change them.
//!
//! ```text
//! <root>/<uid[0:2]>/<uid[2:4]>/<uid>/            home
//! <root>/<uid[0:2]>/<uid[2:4]>/<uid>/<child>/    collection
//! <child>/<resource>                             resource
//! <dir>/.properties.json                         home / collection properties
//! <child>/.<resource>.properties.json            resource properties
//! <child>/.index.json                            collection index
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub(crate) use davstore_props::atomic::{remove_if_exists as remove_file_if_exists, write_atomic};
use davstore_types::names::{directory_properties_name, resource_properties_name};
use davstore_types::{is_hidden, shard_segments};
use tracing::debug;

/// Name of the collection index file.
pub const INDEX_FILE_NAME: &str = ".index.json";

/// The directory holding homes whose UID shards to `uid`.
pub fn shard_dir(root: &Path, uid: &str) -> Option<PathBuf> {
    let (first, second) = shard_segments(uid)?;
    Some(root.join(first).join(second))
}

/// Where an entry currently lives.
///
/// Entries are created under temporary names and renamed into place at
/// commit. Everything below a renamed directory resolves its path through
/// the parent chain, so it follows the rename automatically.
pub(crate) struct EntryPath {
    parent: ParentPath,
    name: RwLock<String>,
}

enum ParentPath {
    Fixed(PathBuf),
    Entry(Arc<EntryPath>),
}

impl EntryPath {
    pub(crate) fn fixed(parent: PathBuf, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            parent: ParentPath::Fixed(parent),
            name: RwLock::new(name.into()),
        })
    }

    pub(crate) fn child_of(parent: &Arc<EntryPath>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            parent: ParentPath::Entry(Arc::clone(parent)),
            name: RwLock::new(name.into()),
        })
    }

    /// The on-disk name, which may still be a temporary one.
    pub(crate) fn name(&self) -> String {
        self.name
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_name(&self, name: impl Into<String>) {
        *self
            .name
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = name.into();
    }

    pub(crate) fn parent_dir(&self) -> PathBuf {
        match &self.parent {
            ParentPath::Fixed(path) => path.clone(),
            ParentPath::Entry(entry) => entry.path(),
        }
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.parent_dir().join(self.name())
    }

    /// Property side file of a directory entry.
    pub(crate) fn directory_properties(&self) -> PathBuf {
        self.path().join(directory_properties_name())
    }

    /// Property side file of a file entry.
    pub(crate) fn resource_properties(&self) -> PathBuf {
        self.parent_dir().join(resource_properties_name(&self.name()))
    }
}

impl std::fmt::Debug for EntryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntryPath").field(&self.path()).finish()
    }
}

/// Create a directory, treating "already exists" as success.
pub(crate) fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {
            debug!(path = %path.display(), "created directory");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating "not found" as success.
pub(crate) fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Visible (non-hidden) entries of `dir`, sorted. Only directories when
/// `directories` is set, otherwise only files. A missing `dir` is empty.
pub(crate) fn visible_entries(dir: &Path, directories: bool) -> io::Result<Vec<String>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in read {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if is_hidden(&name) {
            continue;
        }
        if entry.file_type()?.is_dir() == directories {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Move every entry of `from` into `into`, then remove `from`.
///
/// Entries that already exist in `into` are kept and ours are dropped, so
/// two concurrent creators converge on whichever got there first.
pub(crate) fn merge_dir_into(from: &Path, into: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = into.join(entry.file_name());
        if target.exists() {
            debug!(entry = %target.display(), "keeping existing entry");
            continue;
        }
        fs::rename(entry.path(), &target)?;
    }
    fs::remove_dir_all(from)
}
