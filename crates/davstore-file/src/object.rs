use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use davstore_props::{FilePropertyStore, PropertyStore};
use davstore_txn::StagedAction;
use davstore_types::names::backup_name;
use davstore_types::{well_known, Component, PropertyValue};
use tracing::debug;

use crate::child::Collection;
use crate::error::{StoreError, StoreResult};
use crate::layout::{remove_file_if_exists, write_atomic, EntryPath};
use crate::lock;
use crate::properties::LazyProperties;

/// One stored calendar object or contact.
///
/// `ObjectResource` is a cheap handle; clones share state, including the
/// parsed component once it has been read.
#[derive(Clone)]
pub struct ObjectResource {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    collection: Arc<Collection>,
    location: Arc<EntryPath>,
    component: Mutex<Option<Component>>,
    properties: LazyProperties,
}

impl ObjectResource {
    pub(crate) fn load(collection: Arc<Collection>, name: &str) -> Self {
        let location = EntryPath::child_of(&collection.location, name);
        Self {
            inner: Arc::new(ObjectInner {
                collection,
                location,
                component: Mutex::new(None),
                properties: LazyProperties::new(),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.location.name()
    }

    pub fn path(&self) -> PathBuf {
        self.inner.location.path()
    }

    pub(crate) fn location(&self) -> Arc<EntryPath> {
        Arc::clone(&self.inner.location)
    }

    /// The stored component, parsed on first use.
    ///
    /// Text stored with bare `\n` line endings is repaired. Anything that
    /// does not parse as this collection's kind is reported as an
    /// inconsistency.
    pub fn component(&self) -> StoreResult<Component> {
        let mut slot = lock(&self.inner.component);
        if let Some(component) = slot.as_ref() {
            return Ok(component.clone());
        }

        let path = self.path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.name()));
            }
            Err(e) => return Err(StoreError::inconsistency(path.display(), e)),
        };
        let component = Component::parse(&text).map_err(|e| {
            StoreError::InternalInconsistency(format!("corrupt resource {}: {e}", path.display()))
        })?;
        let expected = self.inner.collection.kind();
        if component.kind() != expected {
            return Err(StoreError::InternalInconsistency(format!(
                "{} holds {} instead of {expected}",
                path.display(),
                component.kind()
            )));
        }
        *slot = Some(component.clone());
        Ok(component)
    }

    pub fn text(&self) -> StoreResult<String> {
        Ok(self.component()?.text().to_string())
    }

    pub fn uid(&self) -> StoreResult<String> {
        Ok(self.component()?.uid().to_string())
    }

    /// Replace the stored component.
    ///
    /// The UID of a resource never changes. The previous content is kept in
    /// a hidden backup until commit, and restored on abort.
    pub fn set_component(&self, component: &Component) -> StoreResult<()> {
        let collection = &self.inner.collection;
        collection.staging.ensure_open()?;
        collection.check_kind(component)?;
        if self.path().exists() {
            let existing = self.uid()?;
            if existing != component.uid() {
                return Err(StoreError::IdentityMismatch {
                    name: self.name(),
                    existing,
                    proposed: component.uid().to_string(),
                });
            }
        }
        self.write_component(component)
    }

    /// Write content and record how to reverse it, then update the index,
    /// digest and change token.
    pub(crate) fn write_component(&self, component: &Component) -> StoreResult<()> {
        let collection = &self.inner.collection;
        let name = self.name();
        let path = self.path();

        if path.exists() {
            let backup = backup_name(&name);
            let backup_path = self.inner.location.parent_dir().join(&backup);
            fs::rename(&path, &backup_path)?;
            if let Err(e) = write_atomic(&path, component.text().as_bytes()) {
                fs::rename(&backup_path, &path)?;
                return Err(e.into());
            }

            let (discarding, restoring) = (self.location(), self.location());
            let (discard_name, restore_name) = (backup.clone(), backup);
            let action = StagedAction::<StoreError>::deferred(format!("discard backup of {name}"), move |_| {
                remove_file_if_exists(&discarding.parent_dir().join(&discard_name))?;
                Ok(None)
            })
            .with_undo(move || {
                fs::rename(restoring.parent_dir().join(&restore_name), restoring.path())
            });
            collection.staging.stage(action)?;
        } else {
            write_atomic(&path, component.text().as_bytes())?;
            let location = self.location();
            let owner = Arc::clone(collection);
            collection
                .staging
                .record_undo(format!("create resource {name}"), move || {
                    remove_file_if_exists(&location.path())?;
                    remove_file_if_exists(&location.resource_properties())?;
                    owner
                        .index
                        .delete_resource(&location.name())
                        .map_err(|e| io::Error::other(e.to_string()))
                })?;
        }

        *lock(&self.inner.component) = Some(component.clone());
        collection.index.add_resource(&name, component.uid())?;
        self.properties()?.set(
            well_known::content_digest(),
            PropertyValue::new(content_digest(component.text())),
        )?;
        collection.update_sync_token(false)?;
        debug!(resource = %name, uid = component.uid(), "wrote component");
        Ok(())
    }

    pub fn properties(&self) -> StoreResult<Arc<FilePropertyStore>> {
        let location = self.location();
        self.inner.properties.open(
            &self.inner.collection.staging,
            &format!("resource {}", self.name()),
            move || location.resource_properties(),
        )
    }

    pub(crate) fn discard_properties(&self) -> StoreResult<()> {
        self.inner.properties.discard()
    }

    /// Entity tag: the BLAKE3 digest of the stored text.
    pub fn etag(&self) -> StoreResult<String> {
        match self.properties()?.get_optional(&well_known::content_digest())? {
            Some(value) => Ok(value.into_string()),
            None => Ok(content_digest(&self.text()?)),
        }
    }

    pub fn content_type(&self) -> &'static str {
        self.inner.collection.kind().content_type()
    }

    /// Stored size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.metadata()?.len())
    }

    /// Creation time, or the modification time on filesystems that do not
    /// record one.
    pub fn created(&self) -> StoreResult<DateTime<Utc>> {
        let metadata = self.metadata()?;
        let time = metadata.created().or_else(|_| metadata.modified())?;
        Ok(time.into())
    }

    pub fn modified(&self) -> StoreResult<DateTime<Utc>> {
        Ok(self.metadata()?.modified()?.into())
    }

    fn metadata(&self) -> StoreResult<fs::Metadata> {
        fs::metadata(self.path()).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(self.name()),
            _ => StoreError::Io(e),
        })
    }
}

/// Hex BLAKE3 digest of stored text.
pub fn content_digest(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}

impl std::fmt::Debug for ObjectResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectResource")
            .field("name", &self.name())
            .field("path", &self.path())
            .finish()
    }
}
