use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use davstore_props::{FilePropertyStore, PropertyStore};
use davstore_txn::{StagedAction, Undo};
use davstore_types::names::temporary_name;
use davstore_types::{
    is_hidden, validate_name, well_known, ChangeToken, Component, ComponentKind, PropertyValue,
};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::config::StoreKind;
use crate::home::{validate_child_name, Home, HomeInner};
use crate::index::ResourceIndex;
use crate::layout::{remove_dir_if_exists, remove_file_if_exists, visible_entries, EntryPath};
use crate::lock;
use crate::object::ObjectResource;
use crate::overlay::{Lookup, Overlay};
use crate::properties::LazyProperties;
use crate::transaction::Staging;

/// What a collection is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildRole {
    /// Holds components of the store's kind.
    Data,
    /// The home's notification collection; clients never store into it.
    Notification,
}

impl ChildRole {
    fn resource_type(self, kind: StoreKind) -> PropertyValue {
        match self {
            Self::Data => kind.resource_type(),
            Self::Notification => well_known::notification_resource_type(),
        }
    }
}

/// Collection state shared between a [`HomeChild`] and its resources.
pub(crate) struct Collection {
    pub(crate) staging: Arc<Staging>,
    /// Where the directory is now; may be a temporary name.
    pub(crate) location: Arc<EntryPath>,
    /// The name clients see. Differs from `location` until a pending
    /// creation or rename is finalized.
    name: Mutex<String>,
    /// A provisioned collection that loses a creation race adopts the winner.
    provisioned: bool,
    role: ChildRole,
    pub(crate) index: ResourceIndex,
    properties: LazyProperties,
}

impl Collection {
    pub(crate) fn name(&self) -> String {
        lock(&self.name).clone()
    }

    pub(crate) fn kind(&self) -> ComponentKind {
        self.staging.config().kind.component_kind()
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.location.path()
    }

    fn is_pending(&self) -> bool {
        self.location.name() != self.name()
    }

    pub(crate) fn check_kind(&self, component: &Component) -> StoreResult<()> {
        if self.role == ChildRole::Notification {
            return Err(StoreError::InvalidComponent(format!(
                "{} cannot be stored in the notification collection",
                component.kind()
            )));
        }
        if component.kind() != self.kind() {
            return Err(StoreError::InvalidComponent(format!(
                "{} cannot be stored in a {} collection",
                component.kind(),
                self.kind()
            )));
        }
        Ok(())
    }

    pub(crate) fn properties(&self) -> StoreResult<Arc<FilePropertyStore>> {
        let location = Arc::clone(&self.location);
        self.properties.open(
            &self.staging,
            &format!("collection {}", self.name()),
            move || location.directory_properties(),
        )
    }

    pub(crate) fn sync_token(&self) -> StoreResult<Option<ChangeToken>> {
        let props = self.properties()?;
        match props.get_optional(&well_known::ctag())? {
            Some(value) => Ok(Some(value.as_str().parse()?)),
            None => Ok(None),
        }
    }

    /// Advance the change token and persist it immediately.
    pub(crate) fn update_sync_token(&self, reset: bool) -> StoreResult<u64> {
        self.staging.ensure_open()?;
        let props = self.properties()?;
        let ctag = well_known::ctag();
        let current = if reset {
            None
        } else {
            match props.get_optional(&ctag)? {
                Some(value) => match value.as_str().parse::<ChangeToken>() {
                    Ok(token) => Some(token),
                    Err(e) => {
                        warn!(collection = %self.name(), error = %e, "unreadable change token; starting a new one");
                        None
                    }
                },
                None => None,
            }
        };
        let token = current.map_or_else(ChangeToken::fresh, |t| t.next());
        // Written through on its own; the rest of the buffer waits for commit.
        props.persist(ctag, PropertyValue::new(token.to_string()))?;
        debug!(collection = %self.name(), token = %token, "updated change token");
        Ok(token.revision())
    }

    /// Rename the directory to the client-visible name. Returns the on-disk
    /// name it had before, or `None` if nothing had to move.
    fn move_into_place(&self) -> StoreResult<Option<String>> {
        let target_name = self.name();
        let previous = self.location.name();
        if previous == target_name {
            return Ok(None);
        }
        let current = self.location.path();
        let target = self.location.parent_dir().join(&target_name);
        if target.exists() {
            if !(self.provisioned && is_hidden(&previous)) {
                return Err(StoreError::NameAlreadyExists(target_name));
            }
            warn!(collection = %target_name, "collection provisioned concurrently; adopting existing one");
            self.properties.discard()?;
            remove_dir_if_exists(&current)?;
            self.location.set_name(target_name);
            return Ok(None);
        }
        fs::rename(&current, &target)?;
        self.location.set_name(target_name.as_str());
        self.properties.flush()?;
        debug!(collection = %target_name, "moved collection into place");
        Ok(Some(previous))
    }
}

/// A named collection of object resources inside a [`Home`].
///
/// `HomeChild` is a cheap handle; clones share state.
#[derive(Clone)]
pub struct HomeChild {
    inner: Arc<ChildInner>,
}

struct ChildInner {
    collection: Arc<Collection>,
    home: Weak<HomeInner>,
    home_uid: String,
    objects: Mutex<Overlay<ObjectResource>>,
}

impl HomeChild {
    fn from_collection(collection: Collection, home: Weak<HomeInner>, home_uid: &str) -> Self {
        Self {
            inner: Arc::new(ChildInner {
                collection: Arc::new(collection),
                home,
                home_uid: home_uid.to_string(),
                objects: Mutex::new(Overlay::new()),
            }),
        }
    }

    /// A collection already on disk.
    pub(crate) fn load(
        staging: Arc<Staging>,
        home_location: &Arc<EntryPath>,
        home: Weak<HomeInner>,
        home_uid: &str,
        name: &str,
        role: ChildRole,
    ) -> Self {
        let location = EntryPath::child_of(home_location, name);
        let collection = Collection {
            staging,
            index: ResourceIndex::open(Arc::clone(&location)),
            location,
            name: Mutex::new(name.to_string()),
            provisioned: false,
            role,
            properties: LazyProperties::new(),
        };
        Self::from_collection(collection, home, home_uid)
    }

    /// Create the collection under a temporary name and stage the rename
    /// into place.
    pub(crate) fn create(
        staging: &Arc<Staging>,
        home_location: &Arc<EntryPath>,
        home: Weak<HomeInner>,
        home_uid: &str,
        name: &str,
        provisioned: bool,
        role: ChildRole,
    ) -> StoreResult<Self> {
        let location = EntryPath::child_of(home_location, temporary_name(name));
        fs::create_dir(location.path())?;
        let index = match ResourceIndex::create(Arc::clone(&location)) {
            Ok(index) => index,
            Err(e) => {
                remove_dir_if_exists(&location.path())?;
                return Err(e);
            }
        };
        let collection = Collection {
            staging: Arc::clone(staging),
            location: Arc::clone(&location),
            name: Mutex::new(name.to_string()),
            provisioned,
            role,
            index,
            properties: LazyProperties::new(),
        };
        let child = Self::from_collection(collection, home, home_uid);

        let finalizing = Arc::clone(&child.inner.collection);
        let cleanup = Arc::clone(&location);
        let action = StagedAction::<StoreError>::deferred(format!("finalize collection {name}"), move |_| {
            if finalizing.move_into_place()?.is_none() {
                return Ok(None);
            }
            let created = Arc::clone(&finalizing.location);
            Ok(Some(Box::new(move || remove_dir_if_exists(&created.path())) as Undo))
        })
        .with_undo(move || remove_dir_if_exists(&cleanup.path()));
        staging.stage(action)?;

        let resource_type = role.resource_type(staging.config().kind);
        child
            .properties()?
            .set(well_known::resource_type(), resource_type)?;
        debug!(home = home_uid, collection = name, "created collection");
        Ok(child)
    }

    fn collection(&self) -> &Arc<Collection> {
        &self.inner.collection
    }

    fn staging(&self) -> &Staging {
        &self.inner.collection.staging
    }

    pub fn name(&self) -> String {
        self.collection().name()
    }

    /// UID of the owning home.
    pub fn home_uid(&self) -> &str {
        &self.inner.home_uid
    }

    /// Current directory (a temporary one until a pending creation commits).
    pub fn path(&self) -> PathBuf {
        self.collection().path()
    }

    pub fn role(&self) -> ChildRole {
        self.collection().role
    }

    /// The component kind this collection accepts.
    pub fn component_kind(&self) -> ComponentKind {
        self.collection().kind()
    }

    pub fn index(&self) -> &ResourceIndex {
        &self.collection().index
    }

    pub fn properties(&self) -> StoreResult<Arc<FilePropertyStore>> {
        self.collection().properties()
    }

    pub(crate) fn discard_properties(&self) -> StoreResult<()> {
        self.collection().properties.discard()
    }

    /// The current change token, if one has been minted.
    pub fn sync_token(&self) -> StoreResult<Option<ChangeToken>> {
        self.collection().sync_token()
    }

    /// Advance the change token and return the new revision.
    ///
    /// The first call (or any call with `reset`) starts a new lineage at
    /// revision 1. The token is written through at once, not at commit.
    pub fn update_sync_token(&self, reset: bool) -> StoreResult<u64> {
        self.collection().update_sync_token(reset)
    }

    /// Names of the visible resources, sorted.
    pub fn list_object_resources(&self) -> StoreResult<Vec<String>> {
        let on_disk = visible_entries(&self.path(), false)?;
        Ok(lock(&self.inner.objects).visible_names(on_disk))
    }

    /// The visible resources, sorted by name.
    pub fn object_resources(&self) -> StoreResult<Vec<ObjectResource>> {
        let mut resources = Vec::new();
        for name in self.list_object_resources()? {
            if let Some(resource) = self.object_resource_with_name(&name)? {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    pub fn object_resource_with_name(&self, name: &str) -> StoreResult<Option<ObjectResource>> {
        if is_hidden(name) || validate_name(name).is_err() {
            return Ok(None);
        }
        let mut objects = lock(&self.inner.objects);
        match objects.lookup(name) {
            Lookup::Found(resource) => return Ok(Some(resource)),
            Lookup::Removed => return Ok(None),
            Lookup::Unknown => {}
        }
        if !self.path().join(name).is_file() {
            return Ok(None);
        }
        let resource = ObjectResource::load(Arc::clone(self.collection()), name);
        objects.cache(name, resource.clone());
        Ok(Some(resource))
    }

    /// Find the resource whose component has `uid`.
    ///
    /// Parses resources one by one unless the store is configured to go
    /// through the index first.
    pub fn object_resource_with_uid(&self, uid: &str) -> StoreResult<Option<ObjectResource>> {
        if self.staging().config().use_index_for_uid_lookup {
            self.object_resource_with_uid_indexed(uid)
        } else {
            self.scan_for_uid(uid)
        }
    }

    /// UID lookup through the index. A missing or stale index entry falls
    /// back to a scan.
    pub fn object_resource_with_uid_indexed(
        &self,
        uid: &str,
    ) -> StoreResult<Option<ObjectResource>> {
        if let Some(name) = self.index().name_for_uid(uid)? {
            if let Some(resource) = self.object_resource_with_name(&name)? {
                if resource.uid()? == uid {
                    return Ok(Some(resource));
                }
            }
            debug!(collection = %self.name(), uid, resource = %name, "stale index entry");
        }
        self.scan_for_uid(uid)
    }

    fn scan_for_uid(&self, uid: &str) -> StoreResult<Option<ObjectResource>> {
        for resource in self.object_resources()? {
            if resource.uid()? == uid {
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    /// Store a new resource. The content is written at once; abort deletes
    /// it again.
    pub fn create_object_resource_with_name(
        &self,
        name: &str,
        component: &Component,
    ) -> StoreResult<ObjectResource> {
        self.staging().ensure_open()?;
        validate_name(name)?;
        if self.object_resource_with_name(name)?.is_some() {
            return Err(StoreError::NameAlreadyExists(name.to_string()));
        }
        self.collection().check_kind(component)?;

        let resource = ObjectResource::load(Arc::clone(self.collection()), name);
        resource.write_component(component)?;
        lock(&self.inner.objects).insert_created(name, resource.clone());
        debug!(collection = %self.name(), resource = name, uid = component.uid(), "created resource");
        Ok(resource)
    }

    /// Remove a resource. It disappears from this transaction at once and
    /// from disk at commit; the deletion itself cannot be undone.
    pub fn remove_object_resource_with_name(&self, name: &str) -> StoreResult<()> {
        self.staging().ensure_open()?;
        let resource = self
            .object_resource_with_name(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if let Some(uid) = self.index().uid_for_name(name)? {
            self.index().delete_resource(name)?;
            let collection = Arc::clone(self.collection());
            let indexed = name.to_string();
            self.staging()
                .record_undo(format!("unindex resource {name}"), move || {
                    collection
                        .index
                        .add_resource(&indexed, &uid)
                        .map_err(|e| io::Error::other(e.to_string()))
                })?;
        }
        lock(&self.inner.objects).mark_removed(name);
        resource.discard_properties()?;
        self.update_sync_token(false)?;

        let location = resource.location();
        let child = Arc::downgrade(&self.inner);
        let name = name.to_string();
        self.staging()
            .add_operation(format!("delete resource {name}"), move |_| {
                // Created again later in this transaction: keep the new content.
                let recreated = child
                    .upgrade()
                    .is_some_and(|c| lock(&c.objects).is_created(&name));
                if recreated {
                    return Ok(None);
                }
                remove_file_if_exists(&location.path())?;
                remove_file_if_exists(&location.resource_properties())?;
                Ok(None)
            })
    }

    pub fn remove_object_resource_with_uid(&self, uid: &str) -> StoreResult<()> {
        let resource = self
            .object_resource_with_uid(uid)?
            .ok_or_else(|| StoreError::NotFound(uid.to_string()))?;
        self.remove_object_resource_with_name(&resource.name())
    }

    /// Give the collection a new name. The rename is visible at once and
    /// applied on disk at commit.
    pub fn rename(&self, new_name: &str) -> StoreResult<()> {
        self.staging().ensure_open()?;
        let old_name = self.name();
        if self.role() == ChildRole::Notification {
            return Err(StoreError::NameNotAllowed {
                name: old_name,
                reason: "the notification collection keeps its name".into(),
            });
        }
        validate_child_name(new_name)?;
        if old_name == new_name {
            return Ok(());
        }
        let home = self
            .inner
            .home
            .upgrade()
            .map(Home::from_inner)
            .ok_or_else(|| StoreError::InternalInconsistency("collection outlived its home".into()))?;
        if home.child_with_name(new_name)?.is_some() {
            return Err(StoreError::NameAlreadyExists(new_name.to_string()));
        }

        self.update_sync_token(false)?;
        // A creation or rename already staged picks up the new name when it runs.
        let needs_move = !self.collection().is_pending();
        *lock(&self.collection().name) = new_name.to_string();
        home.child_renamed(&old_name, new_name, self.clone());

        if needs_move {
            let collection = Arc::clone(self.collection());
            self.staging().add_operation(
                format!("rename collection {old_name} to {new_name}"),
                move |_| {
                    let Some(previous) = collection.move_into_place()? else {
                        return Ok(None);
                    };
                    let location = Arc::clone(&collection.location);
                    Ok(Some(Box::new(move || {
                        let back = location.parent_dir().join(&previous);
                        fs::rename(location.path(), back)?;
                        location.set_name(previous);
                        Ok(())
                    }) as Undo))
                },
            )?;
        }
        debug!(home = %self.home_uid(), from = %old_name, to = new_name, "renamed collection");
        Ok(())
    }

    /// Bytes used by the visible resources.
    pub fn quota_used_bytes(&self) -> StoreResult<u64> {
        let mut total = 0u64;
        for resource in self.object_resources()? {
            total += resource.size()?;
        }
        Ok(total)
    }
}

impl std::fmt::Debug for HomeChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeChild")
            .field("home", &self.inner.home_uid)
            .field("name", &self.name())
            .field("path", &self.path())
            .finish()
    }
}
