use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use davstore_props::{FilePropertyStore, PropertyStore};
use davstore_txn::{StagedAction, Undo};
use davstore_types::names::{temporary_name, trash_name, NOTIFICATION_COLLECTION};
use davstore_types::{is_hidden, is_reserved_child_name, validate_name, well_known};
use tracing::{debug, info, warn};

use crate::child::{ChildRole, HomeChild};
use crate::config::StoreKind;
use crate::error::{StoreError, StoreResult};
use crate::layout::{ensure_dir, merge_dir_into, remove_dir_if_exists, visible_entries, EntryPath};
use crate::lock;
use crate::overlay::{Lookup, Overlay};
use crate::properties::LazyProperties;
use crate::transaction::Staging;

/// The root of one principal's data: a set of collections plus the home's
/// own properties.
///
/// `Home` is a cheap handle; clones share state. It is only usable through
/// the transaction that produced it.
#[derive(Clone)]
pub struct Home {
    inner: Arc<HomeInner>,
}

pub(crate) struct HomeInner {
    uid: String,
    staging: Arc<Staging>,
    location: Arc<EntryPath>,
    children: Mutex<Overlay<HomeChild>>,
    notifications: Mutex<Option<HomeChild>>,
    properties: LazyProperties,
}

impl Home {
    fn from_parts(staging: Arc<Staging>, location: Arc<EntryPath>, uid: &str) -> Self {
        Self {
            inner: Arc::new(HomeInner {
                uid: uid.to_string(),
                staging,
                location,
                children: Mutex::new(Overlay::new()),
                notifications: Mutex::new(None),
                properties: LazyProperties::new(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HomeInner>) -> Self {
        Self { inner }
    }

    /// A home whose directory already exists in `shard`.
    pub(crate) fn load(staging: Arc<Staging>, shard: PathBuf, uid: &str) -> Self {
        Self::from_parts(staging, EntryPath::fixed(shard, uid), uid)
    }

    /// Build a new home under a temporary name in `shard` and stage the
    /// rename into place.
    pub(crate) fn create(staging: &Arc<Staging>, shard: PathBuf, uid: &str) -> StoreResult<Self> {
        fs::create_dir_all(&staging.config().root)?;
        if let Some(outer) = shard.parent() {
            ensure_dir(outer)?;
        }
        ensure_dir(&shard)?;

        let location = EntryPath::fixed(shard.clone(), temporary_name(uid));
        fs::create_dir(location.path())?;
        debug!(uid, path = %location.path().display(), "created temporary home");

        let final_path = shard.join(uid);
        let finalizing = Arc::clone(&location);
        let cleanup = Arc::clone(&location);
        let owner = uid.to_string();
        let action = StagedAction::<StoreError>::deferred(format!("finalize home {uid}"), move |_| {
            let temporary = finalizing.path();
            if final_path.is_dir() {
                converge(&owner, &temporary, &final_path)?;
            } else if let Err(e) = fs::rename(&temporary, &final_path) {
                if !final_path.is_dir() {
                    return Err(e.into());
                }
                converge(&owner, &temporary, &final_path)?;
            }
            finalizing.set_name(owner.as_str());
            info!(uid = %owner, "home created");
            Ok(None)
        })
        .with_undo(move || remove_dir_if_exists(&cleanup.path()));
        staging.stage(action)?;

        Ok(Self::from_parts(Arc::clone(staging), location, uid))
    }

    /// Create the configured default collections in a new home, plus the
    /// notification collection of a calendar home.
    pub(crate) fn provision(&self) -> StoreResult<()> {
        let config = self.inner.staging.config();
        for (position, name) in config.default_children.iter().enumerate() {
            let child = self.create_child(name, true)?;
            if position == 0 && config.kind == StoreKind::Calendar {
                child.properties()?.set(
                    well_known::schedule_calendar_transp(),
                    well_known::opaque_transparency(),
                )?;
            }
        }
        if config.kind == StoreKind::Calendar {
            self.notification_child(true)?;
        }
        info!(uid = %self.inner.uid, children = config.default_children.len(), "provisioned home");
        Ok(())
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    /// Current directory of the home (a temporary one until commit).
    pub fn path(&self) -> PathBuf {
        self.inner.location.path()
    }

    /// Names of the visible collections, sorted.
    pub fn list_children(&self) -> StoreResult<Vec<String>> {
        let on_disk = visible_entries(&self.path(), true)?;
        let mut names = lock(&self.inner.children).visible_names(on_disk);
        names.retain(|name| !is_reserved_child_name(name));
        Ok(names)
    }

    /// The visible collections, sorted by name.
    pub fn children(&self) -> StoreResult<Vec<HomeChild>> {
        let mut children = Vec::new();
        for name in self.list_children()? {
            if let Some(child) = self.child_with_name(&name)? {
                children.push(child);
            }
        }
        Ok(children)
    }

    pub fn child_with_name(&self, name: &str) -> StoreResult<Option<HomeChild>> {
        if is_hidden(name) || is_reserved_child_name(name) || validate_name(name).is_err() {
            return Ok(None);
        }
        let mut children = lock(&self.inner.children);
        match children.lookup(name) {
            Lookup::Found(child) => return Ok(Some(child)),
            Lookup::Removed => return Ok(None),
            Lookup::Unknown => {}
        }
        if !self.path().join(name).is_dir() {
            return Ok(None);
        }
        let child = HomeChild::load(
            Arc::clone(&self.inner.staging),
            &self.inner.location,
            Arc::downgrade(&self.inner),
            &self.inner.uid,
            name,
            ChildRole::Data,
        );
        children.cache(name, child.clone());
        Ok(Some(child))
    }

    /// Create a collection. It is visible in this transaction at once and on
    /// disk after commit.
    pub fn create_child_with_name(&self, name: &str) -> StoreResult<HomeChild> {
        self.create_child(name, false)
    }

    fn create_child(&self, name: &str, provisioned: bool) -> StoreResult<HomeChild> {
        self.inner.staging.ensure_open()?;
        validate_child_name(name)?;
        if self.child_with_name(name)?.is_some() {
            return Err(StoreError::NameAlreadyExists(name.to_string()));
        }
        let child = HomeChild::create(
            &self.inner.staging,
            &self.inner.location,
            Arc::downgrade(&self.inner),
            &self.inner.uid,
            name,
            provisioned,
            ChildRole::Data,
        )?;
        lock(&self.inner.children).insert_created(name, child.clone());
        Ok(child)
    }

    /// The home's notification collection, created on first use.
    ///
    /// It sits beside the ordinary collections but is never listed or
    /// returned by [`child_with_name`](Self::child_with_name). Creation is
    /// staged like any collection's; if another transaction created it
    /// first, commit fails with [`StoreError::NameAlreadyExists`].
    pub fn notifications(&self) -> StoreResult<HomeChild> {
        self.notification_child(false)
    }

    /// A provisioned notification collection adopts one created concurrently
    /// with its home instead of failing.
    fn notification_child(&self, provisioned: bool) -> StoreResult<HomeChild> {
        let mut slot = lock(&self.inner.notifications);
        if let Some(child) = slot.as_ref() {
            return Ok(child.clone());
        }
        let child = if self.path().join(NOTIFICATION_COLLECTION).is_dir() {
            HomeChild::load(
                Arc::clone(&self.inner.staging),
                &self.inner.location,
                Arc::downgrade(&self.inner),
                &self.inner.uid,
                NOTIFICATION_COLLECTION,
                ChildRole::Notification,
            )
        } else {
            self.inner.staging.ensure_open()?;
            HomeChild::create(
                &self.inner.staging,
                &self.inner.location,
                Arc::downgrade(&self.inner),
                &self.inner.uid,
                NOTIFICATION_COLLECTION,
                provisioned,
                ChildRole::Notification,
            )?
        };
        *slot = Some(child.clone());
        Ok(child)
    }

    /// Remove a collection. It disappears from this transaction at once; at
    /// commit it is moved to a trash name and then deleted.
    pub fn remove_child_with_name(&self, name: &str) -> StoreResult<()> {
        let staging = &self.inner.staging;
        staging.ensure_open()?;
        let not_found = || StoreError::NotFound(name.to_string());
        if is_hidden(name) {
            return Err(not_found());
        }
        let child = self.child_with_name(name)?.ok_or_else(not_found)?;
        child.discard_properties()?;
        lock(&self.inner.children).mark_removed(name);

        let home = Arc::clone(&self.inner.location);
        let candidates = staging.config().trash_candidates;
        let name = name.to_string();
        staging.add_operation(format!("remove collection {name}"), move |followups| {
            let home_dir = home.path();
            let source = home_dir.join(&name);
            let trash = (0..candidates)
                .map(|attempt| home_dir.join(trash_name(&name, attempt)))
                .find(|candidate| !candidate.exists())
                .ok_or_else(|| {
                    StoreError::InternalInconsistency(format!(
                        "no free trash name for {name} after {candidates} attempts"
                    ))
                })?;
            fs::rename(&source, &trash)?;
            debug!(collection = %name, trash = %trash.display(), "moved collection to trash");

            let doomed = trash.clone();
            followups.add_operation(format!("delete trash of {name}"), move |_| {
                if let Err(e) = fs::remove_dir_all(&doomed) {
                    warn!(trash = %doomed.display(), error = %e, "failed to delete trash");
                }
                Ok(None)
            });
            Ok(Some(Box::new(move || fs::rename(&trash, &source)) as Undo))
        })
    }

    /// Record that a collection now answers to `new` instead of `old`.
    pub(crate) fn child_renamed(&self, old: &str, new: &str, child: HomeChild) {
        let mut children = lock(&self.inner.children);
        children.mark_removed(old);
        children.insert_created(new, child);
    }

    /// Dead properties of the home itself.
    pub fn properties(&self) -> StoreResult<Arc<FilePropertyStore>> {
        let location = Arc::clone(&self.inner.location);
        self.inner.properties.open(
            &self.inner.staging,
            &format!("home {}", self.inner.uid),
            move || location.directory_properties(),
        )
    }

    /// Bytes used by all resources in all visible collections.
    pub fn quota_used_bytes(&self) -> StoreResult<u64> {
        let mut total = 0u64;
        for child in self.children()? {
            total += child.quota_used_bytes()?;
        }
        Ok(total)
    }
}

/// Check a client-chosen collection name.
pub(crate) fn validate_child_name(name: &str) -> StoreResult<()> {
    validate_name(name)?;
    if is_reserved_child_name(name) {
        return Err(StoreError::NameNotAllowed {
            name: name.to_string(),
            reason: "reserved for the store".into(),
        });
    }
    Ok(())
}

/// Another creator finished first: fold our temporary home into theirs.
fn converge(uid: &str, temporary: &Path, existing: &Path) -> StoreResult<()> {
    warn!(uid, "home was created concurrently; merging into existing directory");
    merge_dir_into(temporary, existing)
        .map_err(|e| StoreError::inconsistency(format!("merging home {uid}"), e))
}

impl std::fmt::Debug for Home {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Home")
            .field("uid", &self.inner.uid)
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::DataStore;

    fn bare_store(dir: &tempfile::TempDir) -> DataStore {
        let mut config = StoreConfig::for_root(dir.path().join("store"), StoreKind::Calendar);
        config.default_children.clear();
        DataStore::new(config)
    }

    fn committed_home(store: &DataStore, children: &[&str]) {
        let txn = store.new_transaction("setup");
        let home = txn.home_with_uid("home1", true).unwrap().unwrap();
        for name in children {
            home.create_child_with_name(name).unwrap();
        }
        txn.commit().unwrap();
    }

    // ---- Test 1: Created children are visible before commit ----
    #[test]
    fn read_your_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        let txn = store.new_transaction("create");
        let home = txn.home_with_uid("home1", true).unwrap().unwrap();
        let child = home.create_child_with_name("calendar_1").unwrap();
        assert_eq!(child.name(), "calendar_1");

        let found = home.child_with_name("calendar_1").unwrap().unwrap();
        assert_eq!(found.name(), "calendar_1");
        assert_eq!(home.list_children().unwrap(), vec!["calendar_1"]);
        assert_eq!(home.children().unwrap().len(), 1);
        txn.commit().unwrap();

        assert!(dir.path().join("store/ho/me/home1/calendar_1").is_dir());
    }

    // ---- Test 2: Name checks ----
    #[test]
    fn create_rejects_hidden_and_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["calendar"]);

        let txn = store.new_transaction("names");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        assert!(matches!(
            home.create_child_with_name(".hidden"),
            Err(StoreError::NameNotAllowed { .. })
        ));
        assert!(matches!(
            home.create_child_with_name("calendar"),
            Err(StoreError::NameAlreadyExists(_))
        ));
        home.create_child_with_name("other").unwrap();
        assert!(matches!(
            home.create_child_with_name("other"),
            Err(StoreError::NameAlreadyExists(_))
        ));
        txn.abort().unwrap();
    }

    // ---- Test 3: Hidden entries are never visible ----
    #[test]
    fn hidden_directories_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["calendar"]);
        fs::create_dir(dir.path().join("store/ho/me/home1/.secret")).unwrap();

        let txn = store.new_transaction("hidden");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        assert_eq!(home.list_children().unwrap(), vec!["calendar"]);
        assert!(home.child_with_name(".secret").unwrap().is_none());
        assert!(matches!(
            home.remove_child_with_name(".secret"),
            Err(StoreError::NotFound(_))
        ));
        txn.commit().unwrap();
    }

    // ---- Test 4: Removal hides a child at once ----
    #[test]
    fn removal_is_immediate_and_committed_via_trash() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["calendar", "tasks"]);
        let home_dir = dir.path().join("store/ho/me/home1");

        let txn = store.new_transaction("remove");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        home.remove_child_with_name("calendar").unwrap();
        assert!(home.child_with_name("calendar").unwrap().is_none());
        assert_eq!(home.list_children().unwrap(), vec!["tasks"]);
        assert!(matches!(
            home.remove_child_with_name("calendar"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            home.remove_child_with_name("missing"),
            Err(StoreError::NotFound(_))
        ));
        // Still on disk until commit.
        assert!(home_dir.join("calendar").is_dir());

        txn.commit().unwrap();
        let left: Vec<String> = fs::read_dir(&home_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with(".properties"))
            .collect();
        assert_eq!(left, vec!["tasks"]);
    }

    // ---- Test 5: Aborted removal keeps the child ----
    #[test]
    fn aborted_removal_keeps_child() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["calendar"]);

        let txn = store.new_transaction("remove");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        home.remove_child_with_name("calendar").unwrap();
        txn.abort().unwrap();

        let txn = store.new_transaction("check");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        assert!(home.child_with_name("calendar").unwrap().is_some());
        txn.commit().unwrap();
    }

    // ---- Test 6: Trash names skip occupied slots ----
    #[test]
    fn trash_name_collisions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["calendar"]);
        let home_dir = dir.path().join("store/ho/me/home1");
        fs::create_dir(home_dir.join("._del_calendar_0")).unwrap();

        let txn = store.new_transaction("remove");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        home.remove_child_with_name("calendar").unwrap();
        txn.commit().unwrap();

        assert!(!home_dir.join("calendar").exists());
        assert!(home_dir.join("._del_calendar_0").exists());
        assert!(!home_dir.join("._del_calendar_1").exists());
    }

    // ---- Test 7: Exhausted trash names abort the commit ----
    #[test]
    fn exhausted_trash_names_are_an_inconsistency() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::for_root(dir.path().join("store"), StoreKind::Calendar);
        config.default_children.clear();
        config.trash_candidates = 2;
        let store = DataStore::new(config);
        committed_home(&store, &["calendar"]);
        let home_dir = dir.path().join("store/ho/me/home1");
        fs::create_dir(home_dir.join("._del_calendar_0")).unwrap();
        fs::create_dir(home_dir.join("._del_calendar_1")).unwrap();

        let txn = store.new_transaction("remove");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        home.remove_child_with_name("calendar").unwrap();
        assert!(matches!(
            txn.commit(),
            Err(StoreError::InternalInconsistency(_))
        ));
        assert!(home_dir.join("calendar").is_dir());
    }

    // ---- Test 8: Aborted creation leaves no temporary directory ----
    #[test]
    fn aborted_child_creation_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &[]);
        let home_dir = dir.path().join("store/ho/me/home1");

        let txn = store.new_transaction("create");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        let child = home.create_child_with_name("calendar").unwrap();
        assert!(child.path().is_dir());
        assert!(is_hidden(&child.path().file_name().unwrap().to_string_lossy()));
        txn.abort().unwrap();

        let dirs: Vec<_> = fs::read_dir(&home_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .collect();
        assert!(dirs.is_empty(), "{dirs:?}");
    }

    // ---- Test 9: Home properties persist at commit ----
    #[test]
    fn home_properties_are_flushed_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        let name = davstore_types::PropertyName::new("DAV:", "displayname");

        let txn = store.new_transaction("props");
        let home = txn.home_with_uid("home1", true).unwrap().unwrap();
        home.properties().unwrap().set(name.clone(), "Alice".into()).unwrap();
        txn.commit().unwrap();
        assert!(dir
            .path()
            .join("store/ho/me/home1/.properties.json")
            .exists());

        let txn = store.new_transaction("read");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        assert_eq!(
            home.properties().unwrap().get(&name).unwrap().as_str(),
            "Alice"
        );
        txn.commit().unwrap();
    }

    // ---- Test 10: Remove and recreate within one transaction ----
    #[test]
    fn remove_then_create_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["calendar"]);

        let txn = store.new_transaction("replace");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        home.remove_child_with_name("calendar").unwrap();
        home.create_child_with_name("calendar").unwrap();
        txn.commit().unwrap();

        let txn = store.new_transaction("check");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        assert_eq!(home.list_children().unwrap(), vec!["calendar"]);
        txn.commit().unwrap();
    }

    // ---- Test 11: Calendar homes get a notification collection kept apart ----
    #[test]
    fn calendar_home_provisions_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["work"]);
        assert!(dir.path().join("store/ho/me/home1/notification").is_dir());

        let txn = store.new_transaction("check");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        assert_eq!(home.list_children().unwrap(), vec!["work"]);
        assert!(home.child_with_name("notification").unwrap().is_none());

        let notifications = home.notifications().unwrap();
        assert_eq!(notifications.name(), "notification");
        assert_eq!(notifications.role(), ChildRole::Notification);
        assert_eq!(
            notifications
                .properties()
                .unwrap()
                .get(&well_known::resource_type())
                .unwrap(),
            well_known::notification_resource_type()
        );
        assert_eq!(home.notifications().unwrap().path(), notifications.path());
        assert_eq!(
            home.child_with_name("work").unwrap().unwrap().role(),
            ChildRole::Data
        );
        txn.commit().unwrap();
    }

    // ---- Test 12: Reserved names and the notification collection's limits ----
    #[test]
    fn reserved_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        committed_home(&store, &["work"]);

        let txn = store.new_transaction("names");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        for name in ["notification", "dropbox", "freebusy"] {
            assert!(matches!(
                home.create_child_with_name(name),
                Err(StoreError::NameNotAllowed { .. })
            ));
        }
        let work = home.child_with_name("work").unwrap().unwrap();
        assert!(matches!(
            work.rename("dropbox"),
            Err(StoreError::NameNotAllowed { .. })
        ));

        let notifications = home.notifications().unwrap();
        assert!(matches!(
            notifications.rename("elsewhere"),
            Err(StoreError::NameNotAllowed { .. })
        ));
        let event = davstore_types::Component::parse(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:n1\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
        )
        .unwrap();
        assert!(matches!(
            notifications.create_object_resource_with_name("n1.ics", &event),
            Err(StoreError::InvalidComponent(_))
        ));
        assert!(matches!(
            home.remove_child_with_name("notification"),
            Err(StoreError::NotFound(_))
        ));
        txn.commit().unwrap();
        assert!(dir.path().join("store/ho/me/home1/notification").is_dir());
    }

    // ---- Test 13: Address book homes create notifications on demand ----
    #[test]
    fn address_book_notifications_are_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::for_root(dir.path().join("store"), StoreKind::AddressBook);
        config.default_children.clear();
        let store = DataStore::new(config);
        committed_home(&store, &[]);
        let notification_dir = dir.path().join("store/ho/me/home1/notification");
        assert!(!notification_dir.exists());

        let txn = store.new_transaction("notify");
        let notifications = txn.notifications_with_uid("home1").unwrap().unwrap();
        assert_eq!(notifications.role(), ChildRole::Notification);
        assert!(!notification_dir.exists());
        txn.commit().unwrap();
        assert!(notification_dir.is_dir());
        assert_eq!(notifications.path(), notification_dir);
    }

    // ---- Test 14: A notification collection created twice fails the later commit ----
    #[test]
    fn competing_notification_creation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::for_root(dir.path().join("store"), StoreKind::AddressBook);
        config.default_children.clear();
        let store = DataStore::new(config);
        committed_home(&store, &[]);

        let first = store.new_transaction("first");
        let second = store.new_transaction("second");
        first.notifications_with_uid("home1").unwrap().unwrap();
        second.notifications_with_uid("home1").unwrap().unwrap();
        first.commit().unwrap();
        assert!(matches!(
            second.commit(),
            Err(StoreError::NameAlreadyExists(name)) if name == "notification"
        ));
        assert!(dir.path().join("store/ho/me/home1/notification").is_dir());
    }
}
