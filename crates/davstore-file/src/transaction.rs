use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use davstore_txn::{Followups, OperationLog, StagedAction, TxnState, Undo};
use davstore_types::is_valid_uid;
use tracing::{debug, warn};

use crate::child::HomeChild;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::home::Home;
use crate::layout::shard_dir;
use crate::lock;

/// State shared by a transaction and every entity it hands out: the
/// operation log and the store configuration.
pub(crate) struct Staging {
    log: OperationLog<StoreError>,
    config: Arc<StoreConfig>,
}

impl Staging {
    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn label(&self) -> &str {
        self.log.label()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.log.is_open()
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        Ok(self.log.ensure_open()?)
    }

    pub(crate) fn stage(&self, action: StagedAction<StoreError>) -> StoreResult<()> {
        Ok(self.log.stage(action)?)
    }

    pub(crate) fn add_operation<F>(&self, label: impl Into<String>, forward: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Followups<StoreError>) -> StoreResult<Option<Undo>> + Send + 'static,
    {
        Ok(self.log.add_operation(label, forward)?)
    }

    pub(crate) fn record_undo<U>(&self, label: impl Into<String>, undo: U) -> StoreResult<()>
    where
        U: FnOnce() -> io::Result<()> + Send + 'static,
    {
        Ok(self.log.record_undo(label, undo)?)
    }
}

/// The unit of work against a [`DataStore`](crate::DataStore).
///
/// All reads and writes go through a transaction. Changes are applied to the
/// filesystem either eagerly (with an undo recorded) or at [`commit`]
/// (staged), and reads within the transaction observe both. Homes are
/// cached per transaction.
///
/// Dropping an open transaction aborts it.
///
/// [`commit`]: Transaction::commit
pub struct Transaction {
    staging: Arc<Staging>,
    homes: Mutex<HashMap<String, Home>>,
}

impl Transaction {
    pub(crate) fn new(config: Arc<StoreConfig>, label: String) -> Self {
        debug!(txn = %label, "transaction opened");
        Self {
            staging: Arc::new(Staging {
                log: OperationLog::new(label),
                config,
            }),
            homes: Mutex::new(HashMap::new()),
        }
    }

    pub fn label(&self) -> &str {
        self.staging.label()
    }

    pub fn state(&self) -> TxnState {
        self.staging.log.state()
    }

    pub fn config(&self) -> &StoreConfig {
        self.staging.config()
    }

    /// Resolve the home of principal `uid`, creating it when `create` is set.
    ///
    /// UIDs that are hidden or too short to shard never name a home. A new
    /// home is built under a hidden temporary name and moved into place at
    /// commit; if another creator finished first, the two converge on the
    /// existing directory.
    pub fn home_with_uid(&self, uid: &str, create: bool) -> StoreResult<Option<Home>> {
        if !is_valid_uid(uid) {
            return Ok(None);
        }
        if let Some(home) = lock(&self.homes).get(uid) {
            return Ok(Some(home.clone()));
        }
        let Some(shard) = shard_dir(&self.config().root, uid) else {
            return Ok(None);
        };

        let home = if shard.join(uid).is_dir() {
            Home::load(Arc::clone(&self.staging), shard, uid)
        } else if create {
            self.staging.ensure_open()?;
            let home = Home::create(&self.staging, shard, uid)?;
            // Cache before provisioning so a failure leaves a usable handle.
            lock(&self.homes).insert(uid.to_string(), home.clone());
            home.provision()?;
            home
        } else {
            return Ok(None);
        };

        lock(&self.homes).insert(uid.to_string(), home.clone());
        Ok(Some(home))
    }

    /// The notification collection of principal `uid`, creating the home
    /// and the collection as needed.
    pub fn notifications_with_uid(&self, uid: &str) -> StoreResult<Option<HomeChild>> {
        self.home_with_uid(uid, true)?
            .map(|home| home.notifications())
            .transpose()
    }

    /// Stage a step to run at commit. `label` is only used in logs.
    pub fn add_operation<F>(&self, label: impl Into<String>, forward: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Followups<StoreError>) -> StoreResult<Option<Undo>> + Send + 'static,
    {
        self.staging.add_operation(label, forward)
    }

    /// Record how to reverse a change already made.
    pub fn record_undo<U>(&self, label: impl Into<String>, undo: U) -> StoreResult<()>
    where
        U: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.staging.record_undo(label, undo)
    }

    /// Run every staged step in order.
    ///
    /// On failure everything done so far is rolled back, the transaction
    /// ends up aborted, and the error is returned.
    pub fn commit(&self) -> StoreResult<()> {
        self.staging.log.commit()?;
        Ok(())
    }

    /// Reverse every eager change in reverse order. Staged steps never run.
    pub fn abort(&self) -> StoreResult<()> {
        self.staging.log.abort()?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.staging.is_open() {
            warn!(txn = %self.label(), "transaction dropped while open; aborting");
            if let Err(e) = self.staging.log.abort() {
                warn!(txn = %self.label(), error = %e, "abort on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("label", &self.label())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreKind;
    use crate::store::DataStore;
    use davstore_props::PropertyStore;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store(dir: &tempfile::TempDir) -> DataStore {
        DataStore::new(StoreConfig::for_root(dir.path().join("store"), StoreKind::Calendar))
    }

    fn bare_store(dir: &tempfile::TempDir) -> DataStore {
        let mut config = StoreConfig::for_root(dir.path().join("store"), StoreKind::Calendar);
        config.default_children.clear();
        DataStore::new(config)
    }

    // ---- Test 1: Bad UIDs never name a home ----
    #[test]
    fn short_and_hidden_uids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let txn = store(&dir).new_transaction("uids");
        for uid in ["", "a", "abc", ".abcd", "ab.cd", "a/bcd"] {
            assert!(txn.home_with_uid(uid, true).unwrap().is_none(), "{uid:?}");
            assert!(txn.home_with_uid(uid, false).unwrap().is_none(), "{uid:?}");
        }
        txn.commit().unwrap();
        assert!(!dir.path().join("store").exists());
    }

    // ---- Test 2: Lookup without create ----
    #[test]
    fn missing_home_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let txn = store(&dir).new_transaction("lookup");
        assert!(txn.home_with_uid("home1", false).unwrap().is_none());
        txn.abort().unwrap();
    }

    // ---- Test 3: Creation is staged until commit ----
    #[test]
    fn created_home_appears_at_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let final_path = dir.path().join("store/ho/me/home1");

        let txn = store.new_transaction("create");
        let home = txn.home_with_uid("home1", true).unwrap().unwrap();
        assert_eq!(home.uid(), "home1");
        assert!(!final_path.exists());
        // Same handle on the second lookup.
        let again = txn.home_with_uid("home1", true).unwrap().unwrap();
        assert_eq!(home.path(), again.path());

        txn.commit().unwrap();
        assert!(final_path.is_dir());
        assert_eq!(home.path(), final_path);
        assert_eq!(
            fs::read_dir(dir.path().join("store/ho/me")).unwrap().count(),
            1
        );
    }

    // ---- Test 4: Abort removes the temporary home ----
    #[test]
    fn aborted_home_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let txn = store.new_transaction("abort");
        txn.home_with_uid("home1", true).unwrap().unwrap();
        txn.abort().unwrap();

        let shard = dir.path().join("store/ho/me");
        assert_eq!(fs::read_dir(&shard).unwrap().count(), 0);
        let txn = store.new_transaction("check");
        assert!(txn.home_with_uid("home1", false).unwrap().is_none());
        txn.commit().unwrap();
    }

    // ---- Test 5: Concurrent creators converge on one directory ----
    #[test]
    fn concurrent_home_creation_converges() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let first = store.new_transaction("first");
        let second = store.new_transaction("second");
        let a = first.home_with_uid("home1", true).unwrap().unwrap();
        let b = second.home_with_uid("home1", true).unwrap().unwrap();
        a.create_child_with_name("only-in-first").unwrap();

        second.commit().unwrap();
        first.commit().unwrap();

        let shard = dir.path().join("store/ho/me");
        let entries: Vec<String> = fs::read_dir(&shard)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["home1"]);
        assert_eq!(a.path(), b.path());

        let check = store.new_transaction("check");
        let home = check.home_with_uid("home1", false).unwrap().unwrap();
        assert_eq!(
            home.list_children().unwrap(),
            vec!["calendar", "inbox", "only-in-first"]
        );
        check.commit().unwrap();
    }

    // ---- Test 6: New homes are provisioned ----
    #[test]
    fn new_home_gets_default_children() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let txn = store.new_transaction("provision");
        let home = txn.home_with_uid("home1", true).unwrap().unwrap();
        assert_eq!(home.list_children().unwrap(), vec!["calendar", "inbox"]);
        txn.commit().unwrap();

        let txn = store.new_transaction("check");
        let home = txn.home_with_uid("home1", false).unwrap().unwrap();
        let calendar = home.child_with_name("calendar").unwrap().unwrap();
        let transp = calendar
            .properties()
            .unwrap()
            .get_optional(&davstore_types::well_known::schedule_calendar_transp())
            .unwrap();
        assert_eq!(transp, Some(davstore_types::well_known::opaque_transparency()));
        let inbox = home.child_with_name("inbox").unwrap().unwrap();
        assert!(!inbox
            .properties()
            .unwrap()
            .contains(&davstore_types::well_known::schedule_calendar_transp())
            .unwrap());
        txn.commit().unwrap();
    }

    // ---- Test 7: Terminal transactions reject mutation ----
    #[test]
    fn finished_transaction_rejects_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let txn = bare_store(&dir).new_transaction("finished");
        txn.commit().unwrap();

        assert!(matches!(
            txn.commit(),
            Err(StoreError::TransactionFinished(TxnState::Committed))
        ));
        assert!(matches!(txn.abort(), Err(StoreError::TransactionFinished(_))));
        assert!(matches!(
            txn.home_with_uid("home1", true),
            Err(StoreError::TransactionFinished(_))
        ));
        assert!(txn.add_operation("late", |_| Ok(None)).is_err());
        assert!(txn.record_undo("late", || Ok(())).is_err());
    }

    // ---- Test 8: Custom staged operations ----
    #[test]
    fn custom_operations_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let txn = bare_store(&dir).new_transaction("ops");
        let counter = Arc::new(AtomicUsize::new(0));
        for expected in 0..3 {
            let counter = Arc::clone(&counter);
            txn.add_operation(format!("step {expected}"), move |_| {
                assert_eq!(counter.fetch_add(1, Ordering::SeqCst), expected);
                Ok(None)
            })
            .unwrap();
        }
        txn.commit().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(txn.state(), TxnState::Committed);
    }

    // ---- Test 9: Dropping an open transaction aborts it ----
    #[test]
    fn drop_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        let undone = Arc::new(AtomicUsize::new(0));
        {
            let txn = store.new_transaction("dropped");
            txn.home_with_uid("home1", true).unwrap().unwrap();
            let undone = Arc::clone(&undone);
            txn.record_undo("count", move || {
                undone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(undone.load(Ordering::SeqCst), 1);
        assert_eq!(
            fs::read_dir(dir.path().join("store/ho/me")).unwrap().count(),
            0
        );
    }

    // ---- Test 10: A failed commit rolls back ----
    #[test]
    fn failed_commit_rolls_back_and_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let store = bare_store(&dir);
        let txn = store.new_transaction("fails");
        txn.home_with_uid("home1", true).unwrap().unwrap();
        txn.add_operation("explode", |_| {
            Err(io::Error::new(io::ErrorKind::Other, "device gone").into())
        })
        .unwrap();

        let err = txn.commit().unwrap_err();
        assert!(matches!(err, StoreError::InternalInconsistency(_)));
        assert_eq!(txn.state(), TxnState::Aborted);
        // The home finalize has no undo, so the home itself survives.
        assert!(dir.path().join("store/ho/me/home1").is_dir());
    }
}
