use std::path::Path;
use std::sync::Arc;

use davstore_types::{is_hidden, is_valid_uid};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::home::Home;
use crate::transaction::Transaction;

/// Entry point of a store rooted at one directory.
///
/// A `DataStore` holds configuration only; every read or write goes through
/// a [`Transaction`] obtained from [`DataStore::new_transaction`].
#[derive(Clone, Debug)]
pub struct DataStore {
    config: Arc<StoreConfig>,
}

impl DataStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Start a unit of work. Nothing touches the disk until the transaction
    /// is used.
    pub fn new_transaction(&self, label: impl Into<String>) -> Transaction {
        let label = label.into();
        debug!(txn = %label, root = %self.config.root.display(), "new transaction");
        Transaction::new(Arc::clone(&self.config), label)
    }

    /// UIDs of every committed home, sorted.
    ///
    /// Homes live three levels below the root; hidden entries at any level
    /// (temporary homes, trash) are skipped.
    pub fn home_uids(&self) -> StoreResult<Vec<String>> {
        let root = &self.config.root;
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(&entry.file_name().to_string_lossy()));

        let mut uids = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                StoreError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("filesystem loop under the store root")
                }))
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let uid = entry.file_name().to_string_lossy().into_owned();
            if is_valid_uid(&uid) {
                uids.push(uid);
            }
        }
        uids.sort();
        Ok(uids)
    }

    /// Every home, each opened in its own transaction.
    ///
    /// The caller decides whether to commit or abort each transaction.
    pub fn each_home(&self) -> StoreResult<impl Iterator<Item = StoreResult<(Transaction, Home)>> + '_> {
        let uids = self.home_uids()?;
        Ok(uids.into_iter().filter_map(move |uid| {
            let txn = self.new_transaction(format!("each home: {uid}"));
            match txn.home_with_uid(&uid, false) {
                Ok(Some(home)) => Some(Ok((txn, home))),
                // Removed between the walk and the lookup.
                Ok(None) => {
                    let _ = txn.abort();
                    None
                }
                Err(e) => {
                    let _ = txn.abort();
                    Some(Err(e))
                }
            }
        }))
    }
}
