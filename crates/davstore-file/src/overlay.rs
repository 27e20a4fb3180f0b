//! Per-transaction view of a directory's children.
//!
//! A home's collections and a collection's resources are both seen through
//! an [`Overlay`]: entries created in this transaction, entries already
//! loaded from disk, and names removed in this transaction. The overlay
//! answers lookups before the filesystem is consulted, so a transaction
//! observes its own writes even though most of them are staged.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Outcome of consulting the overlay for one name.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    /// Created or already loaded in this transaction.
    Found(T),
    /// Removed in this transaction; the disk must not be consulted.
    Removed,
    /// Unknown to the overlay; the disk decides.
    Unknown,
}

#[derive(Debug)]
pub struct Overlay<T> {
    created: BTreeMap<String, T>,
    cached: HashMap<String, T>,
    removed: HashSet<String>,
}

impl<T> Default for Overlay<T> {
    fn default() -> Self {
        Self {
            created: BTreeMap::new(),
            cached: HashMap::new(),
            removed: HashSet::new(),
        }
    }
}

impl<T: Clone> Overlay<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Created first, then removed, then cached.
    pub fn lookup(&self, name: &str) -> Lookup<T> {
        if let Some(entry) = self.created.get(name) {
            return Lookup::Found(entry.clone());
        }
        if self.removed.contains(name) {
            return Lookup::Removed;
        }
        match self.cached.get(name) {
            Some(entry) => Lookup::Found(entry.clone()),
            None => Lookup::Unknown,
        }
    }

    /// Record an entry created in this transaction.
    pub fn insert_created(&mut self, name: impl Into<String>, entry: T) {
        let name = name.into();
        self.removed.remove(&name);
        self.cached.remove(&name);
        self.created.insert(name, entry);
    }

    /// Remember an entry loaded from disk.
    pub fn cache(&mut self, name: impl Into<String>, entry: T) {
        self.cached.insert(name.into(), entry);
    }

    /// Hide `name` for the rest of the transaction. Returns the entry the
    /// overlay held for it, if any.
    pub fn mark_removed(&mut self, name: &str) -> Option<T> {
        let created = self.created.remove(name);
        let cached = self.cached.remove(name);
        self.removed.insert(name.to_string());
        created.or(cached)
    }

    pub fn is_created(&self, name: &str) -> bool {
        self.created.contains_key(name)
    }

    pub fn is_removed(&self, name: &str) -> bool {
        !self.created.contains_key(name) && self.removed.contains(name)
    }

    /// Names visible in this transaction: created ∪ `on_disk` − removed,
    /// sorted and without duplicates.
    pub fn visible_names<I>(&self, on_disk: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut names: BTreeSet<String> = on_disk
            .into_iter()
            .filter(|name| !self.removed.contains(name))
            .collect();
        names.extend(self.created.keys().cloned());
        names.into_iter().collect()
    }
}
