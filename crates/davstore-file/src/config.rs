use std::fs;
use std::path::{Path, PathBuf};

use davstore_types::{well_known, ComponentKind, PropertyValue};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Which kind of groupware data a store holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Calendar,
    AddressBook,
}

impl StoreKind {
    /// The only component kind collections in this store accept.
    pub fn component_kind(&self) -> ComponentKind {
        match self {
            Self::Calendar => ComponentKind::Calendar,
            Self::AddressBook => ComponentKind::AddressBook,
        }
    }

    /// `{DAV:}resourcetype` value set on new collections.
    pub fn resource_type(&self) -> PropertyValue {
        match self {
            Self::Calendar => well_known::calendar_resource_type(),
            Self::AddressBook => well_known::addressbook_resource_type(),
        }
    }

    /// Collections provisioned in every new home.
    pub fn default_children(&self) -> Vec<String> {
        match self {
            Self::Calendar => vec!["calendar".into(), "inbox".into()],
            Self::AddressBook => vec!["addressbook".into()],
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calendar => write!(f, "calendar"),
            Self::AddressBook => write!(f, "addressbook"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub kind: StoreKind,
    pub default_children: Vec<String>,
    /// How many `._del_<name>_<i>` names to try when removing a collection.
    pub trash_candidates: usize,
    /// Resolve `object_resource_with_uid` through the collection index.
    pub use_index_for_uid_lookup: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::for_root(".", StoreKind::Calendar)
    }
}

impl StoreConfig {
    /// Defaults for a store of `kind` rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>, kind: StoreKind) -> Self {
        Self {
            root: root.into(),
            kind,
            default_children: kind.default_children(),
            trash_candidates: 1000,
            use_index_for_uid_lookup: false,
        }
    }

    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let mut config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        // An explicit kind without explicit children gets that kind's defaults.
        let table: toml::Table = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        if !table.contains_key("default_children") {
            config.default_children = config.kind.default_children();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.trash_candidates == 0 {
            return Err(StoreError::Config("trash_candidates must be at least 1".into()));
        }
        for name in &self.default_children {
            davstore_types::validate_name(name)
                .map_err(|e| StoreError::Config(format!("default_children: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.root, PathBuf::from("."));
        assert_eq!(c.kind, StoreKind::Calendar);
        assert_eq!(c.default_children, vec!["calendar", "inbox"]);
        assert_eq!(c.trash_candidates, 1000);
        assert!(!c.use_index_for_uid_lookup);
    }

    #[test]
    fn parse_partial_toml() {
        let c = StoreConfig::from_toml_str(
            r#"
            root = "/var/db/davstore"
            kind = "addressbook"
            "#,
        )
        .unwrap();
        assert_eq!(c.root, PathBuf::from("/var/db/davstore"));
        assert_eq!(c.kind, StoreKind::AddressBook);
        assert_eq!(c.default_children, vec!["addressbook"]);
        assert_eq!(c.trash_candidates, 1000);
    }

    #[test]
    fn explicit_children_win() {
        let c = StoreConfig::from_toml_str(
            r#"
            kind = "calendar"
            default_children = []
            use_index_for_uid_lookup = true
            "#,
        )
        .unwrap();
        assert!(c.default_children.is_empty());
        assert!(c.use_index_for_uid_lookup);
    }

    #[test]
    fn reject_bad_config() {
        assert!(matches!(
            StoreConfig::from_toml_str("trash_candidates = 0"),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("default_children = [\".hidden\"]"),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("kind = \"journal\""),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let c = StoreConfig::for_root("/tmp/store", StoreKind::AddressBook);
        let text = c.to_toml_string().unwrap();
        assert_eq!(StoreConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn kind_mappings() {
        assert_eq!(StoreKind::Calendar.component_kind(), ComponentKind::Calendar);
        assert_eq!(StoreKind::AddressBook.to_string(), "addressbook");
        assert_eq!(
            StoreKind::AddressBook.resource_type(),
            well_known::addressbook_resource_type()
        );
    }
}
