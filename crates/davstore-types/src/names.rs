//! Naming rules for entries in the store.
//!
//! Every home, collection and resource is a filesystem entry whose name is
//! visible to clients. The rules:
//! - Names starting with `.` are hidden. They are reserved for the store's
//!   own bookkeeping (temporary directories, trash, property files, indexes)
//!   and are never enumerated or addressable.
//! - Names must be non-empty and must not contain path separators or NUL.
//! - Principal UIDs must be at least [`MIN_UID_LENGTH`] characters, since the
//!   first four characters become the two sharding segments.

use uuid::Uuid;

use crate::error::TypeError;

/// Marker that makes an entry hidden.
pub const HIDDEN_PREFIX: char = '.';

/// Shortest principal UID that can be sharded.
pub const MIN_UID_LENGTH: usize = 4;

/// Characters per sharding segment.
const SHARD_WIDTH: usize = 2;

/// Characters that can never appear in an entry name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '\0'];

/// Suffix of the side-channel file holding an entry's dead properties.
pub const PROPERTIES_SUFFIX: &str = ".properties.json";

/// Returns `true` if `name` is reserved for the store's bookkeeping.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with(HIDDEN_PREFIX)
}

/// Validate a client-visible entry name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use davstore_types::names::validate_name;
///
/// assert!(validate_name("calendar").is_ok());
/// assert!(validate_name("1.ics").is_ok());
/// assert!(validate_name(".hidden").is_err());
/// assert!(validate_name("a/b").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty".into(),
        });
    }

    if is_hidden(name) {
        return Err(TypeError::InvalidName {
            name: name.to_string(),
            reason: format!("must not start with {HIDDEN_PREFIX:?}"),
        });
    }

    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return Err(TypeError::InvalidName {
                name: name.to_string(),
                reason: format!("contains forbidden character: {ch:?}"),
            });
        }
    }

    Ok(())
}

/// Returns `true` if `uid` can name a home.
///
/// Besides the ordinary name rules, the UID must be long enough to shard and
/// neither sharding segment may itself be hidden (it would be skipped when
/// the store is enumerated).
pub fn is_valid_uid(uid: &str) -> bool {
    if validate_name(uid).is_err() || uid.chars().count() < MIN_UID_LENGTH {
        return false;
    }
    match shard_segments(uid) {
        Some((first, second)) => !is_hidden(&first) && !is_hidden(&second),
        None => false,
    }
}

/// The two sharding segments for a principal UID: characters `[0, 2)` and
/// `[2, 4)`.
///
/// Returns `None` if the UID is too short.
pub fn shard_segments(uid: &str) -> Option<(String, String)> {
    let mut chars = uid.chars();
    let first: String = chars.by_ref().take(SHARD_WIDTH).collect();
    let second: String = chars.take(SHARD_WIDTH).collect();
    if first.chars().count() < SHARD_WIDTH || second.chars().count() < SHARD_WIDTH {
        return None;
    }
    Some((first, second))
}

/// Name of the collection holding a home's notifications.
pub const NOTIFICATION_COLLECTION: &str = "notification";

/// Home entries that are never ordinary collections.
pub const RESERVED_CHILD_NAMES: [&str; 3] = ["dropbox", NOTIFICATION_COLLECTION, "freebusy"];

/// Returns `true` if `name` is kept back from a home's collection namespace.
pub fn is_reserved_child_name(name: &str) -> bool {
    RESERVED_CHILD_NAMES.contains(&name)
}

/// A fresh hidden sibling name for staging `name` before it is finalized.
pub fn temporary_name(name: &str) -> String {
    format!("{HIDDEN_PREFIX}{name}.tmp-{}", Uuid::new_v4().simple())
}

/// The `attempt`-th trash name for a removed entry.
pub fn trash_name(name: &str, attempt: usize) -> String {
    format!("{HIDDEN_PREFIX}_del_{name}_{attempt}")
}

/// Hidden name of the backup kept while a resource's content is replaced.
pub fn backup_name(name: &str) -> String {
    format!("{HIDDEN_PREFIX}{name}.bak-{}", Uuid::new_v4().simple())
}

/// Hidden name of the property file kept next to a resource named `name`.
pub fn resource_properties_name(name: &str) -> String {
    format!("{HIDDEN_PREFIX}{name}{PROPERTIES_SUFFIX}")
}

/// Hidden name of the property file kept inside a directory entry.
pub fn directory_properties_name() -> String {
    format!("{HIDDEN_PREFIX}properties.json")
}
