//! Filesystem-backed transactional store for calendars and contacts.
//!
//! A store is a directory tree. Every principal owns a *home*; a home holds
//! named *collections* (calendars or address books); a collection holds
//! *object resources*, one iCalendar or vCard document per file.
//!
//! ```text
//! <root>/<uid[0..2]>/<uid[2..4]>/<uid>/<collection>/<resource>
//! ```
//!
//! # Entry Points
//!
//! - [`DataStore`] -- configuration and the factory for transactions
//! - [`Transaction`] -- one unit of work; resolves and creates homes
//! - [`Home`] -- a principal's collections
//! - [`HomeChild`] -- one collection, its change token and index; a
//!   calendar home also keeps a notification collection apart from the rest
//! - [`ObjectResource`] -- one stored component
//!
//! # Design Rules
//!
//! 1. Entries whose names start with `.` are never visible to clients.
//! 2. New homes and collections are built under hidden temporary names and
//!    renamed into place at commit.
//! 3. Resource content is written at once; commit and abort only tidy up.
//! 4. Dead properties live in JSON sidecar files and are flushed at commit.
//! 5. Change tokens are written through immediately and never rolled back.
//! 6. Everything a transaction touches is cached for its lifetime, and the
//!    transaction's own uncommitted changes are visible through it.

pub mod child;
pub mod config;
pub mod error;
pub mod home;
pub mod index;
pub mod layout;
pub mod object;
pub mod overlay;
mod properties;
pub mod store;
pub mod transaction;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export primary types at crate root for ergonomic imports.
pub use child::{ChildRole, HomeChild};
pub use config::{StoreConfig, StoreKind};
pub use error::{StoreError, StoreResult};
pub use home::Home;
pub use index::ResourceIndex;
pub use object::{content_digest, ObjectResource};
pub use store::DataStore;
pub use transaction::Transaction;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
