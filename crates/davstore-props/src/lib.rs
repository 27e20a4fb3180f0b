//! Dead property storage for davstore.
//!
//! Every home, collection and resource can carry "dead properties": opaque,
//! namespaced metadata that the store keeps on behalf of the protocol layer
//! (display names, colors, resource types, change tokens). This crate
//! provides the storage interface and its filesystem implementation.
//!
//! # Architecture
//!
//! - Properties are keyed by [`PropertyName`](davstore_types::PropertyName)
//!   and hold an opaque [`PropertyValue`](davstore_types::PropertyValue).
//! - Changes are buffered in memory and only persisted by an explicit
//!   [`PropertyStore::flush`]. The owning entity stages that flush on its
//!   transaction so it happens at commit.
//! - The file backend keeps each entry's properties in a hidden JSON side
//!   file and replaces it atomically on flush.
//!
//! # Modules
//!
//! - [`atomic`] — Atomic file replacement shared with the store backend
//! - [`error`] — Error types for property operations
//! - [`traits`] — The [`PropertyStore`] trait defining the storage interface
//! - [`file`] — The JSON side-file [`FilePropertyStore`]

pub mod atomic;
pub mod error;
pub mod file;
pub mod traits;

pub use atomic::write_atomic;
pub use error::{PropertyError, PropertyResult};
pub use file::FilePropertyStore;
pub use traits::PropertyStore;
