//! Foundation types for davstore.
//!
//! This crate provides the vocabulary shared by every other davstore crate:
//! how entries on disk are named, how dead properties are addressed, what a
//! change token looks like, and how stored calendar/contact text is parsed.
//!
//! # Key Types
//!
//! - [`PropertyName`] / [`PropertyValue`] — Namespaced dead property key and opaque value
//! - [`ChangeToken`] — `uuid#revision` cursor used for incremental sync (CTag)
//! - [`Component`] — Parsed `VCALENDAR` / `VCARD` text with its identifying UID
//! - [`ComponentKind`] — Which kind of component a collection accepts
//!
//! The [`names`] module holds the naming rules: hidden entries, the minimum
//! principal UID length, two-level sharding, and temporary/trash names.

pub mod component;
pub mod error;
pub mod names;
pub mod property;
pub mod token;

pub use component::{Component, ComponentKind};
pub use error::{ComponentError, TypeError};
pub use names::{
    is_hidden, is_reserved_child_name, is_valid_uid, shard_segments, validate_name, MIN_UID_LENGTH,
};
pub use property::{well_known, PropertyName, PropertyValue};
pub use token::ChangeToken;
