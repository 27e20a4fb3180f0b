//! The [`PropertyStore`] trait defining the dead property interface.

use davstore_types::{PropertyName, PropertyValue};

use crate::error::{PropertyError, PropertyResult};

/// Storage for the dead properties of one filesystem entry.
///
/// Implementations must be thread-safe (`Send + Sync`). Reads observe
/// unflushed writes made through the same store; other stores for the same
/// entry only see them after [`flush`](PropertyStore::flush).
pub trait PropertyStore: Send + Sync {
    /// Read a property.
    ///
    /// Returns [`PropertyError::NotFound`] if it is not set.
    fn get(&self, name: &PropertyName) -> PropertyResult<PropertyValue>;

    /// Set (create or replace) a property.
    fn set(&self, name: PropertyName, value: PropertyValue) -> PropertyResult<()>;

    /// Delete a property.
    ///
    /// Returns `Ok(true)` if the property existed and was deleted, `Ok(false)`
    /// if it was not set.
    fn delete(&self, name: &PropertyName) -> PropertyResult<bool>;

    /// Check whether a property is set.
    fn contains(&self, name: &PropertyName) -> PropertyResult<bool>;

    /// All property names currently set, in sorted order.
    fn list(&self) -> PropertyResult<Vec<PropertyName>>;

    /// Persist pending changes. Calling it again without changes is a no-op.
    fn flush(&self) -> PropertyResult<()>;

    /// Read a property, mapping absence to `Ok(None)`.
    fn get_optional(&self, name: &PropertyName) -> PropertyResult<Option<PropertyValue>> {
        match self.get(name) {
            Ok(value) => Ok(Some(value)),
            Err(PropertyError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
