use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Qualified name of a dead property: a namespace plus a local name.
///
/// The textual form is Clark notation, `{namespace}name`, which is also how
/// names are keyed in persisted property files.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyName {
    namespace: String,
    name: String,
}

impl PropertyName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Clark notation: `{namespace}name`.
    pub fn to_clark(&self) -> String {
        format!("{{{}}}{}", self.namespace, self.name)
    }

    /// Parse Clark notation.
    pub fn from_clark(s: &str) -> Result<Self, TypeError> {
        let rest = s
            .strip_prefix('{')
            .ok_or_else(|| TypeError::InvalidPropertyName(s.to_string()))?;
        let (namespace, name) = rest
            .split_once('}')
            .ok_or_else(|| TypeError::InvalidPropertyName(s.to_string()))?;
        if name.is_empty() {
            return Err(TypeError::InvalidPropertyName(s.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Debug for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyName({})", self.to_clark())
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.name)
    }
}

impl FromStr for PropertyName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_clark(s)
    }
}

impl TryFrom<String> for PropertyName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_clark(&s)
    }
}

impl From<PropertyName> for String {
    fn from(name: PropertyName) -> Self {
        name.to_clark()
    }
}

/// Opaque value of a dead property.
///
/// The store never interprets values; the protocol layer decides what they
/// mean (usually a serialized XML element).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyValue(String);

impl PropertyValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Property names and values the store itself reads or writes.
pub mod well_known {
    use super::{PropertyName, PropertyValue};

    pub const DAV_NAMESPACE: &str = "DAV:";
    pub const CALDAV_NAMESPACE: &str = "urn:ietf:params:xml:ns:caldav";
    pub const CARDDAV_NAMESPACE: &str = "urn:ietf:params:xml:ns:carddav";
    pub const CALENDARSERVER_NAMESPACE: &str = "http://calendarserver.org/ns/";

    /// `{DAV:}resourcetype`, set on every collection at creation.
    pub fn resource_type() -> PropertyName {
        PropertyName::new(DAV_NAMESPACE, "resourcetype")
    }

    /// `{http://calendarserver.org/ns/}getctag`, the collection change token.
    pub fn ctag() -> PropertyName {
        PropertyName::new(CALENDARSERVER_NAMESPACE, "getctag")
    }

    /// Digest of a resource's stored text, used as its entity tag.
    pub fn content_digest() -> PropertyName {
        PropertyName::new(CALENDARSERVER_NAMESPACE, "content-digest")
    }

    /// `{urn:ietf:params:xml:ns:caldav}schedule-calendar-transp`.
    pub fn schedule_calendar_transp() -> PropertyName {
        PropertyName::new(CALDAV_NAMESPACE, "schedule-calendar-transp")
    }

    pub fn calendar_resource_type() -> PropertyValue {
        PropertyValue::new(format!(
            "<collection xmlns=\"{DAV_NAMESPACE}\"/><calendar xmlns=\"{CALDAV_NAMESPACE}\"/>"
        ))
    }

    pub fn addressbook_resource_type() -> PropertyValue {
        PropertyValue::new(format!(
            "<collection xmlns=\"{DAV_NAMESPACE}\"/><addressbook xmlns=\"{CARDDAV_NAMESPACE}\"/>"
        ))
    }

    pub fn notification_resource_type() -> PropertyValue {
        PropertyValue::new(format!(
            "<collection xmlns=\"{DAV_NAMESPACE}\"/><notification xmlns=\"{CALENDARSERVER_NAMESPACE}\"/>"
        ))
    }

    pub fn opaque_transparency() -> PropertyValue {
        PropertyValue::new(format!("<opaque xmlns=\"{CALDAV_NAMESPACE}\"/>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clark_notation() {
        let name = PropertyName::new("DAV:", "displayname");
        assert_eq!(name.to_clark(), "{DAV:}displayname");
        assert_eq!(format!("{name}"), "{DAV:}displayname");
        assert_eq!(PropertyName::from_clark("{DAV:}displayname").unwrap(), name);
    }

    #[test]
    fn empty_namespace_is_allowed() {
        let name = PropertyName::from_clark("{}plain").unwrap();
        assert_eq!(name.namespace(), "");
        assert_eq!(name.name(), "plain");
    }

    #[test]
    fn reject_malformed_clark() {
        assert!(PropertyName::from_clark("displayname").is_err());
        assert!(PropertyName::from_clark("{DAV:displayname").is_err());
        assert!(PropertyName::from_clark("{DAV:}").is_err());
    }

    #[test]
    fn names_serialize_as_clark_strings() {
        let name = well_known::ctag();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"{http://calendarserver.org/ns/}getctag\"");
    }

    #[test]
    fn ordering_is_namespace_first() {
        let a = PropertyName::new("A:", "z");
        let b = PropertyName::new("B:", "a");
        assert!(a < b);
    }

    #[test]
    fn value_is_opaque_text() {
        let value = PropertyValue::from("<opaque/>");
        assert_eq!(value.as_str(), "<opaque/>");
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"<opaque/>\"");
    }
}
