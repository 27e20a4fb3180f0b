//! Stored calendar and contact text.
//!
//! The store only needs three facts about a component: which kind it is,
//! which UID identifies it, and its canonical text. Parsing is done by
//! `calcard`; the parsed form is kept for callers that need more.

use std::fmt;
use std::str::FromStr;

use calcard::icalendar::ICalendar;
use calcard::vcard::VCard;
use calcard::{Entry, Parser};
use serde::{Deserialize, Serialize};

use crate::error::ComponentError;

/// The top-level component a collection stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// `BEGIN:VCALENDAR`; the UID is carried by its sub-components.
    Calendar,
    /// `BEGIN:VCARD`; the UID is a top-level property.
    AddressBook,
}

impl ComponentKind {
    /// The component name used in `BEGIN:`/`END:` lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Calendar => "VCALENDAR",
            Self::AddressBook => "VCARD",
        }
    }

    /// MIME type of stored resources of this kind.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Calendar => "text/calendar; charset=utf-8",
            Self::AddressBook => "text/vcard; charset=utf-8",
        }
    }

    /// The kind announced by a `BEGIN:` line, if it is one we store.
    fn from_begin_line(line: &str) -> Option<Self> {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("BEGIN") {
            return None;
        }
        let value = value.trim();
        if value.eq_ignore_ascii_case("VCALENDAR") {
            Some(Self::Calendar)
        } else if value.eq_ignore_ascii_case("VCARD") {
            Some(Self::AddressBook)
        } else {
            None
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Clone)]
enum Parsed {
    Calendar(Box<ICalendar>),
    Card(Box<VCard>),
}

/// A parsed calendar or contact object.
#[derive(Clone)]
pub struct Component {
    kind: ComponentKind,
    uid: String,
    text: String,
    parsed: Parsed,
}

impl Component {
    /// Parse component text.
    ///
    /// Line endings are normalized to CRLF first, so text stored with bare
    /// `\n` is accepted. The text must hold exactly one `VCALENDAR` or
    /// `VCARD`.
    pub fn parse(text: &str) -> Result<Self, ComponentError> {
        let mut text = normalize_line_endings(text);
        let first = text
            .split("\r\n")
            .find(|line| !line.trim().is_empty())
            .ok_or(ComponentError::Empty)?;
        let kind = ComponentKind::from_begin_line(first)
            .ok_or_else(|| ComponentError::UnknownKind(first.to_string()))?;

        let parsed = {
            let mut parser = Parser::new(&text);
            let parsed = match (kind, parser.entry()) {
                (ComponentKind::Calendar, Entry::ICalendar(ical)) => {
                    Parsed::Calendar(Box::new(ical))
                }
                (ComponentKind::AddressBook, Entry::VCard(card)) => Parsed::Card(Box::new(card)),
                _ => {
                    return Err(ComponentError::Malformed(format!(
                        "not a well-formed {}",
                        kind.tag()
                    )))
                }
            };
            if !matches!(parser.entry(), Entry::Eof) {
                return Err(ComponentError::Malformed(format!(
                    "content after END:{}",
                    kind.tag()
                )));
            }
            parsed
        };

        let uid = match &parsed {
            Parsed::Calendar(ical) => ical.uids().next().map(str::to_string),
            Parsed::Card(card) => card.uid().map(str::to_string),
        };
        let uid = uid.filter(|u| !u.is_empty()).ok_or(ComponentError::MissingUid)?;

        if !text.ends_with("\r\n") {
            text.push_str("\r\n");
        }
        Ok(Self {
            kind,
            uid,
            text,
            parsed,
        })
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// The identifying UID: the first one found in the component.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Canonical CRLF text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn as_icalendar(&self) -> Option<&ICalendar> {
        match &self.parsed {
            Parsed::Calendar(ical) => Some(ical),
            Parsed::Card(_) => None,
        }
    }

    pub fn as_vcard(&self) -> Option<&VCard> {
        match &self.parsed {
            Parsed::Card(card) => Some(card),
            Parsed::Calendar(_) => None,
        }
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.uid == other.uid && self.text == other.text
    }
}

impl Eq for Component {}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("kind", &self.kind)
            .field("uid", &self.uid)
            .field("len", &self.text.len())
            .finish()
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Component {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rewrite bare `\n` line endings as `\r\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}
