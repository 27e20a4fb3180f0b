use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::TypeError;

/// A collection change token (CTag): `"<uuid>#<revision>"`.
///
/// The UUID identifies one lineage of revisions and only changes when the
/// token is reset; the revision increases by one on every change. Clients
/// treat the whole string as an opaque cursor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeToken {
    lineage: Uuid,
    revision: u64,
}

impl ChangeToken {
    /// A new lineage starting at revision 1.
    pub fn fresh() -> Self {
        Self {
            lineage: Uuid::new_v4(),
            revision: 1,
        }
    }

    pub fn new(lineage: Uuid, revision: u64) -> Self {
        Self { lineage, revision }
    }

    /// The same lineage, one revision later.
    pub fn next(&self) -> Self {
        Self {
            lineage: self.lineage,
            revision: self.revision.saturating_add(1),
        }
    }

    pub fn lineage(&self) -> Uuid {
        self.lineage
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeToken({self})")
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.lineage.hyphenated(), self.revision)
    }
}

impl FromStr for ChangeToken {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TypeError::InvalidToken {
            token: s.to_string(),
            reason: reason.to_string(),
        };
        let (lineage, revision) = s
            .split_once('#')
            .ok_or_else(|| invalid("missing '#' separator"))?;
        let lineage = Uuid::parse_str(lineage).map_err(|e| invalid(&e.to_string()))?;
        let revision = revision
            .parse::<u64>()
            .map_err(|e| invalid(&e.to_string()))?;
        Ok(Self { lineage, revision })
    }
}
