//! Catalog versioning.
//!
//! A message may carry a `"version": "<major>.<minor>"` field next to its
//! `type`. Minor bumps add keys or optional fields and are accepted; a
//! different major means payload shapes changed and the message is refused.
//! Messages without the field are taken to speak the current catalog.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Catalog this build understands.
pub const CATALOG_VERSION: Version = Version::new(1, 1);

/// A `major.minor` catalog version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether messages tagged `other` can be read by this catalog.
    #[must_use]
    pub const fn accepts(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A version tag that is not `<major>.<minor>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed catalog version: {0:?}")]
pub struct MalformedVersion(pub String);

impl FromStr for Version {
    type Err = MalformedVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedVersion(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(malformed)?;
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}
