//! Semantic versions and increment levels.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A semantic version triple with total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Which field of a version to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Major,
    Minor,
    Patch,
}

impl Version {
    pub const ZERO: Version = Version { major: 0, minor: 0, patch: 0 };

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// The next version at the given level; lower fields are zeroed.
    pub fn next(&self, level: Level) -> Version {
        match level {
            Level::Major => Version::new(self.major + 1, 0, 0),
            Level::Minor => Version::new(self.major, self.minor + 1, 0),
            Level::Patch => Version::new(self.major, self.minor, self.patch + 1),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let parse = |part: Option<&str>| -> Result<u32> {
            let part = part.ok_or_else(|| ProtocolError::InvalidVersion(s.to_string()))?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ProtocolError::InvalidVersion(s.to_string()));
            }
            part.parse()
                .map_err(|_| ProtocolError::InvalidVersion(s.to_string()))
        };
        let major = parse(parts.next())?;
        let minor = parse(parts.next())?;
        let patch = parse(parts.next())?;
        if parts.next().is_some() {
            return Err(ProtocolError::InvalidVersion(s.to_string()));
        }
        Ok(Version::new(major, minor, patch))
    }
}

impl FromStr for Level {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "major" => Ok(Level::Major),
            "minor" => Ok(Level::Minor),
            "patch" => Ok(Level::Patch),
            other => Err(ProtocolError::InvalidLevel(other.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Major => write!(f, "major"),
            Level::Minor => write!(f, "minor"),
            Level::Patch => write!(f, "patch"),
        }
    }
}
