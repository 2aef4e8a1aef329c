//! Patch identifiers and manifest states.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated patch identifier: a leading issue number, optionally followed
/// by a dash-separated description (`42` or `42-login`).
///
/// Equality is case-sensitive. The leading integer is the external issue
/// number used for autoclose in merge commit messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatchId(String);

impl PatchId {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut digits = 0usize;
        let mut rest_start = None;
        for (i, b) in raw.bytes().enumerate() {
            if b.is_ascii_digit() {
                digits += 1;
            } else {
                rest_start = Some(i);
                break;
            }
        }
        if digits == 0 {
            return Err(ProtocolError::InvalidPatchId(raw.to_string()));
        }
        if let Some(i) = rest_start {
            let rest = &raw[i..];
            if !rest.starts_with('-') || rest.len() < 2 {
                return Err(ProtocolError::InvalidPatchId(raw.to_string()));
            }
            let suffix_ok = rest[1..]
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
            if !suffix_ok {
                return Err(ProtocolError::InvalidPatchId(raw.to_string()));
            }
        }
        Ok(PatchId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading issue number.
    pub fn issue_number(&self) -> u64 {
        let digits: String = self.0.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().unwrap_or(0)
    }

    /// The description part, if any (`42-login` -> `login`).
    pub fn description(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, rest)| rest)
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PatchId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        PatchId::parse(s)
    }
}

impl TryFrom<String> for PatchId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self> {
        PatchId::parse(&s)
    }
}

impl From<PatchId> for String {
    fn from(id: PatchId) -> String {
        id.0
    }
}

/// The state of a patch inside a development manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchState {
    /// A development branch exists, work in progress.
    Candidate,
    /// Integrated into a release branch, validated, eligible for promotion.
    Staged,
}

impl PatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchState::Candidate => "candidate",
            PatchState::Staged => "staged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(PatchState::Candidate),
            "staged" => Some(PatchState::Staged),
            _ => None,
        }
    }
}

impl fmt::Display for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_numeric_only_ids() {
        let id = PatchId::parse("456").unwrap();
        assert_eq!(id.issue_number(), 456);
        assert_eq!(id.description(), None);
    }

    #[test]
    fn accepts_full_ids() {
        let id = PatchId::parse("42-login").unwrap();
        assert_eq!(id.issue_number(), 42);
        assert_eq!(id.description(), Some("login"));
        let id = PatchId::parse("99-user_auth.v2").unwrap();
        assert_eq!(id.description(), Some("user_auth.v2"));
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "login", "-42", "42-", "42 login", "42-lo gin", "42-lo@gin", "a42"] {
            assert!(PatchId::parse(bad).is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn equality_is_case_sensitive() {
        let a = PatchId::parse("42-Login").unwrap();
        let b = PatchId::parse("42-login").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn state_roundtrip() {
        assert_eq!(PatchState::parse("candidate"), Some(PatchState::Candidate));
        assert_eq!(PatchState::parse("staged"), Some(PatchState::Staged));
        assert_eq!(PatchState::parse("other"), None);
        assert_eq!(PatchState::Staged.as_str(), "staged");
    }
}
