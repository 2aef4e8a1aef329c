//! The mutable per-release manifest: an ordered map of patch id to state.
//!
//! On disk this is a TOML document with a single `[patches]` table. Entry
//! order is load-bearing: it is the order in which staged patches are
//! applied to a database during promotion and deployment, and state
//! transitions never reorder it.

use crate::error::{Result, StoreError};
use hop_protocol::{PatchId, PatchState};
use std::path::Path;
use toml::Value;

/// An ordered mapping `PatchId -> PatchState` for a version in development.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<(PatchId, PatchState)>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[(PatchId, PatchState)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn state_of(&self, id: &PatchId) -> Option<PatchState> {
        self.entries.iter().find(|(pid, _)| pid == id).map(|(_, s)| *s)
    }

    pub fn contains(&self, id: &PatchId) -> bool {
        self.state_of(id).is_some()
    }

    /// The staged subset, in manifest order.
    pub fn staged(&self) -> Vec<PatchId> {
        self.entries
            .iter()
            .filter(|(_, s)| *s == PatchState::Staged)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Append a candidate, or insert it before an existing entry.
    pub fn add_candidate(&mut self, id: PatchId, before: Option<&PatchId>) -> Result<()> {
        if self.contains(&id) {
            return Err(StoreError::DuplicatePatch(id));
        }
        match before {
            None => self.entries.push((id, PatchState::Candidate)),
            Some(anchor) => {
                let pos = self
                    .entries
                    .iter()
                    .position(|(pid, _)| pid == anchor)
                    .ok_or_else(|| StoreError::UnknownAnchor(anchor.clone()))?;
                self.entries.insert(pos, (id, PatchState::Candidate));
            }
        }
        Ok(())
    }

    /// Transition a candidate to staged, preserving its position.
    pub fn set_staged(&mut self, id: &PatchId) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|(pid, _)| pid == id)
            .ok_or_else(|| StoreError::UnknownPatch(id.clone()))?;
        if entry.1 == PatchState::Staged {
            return Err(StoreError::AlreadyStaged(id.clone()));
        }
        entry.1 = PatchState::Staged;
        Ok(())
    }

    /// Remove an entry (development phase only; the caller guards that).
    pub fn remove(&mut self, id: &PatchId) -> Result<()> {
        let pos = self
            .entries
            .iter()
            .position(|(pid, _)| pid == id)
            .ok_or_else(|| StoreError::UnknownPatch(id.clone()))?;
        self.entries.remove(pos);
        Ok(())
    }

    /// Drop every staged row, keeping candidates in place. Used when an RC
    /// snapshot absorbs the staged set.
    pub fn clear_staged(&mut self) {
        self.entries.retain(|(_, s)| *s != PatchState::Staged);
    }

    /// Parse the TOML document. Unknown sections or non-string values are
    /// rejected; comments and blank lines are tolerated by the format.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let doc: toml::Table = content.parse().map_err(|e: toml::de::Error| {
            StoreError::InvalidManifest { path: path.to_path_buf(), detail: e.to_string() }
        })?;
        let invalid = |detail: String| StoreError::InvalidManifest {
            path: path.to_path_buf(),
            detail,
        };
        let mut entries = Vec::new();
        for (section, value) in &doc {
            if section != "patches" {
                return Err(invalid(format!("unexpected section [{section}]")));
            }
            let Value::Table(table) = value else {
                return Err(invalid("[patches] is not a table".to_string()));
            };
            for (key, value) in table {
                let id = PatchId::parse(key)
                    .map_err(|e| invalid(e.to_string()))?;
                let Value::String(state) = value else {
                    return Err(invalid(format!("value for '{key}' is not a string")));
                };
                let state = PatchState::parse(state)
                    .ok_or_else(|| invalid(format!("unknown state '{state}' for '{key}'")))?;
                if entries.iter().any(|(pid, _)| pid == &id) {
                    return Err(StoreError::DuplicatePatch(id));
                }
                entries.push((id, state));
            }
        }
        Ok(Self { entries })
    }

    /// Serialize back to the TOML document, entries in order.
    pub fn render(&self) -> String {
        let mut patches = toml::Table::new();
        for (id, state) in &self.entries {
            patches.insert(id.as_str().to_string(), Value::String(state.as_str().to_string()));
        }
        let mut doc = toml::Table::new();
        doc.insert("patches".to_string(), Value::Table(patches));
        toml::to_string(&doc).expect("manifest table serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pid(s: &str) -> PatchId {
        PatchId::parse(s).unwrap()
    }

    fn parse(content: &str) -> Result<Manifest> {
        Manifest::parse(content, &PathBuf::from("test-patches.toml"))
    }

    #[test]
    fn read_write_roundtrip_preserves_order() {
        let mut m = Manifest::new();
        m.add_candidate(pid("42-login"), None).unwrap();
        m.add_candidate(pid("7-cleanup"), None).unwrap();
        m.add_candidate(pid("100-audit"), None).unwrap();
        m.set_staged(&pid("7-cleanup")).unwrap();

        let text = m.render();
        let back = parse(&text).unwrap();
        assert_eq!(back, m);
        let ids: Vec<&str> = back.entries().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["42-login", "7-cleanup", "100-audit"]);
    }

    #[test]
    fn tolerates_comments_and_blank_lines() {
        let m = parse(
            "# release under construction\n\n[patches]\n\n\"42-login\" = \"staged\"\n# done\n\"57-api\" = \"candidate\"\n",
        )
        .unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.state_of(&pid("42-login")), Some(PatchState::Staged));
    }

    #[test]
    fn set_staged_keeps_position() {
        let mut m = Manifest::new();
        for id in ["1-a", "2-b", "3-c"] {
            m.add_candidate(pid(id), None).unwrap();
        }
        m.set_staged(&pid("2-b")).unwrap();
        let ids: Vec<&str> = m.entries().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1-a", "2-b", "3-c"]);
    }

    #[test]
    fn set_staged_rejects_unknown_and_double_staging() {
        let mut m = Manifest::new();
        m.add_candidate(pid("1-a"), None).unwrap();
        m.set_staged(&pid("1-a")).unwrap();
        assert!(matches!(m.set_staged(&pid("1-a")), Err(StoreError::AlreadyStaged(_))));
        assert!(matches!(m.set_staged(&pid("9-z")), Err(StoreError::UnknownPatch(_))));
    }

    #[test]
    fn add_candidate_before_anchor() {
        let mut m = Manifest::new();
        m.add_candidate(pid("1-a"), None).unwrap();
        m.add_candidate(pid("3-c"), None).unwrap();
        m.add_candidate(pid("2-b"), Some(&pid("3-c"))).unwrap();
        let ids: Vec<&str> = m.entries().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1-a", "2-b", "3-c"]);

        assert!(matches!(
            m.add_candidate(pid("4-d"), Some(&pid("9-z"))),
            Err(StoreError::UnknownAnchor(_))
        ));
        assert!(matches!(
            m.add_candidate(pid("1-a"), None),
            Err(StoreError::DuplicatePatch(_))
        ));
    }

    #[test]
    fn clear_staged_keeps_candidates_in_order() {
        let mut m = Manifest::new();
        for id in ["1-a", "2-b", "3-c", "4-d"] {
            m.add_candidate(pid(id), None).unwrap();
        }
        m.set_staged(&pid("1-a")).unwrap();
        m.set_staged(&pid("3-c")).unwrap();
        m.clear_staged();
        let ids: Vec<&str> = m.entries().iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["2-b", "4-d"]);
    }

    #[test]
    fn staged_subset_is_ordered() {
        let mut m = Manifest::new();
        for id in ["5-e", "2-b", "9-i"] {
            m.add_candidate(pid(id), None).unwrap();
        }
        m.set_staged(&pid("9-i")).unwrap();
        m.set_staged(&pid("5-e")).unwrap();
        let staged: Vec<String> = m.staged().iter().map(|i| i.to_string()).collect();
        assert_eq!(staged, vec!["5-e", "9-i"]);
    }

    #[test]
    fn rejects_foreign_sections_and_bad_states() {
        assert!(parse("[other]\nx = \"y\"\n").is_err());
        assert!(parse("[patches]\n\"1-a\" = \"done\"\n").is_err());
        assert!(parse("[patches]\n\"1-a\" = 3\n").is_err());
        assert!(parse("[patches]\n\"not an id\" = \"staged\"\n").is_err());
    }

    #[test]
    fn remove_only_known_entries() {
        let mut m = Manifest::new();
        m.add_candidate(pid("1-a"), None).unwrap();
        m.remove(&pid("1-a")).unwrap();
        assert!(m.is_empty());
        assert!(matches!(m.remove(&pid("1-a")), Err(StoreError::UnknownPatch(_))));
    }
}
