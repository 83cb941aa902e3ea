//! Locally tracked position token ids.
//!
//! Tracking is additive bookkeeping on top of the on-chain scan: ids the
//! user pinned by hand (or ingested from a receipt) survive RPC outages
//! and log-range limits. The file holds a plain JSON array so it can be
//! inspected and edited directly.

use crate::fsutil::write_string_private_atomic;
use eyre::Context as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TrackedIds {
    path: PathBuf,
    ids: Vec<u64>,
}

impl TrackedIds {
    /// Load the tracked set. A missing, corrupt, or non-array file yields
    /// an empty set rather than an error; writing later repairs the file.
    pub fn load(path: &Path) -> Self {
        let ids = match std::fs::read_to_string(path) {
            Ok(raw) => parse_ids(&raw),
            Err(_) => vec![],
        };
        Self {
            path: path.to_path_buf(),
            ids,
        }
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Add an id to the front of the list. Returns false when it was
    /// already tracked (order is left untouched in that case).
    pub fn add(&mut self, id: u64) -> bool {
        if id == 0 || self.ids.contains(&id) {
            return false;
        }
        self.ids.insert(0, id);
        true
    }

    /// Remove an id. Returns false when it was not tracked.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.ids.len();
        self.ids.retain(|x| *x != id);
        self.ids.len() != before
    }

    pub fn save(&self) -> eyre::Result<()> {
        let body = serde_json::to_string(&self.ids).context("serialize tracked ids")?;
        write_string_private_atomic(&self.path, &body)
            .with_context(|| format!("write {}", self.path.display()))
    }
}

fn parse_ids(raw: &str) -> Vec<u64> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return vec![];
    };
    let Some(items) = value.as_array() else {
        return vec![];
    };
    let mut out: Vec<u64> = vec![];
    for item in items {
        let Some(id) = item.as_u64() else { continue };
        if id == 0 || out.contains(&id) {
            continue;
        }
        out.push(id);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_file_yields_empty_set() {
        assert!(parse_ids("{not json").is_empty());
        assert!(parse_ids("{\"ids\": [1]}").is_empty(), "non-array accepted");
        assert!(parse_ids("\"7\"").is_empty());
    }

    #[test]
    fn parse_skips_non_positive_and_duplicate_entries() {
        let ids = parse_ids("[3, 0, -2, \"x\", 3, 9.5, 11]");
        assert_eq!(ids, vec![3, 11]);
    }

    #[test]
    fn add_prepends_and_dedupes() {
        let mut tracked = TrackedIds {
            path: PathBuf::from("unused"),
            ids: vec![5],
        };
        assert!(tracked.add(9));
        assert_eq!(tracked.ids(), &[9, 5]);
        assert!(!tracked.add(5), "duplicate add reported as new");
        assert!(!tracked.add(0), "zero id accepted");
        assert_eq!(tracked.ids(), &[9, 5]);
    }

    #[test]
    fn remove_reports_membership() {
        let mut tracked = TrackedIds {
            path: PathBuf::from("unused"),
            ids: vec![9, 5],
        };
        assert!(tracked.remove(5));
        assert!(!tracked.remove(5));
        assert_eq!(tracked.ids(), &[9]);
    }

    #[test]
    fn save_and_load_round_trip() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tracked_ids.json");

        let mut tracked = TrackedIds::load(&path);
        assert!(tracked.ids().is_empty());
        tracked.add(42);
        tracked.add(7);
        tracked.save()?;

        let reloaded = TrackedIds::load(&path);
        assert_eq!(reloaded.ids(), &[7, 42]);
        Ok(())
    }
}
