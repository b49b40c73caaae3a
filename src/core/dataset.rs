//! Dataset loading, saving, and raw-record ingestion.
//!
//! Two JSONL stages live under the artifacts root: `data/raw/` holds
//! as-fetched issue/patch records, `data/processed/` holds canonical
//! `DatasetCase` records. Loading is lenient (drop-and-warn per line);
//! cases are deduplicated by id, first occurrence wins.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::patch::ChangedLines;
use crate::core::schema::DatasetCase;
use crate::infra::jsonl;

/// One raw issue/patch row, before ground-truth derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,

    /// Issue text; becomes the case query.
    pub query: String,

    /// `owner/name`.
    pub repo: String,

    pub base_commit: String,

    /// Unified diff of the reference fix.
    pub patch: String,

    /// Optional `path:function` markers restricting which files count.
    #[serde(default)]
    pub edit_functions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl RawRecord {
    /// Field-level screening applied before any repo work.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty id".into());
        }
        if self.query.trim().len() < 5 {
            return Err("query too short".into());
        }
        if self.repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(format!("repo not in owner/name form: {:?}", self.repo));
        }
        if self.base_commit.is_empty() {
            return Err("empty base_commit".into());
        }
        if self.patch.trim().is_empty() {
            return Err("empty patch".into());
        }
        Ok(())
    }

    /// Paths named by `edit_functions` (`path:function` markers). Empty
    /// when the record carries no markers, in which case every patched
    /// path is allowed.
    pub fn allowed_paths(&self) -> BTreeSet<String> {
        self.edit_functions
            .iter()
            .filter_map(|item| item.split_once(':'))
            .map(|(path, _)| path.trim().trim_start_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Changed base lines from the patch, restricted to allowed paths.
    pub fn changed_lines(&self) -> ChangedLines {
        let allowed = self.allowed_paths();
        let mut changed = crate::core::patch::changed_lines_by_file(&self.patch);
        if !allowed.is_empty() {
            changed.retain(|path, _| allowed.contains(path));
        }
        changed
    }
}

/// Canonical JSONL persistence for `DatasetCase` records.
pub struct DatasetStore;

impl DatasetStore {
    /// Load cases, dropping malformed lines and duplicate ids.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<DatasetCase>> {
        let (cases, dropped) = jsonl::read_records::<DatasetCase, _>(&path)?;
        if dropped > 0 {
            warn!(
                file = %path.as_ref().display(),
                dropped,
                "dataset contained malformed lines"
            );
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(cases.len());
        for case in cases {
            if !seen.insert(case.id.clone()) {
                warn!(id = %case.id, "dropping duplicate case id");
                continue;
            }
            out.push(case);
        }
        Ok(out)
    }

    /// Write cases as one JSON object per line.
    pub fn save<P: AsRef<Path>>(path: P, cases: &[DatasetCase]) -> Result<()> {
        jsonl::write_records(path, cases)
    }

    /// Load raw records for the build stage.
    pub fn load_raw<P: AsRef<Path>>(path: P) -> Result<Vec<RawRecord>> {
        let (records, dropped) = jsonl::read_records::<RawRecord, _>(&path)?;
        if dropped > 0 {
            warn!(
                file = %path.as_ref().display(),
                dropped,
                "raw dataset contained malformed lines"
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ranges::LineRange;
    use crate::core::schema::GroundTruthEntry;

    fn case(id: &str) -> DatasetCase {
        DatasetCase {
            id: id.into(),
            query: "fix it".into(),
            repo: "o/n".into(),
            base_commit: "abc123".into(),
            hard_gt: vec![GroundTruthEntry {
                path: "a.py".into(),
                function: "f".into(),
                class_name: None,
                range: LineRange(1, 9),
                target_ranges: vec![LineRange(2, 3)],
                signature: "def f()".into(),
            }],
            soft_context: Vec::new(),
            solvability: None,
            issue_url: None,
            pr_url: None,
        }
    }

    #[test]
    fn save_load_round_trip_with_dedup() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("data/processed/cases.jsonl");

        DatasetStore::save(&path, &[case("a"), case("b"), case("a")])?;
        let loaded = DatasetStore::load(&path)?;

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "a");
        assert_eq!(loaded[1].id, "b");
        Ok(())
    }

    #[test]
    fn allowed_paths_parse_markers() {
        let rec = RawRecord {
            id: "r".into(),
            query: "issue body".into(),
            repo: "o/n".into(),
            base_commit: "abc".into(),
            patch: "x".into(),
            edit_functions: vec![
                "src/a.py:handler".into(),
                "/src/b.py:Klass.method".into(),
                "no-colon-marker".into(),
            ],
            issue_url: None,
            pr_url: None,
        };
        let allowed = rec.allowed_paths();
        assert_eq!(allowed, BTreeSet::from(["src/a.py".to_string(), "src/b.py".to_string()]));
    }

    #[test]
    fn changed_lines_respect_allowed_paths() {
        let patch = "\
--- a/src/a.py
+++ b/src/a.py
@@ -1,1 +1,1 @@
-x
+y
--- a/src/other.py
+++ b/src/other.py
@@ -1,1 +1,1 @@
-x
+y
";
        let rec = RawRecord {
            id: "r".into(),
            query: "issue body".into(),
            repo: "o/n".into(),
            base_commit: "abc".into(),
            patch: patch.into(),
            edit_functions: vec!["src/a.py:f".into()],
            issue_url: None,
            pr_url: None,
        };
        let changed = rec.changed_lines();
        assert_eq!(changed.len(), 1);
        assert!(changed.contains_key("src/a.py"));
    }

    #[test]
    fn validation_rejects_malformed_rows() {
        let mut rec = RawRecord {
            id: "r".into(),
            query: "long enough".into(),
            repo: "owner/name".into(),
            base_commit: "abc".into(),
            patch: "p".into(),
            edit_functions: Vec::new(),
            issue_url: None,
            pr_url: None,
        };
        assert!(rec.validate().is_ok());

        rec.repo = "not-a-slug".into();
        assert!(rec.validate().is_err());
    }
}
