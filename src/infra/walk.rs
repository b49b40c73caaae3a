//! Filepath: src/infra/walk.rs
//!
//! Gitignore-aware traversal of checked-out benchmark repositories.
//! The harness `glob` and `view_directory` tools walk through here so
//! agents see the same file set a developer would: .gitignore honored,
//! `.git/` and other noise pruned early via extra globs.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};

/// Gitignore-aware walker with optional extra ignore globs.
/// Extra globs are applied in two places:
///   1) Early: prune directories during traversal (filter_entry).
///   2) Late: filter out files that still slipped through.
pub struct RepoWalker {
    /// Compiled set of additional ignore patterns
    ignore_patterns: GlobSet,
}

impl RepoWalker {
    /// Build a walker with additional ignore patterns (e.g., ".git/**",
    /// "node_modules/**"). These are matched on repo-relative paths.
    pub fn new(additional_ignores: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();

        for pattern in additional_ignores {
            // Compile each glob; return early on invalid patterns
            let glob = Glob::new(pattern)?;
            builder.add(glob);
        }

        let ignore_patterns = builder.build()?;

        Ok(Self { ignore_patterns })
    }

    /// Walker with the defaults every tool call uses: `.git/` pruned.
    pub fn for_repo() -> Result<Self> {
        Self::new(&[".git/**".to_string()])
    }

    /// Traverse files under `root`, respecting .gitignore and extra globs.
    /// Returns a sorted list of file paths for determinism.
    pub fn walk_files<P: AsRef<Path>>(&self, root: P) -> Vec<PathBuf> {
        let root_path = root.as_ref();
        let mut builder = WalkBuilder::new(root.as_ref());

        // Include hidden files; rely on .gitignore for policy
        builder.hidden(false);

        // Respect all gitignore sources (local, global, excludes)
        builder.git_ignore(true);
        builder.git_exclude(true);
        builder.git_global(true);

        // Prune directories that match additional ignore patterns early so
        // we never descend into .git/ or similarly heavy trees.
        let extra = self.ignore_patterns.clone();
        let prune_root = root_path.to_path_buf();
        builder.filter_entry(move |ent: &DirEntry| {
            // If we cannot determine the type, keep it (be conservative)
            let is_dir = ent.file_type().map(|ft| ft.is_dir()).unwrap_or(false);

            if is_dir {
                let rel = ent.path().strip_prefix(&prune_root).unwrap_or(ent.path());
                if extra.is_match(rel) || rel == Path::new(".git") {
                    return false;
                }
            }

            true
        });

        let walker = builder.build();

        let mut out: Vec<PathBuf> = walker
            // Drop entries with IO errors; unreadable files are invisible
            .filter_map(|res| res.ok())
            // Keep only regular files
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            // Apply file-level extra ignore filtering using relative paths
            .filter(|path| {
                let rel_path = path.strip_prefix(root_path).unwrap_or(path);
                !self.ignore_patterns.is_match(rel_path)
            })
            .collect();

        // Deterministic order across platforms and runs
        out.sort();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    #[test]
    fn walks_sorted_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "src/b.py", "pass")?;
        write_file(root, "src/a.py", "pass")?;

        let walker = RepoWalker::for_repo()?;
        let files = walker.walk_files(root);

        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|w| w[0] <= w[1]));
        Ok(())
    }

    #[test]
    fn prunes_git_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".git/objects/ab/cdef", "blob")?;
        write_file(root, "keep.py", "pass")?;

        let walker = RepoWalker::for_repo()?;
        let files = walker.walk_files(root);

        assert_eq!(files.len(), 1, "unexpected files: {files:?}");
        assert_eq!(files[0].file_name().unwrap(), "keep.py");
        Ok(())
    }

    #[test]
    fn extra_globs_filter_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "build/out.o", "bin")?;
        write_file(root, "src/lib.py", "pass")?;

        let walker = RepoWalker::new(&["build/**".to_string()])?;
        let files = walker.walk_files(root);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].strip_prefix(root).unwrap(), Path::new("src/lib.py"));
        Ok(())
    }
}
