//! Repository provisioning for benchmark cases.
//!
//! `ensure` produces a working tree checked out at a case's base commit:
//! shallow clone on first sight, targeted `fetch --depth 1` when the
//! commit is missing, detached checkout otherwise a no-op. Concurrent
//! cases over the same repo serialize on a per-repo mutex; an advisory
//! file lock extends that across processes sharing one artifacts root.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use fd_lock::RwLock as FileLock;
use tracing::{debug, info};

/// Clone directory name for `owner/name`.
pub fn clone_dir_name(repo: &str) -> String {
    repo.replace('/', "__")
}

pub struct RepoProvisioner {
    repos_dir: PathBuf,

    /// Prefix the clone URL is built from, e.g. `https://github.com/`.
    remote_base: String,

    /// Per-repo serialization of clone/fetch/checkout.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoProvisioner {
    pub fn new(repos_dir: PathBuf, remote_base: String) -> Self {
        Self {
            repos_dir,
            remote_base,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Expected working-tree location for a repo, whether or not it has
    /// been cloned yet.
    pub fn clone_dir(&self, repo: &str) -> PathBuf {
        self.repos_dir.join(clone_dir_name(repo))
    }

    /// Make `repo` available at `commit`, returning the working tree.
    pub fn ensure(&self, repo: &str, commit: &str) -> Result<PathBuf> {
        let guard = self.repo_lock(repo);
        let _held = guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        std::fs::create_dir_all(&self.repos_dir)
            .with_context(|| format!("Failed to create {}", self.repos_dir.display()))?;

        // Advisory lock shared with any sibling process on this root
        let lock_path = self.repos_dir.join(format!(".{}.lock", clone_dir_name(repo)));
        let lock_file = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock {}", lock_path.display()))?;
        let mut file_lock = FileLock::new(lock_file);
        let _file_held = file_lock
            .write()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;

        let repo_path = self.clone_dir(repo);

        if !repo_path.exists() {
            let url = format!("{}{}.git", self.remote_base, repo);
            info!(repo, commit, "cloning");
            let dest = repo_path.to_string_lossy().into_owned();
            run_git(None, &["clone", "--depth", "1", &url, &dest])
                .with_context(|| format!("clone of {repo} failed"))?;
        }

        if !has_commit(&repo_path, commit) {
            debug!(repo, commit, "fetching missing commit");
            run_git(Some(&repo_path), &["fetch", "--depth", "1", "origin", commit])
                .with_context(|| format!("fetch of {commit} failed for {repo}"))?;
        }

        // Idempotence: skip the checkout when HEAD already matches
        if head_commit(&repo_path).as_deref() != Some(commit) {
            run_git(Some(&repo_path), &["checkout", "--detach", commit])
                .with_context(|| format!("checkout of {commit} failed for {repo}"))?;
        }

        Ok(repo_path)
    }

    fn repo_lock(&self, repo: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.entry(repo.to_string()).or_default().clone()
    }
}

/// Run git with captured output; non-zero exit becomes an error carrying
/// whatever stderr said.
fn run_git(repo_path: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = repo_path {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        bail!(
            "git {} failed (code {}){}",
            args.join(" "),
            output.status.code().unwrap_or(-1),
            if detail.is_empty() {
                String::new()
            } else {
                format!(": {detail}")
            }
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn has_commit(repo_path: &Path, commit: &str) -> bool {
    Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .args(["cat-file", "-e", &format!("{commit}^{{commit}}")])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn head_commit(repo_path: &Path) -> Option<String> {
    run_git(Some(repo_path), &["rev-parse", "HEAD"])
        .ok()
        .map(|s| s.trim().to_string())
}
