//! `git` CLI backed change-set fetcher.
//!
//! A change-set is assembled from two commands run in the worktree:
//!
//! - `git status --porcelain=v1` for the file list and statuses
//! - `git diff --numstat HEAD` for per-file line counts
//!
//! Results are cached per path for a short TTL so that bursts of unforced
//! cycles (a refresh request landing right after a poll) do not spawn git
//! twice. A forced fetch always bypasses the cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::fetcher::{ChangeSetFetcher, FetchError};
use crate::types::{ChangeSet, FileChange, FileStatus};

/// Default lifetime of a cached change-set.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    change_set: ChangeSet,
}

/// Fetches change-sets by shelling out to `git`.
#[derive(Debug)]
pub struct GitCliFetcher {
    git: PathBuf,
    cache_ttl: Duration,
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Default for GitCliFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCliFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            git: PathBuf::from("git"),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the cache lifetime. A zero TTL disables caching.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Overrides the `git` executable.
    #[must_use]
    pub fn with_git(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    fn cached(&self, path: &Path) -> Option<ChangeSet> {
        if self.cache_ttl.is_zero() {
            return None;
        }
        let cache = self.cache.lock().ok()?;
        cache
            .get(path)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.change_set.clone())
    }

    fn store(&self, path: &Path, change_set: &ChangeSet) {
        if self.cache_ttl.is_zero() {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                path.to_path_buf(),
                CacheEntry {
                    fetched_at: Instant::now(),
                    change_set: change_set.clone(),
                },
            );
        }
    }

    fn forget(&self, path: &Path) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(path);
        }
    }

    /// Runs git in `path` and returns stdout.
    async fn run(&self, path: &Path, args: &[&str]) -> Result<String, FetchError> {
        trace!(path = %path.display(), ?args, "Running git");
        let output = Command::new(&self.git)
            .arg("--no-optional-locks")
            .args(args)
            .current_dir(path)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_git_failure(path, stderr.trim()))
    }

    async fn ensure_accessible(&self, path: &Path) -> Result<(), FetchError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => {
                self.forget(path);
                Err(FetchError::Removed(path.to_path_buf()))
            }
        }
    }
}

#[async_trait]
impl ChangeSetFetcher for GitCliFetcher {
    async fn fetch(&self, path: &Path, force: bool) -> Result<ChangeSet, FetchError> {
        if !force {
            if let Some(change_set) = self.cached(path) {
                trace!(path = %path.display(), "Using cached change-set");
                return Ok(change_set);
            }
        }

        self.ensure_accessible(path).await?;

        let status = self
            .run(path, &["status", "--porcelain=v1", "--untracked-files=all"])
            .await?;
        let numstat = match self
            .run(path, &["diff", "--numstat", "--no-renames", "HEAD"])
            .await
        {
            Ok(out) => out,
            // No commits yet: everything is untracked or staged-new.
            Err(FetchError::Command(msg)) if is_unborn_head(&msg) => String::new(),
            Err(e) => return Err(e),
        };

        let change_set = build_change_set(&status, &numstat);
        debug!(
            path = %path.display(),
            files = change_set.len(),
            insertions = change_set.insertions,
            deletions = change_set.deletions,
            "Fetched change-set"
        );
        self.store(path, &change_set);
        Ok(change_set)
    }

    async fn last_commit_message(&self, path: &Path) -> Result<Option<String>, FetchError> {
        self.ensure_accessible(path).await?;
        match self.run(path, &["log", "-1", "--pretty=%s"]).await {
            Ok(out) => {
                let subject = out.trim();
                Ok((!subject.is_empty()).then(|| subject.to_string()))
            }
            Err(FetchError::Command(msg)) if is_unborn_head(&msg) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn classify_git_failure(path: &Path, stderr: &str) -> FetchError {
    if stderr.contains("index.lock") {
        return FetchError::Locked;
    }
    if stderr.contains("not a git repository") {
        return FetchError::Removed(path.to_path_buf());
    }
    FetchError::Command(stderr.to_string())
}

fn is_unborn_head(stderr: &str) -> bool {
    stderr.contains("does not have any commits yet")
        || stderr.contains("ambiguous argument 'HEAD'")
        || stderr.contains("unknown revision")
}

/// Maps a porcelain v1 `XY` code to a status.
fn parse_status_code(code: &str) -> FileStatus {
    match code {
        "??" => FileStatus::Untracked,
        "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU" => FileStatus::Conflicted,
        _ if code.contains('R') => FileStatus::Renamed,
        _ if code.contains('C') => FileStatus::Copied,
        _ if code.contains('A') => FileStatus::Added,
        _ if code.contains('D') => FileStatus::Deleted,
        _ => FileStatus::Modified,
    }
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
}

/// Parses `git status --porcelain=v1` output into `(path, status)` pairs.
///
/// Renames and copies report the destination path.
fn parse_porcelain(output: &str) -> Vec<(String, FileStatus)> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .filter_map(|line| {
            let code = line.get(..2)?;
            if code == "!!" {
                return None;
            }
            let rest = line.get(3..)?;
            let path = match rest.split_once(" -> ") {
                Some((_, to)) => to,
                None => rest,
            };
            Some((unquote(path).to_string(), parse_status_code(code)))
        })
        .collect()
}

/// Parses `git diff --numstat` output into a path → (insertions, deletions) map.
///
/// Binary files report `-` for both counts and are recorded as zero.
fn parse_numstat(output: &str) -> HashMap<String, (u32, u32)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let deleted = parts.next()?;
            let path = parts.next()?;
            Some((
                unquote(path).to_string(),
                (added.parse().unwrap_or(0), deleted.parse().unwrap_or(0)),
            ))
        })
        .collect()
}

fn build_change_set(status: &str, numstat: &str) -> ChangeSet {
    let lines = parse_numstat(numstat);
    let changes = parse_porcelain(status)
        .into_iter()
        .map(|(path, status)| {
            let (ins, del) = lines.get(&path).copied().unwrap_or((0, 0));
            FileChange::new(path, status).with_lines(ins, del)
        })
        .collect();
    ChangeSet::new(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    #[test]
    fn test_parse_status_codes() {
        assert_eq!(parse_status_code(" M"), FileStatus::Modified);
        assert_eq!(parse_status_code("MM"), FileStatus::Modified);
        assert_eq!(parse_status_code("A "), FileStatus::Added);
        assert_eq!(parse_status_code(" D"), FileStatus::Deleted);
        assert_eq!(parse_status_code("R "), FileStatus::Renamed);
        assert_eq!(parse_status_code("C "), FileStatus::Copied);
        assert_eq!(parse_status_code("??"), FileStatus::Untracked);
        assert_eq!(parse_status_code("UU"), FileStatus::Conflicted);
        assert_eq!(parse_status_code("AA"), FileStatus::Conflicted);
    }

    #[test]
    fn test_parse_porcelain() {
        let output = " M src/lib.rs\n?? notes.txt\nR  old.rs -> new.rs\n!! target/\n";
        let parsed = parse_porcelain(output);
        assert_eq!(
            parsed,
            vec![
                ("src/lib.rs".to_string(), FileStatus::Modified),
                ("notes.txt".to_string(), FileStatus::Untracked),
                ("new.rs".to_string(), FileStatus::Renamed),
            ]
        );
    }

    #[test]
    fn test_parse_porcelain_quoted_path() {
        let parsed = parse_porcelain(" M \"with space.rs\"\n");
        assert_eq!(parsed[0].0, "with space.rs");
    }

    #[test]
    fn test_parse_numstat() {
        let output = "10\t2\tsrc/lib.rs\n-\t-\tassets/logo.png\n";
        let parsed = parse_numstat(output);
        assert_eq!(parsed.get("src/lib.rs"), Some(&(10, 2)));
        assert_eq!(parsed.get("assets/logo.png"), Some(&(0, 0)));
    }

    #[test]
    fn test_parse_numstat_empty() {
        assert!(parse_numstat("").is_empty());
    }

    #[test]
    fn test_build_change_set_joins_line_counts() {
        let status = " M src/lib.rs\n?? new.txt\n";
        let numstat = "10\t2\tsrc/lib.rs\n";
        let set = build_change_set(status, numstat);

        assert_eq!(set.len(), 2);
        assert_eq!(set.insertions, 10);
        assert_eq!(set.deletions, 2);
        assert_eq!(set.changes[1].status, FileStatus::Untracked);
        assert_eq!(set.changes[1].insertions, 0);
    }

    #[test]
    fn test_classify_git_failure() {
        let path = Path::new("/repo");
        assert!(matches!(
            classify_git_failure(
                path,
                "fatal: Unable to create '/repo/.git/index.lock': File exists."
            ),
            FetchError::Locked
        ));
        assert!(matches!(
            classify_git_failure(path, "fatal: not a git repository (or any parent)"),
            FetchError::Removed(_)
        ));
        assert!(matches!(
            classify_git_failure(path, "fatal: bad object"),
            FetchError::Command(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_path_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let fetcher = GitCliFetcher::new();

        let err = fetcher.fetch(&missing, true).await.unwrap_err();
        assert!(matches!(err, FetchError::Removed(ref p) if p == &missing));
    }

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("Failed to run git");
        assert!(status.status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn test_fetch_from_real_repository() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        git(repo, &["init", "-q"]);
        git(repo, &["config", "user.email", "test@example.com"]);
        git(repo, &["config", "user.name", "Test"]);
        std::fs::write(repo.join("a.txt"), "one\n").unwrap();
        git(repo, &["add", "a.txt"]);
        git(repo, &["commit", "-q", "-m", "Initial commit"]);

        let fetcher = GitCliFetcher::new().with_cache_ttl(Duration::ZERO);
        assert!(fetcher.fetch(repo, true).await.unwrap().is_empty());
        assert_eq!(
            fetcher.last_commit_message(repo).await.unwrap(),
            Some("Initial commit".to_string())
        );

        std::fs::write(repo.join("a.txt"), "one\ntwo\n").unwrap();
        let set = fetcher.fetch(repo, true).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.changes[0].status, FileStatus::Modified);
        assert_eq!(set.insertions, 1);
    }

    #[tokio::test]
    async fn test_unforced_fetch_uses_cache() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        git(repo, &["init", "-q"]);

        let fetcher = GitCliFetcher::new().with_cache_ttl(Duration::from_secs(60));
        assert!(fetcher.fetch(repo, true).await.unwrap().is_empty());

        std::fs::write(repo.join("new.txt"), "hello\n").unwrap();
        assert!(
            fetcher.fetch(repo, false).await.unwrap().is_empty(),
            "unforced fetch should hit the cache"
        );
        assert_eq!(fetcher.fetch(repo, true).await.unwrap().len(), 1);
        assert_eq!(fetcher.last_commit_message(repo).await.unwrap(), None);
    }
}
