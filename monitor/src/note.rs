//! Status note reader.
//!
//! Agents and scripts can leave a one-line status note for a worktree by
//! writing a small file into its git metadata directory (the `.git`
//! directory, or `.git/worktrees/<name>` for a linked worktree). The monitor
//! reads it on every cycle and publishes the last non-empty line.
//!
//! # Rules
//!
//! - The metadata directory is resolved once and cached.
//! - An empty or whitespace-only file counts as no note.
//! - Only the last non-empty line is kept, truncated to
//!   [`MAX_NOTE_CHARS`] characters (ending in `...`) when longer.
//! - A missing file is silent; any other read error is logged and the note
//!   is treated as absent for that cycle.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::types::Note;

/// Default note filename inside the metadata directory.
pub const DEFAULT_NOTE_FILENAME: &str = "treeline-note";

/// Maximum length of a published note, in characters.
pub const MAX_NOTE_CHARS: usize = 500;

const ELLIPSIS: &str = "...";

/// Result of resolving a worktree's metadata directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataDir {
    Resolved(PathBuf),
    /// The worktree has no readable `.git` entry.
    Unavailable,
}

/// Reads the status note of one worktree.
#[derive(Debug)]
pub struct NoteReader {
    worktree: PathBuf,
    metadata_dir: OnceCell<MetadataDir>,
}

impl NoteReader {
    #[must_use]
    pub fn new(worktree: impl Into<PathBuf>) -> Self {
        Self {
            worktree: worktree.into(),
            metadata_dir: OnceCell::new(),
        }
    }

    /// Returns the cached metadata directory, resolving it on first use.
    pub async fn metadata_dir(&self) -> &MetadataDir {
        self.metadata_dir
            .get_or_init(|| resolve_metadata_dir(&self.worktree))
            .await
    }

    /// Reads the note named `filename`, if there is one.
    pub async fn read(&self, filename: &str) -> Option<Note> {
        let dir = match self.metadata_dir().await {
            MetadataDir::Resolved(dir) => dir,
            MetadataDir::Unavailable => return None,
        };
        let path = dir.join(filename);

        match read_note_file(&path).await {
            Ok(note) => note,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read note file");
                None
            }
        }
    }
}

/// Finds the git metadata directory for a worktree.
///
/// A `.git` directory is used as-is. A `.git` file (linked worktree) holds a
/// `gitdir: <path>` line, which may be relative to the worktree.
pub async fn resolve_metadata_dir(worktree: &Path) -> MetadataDir {
    let dot_git = worktree.join(".git");
    let meta = match fs::metadata(&dot_git).await {
        Ok(meta) => meta,
        Err(e) => {
            debug!(path = %dot_git.display(), error = %e, "No .git entry for worktree");
            return MetadataDir::Unavailable;
        }
    };

    if meta.is_dir() {
        return MetadataDir::Resolved(dot_git);
    }

    match fs::read_to_string(&dot_git).await {
        Ok(content) => match parse_gitdir_file(&content) {
            Some(target) => {
                let target = PathBuf::from(target);
                let resolved = if target.is_absolute() {
                    target
                } else {
                    worktree.join(target)
                };
                MetadataDir::Resolved(resolved)
            }
            None => {
                warn!(path = %dot_git.display(), "Malformed .git file");
                MetadataDir::Unavailable
            }
        },
        Err(e) => {
            warn!(path = %dot_git.display(), error = %e, "Failed to read .git file");
            MetadataDir::Unavailable
        }
    }
}

/// Extracts the target of a `gitdir:` line.
fn parse_gitdir_file(content: &str) -> Option<&str> {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("gitdir:"))
        .map(str::trim)
        .filter(|target| !target.is_empty())
}

async fn read_note_file(path: &Path) -> std::io::Result<Option<Note>> {
    let meta = fs::metadata(path).await?;
    let content = fs::read_to_string(path).await?;

    let Some(text) = last_note_line(&content) else {
        return Ok(None);
    };
    let timestamp = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(Some(Note { text, timestamp }))
}

/// Returns the last non-empty line of `content`, truncated for display.
#[must_use]
pub fn last_note_line(content: &str) -> Option<String> {
    let line = content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())?;
    Some(truncate_note(line))
}

fn truncate_note(line: &str) -> String {
    if line.chars().count() <= MAX_NOTE_CHARS {
        return line.to_string();
    }
    let keep = MAX_NOTE_CHARS - ELLIPSIS.len();
    let mut truncated: String = line.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn worktree_with_git_dir() -> TempDir {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir(dir.path().join(".git")).expect("Failed to create .git");
        dir
    }

    #[test]
    fn last_line_wins() {
        assert_eq!(
            last_note_line("line one\nline two\n"),
            Some("line two".to_string())
        );
    }

    #[test]
    fn trailing_blank_lines_are_skipped() {
        assert_eq!(
            last_note_line("first\nsecond\n\n   \n"),
            Some("second".to_string())
        );
    }

    #[test]
    fn whitespace_only_is_no_note() {
        assert_eq!(last_note_line("  \n\t\n"), None);
        assert_eq!(last_note_line(""), None);
    }

    #[test]
    fn long_lines_are_truncated_with_ellipsis() {
        let long = "x".repeat(600);
        let note = last_note_line(&long).unwrap();
        assert_eq!(note.chars().count(), MAX_NOTE_CHARS);
        assert!(note.ends_with("..."));
    }

    #[test]
    fn exactly_max_length_is_kept() {
        let exact = "y".repeat(MAX_NOTE_CHARS);
        assert_eq!(last_note_line(&exact), Some(exact));
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let long = "é".repeat(700);
        let note = last_note_line(&long).unwrap();
        assert_eq!(note.chars().count(), MAX_NOTE_CHARS);
    }

    #[test]
    fn gitdir_line_is_parsed() {
        assert_eq!(
            parse_gitdir_file("gitdir: /repo/.git/worktrees/feature\n"),
            Some("/repo/.git/worktrees/feature")
        );
        assert_eq!(parse_gitdir_file("nonsense"), None);
        assert_eq!(parse_gitdir_file("gitdir:   \n"), None);
    }

    #[tokio::test]
    async fn resolves_plain_git_directory() {
        let dir = worktree_with_git_dir();
        let resolved = resolve_metadata_dir(dir.path()).await;
        assert_eq!(resolved, MetadataDir::Resolved(dir.path().join(".git")));
    }

    #[tokio::test]
    async fn resolves_linked_worktree_gitdir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("main/.git/worktrees/feature");
        std::fs::create_dir_all(&target).unwrap();
        let worktree = dir.path().join("feature");
        std::fs::create_dir_all(&worktree).unwrap();
        std::fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", target.display()),
        )
        .unwrap();

        assert_eq!(
            resolve_metadata_dir(&worktree).await,
            MetadataDir::Resolved(target)
        );
    }

    #[tokio::test]
    async fn missing_git_entry_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_metadata_dir(dir.path()).await, MetadataDir::Unavailable);
    }

    #[tokio::test]
    async fn reads_last_line_of_note() {
        let dir = worktree_with_git_dir();
        std::fs::write(dir.path().join(".git/treeline-note"), "line one\nline two\n").unwrap();

        let reader = NoteReader::new(dir.path());
        let note = reader.read(DEFAULT_NOTE_FILENAME).await.unwrap();
        assert_eq!(note.text, "line two");
    }

    #[tokio::test]
    async fn whitespace_note_file_is_absent() {
        let dir = worktree_with_git_dir();
        std::fs::write(dir.path().join(".git/treeline-note"), "   \n\n").unwrap();

        let reader = NoteReader::new(dir.path());
        assert_eq!(reader.read(DEFAULT_NOTE_FILENAME).await, None);
    }

    #[tokio::test]
    async fn missing_note_file_is_absent() {
        let dir = worktree_with_git_dir();
        let reader = NoteReader::new(dir.path());
        assert_eq!(reader.read(DEFAULT_NOTE_FILENAME).await, None);
    }

    #[tokio::test]
    async fn filename_override_is_honoured() {
        let dir = worktree_with_git_dir();
        std::fs::write(dir.path().join(".git/agent-status"), "deploying\n").unwrap();

        let reader = NoteReader::new(dir.path());
        assert_eq!(reader.read(DEFAULT_NOTE_FILENAME).await, None);
        let note = reader.read("agent-status").await.unwrap();
        assert_eq!(note.text, "deploying");
    }

    #[tokio::test]
    async fn metadata_dir_is_cached() {
        let dir = worktree_with_git_dir();
        let reader = NoteReader::new(dir.path());
        let first = reader.metadata_dir().await.clone();

        std::fs::remove_dir(dir.path().join(".git")).unwrap();
        assert_eq!(reader.metadata_dir().await, &first);
    }
}
