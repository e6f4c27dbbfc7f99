//! Issue-number extraction from branch names.
//!
//! The regex pass in [`extract_issue_number`] is synchronous and always
//! takes precedence. When it yields nothing the monitor may ask an
//! [`IssueResolver`] (for instance an AI-assisted lookup) in the background.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

// Ordered from most to least explicit; the first match wins.
static RE_ISSUE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[/_-])issues?[-_/]?(\d+)").unwrap());
static RE_GH_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[/_-])gh[-_](\d+)").unwrap());
static RE_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\d+)").unwrap());
static RE_TYPED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][\w.-]*/(\d+)(?:[-_/]|$)").unwrap());
static RE_LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)[-_]").unwrap());

/// Extracts an issue number from `branch` using naming conventions.
///
/// Recognises `issue-123`, `gh-123`, `#123`, `fix/123-...`,
/// `feature/123-...` and `123-...`. The reference branch never carries an
/// issue number.
#[must_use]
pub fn extract_issue_number(branch: &str, main_branch: &str) -> Option<u64> {
    let branch = branch.trim();
    if branch.is_empty() || branch == main_branch {
        return None;
    }

    [
        &*RE_ISSUE_PREFIX,
        &*RE_GH_PREFIX,
        &*RE_HASH,
        &*RE_TYPED_NUMBER,
        &*RE_LEADING_NUMBER,
    ]
    .iter()
    .find_map(|re| {
        re.captures(branch)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .filter(|n| *n > 0)
    })
}

/// Slow-path issue lookup used when the branch name carries no number.
#[async_trait]
pub trait IssueResolver: Send + Sync {
    /// Returns the issue number for `branch`, or `None` if none was found.
    async fn resolve(&self, path: &Path, branch: &str) -> Option<u64>;
}

/// Resolver that never finds anything.
#[derive(Debug, Clone, Default)]
pub struct NoopIssueResolver;

#[async_trait]
impl IssueResolver for NoopIssueResolver {
    async fn resolve(&self, _path: &Path, _branch: &str) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(branch: &str) -> Option<u64> {
        extract_issue_number(branch, "main")
    }

    #[test]
    fn test_issue_prefix() {
        assert_eq!(extract("issue-123"), Some(123));
        assert_eq!(extract("feature/issue-42-login"), Some(42));
        assert_eq!(extract("Issues/7"), Some(7));
    }

    #[test]
    fn test_gh_prefix() {
        assert_eq!(extract("gh-88"), Some(88));
        assert_eq!(extract("bugfix/GH_12-crash"), Some(12));
    }

    #[test]
    fn test_typed_number() {
        assert_eq!(extract("fix/123-null-deref"), Some(123));
        assert_eq!(extract("feature/456-new-ui"), Some(456));
        assert_eq!(extract("feature/456"), Some(456));
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(extract("789-cleanup"), Some(789));
    }

    #[test]
    fn test_hash_number() {
        assert_eq!(extract("wip#31"), Some(31));
    }

    #[test]
    fn test_explicit_pattern_wins() {
        assert_eq!(extract("12-issue-34"), Some(34));
    }

    #[test]
    fn test_no_number() {
        assert_eq!(extract("feature/login-page"), None);
        assert_eq!(extract("release-v2"), None);
        assert_eq!(extract("fix/v2-parser"), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn test_main_branch_never_matches() {
        assert_eq!(extract_issue_number("123-main", "123-main"), None);
        assert_eq!(extract_issue_number("main", "main"), None);
    }

    #[test]
    fn test_zero_is_ignored() {
        assert_eq!(extract("issue-0"), None);
    }

    #[tokio::test]
    async fn test_noop_resolver() {
        let resolver = NoopIssueResolver;
        assert_eq!(resolver.resolve(Path::new("/repo"), "anything").await, None);
    }
}
