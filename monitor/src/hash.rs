//! Change-set digests used for change detection and summary dedup.

use sha2::{Digest, Sha256};

use crate::types::ChangeSet;

/// Hex-encoded SHA-256 digest of a change-set.
///
/// Entries are sorted by path (then status and line counts) before hashing,
/// so the digest does not depend on the order the fetcher reported them in.
#[must_use]
pub fn state_hash(change_set: &ChangeSet) -> String {
    let mut entries: Vec<_> = change_set
        .changes
        .iter()
        .map(|c| (c.path.as_str(), c.status.as_str(), c.insertions, c.deletions))
        .collect();
    entries.sort_unstable();

    let mut hasher = Sha256::new();
    for (path, status, insertions, deletions) in entries {
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(status.as_bytes());
        hasher.update([0]);
        hasher.update(insertions.to_le_bytes());
        hasher.update(deletions.to_le_bytes());
        hasher.update([b'\n']);
    }
    hex::encode(hasher.finalize())
}
