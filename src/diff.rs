//! Commit list → changed path sets

use serde::Serialize;
use std::collections::BTreeSet;

use crate::webhook::CommitRecord;

/// Deduplicated paths touched by one delivery.
///
/// Union semantics: a path added in one commit and removed in a later one
/// lands in both sets. Uploads of a path that no longer exists are skipped
/// by the publisher, so the delete wins in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeSet {
    pub to_upload: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
}

impl FileChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }

    /// Paths present in both sets.
    pub fn conflicts(&self) -> impl Iterator<Item = &String> {
        self.to_upload.intersection(&self.to_delete)
    }
}

/// Flatten and deduplicate each category across all commits, then apply the
/// optional prefix filter.
pub fn extract_changes(commits: &[CommitRecord], prefix: Option<&str>) -> FileChangeSet {
    let uploads = commits
        .iter()
        .flat_map(|c| c.added.iter().chain(c.modified.iter()));
    let deletes = commits.iter().flat_map(|c| c.removed.iter());

    FileChangeSet {
        to_upload: strip_prefix(prefix, uploads),
        to_delete: strip_prefix(prefix, deletes),
    }
}

/// Keep only paths under `<prefix>/`, with the prefix and separator removed.
/// Without a prefix every path passes through unchanged.
pub fn strip_prefix<'a, I>(prefix: Option<&str>, paths: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let prefix = prefix.filter(|p| !p.is_empty());
    paths
        .into_iter()
        .filter_map(|path| match prefix {
            Some(p) => path
                .strip_prefix(p)
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .map(str::to_string),
            None => Some(path.clone()),
        })
        .collect()
}
