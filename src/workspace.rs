//! Working directory layout and per-repository leases

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Hands out working directories and serializes deliveries per repository.
///
/// Directories live at `<root>/<owner>__<repo>/<revision>` and are never
/// removed here.
pub struct WorkspaceLeases {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one repository's working directories until dropped
pub struct WorkspaceLease {
    _guard: OwnedMutexGuard<()>,
}

impl WorkspaceLeases {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Directory for `revision` of `full_name`. Same inputs, same directory.
    pub fn directory_for(&self, full_name: &str, revision: &str) -> PathBuf {
        self.root
            .join(sanitize(&full_name.replace('/', "__")))
            .join(sanitize(revision))
    }

    /// Wait until no other delivery holds `full_name`, then hold it.
    ///
    /// Locks nobody holds or waits on are dropped first, so the table only
    /// grows with the number of repositories in flight.
    pub async fn acquire(&self, full_name: &str) -> WorkspaceLease {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(full_name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        debug!("Waiting for workspace lease on {}", full_name);
        let guard = lock.lock_owned().await;
        debug!("Acquired workspace lease on {}", full_name);
        WorkspaceLease { _guard: guard }
    }
}

/// One safe path component: anything outside `[A-Za-z0-9._-]` becomes `_`
/// and leading dots are replaced so `.`/`..` cannot appear.
fn sanitize(component: &str) -> String {
    let mut out: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while out.starts_with('.') {
        out.replace_range(0..1, "_");
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}
