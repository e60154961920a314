//! Append-only ledger of already-notified job identifiers.

use std::collections::HashSet;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::blob::{read_json_blob, write_json_blob};

/// Derive a stable short id from a canonical locator fragment.
///
/// Equal fragments yield equal ids without storing raw locators. Known
/// limitation: if the upstream URL structure changes, historical ids stop
/// matching and previously seen jobs may notify again.
pub fn derive_job_id(fragment: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fragment.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Persisted set of job ids that have already been handed to the
/// notification channel. Unbounded, no expiry: never re-notify.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    ids: HashSet<String>,
}

impl DedupLedger {
    /// Load the ledger, starting empty when the backing file is missing or
    /// cannot be parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = match read_json_blob::<Vec<String>>(&path).await {
            Ok(Some(list)) => list.into_iter().collect(),
            Ok(None) => HashSet::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "dedup ledger unreadable, starting empty");
                HashSet::new()
            }
        };
        Self { path, ids }
    }

    pub fn has(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn add(&mut self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Persist the full id set. Called before dispatch is attempted: a crash
    /// between persist and notify loses a notification, never duplicates one.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let mut list: Vec<&String> = self.ids.iter().collect();
        list.sort();
        write_json_blob(&self.path, &list).await
    }
}
