//! Atomic JSON blob persistence for the ledgers and checkpoint files.

use std::path::Path;

use anyhow::Context;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Read a JSON blob, returning `None` when the file does not exist.
///
/// A present-but-unparseable file is an error here; callers that tolerate
/// corruption (the ledgers) catch it and start empty.
pub async fn read_json_blob<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(Some(value))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
    }
}

/// Write a JSON blob via temp file + rename so a crash never leaves a
/// half-written state file behind.
pub async fn write_json_blob<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
    let mut file = fs::File::create(&temp_path)
        .await
        .with_context(|| format!("opening temp state file {}", temp_path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing temp state file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp state file {}", temp_path.display()))?;
    drop(file);

    fs::rename(&temp_path, path).await.with_context(|| {
        format!(
            "atomically renaming state file {} -> {}",
            temp_path.display(),
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_blob_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        let got: Option<Vec<String>> = read_json_blob(&dir.path().join("absent.json"))
            .await
            .expect("read");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn blob_round_trips_and_creates_parent_dirs() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state/nested/ids.json");
        write_json_blob(&path, &vec!["a".to_string(), "b".to_string()])
            .await
            .expect("write");
        let got: Option<Vec<String>> = read_json_blob(&path).await.expect("read");
        assert_eq!(got, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn corrupt_blob_is_an_error_not_a_default() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ids.json");
        tokio::fs::write(&path, b"{not json").await.expect("write");
        let got: anyhow::Result<Option<Vec<String>>> = read_json_blob(&path).await;
        assert!(got.is_err());
    }
}
