//! Service checkpoint: when the outer loop last completed a cycle.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::blob::{read_json_blob, write_json_blob};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCheckpoint {
    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

impl ServiceCheckpoint {
    /// Missing or unreadable checkpoint means "never ran".
    pub async fn load(path: &Path) -> Self {
        match read_json_blob(path).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => Self::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "checkpoint unreadable, treating as first run");
                Self::default()
            }
        }
    }

    pub async fn save(&self, path: &PathBuf) -> anyhow::Result<()> {
        write_json_blob(path, self).await
    }
}
