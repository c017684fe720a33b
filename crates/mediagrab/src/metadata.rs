use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::METADATA_SUFFIX;
use crate::error::{DownloadError, Result};

/// Descriptive fields gathered while probing an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub id: Option<String>,
    pub source_url: String,
}

impl ItemMetadata {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            source_url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
}

/// Contents of `<output>.meta.json`, read by the tag-embedding step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSidecar {
    pub title: Option<String>,
    pub author: Option<String>,
    pub id: Option<String>,
    pub status: CompletionStatus,
    pub source_url: String,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub media_kind: String,
    pub completed_at: DateTime<Utc>,
}

pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(METADATA_SUFFIX);
    PathBuf::from(name)
}

pub async fn write_sidecar(output: &Path, sidecar: &MetadataSidecar) -> Result<PathBuf> {
    let path = sidecar_path(output);
    let json = serde_json::to_vec_pretty(sidecar).map_err(|e| DownloadError::Io {
        op: "serializing metadata",
        path: path.clone(),
        source: e.into(),
    })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| DownloadError::io("writing metadata", &path, e))?;
    debug!(path = %path.display(), "Wrote metadata sidecar");
    Ok(path)
}
