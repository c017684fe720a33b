//! Byte-offset checkpoints persisted next to the output file.
//!
//! A checkpoint only ever records bytes that were flushed to the `.part`
//! file, so resuming from it never skips or duplicates data. Loading is
//! forgiving (any problem means "start from zero"), saving is not.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RESUME_SUFFIX;
use crate::error::{DownloadError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub url: String,
    pub bytes_written: u64,
    /// Completed HLS segments, absent for plain files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments_completed: Option<usize>,
}

impl ResumeState {
    pub fn new(url: impl Into<String>, bytes_written: u64) -> Self {
        Self {
            url: url.into(),
            bytes_written,
            segments_completed: None,
        }
    }

    pub fn with_segments(mut self, segments_completed: usize) -> Self {
        self.segments_completed = Some(segments_completed);
        self
    }
}

/// `<output><RESUME_SUFFIX>`
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(RESUME_SUFFIX);
    PathBuf::from(name)
}

/// Load the checkpoint for `output` if it belongs to `url`.
pub async fn load(output: &Path, url: &str) -> Option<ResumeState> {
    let path = sidecar_path(output);
    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read resume state, starting from zero");
            return None;
        }
    };

    let state: ResumeState = match serde_json::from_slice(&content) {
        Ok(state) => state,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt resume state, starting from zero");
            return None;
        }
    };

    if state.url != url {
        warn!(
            path = %path.display(),
            saved_url = %state.url,
            url = %url,
            "Resume state belongs to a different URL, starting from zero"
        );
        return None;
    }

    debug!(path = %path.display(), bytes_written = state.bytes_written, "Loaded resume state");
    Some(state)
}

/// Persist `state` for `output`. Written to a temp file and renamed so a
/// crash never leaves a half-written checkpoint.
pub async fn save(output: &Path, state: &ResumeState) -> Result<()> {
    let path = sidecar_path(output);
    let content = serde_json::to_vec_pretty(state).map_err(|e| DownloadError::ResumeSave {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &content)
        .await
        .map_err(|e| DownloadError::ResumeSave {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| DownloadError::ResumeSave {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    debug!(path = %path.display(), bytes_written = state.bytes_written, "Saved resume state");
    Ok(())
}

/// Delete the checkpoint for `output`; a missing file is fine.
pub async fn remove(output: &Path) -> Result<()> {
    let path = sidecar_path(output);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::io("removing resume state", &path, e)),
    }
}
