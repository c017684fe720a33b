use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use serde::Serialize;

/// Coarse classification reported to callers alongside the underlying cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidUrl,
    Restricted,
    Network,
    Filesystem,
    Unsupported,
    Cancelled,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidUrl => "invalid_url",
            Self::Restricted => "restricted",
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::Unsupported => "unsupported",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("access to {url} is restricted (HTTP {status})")]
    Restricted { url: String, status: StatusCode },

    #[error("HTTP request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist resume state {}: {reason}", path.display())]
    ResumeSave { path: PathBuf, reason: String },

    #[error("unsupported content for {url}: {reason}")]
    Unsupported { url: String, reason: String },

    #[error("content protected by DRM ({system}) at {url}")]
    Drm { url: String, system: String },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("downloaded file {} failed validation: {reason}", path.display())]
    Validation { path: PathBuf, reason: String },

    #[error("prompt failed: {reason}")]
    Prompt { reason: String },

    #[error("stream source error: {reason}")]
    Source { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    /// Map a non-success status to `Restricted` (401/403) or `HttpStatus`.
    pub fn from_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::Restricted {
                url: url.into(),
                status,
            }
        } else {
            Self::http_status(status, url, operation)
        }
    }

    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn unsupported(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(path: &Path, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::InvalidUrl { .. } => ErrorCategory::InvalidUrl,
            Self::Restricted { .. } => ErrorCategory::Restricted,
            Self::Network { .. } | Self::HttpStatus { .. } => ErrorCategory::Network,
            Self::Io { .. } | Self::ResumeSave { .. } | Self::Prompt { .. } => {
                ErrorCategory::Filesystem
            }
            Self::Unsupported { .. }
            | Self::Drm { .. }
            | Self::Manifest(_)
            | Self::Validation { .. }
            | Self::Source { .. } => ErrorCategory::Unsupported,
        }
    }

    /// Transport-level failures are the only ones the retry executor repeats.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network { source, .. } if is_transport_error(source))
    }
}

/// Connection, timeout and request (including TLS handshake) failures.
pub fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("data is not an HLS playlist (missing #EXTM3U)")]
    NotHls,
    #[error("playlist contains neither variants nor segments")]
    Empty,
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_restricted() {
        let err = DownloadError::from_status(StatusCode::FORBIDDEN, "http://x/y", "probe");
        assert_eq!(err.category(), ErrorCategory::Restricted);
        let err = DownloadError::from_status(StatusCode::UNAUTHORIZED, "http://x/y", "probe");
        assert_eq!(err.category(), ErrorCategory::Restricted);
    }

    #[test]
    fn other_statuses_are_network() {
        let err = DownloadError::from_status(StatusCode::NOT_FOUND, "http://x/y", "probe");
        assert_eq!(err.category(), ErrorCategory::Network);
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn validation_keeps_path_in_message() {
        let err = DownloadError::validation(Path::new("/tmp/a.mp4"), "missing ftyp box");
        assert_eq!(err.category(), ErrorCategory::Unsupported);
        assert!(err.to_string().contains("/tmp/a.mp4"));
    }

    #[test]
    fn manifest_errors_convert() {
        let err: DownloadError = ManifestError::NotHls.into();
        assert_eq!(err.category(), ErrorCategory::Unsupported);
    }
}
