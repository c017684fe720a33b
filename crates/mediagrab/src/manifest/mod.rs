//! Adaptive-streaming manifests: HLS playlist parsing and DRM detection for HLS and DASH.

mod dash;
mod hls;

pub use dash::{dash_base_url, detect_dash_drm, is_segmented};
pub use hls::{
    Encryption, Manifest, Segment, Variant, detect_hls_drm, parse_attributes,
    parse_hls_manifest,
};

use url::Url;

use crate::error::{DownloadError, Result};

/// Resolve a manifest-relative URI against the manifest's own URL.
pub fn resolve_uri(base: &Url, uri: &str) -> Result<Url> {
    base.join(uri)
        .map_err(|e| DownloadError::invalid_url(uri, e.to_string()))
}
