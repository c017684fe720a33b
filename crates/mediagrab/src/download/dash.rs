use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::file::download_file;
use super::hls::fetch_bytes;
use crate::error::{DownloadError, Result};
use crate::manifest::{dash_base_url, detect_dash_drm, is_segmented, resolve_uri};
use crate::progress::ProgressHandle;
use crate::retry::RetryExecutor;

/// Download the single representation an on-demand MPD points at.
///
/// Protected manifests and templated (multi-segment) manifests are refused.
pub(crate) async fn download_dash(
    executor: &RetryExecutor,
    url: &Url,
    output: &Path,
    progress: &ProgressHandle,
    label: &str,
    checkpoint_interval: u64,
    token: &CancellationToken,
) -> Result<u64> {
    let mpd = fetch_bytes(executor, url, "fetching manifest", token).await?;

    let (protected, system) = detect_dash_drm(&mpd);
    if protected {
        return Err(DownloadError::Drm {
            url: url.to_string(),
            system,
        });
    }
    if is_segmented(&mpd) {
        return Err(DownloadError::unsupported(
            url.as_str(),
            "segmented DASH manifests are not supported",
        ));
    }

    let base = dash_base_url(&mpd)
        .ok_or_else(|| DownloadError::unsupported(url.as_str(), "manifest has no BaseURL"))?;
    let media_url = resolve_uri(url, &base)?;
    debug!(manifest = %url, media = %media_url, "Resolved DASH representation");

    download_file(
        executor,
        &media_url,
        output,
        progress,
        label,
        checkpoint_interval,
        token,
    )
    .await
}
