//! HLS: resolve the best variant, refuse encrypted playlists, then append the
//! media segments in order to a single `.part` file.

use std::path::Path;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::file::{PartWriter, copy_body, part_path};
use crate::error::{DownloadError, ManifestError, Result};
use crate::manifest::{Manifest, detect_hls_drm, parse_hls_manifest, resolve_uri};
use crate::progress::ProgressHandle;
use crate::resume::{self, ResumeState};
use crate::retry::RetryExecutor;

/// GET `url` and return the whole body.
pub(crate) async fn fetch_bytes(
    executor: &RetryExecutor,
    url: &Url,
    operation: &'static str,
    token: &CancellationToken,
) -> Result<Bytes> {
    let request = executor
        .client()
        .get(url.clone())
        .build()
        .map_err(|e| DownloadError::network(url.as_str(), e))?;
    let response = executor.execute(request, token).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::from_status(status, url.as_str(), operation));
    }
    tokio::select! {
        _ = token.cancelled() => Err(DownloadError::Cancelled),
        body = response.bytes() => body.map_err(|e| DownloadError::network(url.as_str(), e)),
    }
}

/// Fetch `url` and follow a master playlist to its best variant.
pub(crate) async fn resolve_media_playlist(
    executor: &RetryExecutor,
    url: &Url,
    token: &CancellationToken,
) -> Result<(Url, Manifest)> {
    let data = fetch_bytes(executor, url, "fetching playlist", token).await?;
    let manifest = parse_hls_manifest(&data)?;
    if !manifest.is_master() {
        return Ok((url.clone(), manifest));
    }

    let variant = manifest.best_variant().ok_or(ManifestError::Empty)?;
    let variant_url = resolve_uri(url, &variant.uri)?;
    debug!(
        master = %url,
        variant = %variant_url,
        bandwidth = variant.bandwidth,
        resolution = variant.resolution.as_deref().unwrap_or("-"),
        "Selected variant"
    );

    let data = fetch_bytes(executor, &variant_url, "fetching variant playlist", token).await?;
    let media = parse_hls_manifest(&data)?;
    if media.is_master() {
        return Err(DownloadError::unsupported(
            variant_url.as_str(),
            "variant playlist is itself a master playlist",
        ));
    }
    Ok((variant_url, media))
}

/// Download every segment of the playlist at `url` into `<output>.part`.
pub(crate) async fn download_hls(
    executor: &RetryExecutor,
    url: &Url,
    output: &Path,
    progress: &ProgressHandle,
    label: &str,
    token: &CancellationToken,
) -> Result<u64> {
    let (media_url, manifest) = resolve_media_playlist(executor, url, token).await?;

    let (encrypted, method) = detect_hls_drm(&manifest);
    if encrypted {
        return Err(DownloadError::Drm {
            url: media_url.to_string(),
            system: method,
        });
    }

    let segments = manifest.segments();
    if segments.is_empty() {
        return Err(ManifestError::Empty.into());
    }
    if !manifest.end_list() {
        warn!(url = %media_url, "Playlist has no end marker, downloading the segments listed now");
    }

    // Checkpoints are keyed by the requested URL, which stays stable across runs.
    let (offset, skip) = match resume::load(output, url.as_str()).await {
        Some(ResumeState {
            bytes_written,
            segments_completed: Some(done),
            ..
        }) if done <= segments.len() => (bytes_written, done),
        Some(_) => {
            warn!(url = %url, "Resume state does not describe segments, starting from zero");
            (0, 0)
        }
        None => (0, 0),
    };
    let part = part_path(output);
    let on_disk = tokio::fs::metadata(&part).await.map(|m| m.len()).unwrap_or(0);
    let (offset, skip) = if on_disk < offset { (0, 0) } else { (offset, skip) };
    if skip > 0 {
        info!(url = %url, segments = skip, offset, "Resuming playlist download");
    }

    let mut writer = PartWriter::open(&part, offset).await?;
    writer.attach(progress.add_task_at(label, None, offset));

    for (index, segment) in segments.iter().enumerate().skip(skip) {
        let segment_url = resolve_uri(&media_url, &segment.uri)?;
        let request = executor
            .client()
            .get(segment_url.clone())
            .build()
            .map_err(|e| DownloadError::network(segment_url.as_str(), e))?;
        let response = executor.execute(request, token).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::from_status(
                status,
                segment_url.as_str(),
                "fetching segment",
            ));
        }

        copy_body(response, &mut writer, &segment_url, None, token).await?;
        writer.commit().await?;
        let state = ResumeState::new(url.as_str(), writer.written()).with_segments(index + 1);
        resume::save(output, &state).await?;
    }

    let written = writer.written();
    debug!(url = %url, segments = segments.len(), bytes = written, "Playlist complete");
    writer.finish();
    Ok(written)
}
