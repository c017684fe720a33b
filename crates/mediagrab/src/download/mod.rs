//! # Download orchestration
//!
//! Each requested item runs through the same pipeline:
//!
//! 1. **Probe**: classify the URL (stream source, extension, HEAD/GET).
//! 2. **Resolve path**: render the output template and settle conflicts with
//!    an existing file, or with an item of the same run still writing that
//!    name, through the run's [`DuplicateSession`].
//! 3. **Download**: plain file, HLS playlist or single-file DASH manifest,
//!    always into `<output>.part` with resume checkpoints.
//! 4. **Finalize**: rename, validate the container, drop the checkpoint and
//!    write the metadata sidecar.
//!
//! Failures are reported per item as an [`ItemOutcome`]; one item failing
//! never stops its siblings in [`Downloader::download_all`].

mod dash;
mod file;
mod finalize;
mod hls;

pub use file::part_path;
pub use finalize::validate_container;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::create_client;
use crate::config::DownloaderConfig;
use crate::duplicate::{DuplicatePolicy, DuplicateSession, handle_existing_path};
use crate::error::{DownloadError, ErrorCategory, Result};
use crate::metadata::{self, CompletionStatus, MetadataSidecar};
use crate::naming::render_template;
use crate::probe::{MediaKind, probe};
use crate::progress::ProgressHandle;
use crate::retry::RetryExecutor;
use crate::source::StreamSource;

/// One item to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Overrides the configured policy for this item
    pub duplicate_policy: Option<DuplicatePolicy>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            duplicate_policy: None,
        }
    }

    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = Some(policy);
        self
    }
}

/// What happened to one item.
#[derive(Debug)]
pub struct ItemOutcome {
    pub url: String,
    pub bytes_written: u64,
    pub output_path: Option<PathBuf>,
    pub skipped: bool,
    pub error: Option<DownloadError>,
}

impl ItemOutcome {
    fn completed(url: &str, output_path: PathBuf, bytes_written: u64) -> Self {
        Self {
            url: url.to_owned(),
            bytes_written,
            output_path: Some(output_path),
            skipped: false,
            error: None,
        }
    }

    fn skipped(url: &str, output_path: PathBuf) -> Self {
        Self {
            url: url.to_owned(),
            bytes_written: 0,
            output_path: Some(output_path),
            skipped: true,
            error: None,
        }
    }

    fn failed(url: &str, error: DownloadError) -> Self {
        Self {
            url: url.to_owned(),
            bytes_written: 0,
            output_path: None,
            skipped: false,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(DownloadError::category)
    }
}

pub struct Downloader {
    config: Arc<DownloaderConfig>,
    executor: RetryExecutor,
    progress: ProgressHandle,
    sources: Vec<Arc<dyn StreamSource>>,
}

impl Downloader {
    /// Build a downloader with its own HTTP client.
    pub fn new(config: DownloaderConfig, progress: ProgressHandle) -> Result<Self> {
        let client = create_client(&config)?;
        let executor = RetryExecutor::new(Arc::new(client), config.retry);
        Ok(Self::with_executor(config, executor, progress))
    }

    pub fn with_executor(config: DownloaderConfig, executor: RetryExecutor, progress: ProgressHandle) -> Self {
        Self {
            config: Arc::new(config),
            executor,
            progress,
            sources: Vec::new(),
        }
    }

    /// Register an extractor; earlier registrations are consulted first.
    pub fn register_source(&mut self, source: Arc<dyn StreamSource>) {
        debug!(source = source.name(), "Registered stream source");
        self.sources.push(source);
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Download one item. Never fails as a whole; see [`ItemOutcome::error`].
    #[instrument(name = "item", skip_all, fields(url = %request.url))]
    pub async fn download(
        &self,
        request: &DownloadRequest,
        session: &DuplicateSession,
        token: &CancellationToken,
    ) -> ItemOutcome {
        let outcome = match self.run(request, session, token).await {
            Ok(outcome) => outcome,
            Err(e) => ItemOutcome::failed(&request.url, e),
        };

        match &outcome.error {
            None if outcome.skipped => info!("Skipped, output already exists"),
            None => info!(
                bytes = outcome.bytes_written,
                path = ?outcome.output_path,
                "Download complete"
            ),
            Some(DownloadError::Cancelled) => info!("Download cancelled"),
            Some(e) => warn!(category = %e.category(), error = %e, "Download failed"),
        }
        outcome
    }

    /// Download all `requests` with at most `max_concurrent_items` in flight.
    /// Outcomes come back in request order.
    pub async fn download_all(
        &self,
        requests: &[DownloadRequest],
        session: &DuplicateSession,
        token: &CancellationToken,
    ) -> Vec<ItemOutcome> {
        let limit = self.config.max_concurrent_items.max(1);
        info!(items = requests.len(), concurrency = limit, "Starting batch");
        futures::stream::iter(requests)
            .map(|request| self.download(request, session, token))
            .buffered(limit)
            .collect()
            .await
    }

    async fn run(
        &self,
        request: &DownloadRequest,
        session: &DuplicateSession,
        token: &CancellationToken,
    ) -> Result<ItemOutcome> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let probed = probe(
            &request.url,
            &self.executor,
            &self.sources,
            self.config.scrape_metadata,
            token,
        )
        .await?;
        debug!(kind = probed.kind.as_str(), media = %probed.url, "Probed");

        let ext = probed.kind.extension().to_owned();
        let relative = render_template(&self.config.output_template, &probed.metadata, &ext);
        let output = self.config.output_dir.join(relative);
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io("creating directory", parent, e))?;
        }

        let base = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let policy = request.duplicate_policy.unwrap_or(self.config.duplicate_policy);
        let resolution = handle_existing_path(&output, &base, policy, session).await?;
        if resolution.skip {
            return Ok(ItemOutcome::skipped(&request.url, resolution.path));
        }
        let output = resolution.path;
        // Keeps other items of the session off this output until we return.
        let _reservation = resolution.reservation;
        let label = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(base);

        let executor = match &probed.transport {
            Some(transport) => self.executor.with_transport(Arc::clone(transport)),
            None => self.executor.clone(),
        };

        let bytes_written = match &probed.kind {
            MediaKind::Direct { .. } => {
                file::download_file(
                    &executor,
                    &probed.url,
                    &output,
                    &self.progress,
                    &label,
                    self.config.checkpoint_interval,
                    token,
                )
                .await?
            }
            MediaKind::Hls => {
                hls::download_hls(&executor, &probed.url, &output, &self.progress, &label, token).await?
            }
            MediaKind::Dash => {
                dash::download_dash(
                    &executor,
                    &probed.url,
                    &output,
                    &self.progress,
                    &label,
                    self.config.checkpoint_interval,
                    token,
                )
                .await?
            }
        };

        finalize::finalize(&output, &ext).await?;

        if self.config.write_metadata {
            let sidecar = MetadataSidecar {
                title: probed.metadata.title.clone(),
                author: probed.metadata.author.clone(),
                id: probed.metadata.id.clone(),
                status: CompletionStatus::Completed,
                source_url: probed.metadata.source_url.clone(),
                output_path: output.clone(),
                bytes_written,
                media_kind: probed.kind.as_str().to_owned(),
                completed_at: Utc::now(),
            };
            metadata::write_sidecar(&output, &sidecar).await?;
        }

        Ok(ItemOutcome::completed(&request.url, output, bytes_written))
    }
}
