//! Resumable, retry-aware media download engine.
//!
//! Direct files, HLS playlists and single-file DASH manifests are written
//! through `.part` files with byte-offset checkpoints, so an interrupted run
//! picks up where it stopped. Several items can run at once under one
//! [`DuplicateSession`] and one progress display.

pub mod client;
pub mod config;
pub mod download;
pub mod duplicate;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod metadata;
pub mod naming;
pub mod probe;
pub mod progress;
pub mod resume;
pub mod retry;
pub mod source;

pub use client::{HttpTransport, create_client};
pub use config::{DownloaderConfig, DownloaderConfigBuilder, ProxyConfig, RetryPolicy};
pub use download::{DownloadRequest, Downloader, ItemOutcome};
pub use duplicate::{
    ApplyAllDecision, DuplicateChoice, DuplicatePolicy, DuplicateSession, FixedPrompter,
    PathReservation, PathResolution, PromptAnswer, Prompter, TerminalPrompter, handle_existing_path,
};
pub use error::{DownloadError, ErrorCategory, ManifestError};
pub use metadata::ItemMetadata;
pub use probe::MediaKind;
pub use progress::{ProgressConfig, ProgressHandle, ProgressManager, ProgressSink, TaskHandle};
pub use resume::ResumeState;
pub use retry::RetryExecutor;
pub use source::{SourceItem, StreamFormat, StreamSource};
