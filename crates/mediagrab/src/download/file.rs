//! Plain single-request downloads into `<output>.part`, resumable by byte range.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PART_SUFFIX;
use crate::error::{DownloadError, Result};
use crate::progress::{ProgressHandle, TaskHandle};
use crate::resume::{self, ResumeState};
use crate::retry::RetryExecutor;

/// `<output><PART_SUFFIX>`
pub fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Append-only writer over a `.part` file that reports progress as it goes.
pub(crate) struct PartWriter {
    file: File,
    path: PathBuf,
    written: u64,
    task: Option<TaskHandle>,
}

impl PartWriter {
    /// Open (or create) `path` in append mode, cut back to `offset` bytes.
    pub(crate) async fn open(path: &Path, offset: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| DownloadError::io("opening", path, e))?;
        file.set_len(offset)
            .await
            .map_err(|e| DownloadError::io("truncating", path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            written: offset,
            task: None,
        })
    }

    pub(crate) fn attach(&mut self, task: TaskHandle) {
        self.task = Some(task);
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    pub(crate) async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| DownloadError::io("writing", &self.path, e))?;
        self.written += chunk.len() as u64;
        if let Some(task) = self.task.as_mut() {
            task.update(self.written);
        }
        Ok(())
    }

    /// Flush and sync; bytes before this point survive a crash.
    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| DownloadError::io("flushing", &self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| DownloadError::io("syncing", &self.path, e))
    }

    pub(crate) fn finish(mut self) {
        if let Some(task) = self.task.take() {
            task.finish();
        }
    }
}

/// Stream `response` into `writer`. With `checkpoint`, the file is committed
/// and the state saved every `interval` bytes.
pub(crate) async fn copy_body(
    response: Response,
    writer: &mut PartWriter,
    url: &Url,
    checkpoint: Option<(&Path, u64)>,
    token: &CancellationToken,
) -> Result<()> {
    let mut stream = response.bytes_stream();
    let mut last_checkpoint = writer.written();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                // Keep what is on disk; the saved checkpoint stays valid.
                let _ = writer.commit().await;
                return Err(DownloadError::Cancelled);
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| DownloadError::network(url.as_str(), e))?;
        writer.write_chunk(&chunk).await?;

        if let Some((output, interval)) = checkpoint
            && interval > 0
            && writer.written() - last_checkpoint >= interval
        {
            writer.commit().await?;
            resume::save(output, &ResumeState::new(url.as_str(), writer.written())).await?;
            last_checkpoint = writer.written();
        }
    }
    Ok(())
}

/// Checkpoint to resume from, or zero when the `.part` file cannot back it.
async fn resume_offset(output: &Path, part: &Path, url: &Url) -> u64 {
    let Some(state) = resume::load(output, url.as_str()).await else {
        return 0;
    };
    let on_disk = match tokio::fs::metadata(part).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if on_disk < state.bytes_written {
        warn!(
            part = %part.display(),
            on_disk,
            checkpoint = state.bytes_written,
            "Partial file is shorter than its checkpoint, starting from zero"
        );
        return 0;
    }
    state.bytes_written
}

fn request(executor: &RetryExecutor, url: &Url, offset: u64) -> Result<reqwest::Request> {
    let mut builder = executor.client().get(url.clone());
    if offset > 0 {
        builder = builder.header(RANGE, format!("bytes={offset}-"));
    }
    builder
        .build()
        .map_err(|e| DownloadError::network(url.as_str(), e))
}

/// Download `url` into `<output>.part`; returns the total bytes in the file.
pub(crate) async fn download_file(
    executor: &RetryExecutor,
    url: &Url,
    output: &Path,
    progress: &ProgressHandle,
    label: &str,
    checkpoint_interval: u64,
    token: &CancellationToken,
) -> Result<u64> {
    let part = part_path(output);
    let mut offset = resume_offset(output, &part, url).await;
    if offset > 0 {
        info!(url = %url, offset, "Resuming download");
    }

    let mut response = executor.execute(request(executor, url, offset)?, token).await?;
    if offset > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
        warn!(url = %url, offset, "Range not satisfiable, restarting from zero");
        offset = 0;
        response = executor.execute(request(executor, url, 0)?, token).await?;
    }

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::from_status(status, url.as_str(), "download"));
    }
    if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
        warn!(url = %url, %status, "Server ignored the range request, restarting from zero");
        offset = 0;
    }

    // Cut back to the checkpoint (or to nothing) so stale bytes never precede new ones.
    let mut writer = PartWriter::open(&part, offset).await?;
    let total = response.content_length().map(|len| len + writer.written());
    debug!(url = %url, ?total, from = writer.written(), "Transfer started");
    writer.attach(progress.add_task_at(label, total, writer.written()));

    copy_body(response, &mut writer, url, Some((output, checkpoint_interval)), token).await?;
    writer.commit().await?;
    let written = writer.written();
    resume::save(output, &ResumeState::new(url.as_str(), written)).await?;
    writer.finish();
    Ok(written)
}
