//! Decide what a requested URL points at before anything is written.
//!
//! Order: registered stream sources, then the URL's extension, then a HEAD
//! request (GET when HEAD is refused) classified by `Content-Type`. HTML pages
//! are scraped for a title, an author and an `og:video` link; scraping never
//! fails the probe on its own.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::client::HttpTransport;
use crate::error::{DownloadError, Result};
use crate::metadata::ItemMetadata;
use crate::retry::RetryExecutor;
use crate::source::StreamSource;

/// Largest HTML document read for scraping.
const MAX_SCRAPE_BYTES: usize = 2 * 1024 * 1024;

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid meta regex"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attribute regex")
});
static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Direct { ext: String },
    Hls,
    Dash,
}

impl MediaKind {
    /// Extension of the file written for this kind.
    pub fn extension(&self) -> &str {
        match self {
            Self::Direct { ext } => ext,
            Self::Hls => "ts",
            Self::Dash => "mp4",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct { .. } => "direct",
            Self::Hls => "hls",
            Self::Dash => "dash",
        }
    }
}

pub struct ProbeResult {
    pub url: Url,
    pub kind: MediaKind,
    pub metadata: ItemMetadata,
    /// Set when a stream source supplied its own transport
    pub transport: Option<Arc<dyn HttpTransport>>,
}

impl std::fmt::Debug for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeResult")
            .field("url", &self.url.as_str())
            .field("kind", &self.kind)
            .field("metadata", &self.metadata)
            .field("custom_transport", &self.transport.is_some())
            .finish()
    }
}

/// Parse `input` as an http(s) URL.
pub fn parse_url(input: &str) -> Result<Url> {
    let url = Url::parse(input.trim()).map_err(|e| DownloadError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DownloadError::invalid_url(
            input,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

/// Classify by the last path segment's extension.
pub fn kind_from_extension(url: &Url) -> Option<MediaKind> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    match ext.as_str() {
        "m3u8" | "m3u" => Some(MediaKind::Hls),
        "mpd" => Some(MediaKind::Dash),
        "mp4" | "m4a" | "m4v" | "mov" | "webm" | "mkv" | "ts" | "flv" | "mp3" | "ogg" | "oga"
        | "opus" | "aac" | "wav" | "flac" => Some(MediaKind::Direct { ext }),
        _ => None,
    }
}

/// Classify by a `Content-Type` value, parameters ignored.
pub fn kind_from_content_type(content_type: &str) -> Option<MediaKind> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "audio/mpegurl"
        | "audio/x-mpegurl" => return Some(MediaKind::Hls),
        "application/dash+xml" => return Some(MediaKind::Dash),
        _ => {}
    }

    let (top, sub) = mime.split_once('/')?;
    if top != "video" && top != "audio" {
        return None;
    }
    let ext = match (top, sub) {
        ("audio", "mp4") | ("audio", "x-m4a") => "m4a",
        (_, "mp4") => "mp4",
        (_, "webm") => "webm",
        (_, "x-matroska") => "mkv",
        (_, "mp2t") => "ts",
        (_, "x-flv") => "flv",
        (_, "quicktime") => "mov",
        ("audio", "mpeg") | ("audio", "mp3") => "mp3",
        (_, "ogg") => "ogg",
        (_, "opus") => "opus",
        (_, "aac") => "aac",
        (_, "flac") => "flac",
        (_, "wav") | (_, "x-wav") => "wav",
        (_, other) => other.trim_start_matches("x-"),
    };
    Some(MediaKind::Direct { ext: ext.to_owned() })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub video_url: Option<String>,
}

/// Pull title, author and an `og:video` link out of an HTML document.
pub fn scrape_html(html: &str) -> PageInfo {
    let mut meta: HashMap<String, String> = HashMap::new();
    for tag in META_TAG.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            match caps[1].to_ascii_lowercase().as_str() {
                "property" | "name" | "itemprop" => key = Some(value.to_ascii_lowercase()),
                "content" => content = Some(unescape_html(value)),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content)
            && !content.trim().is_empty()
        {
            meta.entry(key).or_insert(content);
        }
    }

    let pick = |keys: &[&str]| keys.iter().find_map(|k| meta.get(*k).cloned());
    let title = pick(&["og:title", "twitter:title"]).or_else(|| {
        TITLE_TAG
            .captures(html)
            .map(|caps| unescape_html(caps[1].trim()))
            .filter(|t| !t.is_empty())
    });

    PageInfo {
        title,
        author: pick(&["author", "article:author", "og:site_name"]),
        video_url: pick(&["og:video:secure_url", "og:video:url", "og:video"]),
    }
}

fn unescape_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Probe `input`, consulting `sources` first.
pub async fn probe(
    input: &str,
    executor: &RetryExecutor,
    sources: &[Arc<dyn StreamSource>],
    scrape: bool,
    token: &CancellationToken,
) -> Result<ProbeResult> {
    let url = parse_url(input)?;

    if let Some(source) = sources.iter().find(|s| s.supports(&url)) {
        return probe_source(source.as_ref(), url).await;
    }

    if let Some(kind) = kind_from_extension(&url) {
        debug!(url = %url, kind = kind.as_str(), "Classified by extension");
        let metadata = ItemMetadata::for_url(url.as_str());
        return Ok(ProbeResult {
            url,
            kind,
            metadata,
            transport: None,
        });
    }

    probe_http(url, executor, scrape, token).await
}

async fn probe_source(source: &dyn StreamSource, url: Url) -> Result<ProbeResult> {
    debug!(url = %url, source = source.name(), "Probing through stream source");
    let item = source.fetch(&url).await?;
    let format = item.best_format().ok_or_else(|| DownloadError::Source {
        reason: format!("{} offered no formats for {url}", source.name()),
    })?;
    let stream_url = source.open_stream(&item, format).await?;

    let kind = match format.extension.to_ascii_lowercase().as_str() {
        "m3u8" | "m3u" => MediaKind::Hls,
        "mpd" => MediaKind::Dash,
        "" => kind_from_extension(&stream_url).unwrap_or(MediaKind::Direct { ext: "mp4".into() }),
        ext => MediaKind::Direct { ext: ext.to_owned() },
    };

    let mut metadata = item.metadata.clone();
    metadata.source_url = url.to_string();
    Ok(ProbeResult {
        url: stream_url,
        kind,
        metadata,
        transport: source.transport(),
    })
}

async fn probe_http(
    url: Url,
    executor: &RetryExecutor,
    scrape: bool,
    token: &CancellationToken,
) -> Result<ProbeResult> {
    let head = executor
        .client()
        .head(url.clone())
        .build()
        .map_err(|e| DownloadError::network(url.as_str(), e))?;
    let mut response = executor.execute(head, token).await?;

    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        debug!(url = %url, "HEAD refused, probing with GET");
        let get = executor
            .client()
            .get(url.clone())
            .build()
            .map_err(|e| DownloadError::network(url.as_str(), e))?;
        response = executor.execute(get, token).await?;
    }

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::from_status(status, url.as_str(), "probe"));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    drop(response);

    if let Some(kind) = kind_from_content_type(&content_type) {
        debug!(url = %url, content_type = %content_type, kind = kind.as_str(), "Classified by content type");
        let metadata = ItemMetadata::for_url(url.as_str());
        return Ok(ProbeResult {
            url,
            kind,
            metadata,
            transport: None,
        });
    }

    if scrape && content_type.to_ascii_lowercase().starts_with("text/html") {
        let page = scrape_page(&url, executor, token).await;
        if let Some(video) = page.video_url.as_deref()
            && let Ok(video_url) = url.join(video)
            && let Some(kind) = kind_from_extension(&video_url)
        {
            info!(page = %url, video = %video_url, "Found embedded video link");
            let metadata = ItemMetadata {
                title: page.title,
                author: page.author,
                id: None,
                source_url: url.to_string(),
            };
            return Ok(ProbeResult {
                url: video_url,
                kind,
                metadata,
                transport: None,
            });
        }
        return Err(DownloadError::unsupported(
            url.as_str(),
            "HTML page without a downloadable video link",
        ));
    }

    Err(DownloadError::unsupported(
        url.as_str(),
        if content_type.is_empty() {
            "no content type and no recognizable extension".to_owned()
        } else {
            format!("content type `{content_type}`")
        },
    ))
}

/// Best-effort page fetch; every failure yields an empty result.
async fn scrape_page(url: &Url, executor: &RetryExecutor, token: &CancellationToken) -> PageInfo {
    let request = match executor.client().get(url.clone()).build() {
        Ok(request) => request,
        Err(e) => {
            debug!(url = %url, error = %e, "Could not build scrape request");
            return PageInfo::default();
        }
    };
    let response = match executor.execute(request, token).await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(url = %url, status = %response.status(), "Scrape request rejected");
            return PageInfo::default();
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Scrape request failed");
            return PageInfo::default();
        }
    };
    let body = tokio::select! {
        _ = token.cancelled() => return PageInfo::default(),
        body = response.bytes() => body,
    };
    match body {
        Ok(bytes) => {
            let len = bytes.len().min(MAX_SCRAPE_BYTES);
            scrape_html(&String::from_utf8_lossy(&bytes[..len]))
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Failed to read page body");
            PageInfo::default()
        }
    }
}
