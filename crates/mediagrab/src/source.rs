//! Seam for platform extractors that turn a page URL into streamable URLs.
//!
//! The engine ships no extractors. Callers register [`StreamSource`]s on the
//! [`Downloader`](crate::download::Downloader); the first one that claims a
//! URL wins over extension and content-type probing.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::client::HttpTransport;
use crate::error::{DownloadError, Result};
use crate::metadata::ItemMetadata;

/// One downloadable rendition offered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub id: String,
    pub url: String,
    /// File extension of the rendition (`mp4`, `m3u8`, `mpd`, ...)
    pub extension: String,
    /// Bits per second, zero when unknown
    pub bitrate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceItem {
    pub metadata: ItemMetadata,
    pub formats: Vec<StreamFormat>,
}

impl SourceItem {
    /// Highest bitrate; the first listed wins ties.
    pub fn best_format(&self) -> Option<&StreamFormat> {
        self.formats
            .iter()
            .reduce(|best, f| if f.bitrate > best.bitrate { f } else { best })
    }
}

#[async_trait]
pub trait StreamSource: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, url: &Url) -> bool;

    async fn fetch(&self, url: &Url) -> Result<SourceItem>;

    /// Turn a format into the URL to download. Sources with signed or
    /// short-lived URLs override this to resolve at the last moment.
    async fn open_stream(&self, _item: &SourceItem, format: &StreamFormat) -> Result<Url> {
        Url::parse(&format.url).map_err(|e| DownloadError::invalid_url(&format.url, e.to_string()))
    }

    /// Transport carrying source-specific state such as cookies. `None`
    /// uses the downloader's own client.
    fn transport(&self) -> Option<Arc<dyn HttpTransport>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, bitrate: u64) -> StreamFormat {
        StreamFormat {
            id: id.to_owned(),
            url: format!("https://cdn.example.com/{id}.mp4"),
            extension: "mp4".to_owned(),
            bitrate,
        }
    }

    #[test]
    fn best_format_prefers_bitrate_then_order() {
        let item = SourceItem {
            metadata: ItemMetadata::for_url("https://example.com/watch?v=1"),
            formats: vec![format("low", 100), format("high", 900), format("high-dup", 900)],
        };
        assert_eq!(item.best_format().unwrap().id, "high");

        let empty = SourceItem {
            metadata: ItemMetadata::default(),
            formats: Vec::new(),
        };
        assert!(empty.best_format().is_none());
    }
}
