use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::duplicate::DuplicatePolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Suffix appended to the output path while a transfer is active.
pub const PART_SUFFIX: &str = ".part";

/// Suffix of the JSON checkpoint written next to the output path.
pub const RESUME_SUFFIX: &str = ".resume.json";

/// Suffix of the JSON summary consumed by the tag-embedding step.
pub const METADATA_SUFFIX: &str = ".meta.json";

/// Proxy configuration
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080" or "socks5://host:1080")
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Fall back to the system/env proxy when `url` is unset
    pub use_system_proxy: bool,
}

/// Bounded linear backoff for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Retry `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (0-indexed). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Configurable options for the downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a single HTTP request, zero disables it
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests, merged over the defaults
    pub headers: HeaderMap,

    pub proxy: Option<ProxyConfig>,

    pub danger_accept_invalid_certs: bool,

    pub pool_max_idle_per_host: usize,

    pub retry: RetryPolicy,

    /// Upper bound on items downloaded at the same time by `download_all`
    pub max_concurrent_items: usize,

    /// Directory that rendered templates are relative to
    pub output_dir: PathBuf,

    /// File name template, see [`crate::naming::render_template`]
    pub output_template: String,

    /// Policy used when a request does not carry its own
    pub duplicate_policy: DuplicatePolicy,

    /// Flush and checkpoint after this many bytes of a running copy
    pub checkpoint_interval: u64,

    /// Scrape HTML pages for title/author during probing
    pub scrape_metadata: bool,

    /// Write `<output>.meta.json` after a successful download
    pub write_metadata: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 10,
            retry: RetryPolicy::default(),
            max_concurrent_items: 4,
            output_dir: PathBuf::from("."),
            output_template: "{title}.{ext}".to_owned(),
            duplicate_policy: DuplicatePolicy::Rename,
            checkpoint_interval: 8 * 1024 * 1024,
            scrape_metadata: true,
            write_metadata: true,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> DownloaderConfigBuilder {
        DownloaderConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        default_headers
    }
}

/// Chained construction of a [`DownloaderConfig`].
#[derive(Debug, Clone, Default)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Custom headers take precedence over defaults for the same fields.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.danger_accept_invalid_certs = accept;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn max_concurrent_items(mut self, max: usize) -> Self {
        self.config.max_concurrent_items = max.max(1);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn output_template(mut self, template: impl Into<String>) -> Self {
        self.config.output_template = template.into();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    pub fn checkpoint_interval(mut self, bytes: u64) -> Self {
        self.config.checkpoint_interval = bytes;
        self
    }

    pub fn scrape_metadata(mut self, scrape: bool) -> Self {
        self.config.scrape_metadata = scrape;
        self
    }

    pub fn write_metadata(mut self, write: bool) -> Self {
        self.config.write_metadata = write;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}
