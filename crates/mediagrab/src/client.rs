//! HTTP client construction and the transport seam used by the retry executor.

use std::sync::OnceLock;

use async_trait::async_trait;
use reqwest::{Client, Request, Response};
use tracing::{debug, warn};

use crate::config::{DownloaderConfig, ProxyConfig};
use crate::error::{DownloadError, Result};

/// Anything able to send a prepared request.
///
/// `reqwest::Client` is the production implementation; stream sources may
/// expose their own (for example one carrying platform cookies).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: Request) -> reqwest::Result<Response>;

    /// Client used to prepare requests for this transport.
    fn client(&self) -> &Client;
}

#[async_trait]
impl HttpTransport for Client {
    async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        Client::execute(self, request).await
    }

    fn client(&self) -> &Client {
        self
    }
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Apply `proxy` to an existing builder.
///
/// - `url = Some(..)` => explicit proxy, with basic auth when both credentials are set
/// - `url = None` + `use_system_proxy` => reqwest's system/env defaults
/// - otherwise => no proxy at all
fn apply_proxy(builder: reqwest::ClientBuilder, proxy: &ProxyConfig) -> Result<reqwest::ClientBuilder> {
    let Some(url) = proxy.url.as_deref() else {
        return Ok(if proxy.use_system_proxy {
            builder
        } else {
            builder.no_proxy()
        });
    };

    let mut reqwest_proxy = reqwest::Proxy::all(url).map_err(|e| {
        warn!(proxy_url = %url, error = %e, "Invalid proxy URL");
        DownloadError::invalid_url(url, format!("invalid proxy URL: {e}"))
    })?;
    if let (Some(username), Some(password)) = (proxy.username.as_ref(), proxy.password.as_ref()) {
        reqwest_proxy = reqwest_proxy.basic_auth(username, password);
    }
    Ok(builder.proxy(reqwest_proxy))
}

/// Build the shared `reqwest::Client` for all downloads of a run.
pub fn create_client(config: &DownloaderConfig) -> Result<Client> {
    install_rustls_provider();

    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if config.timeout > std::time::Duration::ZERO {
        builder = builder.timeout(config.timeout);
    }

    if let Some(proxy) = &config.proxy {
        builder = apply_proxy(builder, proxy)?;
    }

    builder
        .build()
        .map_err(|e| DownloadError::network("<client>", e))
}
