//! Retry executor: sends one prepared request, repeating it with linear backoff
//! when the transport fails before any response arrives.

use std::sync::Arc;

use reqwest::{Method, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::HttpTransport;
use crate::config::RetryPolicy;
use crate::error::{DownloadError, Result, is_transport_error};

/// Methods that may be repeated without changing server state.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

#[derive(Clone)]
pub struct RetryExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn client(&self) -> &reqwest::Client {
        self.transport.client()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same policy, different transport.
    pub fn with_transport(&self, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            policy: self.policy,
        }
    }

    /// Execute `request`, returning the first response received.
    ///
    /// Any HTTP status is handed back to the caller. Only idempotent requests
    /// with a clonable body are retried; everything else gets one attempt.
    pub async fn execute(&self, request: Request, token: &CancellationToken) -> Result<Response> {
        let url = request.url().to_string();
        let max_attempts = self.policy.max_attempts.max(1);

        if !is_idempotent(request.method()) || request.try_clone().is_none() {
            debug!(url = %url, method = %request.method(), "Request is not retryable, sending once");
            return self.send(request, &url, token).await;
        }

        let mut attempt = 0;
        loop {
            let Some(attempt_request) = request.try_clone() else {
                return self.send(request, &url, token).await;
            };

            match self.send(attempt_request, &url, token).await {
                Ok(response) => return Ok(response),
                Err(DownloadError::Network { source, url }) if is_transport_error(&source) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(DownloadError::Network { url, source });
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        url = %url,
                        attempt,
                        max = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "Retrying after transport error"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, request: Request, url: &str, token: &CancellationToken) -> Result<Response> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tokio::select! {
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            result = self.transport.execute(request) => {
                result.map_err(|e| DownloadError::network(url, e))
            }
        }
    }
}
