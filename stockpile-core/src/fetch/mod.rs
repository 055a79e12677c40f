//! Upstream HTTP client.
//!
//! One [`Fetcher`] is shared by every adapter and background loop. It owns a
//! single `reqwest` client (bounded redirects, identifying User-Agent) and a
//! [`SingleFlight`] map so concurrent requests for the same URL collapse
//! into one upstream round trip.

mod single_flight;

pub use single_flight::SingleFlight;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    NotFound,
    /// Upstream answered with a non-success status other than 404.
    UpstreamStatus(u16),
    Transport,
    Timeout,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<FetchError> for CoreError {
    fn from(err: FetchError) -> Self {
        match err.kind {
            FetchErrorKind::NotFound => CoreError::NotFound(err.message),
            FetchErrorKind::Timeout => CoreError::Timeout(err.message),
            FetchErrorKind::UpstreamStatus(_) | FetchErrorKind::Transport => {
                CoreError::BadGateway(err.message)
            }
        }
    }
}

/// Per-request knobs; everything unset falls back to the fetcher defaults.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    pub accept: Option<String>,
    /// Raw `Range: bytes=a-b` value passed through to the upstream.
    pub range: Option<String>,
    pub basic_auth: Option<(String, String)>,
}

impl FetchOptions {
    pub fn accept(value: impl Into<String>) -> Self {
        Self {
            accept: Some(value.into()),
            ..Default::default()
        }
    }
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_range: Option<String>,
}

#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    default_timeout: Duration,
    retry_attempts: u32,
    flight: SingleFlight<String, Result<Arc<FetchResponse>, FetchError>>,
}

impl Fetcher {
    pub fn new(
        user_agent: &str,
        default_timeout: Duration,
        max_redirects: usize,
        retry_attempts: u32,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .map_err(|err| CoreError::internal(format!("http client init failed: {err}")))?;
        Ok(Self {
            client,
            default_timeout,
            retry_attempts,
            flight: SingleFlight::new(),
        })
    }

    /// GET `url`, coalescing with any identical in-flight request. Only
    /// plain requests coalesce; ranged or authenticated requests always go
    /// upstream on their own.
    pub async fn get(&self, url: &str, options: FetchOptions) -> Result<Arc<FetchResponse>, FetchError> {
        let coalescable = options.range.is_none() && options.basic_auth.is_none();
        if !coalescable {
            return self.get_with_retry(url, &options).await.map(Arc::new);
        }

        let url_owned = url.to_string();
        self.flight
            .run(url_owned.clone(), || async move {
                self.get_with_retry(&url_owned, &options).await.map(Arc::new)
            })
            .await
    }

    /// HEAD probe used by the health checker; returns the status code.
    pub async fn head(&self, url: &str, timeout: Duration) -> Result<u16, FetchError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .header(header::ACCEPT, "*/*")
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        Ok(response.status().as_u16())
    }

    async fn get_with_retry(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, FetchError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, options).await {
                Ok(response) => return Ok(response),
                Err(err)
                    if matches!(err.kind, FetchErrorKind::Transport | FetchErrorKind::Timeout)
                        && attempt + 1 < self.retry_attempts =>
                {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * (1 << attempt.min(6)));
                    warn!(url, attempt, error = %err, "retrying upstream fetch");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_once(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse, FetchError> {
        let mut request = self
            .client
            .get(url)
            .timeout(options.timeout.unwrap_or(self.default_timeout));
        if let Some(accept) = &options.accept {
            request = request.header(header::ACCEPT, accept);
        }
        if let Some(range) = &options.range {
            request = request.header(header::RANGE, range);
        }
        if let Some((user, password)) = &options.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::new(
                FetchErrorKind::NotFound,
                format!("upstream returned 404 for {url}"),
            ));
        }
        if !(status.is_success() || status == StatusCode::PARTIAL_CONTENT) {
            return Err(FetchError::new(
                FetchErrorKind::UpstreamStatus(status.as_u16()),
                format!("upstream returned {status} for {url}"),
            ));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let status = status.as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        debug!(url, status, size = bytes.len(), "upstream fetch complete");
        Ok(FetchResponse {
            status,
            bytes,
            content_type,
            content_range,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::new(FetchErrorKind::Timeout, format!("upstream timeout: {err}"))
    } else {
        FetchError::new(FetchErrorKind::Transport, format!("upstream unreachable: {err}"))
    }
}
