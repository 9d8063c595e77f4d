//! The page-fetching seam.
//!
//! `PageFetcher` is the polymorphic extraction interface: the browser
//! variant renders with a headless browser, the HTTP variant parses the raw
//! response. The controller only ever sees `FetchedPage`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::extract::{self, ExtractedPage};
use crate::config::{MAX_FETCH_ATTEMPTS, PAGE_FETCH_TIMEOUT};

/// One fetch order from the controller.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Normalized URL to fetch (hash routes keep their hash).
    pub url: Url,
}

/// A successfully rendered page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Where the fetch actually ended up after redirects.
    pub final_url: Url,
    pub status_code: u16,
    pub extracted: ExtractedPage,
    /// The selector-based fallback path was used (scripted extraction was
    /// blocked by the page's CSP).
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Error)]
pub enum FetchFailure {
    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("scripted extraction blocked by Content-Security-Policy")]
    CspRestricted,
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchFailure {
    /// HTTP status to store on the page record; 0 for non-HTTP failures.
    pub fn status_code(&self) -> u16 {
        match self {
            FetchFailure::Http { status, .. } => *status,
            _ => 0,
        }
    }

    /// Title to store on the page record.
    pub fn record_title(&self) -> String {
        match self {
            FetchFailure::Timeout(_) => "Timeout".to_string(),
            other => format!("ERROR: {other}"),
        }
    }

    /// Short tag for the record's error field.
    pub fn tag(&self) -> &'static str {
        match self {
            FetchFailure::Http { .. } => "http_error",
            FetchFailure::Navigation(_) => "navigation_failed",
            FetchFailure::Timeout(_) => "timeout",
            FetchFailure::CspRestricted => "csp_restriction",
            FetchFailure::Transport(_) => "transport",
        }
    }
}

/// Pure retry policy: which delay, if any, precedes the next attempt.
/// CSP restrictions are never retried; the fallback extraction already ran.
pub fn retry_backoff(attempts_made: u32, error: &FetchFailure) -> Option<Duration> {
    if matches!(error, FetchFailure::CspRestricted) {
        return None;
    }
    if attempts_made >= MAX_FETCH_ATTEMPTS {
        return None;
    }
    // 1s, 2s, 4s.
    Some(Duration::from_millis(
        1000u64 << attempts_made.saturating_sub(1).min(2),
    ))
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchFailure>;
}

/// Run a fetch under the retry policy, all attempts sharing one overall
/// deadline.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    request: &FetchRequest,
) -> Result<FetchedPage, FetchFailure> {
    match tokio::time::timeout(PAGE_FETCH_TIMEOUT, retry_loop(fetcher, request)).await {
        Ok(result) => result,
        Err(_) => Err(FetchFailure::Timeout(PAGE_FETCH_TIMEOUT)),
    }
}

async fn retry_loop(
    fetcher: &dyn PageFetcher,
    request: &FetchRequest,
) -> Result<FetchedPage, FetchFailure> {
    let mut attempts_made = 0u32;
    loop {
        attempts_made += 1;
        match fetcher.fetch(request).await {
            Ok(page) => return Ok(page),
            Err(error) => match retry_backoff(attempts_made, &error) {
                Some(delay) => {
                    tracing::warn!(
                        url = %request.url,
                        attempt = attempts_made,
                        error = %error,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(error),
            },
        }
    }
}

/// Plain-HTTP fetcher: one GET, then selector-based extraction over the raw
/// body. Serves as the fallback variant and as the deterministic fetcher for
/// fixture-driven tests.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .build()
            .expect("reqwest client");
        HttpFetcher { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchFailure> {
        // The hash never goes on the wire.
        let mut wire_url = request.url.clone();
        wire_url.set_fragment(None);

        let response = self.client.get(wire_url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchFailure::Timeout(Duration::from_secs(30))
            } else if e.is_connect() {
                FetchFailure::Navigation(e.to_string())
            } else {
                FetchFailure::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchFailure::Http {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            extracted: extract::extract_page(&body),
            used_fallback: false,
        })
    }
}
