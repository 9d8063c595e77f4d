//! Headless-browser fetcher.
//!
//! Renders one URL per call in a fresh page of a shared browser, with a
//! realistic desktop fingerprint, static-asset and analytics blocking, and
//! the navigation/stabilization waits client-rendered sites need. Extraction
//! runs over the rendered DOM through the same selector pipeline as the
//! HTTP variant; pages whose CSP blocks script evaluation silently drop to
//! the selector-only path.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    BlockPattern, EventResponseReceived, ResourceType, SetBlockedUrLsParams,
};
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::extract;
use super::fetch::{FetchFailure, FetchRequest, FetchedPage, PageFetcher};
use super::url_ops;
use crate::config::{
    CHALLENGE_WAIT, CHALLENGE_WAIT_HASH_ROUTE, HASH_ROUTE_CONTENT_TIMEOUT,
    NAV_ENUMERATION_TIMEOUT, NAV_STRATEGY_TIMEOUT,
};
use crate::models::Framework;

/// Request patterns blocked before they leave the browser. Static assets
/// and trackers dominate page weight without contributing signals.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.svg",
    "*.webp",
    "*.ico",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.otf",
    "*.css",
    "*.mp3",
    "*.mp4",
    "*.avi",
    "*.mov",
    "*.webm",
    "*.webmanifest",
    "*google-analytics.com*",
    "*googletagmanager.com*",
    "*doubleclick.net*",
    "*connect.facebook.net*",
    "*hotjar.com*",
    "*segment.io*",
    "*mixpanel.com*",
];

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser configuration rejected: {0}")]
    Config(String),
    #[error("browser failed to launch: {0}")]
    Launch(String),
}

/// What the in-page probe reports between waits.
#[derive(Debug, Deserialize)]
struct ProbeState {
    body_len: u64,
    challenge: bool,
    title: String,
}

const PROBE_SCRIPT: &str = r#"(() => {
    const body = document.body ? document.body.innerText : '';
    const challenge = !!document.querySelector(
        '#challenge-running, #cf-challenge-running, .cf-browser-verification, #challenge-form');
    return {
        body_len: body.replace(/\s+/g, '').length,
        challenge,
        title: document.title || ''
    };
})()"#;

const FRAMEWORK_SCRIPT: &str = r#"(() => {
    if (window.next || document.getElementById('__next')) return 'nextjs';
    if (window.React || document.querySelector('[data-reactroot],[data-reactid]')) return 'react';
    if (window.getAllAngularRootElements || document.querySelector('[ng-version]')) return 'angular';
    if (window.Vue || window.__VUE__ || document.querySelector('[data-v-app]')) return 'vue';
    return 'unknown';
})()"#;

/// Page fetcher backed by one headless browser instance.
pub struct BrowserFetcher {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

impl BrowserFetcher {
    /// Launch the browser. A launch failure is fatal for the whole crawl.
    pub async fn launch(user_agent: &str) -> Result<Self, BrowserError> {
        let config = BrowserConfig::builder()
            .window_size(1366, 900)
            .args(vec![
                "--disable-blink-features=AutomationControlled".to_string(),
                "--lang=en-US".to_string(),
                "--accept-lang=en-US,en".to_string(),
                format!("--user-agent={user_agent}"),
            ])
            .build()
            .map_err(BrowserError::Config)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "browser handler event error");
                }
            }
        });

        Ok(BrowserFetcher {
            browser,
            handler_task,
        })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(error = %e, "browser close failed");
        }
        self.handler_task.abort();
    }

    async fn probe(&self, page: &chromiumoxide::Page) -> Result<ProbeState, FetchFailure> {
        let result = page
            .evaluate(PROBE_SCRIPT)
            .await
            .map_err(|e| classify_eval_error(&e.to_string()))?;
        result
            .into_value::<ProbeState>()
            .map_err(|e| FetchFailure::Navigation(format!("probe result unreadable: {e}")))
    }

    /// Wait until the probe satisfies `done`, polling every 250ms.
    async fn wait_for_probe<F>(
        &self,
        page: &chromiumoxide::Page,
        budget: Duration,
        done: F,
    ) -> Result<ProbeState, FetchFailure>
    where
        F: Fn(&ProbeState) -> bool,
    {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let state = self.probe(page).await?;
            if done(&state) || tokio::time::Instant::now() >= deadline {
                return Ok(state);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Try the three readiness strategies in order: document parsed, full
    /// load, settled content. Returns which strategy succeeded.
    async fn wait_for_navigation(
        &self,
        page: &chromiumoxide::Page,
    ) -> Result<(), FetchFailure> {
        for ready_script in [
            "document.readyState !== 'loading'",
            "document.readyState === 'complete'",
            "document.readyState === 'complete' && !!document.body",
        ] {
            let deadline = tokio::time::Instant::now() + NAV_STRATEGY_TIMEOUT;
            loop {
                match page.evaluate(ready_script).await {
                    Ok(result) => {
                        if result.into_value::<bool>().unwrap_or(false) {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        // CSP can block even this probe; treat the document
                        // as parsed and let the fallback path take over.
                        if is_csp_error(&e.to_string()) {
                            return Ok(());
                        }
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        Err(FetchFailure::Navigation(
            "all navigation strategies timed out".to_string(),
        ))
    }
}

fn is_csp_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("content security policy")
        || lower.contains("unsafe-eval")
        || lower.contains("evalerror")
}

fn classify_eval_error(message: &str) -> FetchFailure {
    if is_csp_error(message) {
        FetchFailure::CspRestricted
    } else {
        FetchFailure::Navigation(message.to_string())
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchFailure> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchFailure::Navigation(format!("new page: {e}")))?;

        let result = fetch_on_page(self, &page, request).await;

        if let Err(e) = page.close().await {
            tracing::debug!(url = %request.url, error = %e, "page close failed");
        }

        result
    }
}

async fn fetch_on_page(
    fetcher: &BrowserFetcher,
    page: &chromiumoxide::Page,
    request: &FetchRequest,
) -> Result<FetchedPage, FetchFailure> {
    let blocked: Vec<BlockPattern> = BLOCKED_URL_PATTERNS
        .iter()
        .map(|p| BlockPattern::new(p.to_string(), true))
        .collect();
    if let Err(e) = page
        .execute(SetBlockedUrLsParams::builder().url_patterns(blocked).build())
        .await
    {
        tracing::debug!(error = %e, "request blocking unavailable");
    }

    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| FetchFailure::Navigation(format!("event listener: {e}")))?;

    let is_hash_route = url_ops::is_hash_route(&request.url);

    match tokio::time::timeout(NAV_STRATEGY_TIMEOUT, page.goto(request.url.as_str())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(FetchFailure::Navigation(e.to_string())),
        // The navigation is still in flight; the readiness strategies below
        // get their own budgets.
        Err(_) => {}
    }

    fetcher.wait_for_navigation(page).await?;

    // The document response carries the status the server actually sent.
    let mut status_code: u16 = 200;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), responses.next()).await
    {
        if event.r#type == ResourceType::Document {
            status_code = event.response.status as u16;
            break;
        }
    }
    if status_code >= 400 {
        return Err(FetchFailure::Http {
            status: status_code,
            reason: "browser navigation".to_string(),
        });
    }

    // Scripted stabilization. A CSP restriction here drops us to the
    // selector-only fallback instead of failing the page.
    let mut used_fallback = false;
    let mut runtime_framework = Framework::Unknown;

    match fetcher.probe(page).await {
        Err(FetchFailure::CspRestricted) => {
            tracing::debug!(url = %request.url, "CSP blocks evaluation, using selector fallback");
            used_fallback = true;
        }
        Err(e) => return Err(e),
        Ok(first) => {
            // Give client-side routers time to render hash routes.
            if is_hash_route && first.body_len <= 50 {
                let _ = fetcher
                    .wait_for_probe(page, HASH_ROUTE_CONTENT_TIMEOUT, |s| s.body_len > 50)
                    .await;
            }

            // Interstitial challenge: poll until the markers clear and some
            // real content exists, then proceed either way.
            let challenged = first.challenge
                || (first.body_len < 100 && looks_like_challenge_title(&first.title));
            if challenged {
                let budget = if is_hash_route {
                    CHALLENGE_WAIT_HASH_ROUTE
                } else {
                    CHALLENGE_WAIT
                };
                let _ = fetcher
                    .wait_for_probe(page, budget, |s| !s.challenge && s.body_len > 100)
                    .await;
            }

            if let Ok(Ok(result)) =
                tokio::time::timeout(NAV_ENUMERATION_TIMEOUT, page.evaluate(FRAMEWORK_SCRIPT)).await
            {
                if let Ok(name) = result.into_value::<String>() {
                    runtime_framework = match name.as_str() {
                        "nextjs" => Framework::Nextjs,
                        "react" => Framework::React,
                        "angular" => Framework::Angular,
                        "vue" => Framework::Vue,
                        _ => Framework::Unknown,
                    };
                }
            }
        }
    }

    let html = page
        .content()
        .await
        .map_err(|e| FetchFailure::Navigation(format!("content: {e}")))?;

    let mut extracted = extract::extract_page(&html);
    if extracted.framework == Framework::Unknown {
        extracted.framework = runtime_framework;
    }

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .and_then(|u| Url::parse(&u).ok())
        .unwrap_or_else(|| request.url.clone());

    Ok(FetchedPage {
        final_url,
        status_code,
        extracted,
        used_fallback,
    })
}

fn looks_like_challenge_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    ["just a moment", "checking your browser", "attention required", "please wait"]
        .iter()
        .any(|t| lower.contains(t))
}
