use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-job crawl options.
///
/// All fields have serde defaults so a caller can submit a payload with only
/// the knobs it cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub use_sitemap: bool,
    #[serde(default)]
    pub check_redirect_duplicates: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        CrawlOptions {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            use_sitemap: false,
            check_redirect_duplicates: false,
            batch_size: default_batch_size(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> u32 {
    500
}

fn default_batch_size() -> usize {
    6
}

fn default_user_agent() -> String {
    "SitescoutBot/1.0".to_string()
}

// --- Pacing ---

/// Floor for the inter-request delay, applied even when robots.txt declares
/// no crawl-delay.
pub const REQUEST_DELAY_MIN_MS: u64 = 500;
/// Ceiling for the inter-request delay including jitter.
pub const REQUEST_DELAY_MAX_MS: u64 = 2000;

// --- Timeouts ---

/// Overall budget for a single page fetch, retries included.
pub const PAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for each navigation strategy attempt.
pub const NAV_STRATEGY_TIMEOUT: Duration = Duration::from_secs(30);
/// How long to wait for a client-side router to render a hash route.
pub const HASH_ROUTE_CONTENT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to wait for an interstitial challenge to clear.
pub const CHALLENGE_WAIT: Duration = Duration::from_secs(15);
/// Challenge wait when the page is a hash route (the router already got its
/// own settle time).
pub const CHALLENGE_WAIT_HASH_ROUTE: Duration = Duration::from_secs(5);
/// Budget for enumerating dropdown and pagination links on a rendered page.
pub const NAV_ENUMERATION_TIMEOUT: Duration = Duration::from_secs(5);
/// robots.txt fetch timeout.
pub const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-request timeout while probing sitemaps.
pub const SITEMAP_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

// --- Stop conditions ---

/// Abort the crawl if no page has succeeded for this long.
pub const PROGRESS_STALL_LIMIT: Duration = Duration::from_secs(300);
/// Abort the crawl after this many failures in a row.
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 1000;

// --- Retry ---

/// Attempts per URL, the first one included.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;
/// Attempts per persistence call on transient errors.
pub const MAX_STORE_ATTEMPTS: u32 = 3;

// --- Sitemap discovery ---

/// Stop probing once this many URLs have been discovered.
pub const SITEMAP_URL_CEILING: usize = 5000;
/// Maximum recursion depth through sitemap indexes.
pub const SITEMAP_INDEX_MAX_DEPTH: usize = 5;
/// Maximum child sitemaps fetched per index level.
pub const SITEMAP_INDEX_MAX_CHILDREN: usize = 20;
/// Redirect hops allowed while fetching a sitemap.
pub const SITEMAP_MAX_REDIRECTS: usize = 5;
/// Above this many same-site URLs the crawl switches to sample mode.
pub const LARGE_SITEMAP_THRESHOLD: usize = 100;
/// Size of the diverse sample fetched in large-sitemap mode.
pub const SITEMAP_SAMPLE_LIMIT: usize = 50;

/// Well-known sitemap locations probed after any robots-declared ones.
pub const DEFAULT_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemap.xml.gz",
    "/sitemaps.xml",
    "/sitemap1.xml",
    "/post-sitemap.xml",
    "/page-sitemap.xml",
];
