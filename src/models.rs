use serde::{Deserialize, Serialize};

// --- Job lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Crawling,
    Processing,
    Completed,
    Failed,
}

/// Terminal label explaining why a crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetReached,
    FrontierExhausted,
    ProgressTimeout,
    FailureCeiling,
    JobDeleted,
    FatalError,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StopReason::BudgetReached => "budget reached",
            StopReason::FrontierExhausted => "frontier exhausted",
            StopReason::ProgressTimeout => "progress timeout",
            StopReason::FailureCeiling => "failure ceiling",
            StopReason::JobDeleted => "job deleted",
            StopReason::FatalError => "fatal error",
        };
        f.write_str(label)
    }
}

// --- Page classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    React,
    Vue,
    Angular,
    Nextjs,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageIntent {
    Contact,
    Informational,
    Transactional,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Article,
    Product,
    #[default]
    Page,
}

// --- Signals ---

/// Structured signals extracted from a rendered page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSignals {
    pub meta_description: Option<String>,
    pub meta_canonical: Option<String>,
    pub meta_robots: String,
    pub og_title: Option<String>,
    pub h1: Option<String>,
    pub h2_count: u32,
    pub word_count: u32,
    pub is_spa: bool,
    pub framework: Framework,
    pub intent: PageIntent,
    pub page_type: PageType,
}

impl Default for PageSignals {
    fn default() -> Self {
        PageSignals {
            meta_description: None,
            meta_canonical: None,
            // Absent robots meta means the page is indexable and followable.
            meta_robots: "index,follow".to_string(),
            og_title: None,
            h1: None,
            h2_count: 0,
            word_count: 0,
            is_spa: false,
            framework: Framework::Unknown,
            intent: PageIntent::Unknown,
            page_type: PageType::Page,
        }
    }
}

// --- Page record ---

/// One crawled (or sitemap-listed) page. Created exactly once per unique
/// canonical URL per job and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// URL actually recorded for the page (original or final, depending on
    /// the redirect-duplicate option).
    pub url: String,
    /// URL exactly as it was enqueued.
    pub original_url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    pub title: String,
    /// HTTP status, or 0 for non-HTTP failures.
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Verbatim `href` attribute as seen on the parent page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_attr: Option<String>,
    /// Same-site outbound links, canonical form.
    #[serde(default)]
    pub links: Vec<String>,
    /// The enqueued URL carried a non-empty query string.
    #[serde(default)]
    pub had_query: bool,
    #[serde(default)]
    pub from_sitemap: bool,
    /// False only for the minimal records stored in large-sitemap mode.
    #[serde(default = "default_true")]
    pub rendered: bool,
    pub signals: PageSignals,
}

fn default_true() -> bool {
    true
}

// --- Frontier ---

/// A URL queued for crawling, together with everything known about how it
/// was discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierItem {
    /// Not yet canonicalized.
    pub url: String,
    pub depth: u32,
    pub parent_url: Option<String>,
    /// Anchor text observed on the parent page.
    pub link_title: Option<String>,
    /// Verbatim `href` attribute observed on the parent page.
    pub link_attr: Option<String>,
    pub from_sitemap: bool,
    /// Part of the diverse sample fetched in large-sitemap mode.
    pub sample_crawl: bool,
}

impl FrontierItem {
    pub fn seed(url: String) -> Self {
        FrontierItem {
            url,
            depth: 0,
            parent_url: None,
            link_title: None,
            link_attr: None,
            from_sitemap: false,
            sample_crawl: false,
        }
    }
}

// --- Crawl summary ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub total_attempted: u32,
    pub successful_pages: u32,
    pub failed_pages: u32,
    pub skipped_pages: u32,
    pub skipped_pdfs: u32,
    pub sitemap_urls_discovered: u32,
    pub sitemap_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageError {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorReport {
    pub page_errors: Vec<PageError>,
    pub sitemap_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub skipped_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_error: Option<String>,
}

/// Everything the inbound crawl function returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub pages: Vec<PageRecord>,
    pub stats: CrawlStats,
    pub report: ErrorReport,
}
