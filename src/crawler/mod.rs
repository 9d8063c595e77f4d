//! The crawl controller.
//!
//! One logical crawl runs on a single cooperative scheduler that owns the
//! frontier, the visited set, and the observation maps. Each round it fans
//! out up to `batch_size` concurrent fetches; fetch tasks return immutable
//! results and the controller merges them serially, in frontier sort order,
//! so two crawls over identical content produce identical record sequences.

pub mod browser;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod robots;
pub mod sitemap;
pub mod url_ops;
pub mod visited;

pub use browser::{BrowserError, BrowserFetcher};
pub use fetch::{FetchRequest, HttpFetcher, PageFetcher};
pub use robots::RobotsPolicy;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use url::Url;

use crate::analysis::{self, issues::IssueReport, tree::CanonicalTree};
use crate::config::{
    CrawlOptions, CONSECUTIVE_FAILURE_LIMIT, LARGE_SITEMAP_THRESHOLD, PROGRESS_STALL_LIMIT,
    REQUEST_DELAY_MAX_MS, REQUEST_DELAY_MIN_MS, SITEMAP_SAMPLE_LIMIT,
};
use crate::models::*;
use crate::storage::{self, PageStore, StoreError};
use fetch::{fetch_with_retry, FetchFailure, FetchedPage};
use frontier::Frontier;
use visited::{ErrorUrlMap, LinkContext, RedirectOutcome, VisitedSet};

/// Receives job lifecycle transitions and progress updates. The surrounding
/// system broadcasts these to its observers.
pub trait CrawlObserver: Send + Sync {
    fn state_changed(&self, job_id: &str, state: JobState) {
        let _ = (job_id, state);
    }

    /// Called after each successfully crawled page. Errors are swallowed by
    /// the controller.
    fn progress(&self, job_id: &str, pages_crawled: u32) -> Result<(), String> {
        let _ = (job_id, pages_crawled);
        Ok(())
    }
}

pub struct NoopObserver;

impl CrawlObserver for NoopObserver {}

/// Crawl outcome plus the derived sitemap tree and issue report.
#[derive(Debug)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub tree: CanonicalTree,
    pub issues: IssueReport,
}

/// Ties the fetcher, store, and observer together and runs crawl jobs.
pub struct CrawlEngine {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn PageStore>,
    observer: Arc<dyn CrawlObserver>,
    options: CrawlOptions,
    http: reqwest::Client,
}

impl CrawlEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn PageStore>,
        observer: Arc<dyn CrawlObserver>,
        options: CrawlOptions,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(&options.user_agent)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");
        CrawlEngine {
            fetcher,
            store,
            observer,
            options,
            http,
        }
    }

    /// Crawl, then assemble the canonical tree and issue report.
    pub async fn run(&self, job_id: &str, seed: &str) -> CrawlReport {
        let outcome = self.crawl_site(job_id, seed).await;

        if outcome.report.critical_error.is_none() {
            self.observer.state_changed(job_id, JobState::Processing);
        }
        let tree = analysis::tree::build(&outcome.pages);
        let issues = analysis::issues::detect(&tree, &outcome.pages);
        if outcome.report.critical_error.is_none() {
            self.observer.state_changed(job_id, JobState::Completed);
        }

        CrawlReport {
            outcome,
            tree,
            issues,
        }
    }

    /// The inbound crawl function: crawl one site from the seed URL and
    /// return the page records, summary stats, and error report. Page-level
    /// failures are recorded, never raised.
    pub async fn crawl_site(&self, job_id: &str, seed: &str) -> CrawlOutcome {
        self.observer.state_changed(job_id, JobState::Pending);
        self.observer.state_changed(job_id, JobState::Crawling);

        let seed_url = match url_ops::parse_http_url(&url_ops::ensure_scheme(seed)) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(job_id = %job_id, seed = %seed, error = %e, "seed URL rejected");
                self.observer.state_changed(job_id, JobState::Failed);
                return CrawlOutcome {
                    pages: Vec::new(),
                    stats: CrawlStats {
                        stop_reason: Some(StopReason::FatalError),
                        ..CrawlStats::default()
                    },
                    report: ErrorReport {
                        critical_error: Some(format!("invalid seed URL: {e}")),
                        ..ErrorReport::default()
                    },
                };
            }
        };

        let robots = RobotsPolicy::load(&seed_url, &self.http).await;
        let effective_delay_ms = robots
            .crawl_delay(&self.options.user_agent)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .max(REQUEST_DELAY_MIN_MS);

        let mut run = CrawlRun {
            engine: self,
            job_id,
            seed_url: seed_url.clone(),
            robots,
            effective_delay_ms,
            frontier: Frontier::new(),
            visited: VisitedSet::new(),
            link_ctx: LinkContext::new(),
            error_urls: ErrorUrlMap::new(),
            produced: HashSet::new(),
            pages: Vec::new(),
            stats: CrawlStats::default(),
            report: ErrorReport::default(),
            consecutive_failures: 0,
            last_progress: Instant::now(),
        };

        let blocked_bots = run.robots.blocked_ai_bots(&seed_url);
        if !blocked_bots.is_empty() {
            run.report.warnings.push(format!(
                "robots.txt blocks AI crawlers: {}",
                blocked_bots.join(", ")
            ));
        }

        if self.options.use_sitemap {
            if let Some(stop) = run.seed_from_sitemap().await {
                return run.finish(stop);
            }
        }

        run.frontier
            .push(FrontierItem::seed(seed_url.to_string()));

        let stop = run.run_loop().await;
        run.finish(stop)
    }
}

/// What one accepted frontier item looks like once it is cleared to fetch.
struct DispatchItem {
    item: FrontierItem,
    fetch_url: Url,
    had_query: bool,
}

struct CrawlRun<'a> {
    engine: &'a CrawlEngine,
    job_id: &'a str,
    seed_url: Url,
    robots: RobotsPolicy,
    effective_delay_ms: u64,
    frontier: Frontier,
    visited: VisitedSet,
    link_ctx: LinkContext,
    error_urls: ErrorUrlMap,
    /// Canonical keys of records already produced this job.
    produced: HashSet<String>,
    pages: Vec<PageRecord>,
    stats: CrawlStats,
    report: ErrorReport,
    consecutive_failures: u32,
    last_progress: Instant,
}

impl CrawlRun<'_> {
    fn options(&self) -> &CrawlOptions {
        &self.engine.options
    }

    fn finish(mut self, stop: StopReason) -> CrawlOutcome {
        self.stats.stop_reason = Some(stop);
        tracing::info!(
            job_id = %self.job_id,
            stop_reason = %stop,
            successful = self.stats.successful_pages,
            failed = self.stats.failed_pages,
            skipped = self.stats.skipped_pages,
            "crawl finished"
        );
        if stop == StopReason::FatalError {
            self.engine.observer.state_changed(self.job_id, JobState::Failed);
        }
        CrawlOutcome {
            pages: self.pages,
            stats: self.stats,
            report: self.report,
        }
    }

    /// Discover sitemap URLs and seed the crawl from them. Large sitemaps
    /// are stored as minimal records up to the page budget and only a
    /// diverse sample is fetched in full; small ones are enqueued whole.
    async fn seed_from_sitemap(&mut self) -> Option<StopReason> {
        let discovery = sitemap::discover(&self.seed_url, self.robots.sitemap_urls()).await;
        self.report.sitemap_errors = discovery.errors;
        self.stats.sitemap_urls_discovered = discovery.urls.len() as u32;
        self.stats.sitemap_used = !discovery.urls.is_empty();

        tracing::info!(
            job_id = %self.job_id,
            same_site = discovery.urls.len(),
            total = discovery.total_discovered,
            "sitemap discovery complete"
        );

        if discovery.urls.is_empty() {
            return None;
        }

        let allowed: Vec<String> = discovery
            .urls
            .into_iter()
            .filter(|raw| {
                url_ops::parse_http_url(raw)
                    .map(|u| self.robots.is_allowed(&u, &self.engine.options.user_agent))
                    .unwrap_or(false)
            })
            .collect();

        if allowed.len() > LARGE_SITEMAP_THRESHOLD {
            // Everything up to the page budget is stored as a minimal
            // record; the diverse sample is drawn from that same stored
            // prefix so sampled fetches reconcile against existing records.
            let budget = self.options().max_pages as usize;
            let stored: Vec<String> = allowed.iter().take(budget).cloned().collect();
            let sample = sitemap::sample_diverse(&stored, SITEMAP_SAMPLE_LIMIT, &self.seed_url);
            let sample_keys: HashSet<String> = sample
                .iter()
                .filter_map(|raw| url_ops::canonical_key_str(raw))
                .collect();

            for raw in &stored {
                let Ok(parsed) = url_ops::parse_http_url(raw) else {
                    continue;
                };
                let canonical = url_ops::canonical_key(&parsed);
                if self.produced.contains(&canonical) {
                    continue;
                }

                let record = PageRecord {
                    url: raw.clone(),
                    original_url: raw.clone(),
                    depth: 0,
                    parent_url: None,
                    title: url_ops::title_from_path(&parsed),
                    status_code: 200,
                    error: None,
                    link_attr: None,
                    links: Vec::new(),
                    had_query: parsed.query().is_some_and(|q| !q.is_empty()),
                    from_sitemap: true,
                    rendered: false,
                    signals: PageSignals::default(),
                };
                if let Some(stop) = self.persist(&record).await {
                    return Some(stop);
                }
                self.produced.insert(canonical.clone());
                self.pages.push(record);

                // Sampled URLs stay unvisited so the fetch loop renders them.
                if !sample_keys.contains(&canonical) {
                    self.visited.mark_key(canonical);
                }
            }

            for raw in sample {
                self.frontier.push(FrontierItem {
                    url: raw,
                    depth: 0,
                    parent_url: None,
                    link_title: None,
                    link_attr: None,
                    from_sitemap: true,
                    sample_crawl: true,
                });
            }
        } else {
            for raw in allowed {
                self.frontier.push(FrontierItem {
                    url: raw,
                    depth: 0,
                    parent_url: None,
                    link_title: None,
                    link_attr: None,
                    from_sitemap: true,
                    sample_crawl: false,
                });
            }
        }

        None
    }

    async fn run_loop(&mut self) -> StopReason {
        loop {
            let max_pages = self.options().max_pages as usize;
            if self.visited.len() >= max_pages {
                return StopReason::BudgetReached;
            }
            if self.frontier.is_empty() {
                return StopReason::FrontierExhausted;
            }
            if self.last_progress.elapsed() >= PROGRESS_STALL_LIMIT {
                return StopReason::ProgressTimeout;
            }
            if self.consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT {
                return StopReason::FailureCeiling;
            }
            if !self.engine.store.job_exists(self.job_id).await {
                return StopReason::JobDeleted;
            }

            let batch_size = self.options().batch_size;
            let batch = self.frontier.take_batch(batch_size);
            let mut dispatch: Vec<DispatchItem> = Vec::new();
            let mut deferred: Vec<FrontierItem> = Vec::new();
            for item in batch {
                if self.visited.len() >= max_pages {
                    deferred.push(item);
                    continue;
                }
                if let Some(prepared) = self.prepare(item) {
                    dispatch.push(prepared);
                }
            }
            if !deferred.is_empty() {
                self.frontier.push_front(deferred);
            }
            if dispatch.is_empty() {
                continue;
            }

            // Concurrent fan-out; join_all returns results in dispatch
            // order, which is the frontier sort order.
            let fetches = dispatch.iter().map(|d| {
                let fetcher = self.engine.fetcher.clone();
                let request = FetchRequest {
                    url: d.fetch_url.clone(),
                };
                let delay = self.delay_for(&d.fetch_url);
                async move {
                    tokio::time::sleep(delay).await;
                    fetch_with_retry(fetcher.as_ref(), &request).await
                }
            });
            let results = futures::future::join_all(fetches).await;

            for (item, result) in dispatch.into_iter().zip(results) {
                if !self.engine.store.job_exists(self.job_id).await {
                    // In-flight work is dropped; nothing more is persisted.
                    return StopReason::JobDeleted;
                }
                let stop = match result {
                    Ok(page) => self.absorb_success(item, page).await,
                    Err(failure) => self.absorb_failure(item, failure).await,
                };
                if let Some(stop) = stop {
                    return stop;
                }
            }
        }
    }

    /// Serial pre-flight for one frontier item: validity, fragment
    /// collapsing, visited check, robots check, then the visited mark.
    fn prepare(&mut self, item: FrontierItem) -> Option<DispatchItem> {
        let parsed = match url_ops::parse_http_url(&item.url) {
            Ok(u) => u,
            Err(e) => {
                tracing::debug!(url = %item.url, error = %e, "skipping invalid URL");
                self.stats.skipped_pages += 1;
                return None;
            }
        };
        let had_query = parsed.query().is_some_and(|q| !q.is_empty());

        let mut target = parsed.clone();
        if url_ops::is_hash_fragment(&target) {
            target.set_fragment(None);
            if self.visited.has(&target) || self.error_urls.get(&target).is_some() {
                tracing::debug!(url = %item.url, "same_page: base already handled");
                self.stats.skipped_pages += 1;
                return None;
            }
        }

        let fetch_url = url_ops::normalize(&target, false);

        if self.visited.has(&fetch_url) {
            self.stats.skipped_pages += 1;
            return None;
        }
        if !self
            .robots
            .is_allowed(&fetch_url, &self.engine.options.user_agent)
        {
            tracing::debug!(url = %fetch_url, "blocked by robots.txt");
            self.stats.skipped_pages += 1;
            return None;
        }

        self.visited.mark(&fetch_url);
        Some(DispatchItem {
            item,
            fetch_url,
            had_query,
        })
    }

    /// Inter-request delay: the effective delay plus jitter derived from the
    /// URL itself, so pacing is reproducible across runs.
    fn delay_for(&self, url: &Url) -> std::time::Duration {
        let window = REQUEST_DELAY_MAX_MS.saturating_sub(self.effective_delay_ms) + 1;
        let jitter = char_sum(url.as_str()) % window;
        std::time::Duration::from_millis(self.effective_delay_ms + jitter)
    }

    async fn absorb_success(
        &mut self,
        dispatched: DispatchItem,
        page: FetchedPage,
    ) -> Option<StopReason> {
        self.stats.total_attempted += 1;
        self.consecutive_failures = 0;

        // Hash routes never reach the wire, so the browser's final URL is
        // just the base page; reconciling it would misread every route as a
        // redirect of its base.
        let redirect = if url_ops::is_hash_route(&dispatched.fetch_url) {
            RedirectOutcome::Ignored
        } else {
            self.visited.reconcile_redirect(
                &dispatched.fetch_url,
                &page.final_url,
                self.options().check_redirect_duplicates,
            )
        };
        if redirect == RedirectOutcome::Duplicate {
            tracing::debug!(
                url = %dispatched.fetch_url,
                final_url = %page.final_url,
                "redirect target already visited"
            );
            self.stats.skipped_pages += 1;
            return None;
        }

        // With redirect checking off, the original URL is what gets recorded
        // and what links resolve against. Hash routes keep their route; the
        // wire never saw it.
        let effective_url = if self.options().check_redirect_duplicates
            && !url_ops::is_hash_route(&dispatched.fetch_url)
        {
            page.final_url.clone()
        } else {
            dispatched.fetch_url.clone()
        };

        let link_title = dispatched
            .item
            .link_title
            .clone()
            .or_else(|| self.link_ctx.title_for(&effective_url).map(str::to_string));
        let title = extract::resolve_title(&page.extracted, &effective_url, link_title.as_deref());

        let extracted = &page.extracted;
        let framework = extracted.framework;
        let signals = PageSignals {
            meta_description: extracted.meta_description.clone(),
            meta_canonical: extracted.meta_canonical.clone(),
            meta_robots: extracted
                .meta_robots
                .clone()
                .unwrap_or_else(|| "index,follow".to_string()),
            og_title: extracted.og_title.clone(),
            h1: extracted.h1.clone(),
            h2_count: extracted.h2_count,
            word_count: extracted.word_count,
            is_spa: framework != Framework::Unknown || url_ops::is_hash_route(&effective_url),
            framework,
            intent: extract::classify_intent(&effective_url),
            page_type: extract::classify_page_type(&effective_url),
        };

        let outbound = self.enqueue_links(&dispatched, &page, &effective_url);

        let link_attr = dispatched.item.link_attr.clone().or_else(|| {
            self.link_ctx
                .href_for(&effective_url)
                .map(str::to_string)
        });

        let record = PageRecord {
            url: effective_url.to_string(),
            original_url: dispatched.item.url.clone(),
            depth: dispatched.item.depth,
            parent_url: dispatched.item.parent_url.clone(),
            title,
            status_code: page.status_code,
            error: None,
            link_attr,
            links: outbound,
            had_query: dispatched.had_query,
            from_sitemap: dispatched.item.from_sitemap,
            rendered: true,
            signals,
        };

        let canonical = url_ops::canonical_key(&effective_url);
        if self.produced.insert(canonical) {
            if let Some(stop) = self.persist(&record).await {
                return Some(stop);
            }
            self.pages.push(record);
        }

        self.stats.successful_pages += 1;
        self.last_progress = Instant::now();
        if let Err(e) = self
            .engine
            .observer
            .progress(self.job_id, self.stats.successful_pages)
        {
            tracing::warn!(job_id = %self.job_id, error = %e, "progress callback failed");
        }

        None
    }

    async fn absorb_failure(
        &mut self,
        dispatched: DispatchItem,
        failure: FetchFailure,
    ) -> Option<StopReason> {
        self.stats.total_attempted += 1;
        self.stats.failed_pages += 1;
        self.consecutive_failures += 1;

        tracing::warn!(
            url = %dispatched.fetch_url,
            error = %failure,
            "page fetch failed"
        );

        self.error_urls
            .record(&dispatched.fetch_url, &failure.to_string());
        self.report.page_errors.push(PageError {
            url: dispatched.fetch_url.to_string(),
            message: failure.to_string(),
        });

        let record = PageRecord {
            url: dispatched.fetch_url.to_string(),
            original_url: dispatched.item.url.clone(),
            depth: dispatched.item.depth,
            parent_url: dispatched.item.parent_url.clone(),
            title: failure.record_title(),
            status_code: failure.status_code(),
            error: Some(failure.tag().to_string()),
            link_attr: dispatched.item.link_attr.clone(),
            links: Vec::new(),
            had_query: dispatched.had_query,
            from_sitemap: dispatched.item.from_sitemap,
            rendered: true,
            signals: PageSignals::default(),
        };

        let canonical = url_ops::canonical_key(&dispatched.fetch_url);
        if self.produced.insert(canonical) {
            if let Some(stop) = self.persist(&record).await {
                return Some(stop);
            }
            self.pages.push(record);
        }

        None
    }

    /// Resolve, filter, and enqueue the page's outbound links. Returns the
    /// same-site outbound set (canonical form) for the page record.
    fn enqueue_links(
        &mut self,
        dispatched: &DispatchItem,
        page: &FetchedPage,
        effective_url: &Url,
    ) -> Vec<String> {
        let mut outbound = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let all_links = page
            .extracted
            .links
            .iter()
            .chain(page.extracted.nav_links.iter());

        for raw_link in all_links {
            let resolved = match url_ops::resolve_href(effective_url, &raw_link.href) {
                Ok(u) => u,
                Err(e) => {
                    tracing::debug!(href = %raw_link.href, error = %e, "unresolvable link");
                    continue;
                }
            };

            // Remember how the link looked on this page, keyed by every
            // surface variant of its target.
            self.link_ctx.record_title(&resolved, &raw_link.text);
            self.link_ctx.record_href(&resolved, &raw_link.href);

            if let Some(ext) = url_ops::non_html_extension(&resolved) {
                if ext == "pdf" {
                    self.stats.skipped_pdfs += 1;
                } else {
                    self.report.skipped_files.push(resolved.to_string());
                }
                continue;
            }

            // In-page anchors are not pages; fragments of other pages
            // collapse to their base, processed once.
            let mut target = resolved;
            if url_ops::is_hash_fragment(&target) {
                if url_ops::base_key(&target) == url_ops::base_key(effective_url) {
                    continue;
                }
                target.set_fragment(None);
            }

            if !url_ops::same_site(&target, &self.seed_url) {
                continue;
            }

            let canonical = url_ops::canonical_key(&target);
            if seen.insert(canonical.clone()) {
                outbound.push(canonical.clone());
            }

            if self.visited.has_key(&canonical) {
                continue;
            }
            if dispatched.item.depth + 1 > self.options().max_depth {
                continue;
            }

            let link_title = self
                .link_ctx
                .title_for(&target)
                .map(str::to_string)
                .filter(|t| !t.is_empty());
            let link_attr = self.link_ctx.href_for(&target).map(str::to_string);
            self.frontier.push(FrontierItem {
                url: target.to_string(),
                depth: dispatched.item.depth + 1,
                parent_url: Some(effective_url.to_string()),
                link_title,
                link_attr,
                from_sitemap: false,
                sample_crawl: false,
            });
        }

        outbound
    }

    async fn persist(&mut self, record: &PageRecord) -> Option<StopReason> {
        match storage::upsert_with_retry(self.engine.store.as_ref(), self.job_id, record).await {
            Ok(()) => None,
            Err(StoreError::JobMissing) => {
                tracing::info!(job_id = %self.job_id, "job deleted during crawl");
                Some(StopReason::JobDeleted)
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, url = %record.url, error = %e, "persist failed");
                self.report
                    .warnings
                    .push(format!("failed to persist {}: {e}", record.url));
                None
            }
        }
    }
}

/// Sum of character codes; the deterministic jitter source.
fn char_sum(value: &str) -> u64 {
    value.chars().map(|c| c as u64).sum()
}
