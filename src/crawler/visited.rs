//! The visited-set protocol and the per-crawl observation maps.
//!
//! All of the state here is owned by the controller and mutated only between
//! batch hand-offs, so the read-then-insert sequences below are atomic with
//! respect to the crawl.

use std::collections::{HashMap, HashSet};

use url::Url;

use super::url_ops;

/// Deduplication set keyed by canonical URL.
#[derive(Debug, Default)]
pub struct VisitedSet {
    keys: HashSet<String>,
}

/// What `reconcile_redirect` decided about a fetch that landed elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Redirect checking is off; the original URL stands.
    Ignored,
    /// The final URL was new and is now marked.
    Marked,
    /// The final URL was already visited; the fetch is a duplicate skip.
    Duplicate,
}

impl VisitedSet {
    pub fn new() -> Self {
        VisitedSet::default()
    }

    /// Membership accepts any surface variant of the URL.
    pub fn has(&self, url: &Url) -> bool {
        let canonical = url_ops::canonical_key(url);
        self.keys.contains(url.as_str())
            || self.keys.contains(&canonical)
            || self.keys.contains(&format!("{canonical}/"))
    }

    pub fn has_key(&self, canonical: &str) -> bool {
        self.keys.contains(canonical) || self.keys.contains(&format!("{canonical}/"))
    }

    /// Insert the canonical form. Idempotent; returns false if already present.
    pub fn mark(&mut self, url: &Url) -> bool {
        self.keys.insert(url_ops::canonical_key(url))
    }

    pub fn mark_key(&mut self, canonical: String) -> bool {
        self.keys.insert(canonical)
    }

    /// Fold the final URL of a redirect into the set. After any successful
    /// fetch both the original canonical and, with checking on, the final
    /// canonical are members.
    pub fn reconcile_redirect(
        &mut self,
        original: &Url,
        final_url: &Url,
        check_duplicates: bool,
    ) -> RedirectOutcome {
        if !check_duplicates {
            return RedirectOutcome::Ignored;
        }
        if url_ops::canonical_key(original) == url_ops::canonical_key(final_url) {
            return RedirectOutcome::Ignored;
        }
        if self.has(final_url) {
            RedirectOutcome::Duplicate
        } else {
            self.mark(final_url);
            RedirectOutcome::Marked
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Anchor text and verbatim `href` attributes observed for URLs, keyed by
/// their common surface variants so lookups succeed regardless of trailing
/// slash. First observation wins.
#[derive(Debug, Default)]
pub struct LinkContext {
    titles: HashMap<String, String>,
    hrefs: HashMap<String, String>,
}

impl LinkContext {
    pub fn new() -> Self {
        LinkContext::default()
    }

    fn variants(url: &Url) -> [String; 3] {
        let canonical = url_ops::canonical_key(url);
        let with_slash = format!("{canonical}/");
        [canonical, with_slash, url.as_str().to_string()]
    }

    pub fn record_title(&mut self, url: &Url, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        for key in Self::variants(url) {
            self.titles.entry(key).or_insert_with(|| title.to_string());
        }
    }

    pub fn record_href(&mut self, url: &Url, href: &str) {
        if href.is_empty() {
            return;
        }
        for key in Self::variants(url) {
            self.hrefs.entry(key).or_insert_with(|| href.to_string());
        }
    }

    pub fn title_for(&self, url: &Url) -> Option<&str> {
        Self::variants(url)
            .iter()
            .find_map(|key| self.titles.get(key))
            .map(String::as_str)
    }

    pub fn href_for(&self, url: &Url) -> Option<&str> {
        Self::variants(url)
            .iter()
            .find_map(|key| self.hrefs.get(key))
            .map(String::as_str)
    }
}

/// Most recent error summary per base URL. Lets the controller skip
/// hash-fragment variants whose base page already failed.
#[derive(Debug, Default)]
pub struct ErrorUrlMap {
    errors: HashMap<String, String>,
}

impl ErrorUrlMap {
    pub fn new() -> Self {
        ErrorUrlMap::default()
    }

    pub fn record(&mut self, url: &Url, summary: &str) {
        self.errors
            .insert(url_ops::base_key(url), summary.to_string());
    }

    pub fn get(&self, url: &Url) -> Option<&str> {
        self.errors.get(&url_ops::base_key(url)).map(String::as_str)
    }
}
