//! Structural issue detection over the canonical tree and the raw records.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::Serialize;

use crate::analysis::tree::{CanonicalTree, TreeNode};
use crate::crawler::url_ops;
use crate::models::PageRecord;

/// A path deeper than this is hard for users and crawlers to reach.
const DEPTH_LIMIT: u32 = 3;
/// More first-level sections than this overloads the root navigation.
const ROOT_SECTION_LIMIT: usize = 10;
/// A flat section holds more than this many nodes...
const FLAT_SECTION_SUBTREE: u32 = 20;
/// ...with more than this many direct children...
const FLAT_SECTION_CHILDREN: usize = 15;
/// ...and no structure deeper than this below it.
const FLAT_SECTION_MAX_DEPTH: u32 = 1;
/// Fewer words than this (but more than zero) reads as thin content.
const THIN_CONTENT_WORDS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DeepPath,
    NumericSlug,
    AutoGeneratedSlug,
    DuplicateTitle,
    OverloadedRoot,
    FlatSection,
    FacetedUrl,
    OrphanPage,
    ThinContent,
    NoindexPage,
    MissingCanonical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// The path, URL, or title the issue is about.
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IssueReport {
    pub issues: Vec<Issue>,
    pub max_depth: u32,
}

/// Run every detector. Output order is deterministic: detectors run in a
/// fixed order and each walks its input in sorted order.
pub fn detect(tree: &CanonicalTree, records: &[PageRecord]) -> IssueReport {
    let mut issues = Vec::new();

    detect_depth(tree, &mut issues);
    detect_slug_patterns(tree, &mut issues);
    detect_duplicate_titles(records, &mut issues);
    detect_hierarchy(tree, &mut issues);
    detect_crawl_waste(records, &mut issues);
    detect_seo(records, &mut issues);

    IssueReport {
        issues,
        max_depth: tree.max_depth,
    }
}

fn walk_paths<'a>(
    node: &'a TreeNode,
    path: &mut Vec<&'a str>,
    visit: &mut impl FnMut(&[&str], &TreeNode),
) {
    for child in node.children.values() {
        path.push(&child.segment);
        visit(path, child);
        walk_paths(child, path, visit);
        path.pop();
    }
}

fn join_path(path: &[&str]) -> String {
    format!("/{}", path.join("/"))
}

fn detect_depth(tree: &CanonicalTree, issues: &mut Vec<Issue>) {
    let mut path = Vec::new();
    walk_paths(&tree.root, &mut path, &mut |path, node| {
        if node.direct_count > 0 && path.len() as u32 > DEPTH_LIMIT {
            issues.push(Issue {
                kind: IssueKind::DeepPath,
                subject: join_path(path),
                detail: format!(
                    "page sits {} levels deep (limit {DEPTH_LIMIT})",
                    path.len()
                ),
            });
        }
    });
}

fn detect_slug_patterns(tree: &CanonicalTree, issues: &mut Vec<Issue>) {
    let auto_generated = Regex::new(r"^[a-z]+(_|-)?\d+$").expect("valid regex");

    let mut path = Vec::new();
    walk_paths(&tree.root, &mut path, &mut |path, node| {
        if node.direct_count == 0 {
            return;
        }
        let terminal = path.last().expect("walked path is never empty");
        if !terminal.is_empty() && terminal.chars().all(|c| c.is_ascii_digit()) {
            issues.push(Issue {
                kind: IssueKind::NumericSlug,
                subject: join_path(path),
                detail: "terminal segment is a bare number".to_string(),
            });
        } else if auto_generated.is_match(terminal) {
            issues.push(Issue {
                kind: IssueKind::AutoGeneratedSlug,
                subject: join_path(path),
                detail: "terminal segment looks auto-generated".to_string(),
            });
        }
    });
}

fn detect_duplicate_titles(records: &[PageRecord], issues: &mut Vec<Issue>) {
    let mut by_title: BTreeMap<&str, HashSet<String>> = BTreeMap::new();
    for record in records {
        if record.error.is_some() || record.title.is_empty() {
            continue;
        }
        if let Ok(url) = url_ops::parse_http_url(&record.url) {
            by_title
                .entry(record.title.as_str())
                .or_default()
                .insert(url.path().to_string());
        }
    }

    for (title, paths) in by_title {
        if paths.len() > 1 {
            issues.push(Issue {
                kind: IssueKind::DuplicateTitle,
                subject: title.to_string(),
                detail: format!("title shared by {} distinct paths", paths.len()),
            });
        }
    }
}

fn detect_hierarchy(tree: &CanonicalTree, issues: &mut Vec<Issue>) {
    let sections = tree.root.children.len();
    if sections > ROOT_SECTION_LIMIT {
        issues.push(Issue {
            kind: IssueKind::OverloadedRoot,
            subject: "/".to_string(),
            detail: format!("{sections} first-level sections (limit {ROOT_SECTION_LIMIT})"),
        });
    }

    for child in tree.root.children.values() {
        if child.subtree_count > FLAT_SECTION_SUBTREE
            && child.children.len() > FLAT_SECTION_CHILDREN
            && child.subtree_max_depth() <= FLAT_SECTION_MAX_DEPTH
        {
            issues.push(Issue {
                kind: IssueKind::FlatSection,
                subject: format!("/{}", child.segment),
                detail: format!(
                    "{} pages in a single flat level",
                    child.children.len()
                ),
            });
        }
    }
}

fn detect_crawl_waste(records: &[PageRecord], issues: &mut Vec<Issue>) {
    for record in records {
        if record.had_query {
            issues.push(Issue {
                kind: IssueKind::FacetedUrl,
                subject: record.original_url.clone(),
                detail: "URL variant with a query string was crawled".to_string(),
            });
        }
    }

    // Orphans: crawled pages no other crawled page links to. Sitemap-only
    // minimal records contribute no outbound links, so they neither rescue
    // nor count as orphans.
    let mut inbound: HashSet<&str> = HashSet::new();
    for record in records {
        let self_key = url_ops::canonical_key_str(&record.url);
        for link in &record.links {
            if self_key.as_deref() != Some(link.as_str()) {
                inbound.insert(link.as_str());
            }
        }
    }
    for record in records {
        if !record.rendered || record.error.is_some() {
            continue;
        }
        let Some(key) = url_ops::canonical_key_str(&record.url) else {
            continue;
        };
        if !inbound.contains(key.as_str()) {
            issues.push(Issue {
                kind: IssueKind::OrphanPage,
                subject: record.url.clone(),
                detail: "no crawled page links here".to_string(),
            });
        }
    }
}

fn detect_seo(records: &[PageRecord], issues: &mut Vec<Issue>) {
    for record in records {
        if !record.rendered || record.error.is_some() {
            continue;
        }
        let words = record.signals.word_count;
        if words > 0 && words < THIN_CONTENT_WORDS {
            issues.push(Issue {
                kind: IssueKind::ThinContent,
                subject: record.url.clone(),
                detail: format!("{words} words (threshold {THIN_CONTENT_WORDS})"),
            });
        }
        if record.signals.meta_robots.to_lowercase().contains("noindex") {
            issues.push(Issue {
                kind: IssueKind::NoindexPage,
                subject: record.url.clone(),
                detail: "robots meta excludes this page from indexing".to_string(),
            });
        }
        if record
            .signals
            .meta_canonical
            .as_deref()
            .map_or(true, |c| c.trim().is_empty())
        {
            issues.push(Issue {
                kind: IssueKind::MissingCanonical,
                subject: record.url.clone(),
                detail: "no canonical link element".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tree;
    use crate::models::PageSignals;

    fn record(url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            original_url: url.to_string(),
            depth: 0,
            parent_url: None,
            title: format!("Title of {url}"),
            status_code: 200,
            error: None,
            link_attr: None,
            links: vec![],
            had_query: false,
            from_sitemap: false,
            rendered: true,
            signals: PageSignals {
                meta_canonical: Some(url.to_string()),
                word_count: 500,
                ..PageSignals::default()
            },
        }
    }

    fn kinds(report: &IssueReport) -> Vec<IssueKind> {
        report.issues.iter().map(|i| i.kind).collect()
    }

    fn detect_for(records: &[PageRecord]) -> IssueReport {
        let tree = tree::build(records);
        detect(&tree, records)
    }

    #[test]
    fn test_deep_path() {
        let records = vec![record("https://example.com/a/b/c/d")];
        let report = detect_for(&records);
        assert!(kinds(&report).contains(&IssueKind::DeepPath));
        assert_eq!(report.max_depth, 4);
    }

    #[test]
    fn test_numeric_and_auto_generated_slugs() {
        let records = vec![
            record("https://example.com/products/12345"),
            record("https://example.com/page-17"),
        ];
        let report = detect_for(&records);
        let kinds = kinds(&report);
        assert!(kinds.contains(&IssueKind::NumericSlug));
        assert!(kinds.contains(&IssueKind::AutoGeneratedSlug));
    }

    #[test]
    fn test_duplicate_titles() {
        let mut a = record("https://example.com/a");
        let mut b = record("https://example.com/b");
        a.title = "Same".to_string();
        b.title = "Same".to_string();
        let report = detect_for(&[a, b]);
        let duplicates: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::DuplicateTitle)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].subject, "Same");
    }

    #[test]
    fn test_overloaded_root() {
        let records: Vec<PageRecord> = (0..12)
            .map(|i| record(&format!("https://example.com/section-{i:02}/page")))
            .collect();
        let report = detect_for(&records);
        assert!(kinds(&report).contains(&IssueKind::OverloadedRoot));
    }

    #[test]
    fn test_flat_section() {
        let records: Vec<PageRecord> = (0..25)
            .map(|i| record(&format!("https://example.com/catalog/item-a{i:02}")))
            .collect();
        let report = detect_for(&records);
        let flat: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::FlatSection)
            .collect();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].subject, "/catalog");
    }

    #[test]
    fn test_nested_section_is_not_flat() {
        let records: Vec<PageRecord> = (0..25)
            .map(|i| record(&format!("https://example.com/catalog/group/item-a{i:02}")))
            .collect();
        let report = detect_for(&records);
        assert!(!kinds(&report).contains(&IssueKind::FlatSection));
    }

    #[test]
    fn test_faceted_url() {
        let mut r = record("https://example.com/search");
        r.had_query = true;
        r.original_url = "https://example.com/search?q=shoes".to_string();
        let report = detect_for(&[r]);
        let faceted: Vec<&Issue> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::FacetedUrl)
            .collect();
        assert_eq!(faceted.len(), 1);
        assert!(faceted[0].subject.contains("q=shoes"));
    }

    #[test]
    fn test_orphan_detection() {
        let mut home = record("https://example.com/");
        home.links = vec!["https://example.com/linked".to_string()];
        let linked = record("https://example.com/linked");
        let orphan = record("https://example.com/island");

        let report = detect_for(&[home, linked, orphan]);
        let orphans: Vec<&str> = report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::OrphanPage)
            .map(|i| i.subject.as_str())
            .collect();
        assert!(orphans.contains(&"https://example.com/island"));
        assert!(!orphans.contains(&"https://example.com/linked"));
    }

    #[test]
    fn test_self_link_does_not_rescue_orphan() {
        let mut lonely = record("https://example.com/lonely");
        lonely.links = vec!["https://example.com/lonely".to_string()];
        let report = detect_for(&[lonely]);
        assert!(kinds(&report).contains(&IssueKind::OrphanPage));
    }

    #[test]
    fn test_seo_issues() {
        let mut thin = record("https://example.com/thin");
        thin.signals.word_count = 50;

        let mut noindex = record("https://example.com/hidden");
        noindex.signals.meta_robots = "noindex".to_string();

        let mut bare = record("https://example.com/bare");
        bare.signals.meta_canonical = None;

        let report = detect_for(&[thin, noindex, bare]);
        let kinds = kinds(&report);
        assert!(kinds.contains(&IssueKind::ThinContent));
        assert!(kinds.contains(&IssueKind::NoindexPage));
        assert!(kinds.contains(&IssueKind::MissingCanonical));
    }

    #[test]
    fn test_minimal_sitemap_records_skip_seo_checks() {
        let mut minimal = record("https://example.com/from-sitemap");
        minimal.rendered = false;
        minimal.from_sitemap = true;
        minimal.signals = PageSignals::default();
        let report = detect_for(&[minimal]);
        let kinds = kinds(&report);
        assert!(!kinds.contains(&IssueKind::ThinContent));
        assert!(!kinds.contains(&IssueKind::MissingCanonical));
        assert!(!kinds.contains(&IssueKind::OrphanPage));
    }
}
