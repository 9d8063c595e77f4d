//! HTML signal extraction.
//!
//! Both fetcher variants funnel their document (rendered or raw) through
//! this module, so the controller never needs to know which variant
//! produced a page.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::url_ops;
use crate::models::{Framework, PageIntent, PageType};

/// Titles interstitial pages present while a challenge runs. A title
/// matching one of these is discarded in favour of the URL-derived title.
const INTERSTITIAL_TITLES: &[&str] = &["just a moment", "checking your browser", "please wait"];

/// An anchor as it appeared in the document: verbatim `href` plus the text
/// shown to the user (anchor text, or the `title` attribute if empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub href: String,
    pub text: String,
}

/// Everything pulled out of one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub doc_title: Option<String>,
    pub og_title: Option<String>,
    pub twitter_title: Option<String>,
    pub h1: Option<String>,
    pub first_h2: Option<String>,
    pub h2_count: u32,
    pub word_count: u32,
    pub meta_description: Option<String>,
    pub meta_canonical: Option<String>,
    pub meta_robots: Option<String>,
    /// All anchors with an `href`, in document order.
    pub links: Vec<RawLink>,
    /// Dropdown menu items, pagination controls, and `rel=next` hints.
    pub nav_links: Vec<RawLink>,
    pub framework: Framework,
}

fn selector(raw: &str) -> Selector {
    Selector::parse(raw).expect("valid selector")
}

pub fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let doc_title = first_text(&document, "title");
    let og_title = meta_content(&document, r#"meta[property="og:title"]"#);
    let twitter_title = meta_content(&document, r#"meta[name="twitter:title"]"#)
        .or_else(|| meta_content(&document, r#"meta[property="twitter:title"]"#));
    let h1 = first_text(&document, "h1");

    let h2_sel = selector("h2");
    let mut h2_count = 0u32;
    let mut first_h2 = None;
    for el in document.select(&h2_sel) {
        let text = element_text(&el);
        if !text.is_empty() {
            if first_h2.is_none() {
                first_h2 = Some(text);
            }
            h2_count += 1;
        }
    }

    ExtractedPage {
        doc_title,
        og_title,
        twitter_title,
        h1,
        first_h2,
        h2_count,
        word_count: word_count(&document),
        meta_description: meta_content(&document, r#"meta[name="description"]"#),
        meta_canonical: attr_value(&document, r#"link[rel="canonical"]"#, "href"),
        meta_robots: meta_content(&document, r#"meta[name="robots"]"#),
        links: extract_anchors(&document),
        nav_links: extract_nav_links(&document),
        framework: detect_framework(html),
    }
}

fn first_text(document: &Html, sel: &str) -> Option<String> {
    let sel = selector(sel);
    document
        .select(&sel)
        .map(|el| element_text(&el))
        .find(|text| !text.is_empty())
}

fn meta_content(document: &Html, sel: &str) -> Option<String> {
    attr_value(document, sel, "content")
}

fn attr_value(document: &Html, sel: &str, attr: &str) -> Option<String> {
    let sel = selector(sel);
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr).map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn extract_anchors(document: &Html) -> Vec<RawLink> {
    let sel = selector("a[href]");
    document
        .select(&sel)
        .filter_map(|el| {
            let href = el.value().attr("href")?.to_string();
            if href.is_empty() {
                return None;
            }
            let mut text = element_text(&el);
            if text.is_empty() {
                text = el.value().attr("title").unwrap_or("").trim().to_string();
            }
            Some(RawLink { href, text })
        })
        .collect()
}

/// Dropdown and pagination anchors, plus `<link rel="next">`. These often
/// hide URLs a plain anchor walk misses on templated sites.
fn extract_nav_links(document: &Html) -> Vec<RawLink> {
    let mut out = Vec::new();

    for sel in [
        ".dropdown-menu a[href]",
        "nav .dropdown a[href]",
        ".pagination a[href]",
        "ul.pagination a[href]",
        r#"a[rel="next"]"#,
        r#"a[rel="prev"]"#,
    ] {
        let sel = selector(sel);
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                if !href.is_empty() {
                    out.push(RawLink {
                        href: href.to_string(),
                        text: element_text(&el),
                    });
                }
            }
        }
    }

    let rel_next = selector(r#"link[rel="next"]"#);
    for el in document.select(&rel_next) {
        if let Some(href) = el.value().attr("href") {
            if !href.is_empty() {
                out.push(RawLink {
                    href: href.to_string(),
                    text: String::new(),
                });
            }
        }
    }

    out
}

fn word_count(document: &Html) -> u32 {
    let body_sel = selector("body");
    let mut text = String::new();
    if let Some(body) = document.select(&body_sel).next() {
        collect_text_excluding(&body, &mut text);
    }
    text.split_whitespace().count() as u32
}

/// Recursively collect text, skipping script and style subtrees.
fn collect_text_excluding(node: &ElementRef, out: &mut String) {
    for child in node.children() {
        if let Some(text) = child.value().as_text() {
            out.push(' ');
            out.push_str(text);
        } else if let Some(el) = ElementRef::wrap(child) {
            let tag = el.value().name();
            if tag != "script" && tag != "style" {
                collect_text_excluding(&el, out);
            }
        }
    }
}

/// Marker-based framework hint. Next.js is checked before React since every
/// Next.js page also carries React markers.
pub fn detect_framework(html: &str) -> Framework {
    if html.contains("__NEXT_DATA__") || html.contains("id=\"__next\"") {
        Framework::Nextjs
    } else if html.contains("ng-version") || html.contains("ng-app") {
        Framework::Angular
    } else if html.contains("data-reactroot") || html.contains("data-reactid") {
        Framework::React
    } else if html.contains("data-v-app")
        || html.contains("data-server-rendered")
        || html.contains("__vue__")
    {
        Framework::Vue
    } else {
        Framework::Unknown
    }
}

/// Pick the human-readable title for a page.
///
/// A link title recorded on the parent takes precedence over everything.
/// Otherwise, non-root pages prefer social titles over the document title
/// (templated sites bury the page name there), while the root page trusts
/// its document title first.
pub fn resolve_title(extracted: &ExtractedPage, url: &Url, link_title: Option<&str>) -> String {
    if let Some(title) = link_title.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }

    let is_root = url.path() == "/" && url.fragment().is_none();
    let candidates: [&Option<String>; 5] = if is_root {
        [
            &extracted.doc_title,
            &extracted.og_title,
            &extracted.twitter_title,
            &extracted.h1,
            &extracted.first_h2,
        ]
    } else {
        [
            &extracted.og_title,
            &extracted.twitter_title,
            &extracted.h1,
            &extracted.doc_title,
            &extracted.first_h2,
        ]
    };

    let picked = candidates
        .into_iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|c| !c.is_empty());

    match picked {
        Some(title) if !is_interstitial(title) => title.to_string(),
        _ => url_ops::title_from_path(url),
    }
}

fn is_interstitial(title: &str) -> bool {
    let lower = title.to_lowercase();
    INTERSTITIAL_TITLES.iter().any(|t| lower.contains(t))
}

/// Path-substring page type heuristic.
pub fn classify_page_type(url: &Url) -> PageType {
    let path = url.path().to_lowercase();
    if ["/blog", "/article", "/post", "/learn", "/tutorial", "/guide"]
        .iter()
        .any(|p| path.contains(p))
    {
        PageType::Article
    } else if ["/product", "/shop"].iter().any(|p| path.contains(p)) {
        PageType::Product
    } else {
        PageType::Page
    }
}

/// Path-substring intent heuristic.
pub fn classify_intent(url: &Url) -> PageIntent {
    let path = url.path().to_lowercase();
    if path.contains("/contact") {
        PageIntent::Contact
    } else if ["/product", "/shop", "/pricing", "/buy", "/checkout"]
        .iter()
        .any(|p| path.contains(p))
    {
        PageIntent::Transactional
    } else if ["/about", "/blog", "/learn", "/docs", "/guide", "/tutorial", "/article"]
        .iter()
        .any(|p| path.contains(p))
    {
        PageIntent::Informational
    } else {
        PageIntent::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Doc Title</title>
    <meta name="description" content="A test page">
    <meta name="robots" content="index, follow">
    <meta property="og:title" content="OG Title">
    <link rel="canonical" href="https://example.com/test">
    <link rel="next" href="/page/2">
</head>
<body>
    <h1>Main Heading</h1>
    <h2>Sub One</h2>
    <h2>Sub Two</h2>
    <p>Body text with a handful of words for counting.</p>
    <a href="/internal">Internal Link</a>
    <a href="https://other.example/page">External</a>
    <a href="/untitled" title="Tooltip Name"></a>
    <ul class="pagination"><li><a href="/page/2">2</a></li></ul>
    <script>var ignored = "do not count";</script>
</body>
</html>"#;

    #[test]
    fn test_titles_and_meta() {
        let page = extract_page(TEST_HTML);
        assert_eq!(page.doc_title.as_deref(), Some("Doc Title"));
        assert_eq!(page.og_title.as_deref(), Some("OG Title"));
        assert_eq!(page.meta_description.as_deref(), Some("A test page"));
        assert_eq!(page.meta_canonical.as_deref(), Some("https://example.com/test"));
        assert_eq!(page.meta_robots.as_deref(), Some("index, follow"));
    }

    #[test]
    fn test_headings() {
        let page = extract_page(TEST_HTML);
        assert_eq!(page.h1.as_deref(), Some("Main Heading"));
        assert_eq!(page.first_h2.as_deref(), Some("Sub One"));
        assert_eq!(page.h2_count, 2);
    }

    #[test]
    fn test_anchor_extraction_with_title_fallback() {
        let page = extract_page(TEST_HTML);
        assert!(page
            .links
            .iter()
            .any(|l| l.href == "/internal" && l.text == "Internal Link"));
        assert!(page
            .links
            .iter()
            .any(|l| l.href == "/untitled" && l.text == "Tooltip Name"));
    }

    #[test]
    fn test_nav_links_include_pagination_and_rel_next() {
        let page = extract_page(TEST_HTML);
        assert!(page.nav_links.iter().any(|l| l.href == "/page/2"));
        // Both the <link rel="next"> and the pagination anchor point there.
        assert!(page.nav_links.len() >= 2);
    }

    #[test]
    fn test_word_count_skips_scripts() {
        let page = extract_page(TEST_HTML);
        assert!(page.word_count > 0);
        // Words inside the <script> tag are not counted.
        let html_no_script = TEST_HTML.replace(r#"<script>var ignored = "do not count";</script>"#, "");
        assert_eq!(page.word_count, extract_page(&html_no_script).word_count);
    }

    #[test]
    fn test_framework_detection() {
        assert_eq!(detect_framework(r#"<div id="__next"></div>"#), Framework::Nextjs);
        assert_eq!(detect_framework(r#"<div data-reactroot></div>"#), Framework::React);
        assert_eq!(detect_framework(r#"<app-root ng-version="17.0"></app-root>"#), Framework::Angular);
        assert_eq!(detect_framework(r#"<div data-v-app></div>"#), Framework::Vue);
        assert_eq!(detect_framework("<div></div>"), Framework::Unknown);
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_title_priority_non_root() {
        let page = extract_page(TEST_HTML);
        let title = resolve_title(&page, &url("https://example.com/test"), None);
        assert_eq!(title, "OG Title");
    }

    #[test]
    fn test_title_priority_root_prefers_document_title() {
        let page = extract_page(TEST_HTML);
        let title = resolve_title(&page, &url("https://example.com/"), None);
        assert_eq!(title, "Doc Title");
    }

    #[test]
    fn test_link_title_takes_precedence() {
        let page = extract_page(TEST_HTML);
        let title = resolve_title(&page, &url("https://example.com/test"), Some("Anchor Text"));
        assert_eq!(title, "Anchor Text");
    }

    #[test]
    fn test_interstitial_title_falls_back_to_path() {
        let html = "<html><head><title>Just a moment...</title></head><body></body></html>";
        let page = extract_page(html);
        let title = resolve_title(&page, &url("https://example.com/pricing-plans"), None);
        assert_eq!(title, "Pricing Plans");
    }

    #[test]
    fn test_empty_page_title_derived_from_url() {
        let page = extract_page("<html><body></body></html>");
        let title = resolve_title(&page, &url("https://example.com/getting-started"), None);
        assert_eq!(title, "Getting Started");
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_page_type(&url("https://x.example/blog/post-1")), PageType::Article);
        assert_eq!(classify_page_type(&url("https://x.example/shop/item")), PageType::Product);
        assert_eq!(classify_page_type(&url("https://x.example/about")), PageType::Page);
        assert_eq!(classify_intent(&url("https://x.example/contact")), PageIntent::Contact);
        assert_eq!(classify_intent(&url("https://x.example/pricing")), PageIntent::Transactional);
        assert_eq!(classify_intent(&url("https://x.example/about")), PageIntent::Informational);
        assert_eq!(classify_intent(&url("https://x.example/misc")), PageIntent::Unknown);
    }
}
