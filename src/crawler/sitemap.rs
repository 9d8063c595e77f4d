//! Sitemap discovery: robots-declared and well-known locations, index
//! recursion, gzip payloads, and the three content flavours (XML url sets,
//! plain text, RSS/Atom feeds).

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Read;

use async_recursion::async_recursion;
use regex::Regex;
use url::Url;

use super::url_ops;
use crate::config::{
    DEFAULT_SITEMAP_PATHS, SITEMAP_FETCH_TIMEOUT, SITEMAP_INDEX_MAX_CHILDREN,
    SITEMAP_INDEX_MAX_DEPTH, SITEMAP_MAX_REDIRECTS, SITEMAP_URL_CEILING,
};

/// Result of probing a site's sitemaps.
#[derive(Debug, Default)]
pub struct SitemapDiscovery {
    /// Same-site URLs, deduplicated, in discovery order.
    pub urls: Vec<String>,
    /// Count before same-site filtering and deduplication.
    pub total_discovered: u32,
    /// Per-probe failures; none of these fail the crawl.
    pub errors: Vec<String>,
}

struct SitemapScan {
    processed: HashSet<String>,
    urls: Vec<String>,
    errors: Vec<String>,
}

/// Probe the robots-declared sitemaps, then the well-known default
/// locations until one of them yields URLs.
pub async fn discover(seed: &Url, robots_sitemaps: &[String]) -> SitemapDiscovery {
    let client = match reqwest::Client::builder()
        .timeout(SITEMAP_FETCH_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(SITEMAP_MAX_REDIRECTS))
        .gzip(true)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return SitemapDiscovery {
                errors: vec![format!("sitemap client setup failed: {e}")],
                ..SitemapDiscovery::default()
            }
        }
    };

    let mut scan = SitemapScan {
        processed: HashSet::new(),
        urls: Vec::new(),
        errors: Vec::new(),
    };

    for declared in robots_sitemaps {
        if scan.urls.len() >= SITEMAP_URL_CEILING {
            break;
        }
        process_sitemap(&client, declared, 0, &mut scan).await;
    }

    for path in DEFAULT_SITEMAP_PATHS {
        if !scan.urls.is_empty() {
            break;
        }
        let Ok(probe) = seed.join(path) else { continue };
        process_sitemap(&client, probe.as_str(), 0, &mut scan).await;
    }

    let total_discovered = scan.urls.len() as u32;

    // Filter to the seed's registrable domain and deduplicate.
    let mut seen = HashSet::new();
    let urls: Vec<String> = scan
        .urls
        .into_iter()
        .filter(|raw| {
            url_ops::parse_http_url(raw)
                .map(|u| url_ops::same_site(&u, seed))
                .unwrap_or(false)
        })
        .filter(|raw| match url_ops::canonical_key_str(raw) {
            Some(key) => seen.insert(key),
            None => false,
        })
        .collect();

    SitemapDiscovery {
        urls,
        total_discovered,
        errors: scan.errors,
    }
}

#[async_recursion]
async fn process_sitemap(client: &reqwest::Client, url: &str, depth: usize, scan: &mut SitemapScan) {
    if depth > SITEMAP_INDEX_MAX_DEPTH || scan.urls.len() >= SITEMAP_URL_CEILING {
        return;
    }
    if !scan.processed.insert(url.to_string()) {
        return;
    }

    let body = match fetch_sitemap_body(client, url).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "sitemap probe failed");
            scan.errors.push(e);
            return;
        }
    };

    match parse_sitemap_document(&body) {
        SitemapDocument::Index(children) => {
            tracing::debug!(url = %url, children = children.len(), "sitemap index");
            for child in children.into_iter().take(SITEMAP_INDEX_MAX_CHILDREN) {
                if scan.urls.len() >= SITEMAP_URL_CEILING {
                    break;
                }
                process_sitemap(client, &child, depth + 1, scan).await;
            }
        }
        SitemapDocument::Pages(urls) => {
            tracing::debug!(url = %url, count = urls.len(), "sitemap urlset");
            scan.urls.extend(urls);
        }
        SitemapDocument::Empty => {
            scan.errors.push(format!("no URLs found in {url}"));
        }
    }
}

/// Fetch a sitemap, decompressing gzip payloads delivered by extension or
/// sniffed by magic bytes. Transfer-level gzip is handled by the client.
async fn fetch_sitemap_body(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("fetch {url}: {e}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("fetch {url}: HTTP {}", status.as_u16()));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| format!("read {url}: {e}"))?;

    let looks_gzipped = url.ends_with(".gz") || bytes.starts_with(&[0x1f, 0x8b]);
    if looks_gzipped && bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut decompressed = String::new();
        decoder
            .read_to_string(&mut decompressed)
            .map_err(|e| format!("gunzip {url}: {e}"))?;
        Ok(decompressed)
    } else {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum SitemapDocument {
    /// Child sitemap URLs from a `<sitemapindex>`.
    Index(Vec<String>),
    /// Page URLs.
    Pages(Vec<String>),
    Empty,
}

/// Classify and extract a sitemap payload: XML index, XML url set, plain
/// text (one URL per line), or an RSS/Atom feed.
pub(crate) fn parse_sitemap_document(body: &str) -> SitemapDocument {
    let locs = extract_locs(body);

    if is_sitemap_index(body) {
        return if locs.is_empty() {
            SitemapDocument::Empty
        } else {
            SitemapDocument::Index(locs)
        };
    }

    if !locs.is_empty() {
        return SitemapDocument::Pages(locs);
    }

    if body.contains("<rss") || body.contains("<feed") {
        let links = extract_feed_links(body);
        return if links.is_empty() {
            SitemapDocument::Empty
        } else {
            SitemapDocument::Pages(links)
        };
    }

    let lines: Vec<String> = body
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        SitemapDocument::Empty
    } else {
        SitemapDocument::Pages(lines)
    }
}

fn is_sitemap_index(body: &str) -> bool {
    if body.contains("<sitemapindex") {
        return true;
    }
    // Nested <sitemap> entries without the index wrapper.
    Regex::new(r"<(?:[A-Za-z0-9_-]+:)?sitemap[\s>]")
        .expect("valid regex")
        .is_match(body)
}

/// All `<loc>` values, tolerating namespaced tags and CDATA wrappers.
fn extract_locs(body: &str) -> Vec<String> {
    let loc_re = Regex::new(r"(?s)<(?:[A-Za-z0-9_-]+:)?loc[^>]*>\s*(.*?)\s*</(?:[A-Za-z0-9_-]+:)?loc>")
        .expect("valid regex");
    loc_re
        .captures_iter(body)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .map(strip_cdata)
        .map(decode_entities)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `<link>` element text plus `href="..."` attributes from RSS/Atom feeds.
fn extract_feed_links(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let link_re = Regex::new(r"(?s)<link[^>]*>\s*(.*?)\s*</link>").expect("valid regex");
    for cap in link_re.captures_iter(body) {
        if let Some(m) = cap.get(1) {
            let value = decode_entities(strip_cdata(m.as_str()));
            let value = value.trim();
            if value.starts_with("http") {
                out.push(value.to_string());
            }
        }
    }
    let href_re = Regex::new(r#"href\s*=\s*"([^"]+)""#).expect("valid regex");
    for cap in href_re.captures_iter(body) {
        if let Some(m) = cap.get(1) {
            let value = decode_entities(m.as_str());
            if value.starts_with("http") {
                out.push(value);
            }
        }
    }
    out
}

fn strip_cdata(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .map(str::trim)
        .unwrap_or(value)
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Pick a diverse sample from a large sitemap: the homepage if present, then
/// round-robin across URLs grouped by first path segment until the sample
/// is full.
pub fn sample_diverse(urls: &[String], limit: usize, seed: &Url) -> Vec<String> {
    if urls.len() <= limit {
        return urls.to_vec();
    }

    let mut sample = Vec::with_capacity(limit);
    let homepage_key = seed
        .join("/")
        .ok()
        .map(|root| url_ops::canonical_key(&root));

    let mut groups: BTreeMap<String, VecDeque<&String>> = BTreeMap::new();
    for raw in urls {
        let Ok(parsed) = url_ops::parse_http_url(raw) else {
            continue;
        };
        if homepage_key.as_deref() == Some(url_ops::canonical_key(&parsed).as_str()) {
            if sample.is_empty() {
                sample.push(raw.clone());
            }
            continue;
        }
        let segment = parsed
            .path_segments()
            .and_then(|mut s| s.find(|seg| !seg.is_empty()).map(str::to_string))
            .unwrap_or_default();
        groups.entry(segment).or_default().push_back(raw);
    }

    while sample.len() < limit {
        let mut took_any = false;
        for queue in groups.values_mut() {
            if sample.len() >= limit {
                break;
            }
            if let Some(url) = queue.pop_front() {
                sample.push(url.clone());
                took_any = true;
            }
        }
        if !took_any {
            break;
        }
    }

    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standard_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/</loc></url>
  <url><loc>https://example.com/about</loc></url>
  <url><loc>
    https://example.com/blog
  </loc></url>
</urlset>"#;
        let parsed = parse_sitemap_document(xml);
        assert_eq!(
            parsed,
            SitemapDocument::Pages(vec![
                "https://example.com/".to_string(),
                "https://example.com/about".to_string(),
                "https://example.com/blog".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/sitemap-1.xml</loc></sitemap>
  <sitemap><loc>https://example.com/sitemap-2.xml</loc></sitemap>
</sitemapindex>"#;
        let parsed = parse_sitemap_document(xml);
        assert_eq!(
            parsed,
            SitemapDocument::Index(vec![
                "https://example.com/sitemap-1.xml".to_string(),
                "https://example.com/sitemap-2.xml".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_namespaced_and_cdata_locs() {
        let xml = r#"<ns:urlset>
  <ns:url><ns:loc><![CDATA[ https://example.com/a&amp;b ]]></ns:loc></ns:url>
</ns:urlset>"#;
        let parsed = parse_sitemap_document(xml);
        assert_eq!(
            parsed,
            SitemapDocument::Pages(vec!["https://example.com/a&b".to_string()])
        );
    }

    #[test]
    fn test_parse_plain_text_sitemap() {
        let body = "https://example.com/a\n# comment\nhttps://example.com/b\n\n";
        let parsed = parse_sitemap_document(body);
        assert_eq!(
            parsed,
            SitemapDocument::Pages(vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_rss_feed_fallback() {
        let body = r#"<rss version="2.0"><channel>
  <item><link>https://example.com/post-1</link></item>
  <item><link>https://example.com/post-2</link></item>
</channel></rss>"#;
        let parsed = parse_sitemap_document(body);
        assert_eq!(
            parsed,
            SitemapDocument::Pages(vec![
                "https://example.com/post-1".to_string(),
                "https://example.com/post-2".to_string(),
            ])
        );
    }

    #[test]
    fn test_parse_atom_hrefs() {
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry><link href="https://example.com/entry-1"/></entry>
</feed>"#;
        let parsed = parse_sitemap_document(body);
        assert_eq!(
            parsed,
            SitemapDocument::Pages(vec!["https://example.com/entry-1".to_string()])
        );
    }

    #[test]
    fn test_garbage_is_empty() {
        assert_eq!(parse_sitemap_document("this is not xml"), SitemapDocument::Empty);
        assert_eq!(parse_sitemap_document("<urlset></urlset>"), SitemapDocument::Empty);
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(
            decode_entities("https://x.example/?a=1&amp;b=2"),
            "https://x.example/?a=1&b=2"
        );
        assert_eq!(decode_entities("&lt;tag&gt;"), "<tag>");
    }

    fn seed() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn test_sample_small_input_passes_through() {
        let urls = vec!["https://example.com/a".to_string()];
        assert_eq!(sample_diverse(&urls, 50, &seed()), urls);
    }

    #[test]
    fn test_sample_includes_homepage_first() {
        let mut urls: Vec<String> = (0..30)
            .map(|i| format!("https://example.com/blog/post-{i}"))
            .collect();
        urls.push("https://example.com/".to_string());
        let sample = sample_diverse(&urls, 10, &seed());
        assert_eq!(sample.len(), 10);
        assert_eq!(sample[0], "https://example.com/");
    }

    #[test]
    fn test_sample_round_robins_sections() {
        let mut urls = Vec::new();
        for i in 0..40 {
            urls.push(format!("https://example.com/blog/post-{i}"));
        }
        for i in 0..40 {
            urls.push(format!("https://example.com/docs/page-{i}"));
        }
        let sample = sample_diverse(&urls, 10, &seed());
        assert_eq!(sample.len(), 10);
        let blog = sample.iter().filter(|u| u.contains("/blog/")).count();
        let docs = sample.iter().filter(|u| u.contains("/docs/")).count();
        assert_eq!(blog, 5);
        assert_eq!(docs, 5);
    }

    #[test]
    fn test_sample_is_deterministic() {
        let urls: Vec<String> = (0..200)
            .map(|i| format!("https://example.com/s{}/p{}", i % 7, i))
            .collect();
        let a = sample_diverse(&urls, 50, &seed());
        let b = sample_diverse(&urls, 50, &seed());
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
    }
}
