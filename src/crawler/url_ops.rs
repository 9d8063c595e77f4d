//! URL parsing, resolution, and the canonical forms used for deduplication.
//!
//! Three derived forms of a URL matter to the crawl:
//! - the *normalized* form (query stripped, hash stripped unless it is a
//!   `#/` route, trailing slash preserved),
//! - the *canonical* form (normalized, trailing slash stripped) — the
//!   visited-set key,
//! - the *base* form (canonical with any hash removed).

use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Clone, Error)]
pub enum UrlError {
    #[error("invalid URL: {0}")]
    Invalid(String),
    #[error("unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme { scheme: String, url: String },
}

/// Two-label public suffixes under which the registrable domain takes three
/// labels instead of two.
const TWO_LABEL_SUFFIXES: &[&str] = &["co.uk", "com.au", "com.br", "co.za", "com.mx", "co.jp"];

/// Extensions that never yield an HTML page. PDFs are listed here too but
/// are counted separately by the controller.
const NON_HTML_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "rar", "exe", "dmg", "jpg", "jpeg",
    "png", "gif", "svg", "mp3", "mp4", "avi", "mov",
];

/// Parse an absolute URL, accepting only http and https.
pub fn parse_http_url(raw: &str) -> Result<Url, UrlError> {
    let parsed = Url::parse(raw).map_err(|_| UrlError::Invalid(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(UrlError::UnsupportedScheme {
            scheme: other.to_string(),
            url: raw.to_string(),
        }),
    }
}

/// Resolve an `href` against the page it appeared on, per RFC 3986.
///
/// The base is the current page's URL, not the site root: `about/index.php`
/// on `https://site/about` resolves to `https://site/about/index.php`.
pub fn resolve_href(base: &Url, href: &str) -> Result<Url, UrlError> {
    let joined = base
        .join(href)
        .map_err(|_| UrlError::Invalid(href.to_string()))?;
    match joined.scheme() {
        "http" | "https" => Ok(joined),
        other => Err(UrlError::UnsupportedScheme {
            scheme: other.to_string(),
            url: href.to_string(),
        }),
    }
}

/// Prepend `https://` to a bare domain so callers can submit either form.
pub fn ensure_scheme(seed: &str) -> String {
    let trimmed = seed.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// True iff the hash begins with `#/` (a client-side route).
pub fn is_hash_route(url: &Url) -> bool {
    url.fragment().is_some_and(|f| f.starts_with('/'))
}

/// True iff a non-empty hash exists that is not a route (an in-page anchor).
pub fn is_hash_fragment(url: &Url) -> bool {
    url.fragment()
        .is_some_and(|f| !f.is_empty() && !f.starts_with('/'))
}

/// Strip the query, and the hash unless it is preserved or a hash route.
/// The trailing slash is kept; some servers 404 without it.
pub fn normalize(url: &Url, preserve_hash: bool) -> Url {
    let mut out = url.clone();
    out.set_query(None);
    if !preserve_hash && !is_hash_route(url) {
        out.set_fragment(None);
    }
    out
}

fn host_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn render_key(url: &Url, keep_fragment: bool) -> String {
    let mut out = format!("{}://{}", url.scheme(), host_port(url));
    let path = url.path();
    out.push_str(path.strip_suffix('/').unwrap_or(path));
    if keep_fragment {
        if let Some(fragment) = url.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
    }
    out
}

/// The visited-set key: normalized form with the trailing slash stripped.
pub fn canonical_key(url: &Url) -> String {
    let normalized = normalize(url, false);
    render_key(&normalized, true)
}

/// Canonical key computed straight from a raw string; None if unparseable.
pub fn canonical_key_str(raw: &str) -> Option<String> {
    parse_http_url(raw).ok().map(|u| canonical_key(&u))
}

/// The canonical form with any hash removed, as a key. Hash-fragment
/// variants of one page all share the same base key.
pub fn base_key(url: &Url) -> String {
    let mut stripped = url.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    render_key(&stripped, false)
}

/// The registrable domain: last two labels, or three when the last two form
/// a recognized public suffix. IP hosts are returned unchanged.
pub fn registrable_domain(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
        Host::Domain(domain) => {
            let labels: Vec<&str> = domain.split('.').collect();
            if labels.len() <= 2 {
                return Some(domain.to_string());
            }
            let last_two = labels[labels.len() - 2..].join(".");
            let take = if TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
                3
            } else {
                2
            };
            Some(labels[labels.len() - take.min(labels.len())..].join("."))
        }
    }
}

/// The crawl-scope predicate: same registrable domain, so
/// `www.example.com` and `about.example.com` share one scope.
pub fn same_site(a: &Url, b: &Url) -> bool {
    match (registrable_domain(a), registrable_domain(b)) {
        (Some(da), Some(db)) => da == db,
        _ => false,
    }
}

/// Extension of the last path segment if it is one of the known non-HTML
/// file types.
pub fn non_html_extension(url: &Url) -> Option<&'static str> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    NON_HTML_EXTENSIONS.iter().copied().find(|e| *e == ext)
}

pub fn is_pdf(url: &Url) -> bool {
    non_html_extension(url) == Some("pdf")
}

/// Human-readable title derived from the last path segment: dashes and
/// underscores become spaces, words are title-cased. Falls back to the host
/// for the site root.
pub fn title_from_path(url: &Url) -> String {
    let base = url
        .path_segments()
        .and_then(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .next_back()
                .map(str::to_string)
        })
        .unwrap_or_else(|| url.host_str().unwrap_or("page").to_string());

    base.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_rejects_non_http_schemes() {
        assert!(parse_http_url("mailto:team@example.com").is_err());
        assert!(parse_http_url("javascript:void(0)").is_err());
        assert!(parse_http_url("tel:+15551234").is_err());
        assert!(parse_http_url("not a url at all").is_err());
        assert!(parse_http_url("https://example.com/x").is_ok());
    }

    #[test]
    fn test_resolve_relative_against_page_not_root() {
        let base = url("https://site.example/about");
        let resolved = resolve_href(&base, "about/index.php").unwrap();
        assert_eq!(resolved.as_str(), "https://site.example/about/index.php");

        let base_slash = url("https://site.example/about/");
        let resolved = resolve_href(&base_slash, "index.php").unwrap();
        assert_eq!(resolved.as_str(), "https://site.example/about/index.php");
    }

    #[test]
    fn test_resolve_absolute_and_protocol_relative() {
        let base = url("https://site.example/a/b");
        assert_eq!(
            resolve_href(&base, "https://other.example/x").unwrap().as_str(),
            "https://other.example/x"
        );
        assert_eq!(
            resolve_href(&base, "//cdn.example/x").unwrap().as_str(),
            "https://cdn.example/x"
        );
        assert_eq!(
            resolve_href(&base, "/top").unwrap().as_str(),
            "https://site.example/top"
        );
        assert!(resolve_href(&base, "mailto:x@y.z").is_err());
    }

    #[test]
    fn test_normalize_strips_query_keeps_trailing_slash() {
        let normalized = normalize(&url("https://site.example/about/?utm=1"), false);
        assert_eq!(normalized.as_str(), "https://site.example/about/");
    }

    #[test]
    fn test_normalize_hash_handling() {
        // Plain fragments are stripped.
        let n = normalize(&url("https://site.example/page#top"), false);
        assert_eq!(n.fragment(), None);
        // Hash routes survive.
        let n = normalize(&url("https://site.example/#/docs"), false);
        assert_eq!(n.fragment(), Some("/docs"));
        // preserve_hash keeps plain fragments too.
        let n = normalize(&url("https://site.example/page#top"), true);
        assert_eq!(n.fragment(), Some("top"));
    }

    #[test]
    fn test_canonical_key_strips_trailing_slash() {
        assert_eq!(
            canonical_key(&url("https://site.example/x/")),
            "https://site.example/x"
        );
        assert_eq!(
            canonical_key(&url("https://site.example/x")),
            "https://site.example/x"
        );
        assert_eq!(canonical_key(&url("https://site.example/")), "https://site.example");
    }

    #[test]
    fn test_canonical_key_keeps_hash_route_drops_fragment() {
        assert_eq!(
            canonical_key(&url("https://spa.example/#/docs")),
            "https://spa.example#/docs"
        );
        assert_eq!(
            canonical_key(&url("https://spa.example/page#top")),
            "https://spa.example/page"
        );
    }

    #[test]
    fn test_canonical_key_preserves_non_default_port() {
        assert_eq!(
            canonical_key(&url("http://127.0.0.1:8080/x/")),
            "http://127.0.0.1:8080/x"
        );
    }

    #[test]
    fn test_base_key_removes_any_hash() {
        assert_eq!(
            base_key(&url("https://spa.example/#/docs")),
            "https://spa.example"
        );
        assert_eq!(
            base_key(&url("https://site.example/page#top")),
            "https://site.example/page"
        );
    }

    #[test]
    fn test_hash_route_and_fragment_predicates() {
        assert!(is_hash_route(&url("https://x.example/#/docs")));
        assert!(!is_hash_route(&url("https://x.example/#top")));
        assert!(is_hash_fragment(&url("https://x.example/#top")));
        assert!(!is_hash_fragment(&url("https://x.example/#/docs")));
        assert!(!is_hash_fragment(&url("https://x.example/")));
    }

    #[test]
    fn test_registrable_domain_two_labels() {
        assert_eq!(
            registrable_domain(&url("https://www.example.com/")).unwrap(),
            "example.com"
        );
        assert_eq!(
            registrable_domain(&url("https://deep.sub.example.com/")).unwrap(),
            "example.com"
        );
    }

    #[test]
    fn test_registrable_domain_public_suffixes() {
        assert_eq!(
            registrable_domain(&url("https://www.example.co.uk/")).unwrap(),
            "example.co.uk"
        );
        assert_eq!(
            registrable_domain(&url("https://shop.brand.com.au/")).unwrap(),
            "brand.com.au"
        );
    }

    #[test]
    fn test_same_site_across_subdomains() {
        assert!(same_site(
            &url("https://www.brand.example/"),
            &url("https://about.brand.example/team")
        ));
        assert!(!same_site(
            &url("https://brand.example/"),
            &url("https://other.example/")
        ));
    }

    #[test]
    fn test_same_site_ip_hosts_compare_exactly() {
        assert!(same_site(
            &url("http://127.0.0.1:3000/"),
            &url("http://127.0.0.1:3000/about")
        ));
        assert!(!same_site(
            &url("http://127.0.0.1/"),
            &url("http://127.0.0.2/")
        ));
    }

    #[test]
    fn test_non_html_extension() {
        assert_eq!(non_html_extension(&url("https://x.example/file.PDF")), Some("pdf"));
        assert_eq!(non_html_extension(&url("https://x.example/a.zip")), Some("zip"));
        assert_eq!(non_html_extension(&url("https://x.example/about")), None);
        assert_eq!(non_html_extension(&url("https://x.example/index.php")), None);
        assert!(is_pdf(&url("https://x.example/doc.pdf")));
    }

    #[test]
    fn test_title_from_path() {
        assert_eq!(
            title_from_path(&url("https://x.example/getting-started")),
            "Getting Started"
        );
        assert_eq!(
            title_from_path(&url("https://x.example/docs/api_reference")),
            "Api Reference"
        );
        assert_eq!(title_from_path(&url("https://x.example/")), "X.example");
    }

    #[test]
    fn test_ensure_scheme() {
        assert_eq!(ensure_scheme("example.com"), "https://example.com");
        assert_eq!(ensure_scheme("http://example.com"), "http://example.com");
        assert_eq!(ensure_scheme("  example.com "), "https://example.com");
    }
}
