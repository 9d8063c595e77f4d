//! Canonical sitemap tree.
//!
//! Flat page records become a tree keyed by path segment. Hash routes are
//! grafted under their page's path with a `#`-prefixed first segment, so
//! `/app#/settings` sits below `/app`.

use std::collections::BTreeMap;

use serde::Serialize;
use url::Url;

use crate::crawler::url_ops;
use crate::models::PageRecord;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub segment: String,
    /// False once any page resolving here carries a noindex directive.
    pub indexable: bool,
    /// Pages resolving exactly to this path.
    pub direct_count: u32,
    /// Nodes in this subtree, this node included.
    pub subtree_count: u32,
    pub children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn new(segment: &str) -> Self {
        TreeNode {
            segment: segment.to_string(),
            indexable: true,
            direct_count: 0,
            subtree_count: 1,
            children: BTreeMap::new(),
        }
    }

    /// Depth of the deepest descendant, relative to this node.
    pub fn subtree_max_depth(&self) -> u32 {
        self.children
            .values()
            .map(|child| 1 + child.subtree_max_depth())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTree {
    pub root: TreeNode,
    pub total_pages: u32,
    pub max_depth: u32,
}

/// Path segments a record resolves to. The canonical meta URL wins over the
/// crawled URL when present and parseable.
fn record_segments(record: &PageRecord) -> Option<Vec<String>> {
    let crawled = url_ops::parse_http_url(&record.url).ok()?;

    let canonical_meta = record
        .signals
        .meta_canonical
        .as_deref()
        .and_then(|raw| url_ops::parse_http_url(raw).ok());

    let source: Url = canonical_meta.unwrap_or_else(|| crawled.clone());

    let mut segments: Vec<String> = source
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    if url_ops::is_hash_route(&source) {
        if let Some(fragment) = source.fragment() {
            let mut route = fragment
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string);
            if let Some(first) = route.next() {
                segments.push(format!("#{first}"));
                segments.extend(route);
            }
        }
    }

    Some(segments)
}

/// Build the tree from all of a job's records. Deterministic: the same
/// record set always yields an identical tree.
pub fn build(records: &[PageRecord]) -> CanonicalTree {
    let mut root = TreeNode::new("/");
    let mut max_depth = 0u32;

    for record in records {
        let Some(segments) = record_segments(record) else {
            continue;
        };
        max_depth = max_depth.max(segments.len() as u32);

        let indexable = !record.signals.meta_robots.to_lowercase().contains("noindex");
        let mut node = &mut root;
        for segment in &segments {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(|| TreeNode::new(segment));
        }
        node.direct_count += 1;
        if !indexable {
            node.indexable = false;
        }
    }

    recount(&mut root);

    CanonicalTree {
        root,
        total_pages: records.len() as u32,
        max_depth,
    }
}

fn recount(node: &mut TreeNode) -> u32 {
    let mut total = 1;
    for child in node.children.values_mut() {
        total += recount(child);
    }
    node.subtree_count = total;
    total
}

/// Indented text rendering, stable byte-for-byte for a given tree.
pub fn render_text(tree: &CanonicalTree) -> String {
    let mut out = format!(
        "/ — {} pages, max depth {}\n",
        tree.total_pages, tree.max_depth
    );
    render_children(&tree.root, 1, &mut out);
    out
}

fn render_children(node: &TreeNode, depth: usize, out: &mut String) {
    for child in node.children.values() {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&child.segment);
        out.push_str(&format!(" ({}/{})", child.direct_count, child.subtree_count));
        if !child.indexable {
            out.push_str(" [noindex]");
        }
        out.push('\n');
        render_children(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageSignals;

    fn record(url: &str) -> PageRecord {
        PageRecord {
            url: url.to_string(),
            original_url: url.to_string(),
            depth: 0,
            parent_url: None,
            title: "T".to_string(),
            status_code: 200,
            error: None,
            link_attr: None,
            links: vec![],
            had_query: false,
            from_sitemap: false,
            rendered: true,
            signals: PageSignals::default(),
        }
    }

    #[test]
    fn test_basic_tree_shape() {
        let records = vec![
            record("https://example.com/"),
            record("https://example.com/blog"),
            record("https://example.com/blog/post-1"),
            record("https://example.com/blog/post-2"),
            record("https://example.com/about"),
        ];
        let tree = build(&records);

        assert_eq!(tree.total_pages, 5);
        assert_eq!(tree.max_depth, 2);
        assert_eq!(tree.root.direct_count, 1);
        assert_eq!(tree.root.children.len(), 2);

        let blog = &tree.root.children["blog"];
        assert_eq!(blog.direct_count, 1);
        assert_eq!(blog.children.len(), 2);
        assert_eq!(blog.subtree_count, 3);
    }

    #[test]
    fn test_canonical_meta_overrides_path() {
        let mut r = record("https://example.com/blog?page=2");
        r.signals.meta_canonical = Some("https://example.com/blog".to_string());
        let tree = build(&[r]);
        assert_eq!(tree.root.children["blog"].direct_count, 1);
    }

    #[test]
    fn test_hash_route_nested_under_page() {
        let records = vec![
            record("https://example.com/app"),
            record("https://example.com/app#/settings"),
        ];
        let tree = build(&records);
        let app = &tree.root.children["app"];
        assert_eq!(app.direct_count, 1);
        assert_eq!(app.children["#settings"].direct_count, 1);
    }

    #[test]
    fn test_noindex_propagates_to_node() {
        let mut r = record("https://example.com/hidden");
        r.signals.meta_robots = "noindex, nofollow".to_string();
        let tree = build(&[record("https://example.com/hidden"), r]);
        assert!(!tree.root.children["hidden"].indexable);
    }

    #[test]
    fn test_build_is_idempotent() {
        let records = vec![
            record("https://example.com/"),
            record("https://example.com/b/c"),
            record("https://example.com/a"),
        ];
        let first = build(&records);
        let second = build(&records);
        assert_eq!(first, second);
        assert_eq!(render_text(&first), render_text(&second));
    }

    #[test]
    fn test_render_text_is_deterministic_and_sorted() {
        let records = vec![
            record("https://example.com/zebra"),
            record("https://example.com/alpha"),
        ];
        let text = render_text(&build(&records));
        let alpha = text.find("alpha").unwrap();
        let zebra = text.find("zebra").unwrap();
        assert!(alpha < zebra);
    }

    #[test]
    fn test_subtree_max_depth() {
        let records = vec![
            record("https://example.com/a"),
            record("https://example.com/a/b/c"),
        ];
        let tree = build(&records);
        assert_eq!(tree.root.children["a"].subtree_max_depth(), 2);
    }
}
