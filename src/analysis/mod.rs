//! Post-crawl analysis: the canonical sitemap tree and the structural
//! issue report derived from it.

pub mod issues;
pub mod tree;
