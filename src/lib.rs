//! sitescout: a bounded-concurrency site crawler and sitemap assembler.
//!
//! The crate crawls a site breadth-first from a seed URL, deduplicates pages
//! across URL surface variants, extracts per-page signals, and turns the
//! result into a canonical path tree annotated with structural issues. The
//! HTTP surface, job store, and LLM consumers live in the surrounding
//! system and talk to this crate through the [`storage::PageStore`] and
//! [`crawler::CrawlObserver`] seams.

pub mod analysis;
pub mod config;
pub mod crawler;
pub mod models;
pub mod storage;

pub use config::CrawlOptions;
pub use crawler::{
    BrowserFetcher, CrawlEngine, CrawlObserver, CrawlReport, HttpFetcher, NoopObserver,
    PageFetcher,
};
pub use models::{CrawlOutcome, CrawlStats, ErrorReport, JobState, PageRecord, StopReason};
pub use storage::{MemoryStore, PageStore, StoreError};
