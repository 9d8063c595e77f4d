//! Persistence contract.
//!
//! Page records are upserted keyed by (job, canonical URL) with
//! first-write-wins semantics. The surrounding system owns the real store;
//! the in-memory implementation here backs tests and the CLI.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::MAX_STORE_ATTEMPTS;
use crate::crawler::url_ops;
use crate::models::PageRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection-level failure; worth retrying.
    #[error("transient storage failure: {0}")]
    Transient(String),
    /// The job row is gone; the crawl treats this as a cancellation signal.
    #[error("job no longer exists")]
    JobMissing,
    #[error("storage failure: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait PageStore: Send + Sync {
    /// Insert the record unless one already exists for (job, canonical url).
    /// The first write wins; later writes are silently dropped.
    async fn upsert_page(&self, job_id: &str, record: &PageRecord) -> Result<(), StoreError>;

    /// False once the job has been deleted.
    async fn job_exists(&self, job_id: &str) -> bool;
}

/// Upsert with retries on transient failures. `JobMissing` and fatal errors
/// surface immediately.
pub async fn upsert_with_retry(
    store: &dyn PageStore,
    job_id: &str,
    record: &PageRecord,
) -> Result<(), StoreError> {
    let mut attempts_made = 0u32;
    loop {
        attempts_made += 1;
        match store.upsert_page(job_id, record).await {
            Ok(()) => return Ok(()),
            Err(StoreError::Transient(message)) => {
                if attempts_made >= MAX_STORE_ATTEMPTS {
                    return Err(StoreError::Transient(message));
                }
                let delay = Duration::from_millis(250u64 << (attempts_made - 1));
                tracing::warn!(
                    job_id = %job_id,
                    url = %record.url,
                    attempt = attempts_made,
                    error = %message,
                    "persist failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(other) => return Err(other),
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    /// job -> canonical url -> record, plus insertion order per job.
    records: HashMap<String, HashMap<String, PageRecord>>,
    order: HashMap<String, Vec<String>>,
    deleted_jobs: HashSet<String>,
}

/// In-memory store honoring the full persistence contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Simulate deletion of the job by the surrounding system.
    pub fn delete_job(&self, job_id: &str) {
        let mut inner = self.inner.lock().expect("store lock");
        inner.deleted_jobs.insert(job_id.to_string());
    }

    /// All records for a job in insertion order.
    pub fn pages_for(&self, job_id: &str) -> Vec<PageRecord> {
        let inner = self.inner.lock().expect("store lock");
        let Some(order) = inner.order.get(job_id) else {
            return Vec::new();
        };
        let records = inner.records.get(job_id).expect("order implies records");
        order
            .iter()
            .filter_map(|key| records.get(key).cloned())
            .collect()
    }

    pub fn page_count(&self, job_id: &str) -> usize {
        let inner = self.inner.lock().expect("store lock");
        inner.records.get(job_id).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn upsert_page(&self, job_id: &str, record: &PageRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store lock");
        if inner.deleted_jobs.contains(job_id) {
            return Err(StoreError::JobMissing);
        }
        let key = url_ops::canonical_key_str(&record.url)
            .unwrap_or_else(|| record.url.clone());
        let records = inner.records.entry(job_id.to_string()).or_default();
        if records.contains_key(&key) {
            return Ok(());
        }
        records.insert(key.clone(), record.clone());
        inner.order.entry(job_id.to_string()).or_default().push(key);
        Ok(())
    }

    async fn job_exists(&self, job_id: &str) -> bool {
        let inner = self.inner.lock().expect("store lock");
        !inner.deleted_jobs.contains(job_id)
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

    #[tokio::test]
    async fn test_first_write_wins() {
        let store = MemoryStore::new();
        let mut first = record("https://example.com/a");
        first.title = "First".to_string();
        let mut second = record("https://example.com/a/");
        second.title = "Second".to_string();

        store.upsert_page("job", &first).await.unwrap();
        // Same canonical URL, different surface form.
        store.upsert_page("job", &second).await.unwrap();

        let pages = store.pages_for("job");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].title, "First");
    }

    #[tokio::test]
    async fn test_deleted_job_rejects_writes() {
        let store = MemoryStore::new();
        assert!(store.job_exists("job").await);
        store.delete_job("job");
        assert!(!store.job_exists("job").await);
        let result = store.upsert_page("job", &record("https://example.com/a")).await;
        assert!(matches!(result, Err(StoreError::JobMissing)));
    }

    #[tokio::test]
    async fn test_insertion_order_preserved() {
        let store = MemoryStore::new();
        for path in ["a", "b", "c"] {
            store
                .upsert_page("job", &record(&format!("https://example.com/{path}")))
                .await
                .unwrap();
        }
        let urls: Vec<String> = store.pages_for("job").into_iter().map(|p| p.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
                "https://example.com/c".to_string(),
            ]
        );
    }
}
