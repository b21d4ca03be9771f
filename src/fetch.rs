use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio_retry::strategy::ExponentialBackoff;

use crate::github::cache::{detail_fingerprint, page_fingerprint, CacheEntry, PageCache};
use crate::github::client::{list_url, Page, PageSource};
use crate::github::error::FetchError;
use crate::github::types::PullRequest;
use crate::store::PullRequestStore;

const MAX_TRANSIENT_RETRIES: usize = 3;
const MAX_CONCURRENT_DETAILS: usize = 10;

/// Run parameters for one fetch, passed explicitly so runs never share state.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub owner: String,
    pub repo: String,
    /// Only keep records updated at or after this instant. The pulls listing
    /// has no server-side updated-since filter, so the bound is applied
    /// client-side when page records are merged; pages themselves stay
    /// cacheable across runs with different bounds.
    pub since: Option<DateTime<Utc>>,
    /// Ceiling on cumulative rate-limit sleeping per run; past it the run
    /// fails rather than report a silent partial result.
    pub max_rate_limit_wait: std::time::Duration,
    pub verbose: bool,
}

impl FetchOptions {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            since: None,
            max_rate_limit_wait: std::time::Duration::from_secs(30 * 60),
            verbose: false,
        }
    }
}

/// Cumulative rate-limit wait budget, shared across concurrent detail
/// fetches.
struct RateBudget {
    waited_ms: AtomicU64,
    ceiling_ms: u64,
}

impl RateBudget {
    fn new(ceiling: std::time::Duration) -> Self {
        Self {
            waited_ms: AtomicU64::new(0),
            ceiling_ms: ceiling.as_millis() as u64,
        }
    }

    /// Sleep until the reset instant the API reported. Fails with the
    /// original rate-limit error once the per-run budget is exhausted.
    async fn wait_until(&self, reset_at: DateTime<Utc>) -> Result<(), FetchError> {
        let wait = (reset_at - Utc::now())
            .to_std()
            .map(|d| d + std::time::Duration::from_secs(1))
            .unwrap_or_default();
        let wait_ms = wait.as_millis() as u64;
        let total = self.waited_ms.fetch_add(wait_ms, Ordering::SeqCst) + wait_ms;
        if total > self.ceiling_ms {
            return Err(FetchError::RateLimited { reset_at });
        }
        tokio::time::sleep(wait).await;
        Ok(())
    }
}

/// Retry policy around one remote request: rate limits suspend until the
/// reset instant (budgeted), transient errors back off exponentially for a
/// fixed number of attempts, everything else is fatal.
async fn with_retries<T, F, Fut>(budget: &RateBudget, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut backoff = ExponentialBackoff::from_millis(100)
        .max_delay(std::time::Duration::from_secs(5))
        .take(MAX_TRANSIENT_RETRIES);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(FetchError::RateLimited { reset_at }) => budget.wait_until(reset_at).await?,
            Err(FetchError::TransientNetwork(detail)) => match backoff.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(FetchError::TransientNetwork(detail)),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Disk layout of one cached per-PR entry (detail payload + review list).
#[derive(Deserialize)]
struct DetailEntry {
    detail: Value,
    reviews: Vec<Value>,
}

/// Drives paginated retrieval for one repository, consulting the page cache
/// before each network call and merging normalized records into the store.
pub struct Fetcher<'a, S> {
    source: &'a S,
    cache: &'a PageCache,
    opts: &'a FetchOptions,
    budget: RateBudget,
}

impl<'a, S: PageSource> Fetcher<'a, S> {
    pub fn new(source: &'a S, cache: &'a PageCache, opts: &'a FetchOptions) -> Self {
        Self {
            source,
            cache,
            opts,
            budget: RateBudget::new(opts.max_rate_limit_wait),
        }
    }

    /// Full fetch: walk the paginated listing, then reconcile and enrich
    /// every record from the per-PR detail endpoints. The store holds the
    /// complete, deduplicated record set when this returns.
    pub async fn run(&self, store: &mut PullRequestStore) -> Result<(), FetchError> {
        let pages = self.list_pages(store).await?;
        if self.opts.verbose {
            eprintln!(
                "Listed {} PRs across {} pages for {}/{}",
                store.len(),
                pages,
                self.opts.owner,
                self.opts.repo
            );
        }
        self.enrich(store).await
    }

    /// Walk the cursor-paginated listing. Pages cached as complete are served
    /// without a network call; the final page of each run is cached as
    /// incomplete since items may still be appended to it upstream.
    async fn list_pages(&self, store: &mut PullRequestStore) -> Result<usize, FetchError> {
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let fp = page_fingerprint(&self.opts.owner, &self.opts.repo, cursor.as_deref());

            let cached = match self.cache.get(&fp)? {
                Some(entry) if entry.complete => Some(Page {
                    items: entry.body.as_array().cloned().unwrap_or_default(),
                    next_cursor: entry.next_cursor,
                }),
                _ => None,
            };

            let next_cursor = match cached {
                Some(page) => {
                    if self.opts.verbose {
                        eprintln!("  {} ({} items, cached)", fp, page.items.len());
                    }
                    let records: Vec<PullRequest> = page
                        .items
                        .iter()
                        .map(|item| PullRequest::from_list_item(item, &fp))
                        .collect::<Result<_, _>>()?;
                    self.merge_records(store, records);
                    page.next_cursor
                }
                None => {
                    let url = cursor
                        .clone()
                        .unwrap_or_else(|| list_url(&self.opts.owner, &self.opts.repo));
                    let page =
                        with_retries(&self.budget, || self.source.fetch_page(&url)).await?;
                    if self.opts.verbose {
                        eprintln!("  {} ({} items, fetched)", fp, page.items.len());
                    }
                    // Validate before caching so a malformed page never
                    // lands in the cache.
                    let records: Vec<PullRequest> = page
                        .items
                        .iter()
                        .map(|item| PullRequest::from_list_item(item, &fp))
                        .collect::<Result<_, _>>()?;
                    self.cache.put(
                        &fp,
                        &CacheEntry {
                            complete: page.next_cursor.is_some(),
                            body: Value::Array(page.items),
                            next_cursor: page.next_cursor.clone(),
                        },
                    )?;
                    self.merge_records(store, records);
                    page.next_cursor
                }
            };

            pages += 1;
            match next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(pages),
            }
        }
    }

    /// Merge page records into the store, honoring the `since` bound:
    /// records untouched since that instant are left out, so they are
    /// neither enriched nor reported.
    fn merge_records(&self, store: &mut PullRequestStore, records: Vec<PullRequest>) {
        for record in records {
            if let Some(since) = self.opts.since {
                if record.updated_at < since {
                    continue;
                }
            }
            store.merge(record);
        }
    }

    /// Reconciliation-and-enrichment pass: re-request every record's detail
    /// and review payloads with bounded concurrency, merging the fresher
    /// observation over the listing-derived one. Terminal PRs are served
    /// from cache; open PRs are always re-requested so state changes since
    /// the last run are picked up.
    async fn enrich(&self, store: &mut PullRequestStore) -> Result<(), FetchError> {
        let numbers: Vec<u64> = store.all().map(|r| r.number).collect();
        let mut pending = numbers.into_iter();
        let mut in_flight = FuturesUnordered::new();

        for _ in 0..MAX_CONCURRENT_DETAILS {
            if let Some(number) = pending.next() {
                in_flight.push(self.enrich_one(number));
            }
        }

        while let Some(result) = in_flight.next().await {
            store.merge(result?);
            if let Some(number) = pending.next() {
                in_flight.push(self.enrich_one(number));
            }
        }
        Ok(())
    }

    async fn enrich_one(&self, number: u64) -> Result<PullRequest, FetchError> {
        let owner = &self.opts.owner;
        let repo = &self.opts.repo;
        let fp = detail_fingerprint(owner, repo, number);

        if let Some(entry) = self.cache.get(&fp)? {
            if entry.complete {
                if let Ok(stored) = serde_json::from_value::<DetailEntry>(entry.body) {
                    return PullRequest::from_detail(&stored.detail, &stored.reviews, &fp);
                }
            }
        }

        let detail =
            with_retries(&self.budget, || self.source.fetch_detail(owner, repo, number)).await?;
        let reviews =
            with_retries(&self.budget, || self.source.fetch_reviews(owner, repo, number)).await?;
        let record = PullRequest::from_detail(&detail, &reviews, &fp)?;

        self.cache.put(
            &fp,
            &CacheEntry {
                // Open PRs can still change; never serve them from cache.
                complete: record.state.is_terminal(),
                body: serde_json::json!({ "detail": detail, "reviews": reviews }),
                next_cursor: None,
            },
        )?;
        Ok(record)
    }
}
