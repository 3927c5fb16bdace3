use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::id::item_id;
use super::rate_limit::HostRateLimiter;
use super::relevance::{matches_keywords, rank_candidates, OnlineResult};
use crate::content::{ContentExtractor, ExtractorSettings, UNTITLED};
use crate::feed::{parse as parse_feed, FeedCatalog, FeedConfig, RawFeed};
use crate::providers::{FetchError, FetchResponse, PageFetcher};
use crate::storage::{Vault, VaultItem};
use crate::util::{domain_of, keywords};

const DAY: i64 = 24 * 60 * 60;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Content type recorded for every page ingested from the web.
pub const ARTICLE_CONTENT_TYPE: &str = "article";

/// Tuning for online ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorSettings {
    pub enabled: bool,
    /// Pages ingested per query at most
    pub max_results: usize,
    pub fetch_timeout: Duration,
    /// Minimum spacing between two requests to the same host
    pub per_host_interval: Duration,
    pub max_concurrent_fetches: usize,
    pub cache_size_limit_mb: u64,
    /// Eviction only touches items retrieved longer ago than this
    pub prune_age_days: u32,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 10,
            fetch_timeout: Duration::from_secs(30),
            per_host_interval: Duration::from_secs(2),
            max_concurrent_fetches: 3,
            cache_size_limit_mb: 100,
            prune_age_days: 30,
        }
    }
}

/// Why an ingestion pass did not (fully) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    Disabled,
    /// The same query is already being ingested
    AlreadyRunning,
    Cancelled,
}

/// Outcome of one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Newly stored items, in rank order
    pub items: Vec<VaultItem>,
    pub duplicates: usize,
    pub paywalled: usize,
    pub failed_fetches: usize,
    pub evicted: u64,
    pub skipped: Option<SkipReason>,
}

impl IngestReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// True when at least one item was ingested.
    pub fn ok(&self) -> bool {
        !self.items.is_empty()
    }
}

/// A page to fetch, with the tags its item should carry.
struct Target {
    url: String,
    tags: Vec<String>,
    /// Feed-provided values used when the page lacks them
    title: Option<String>,
    published: Option<i64>,
}

impl From<OnlineResult> for Target {
    fn from(result: OnlineResult) -> Self {
        let tags = if result.category.is_empty() {
            Vec::new()
        } else {
            vec![result.category]
        };
        Self {
            url: result.url,
            tags,
            title: Some(result.title).filter(|t| !t.trim().is_empty()),
            published: result.published,
        }
    }
}

enum Stored {
    Inserted(VaultItem),
    Duplicate,
    Paywalled,
}

/// Removes a query from the in-flight set when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Finds pages relevant to a query in the configured feeds and stores them
/// in the vault.
///
/// Fetches run at most `max_concurrent_fetches` at a time and are spaced per
/// host. Results are always processed in feed priority and rank order, never
/// arrival order.
pub struct OnlineAggregator {
    vault: Vault,
    fetcher: Arc<dyn PageFetcher>,
    extractor: ContentExtractor,
    catalog: FeedCatalog,
    settings: AggregatorSettings,
    limiter: HostRateLimiter,
    in_flight: Mutex<HashSet<String>>,
    cancelled: AtomicBool,
}

impl OnlineAggregator {
    pub fn new(
        vault: Vault,
        fetcher: Arc<dyn PageFetcher>,
        catalog: FeedCatalog,
        settings: AggregatorSettings,
    ) -> Self {
        let limiter = HostRateLimiter::new(settings.per_host_interval);
        Self {
            vault,
            fetcher,
            extractor: ContentExtractor::new(ExtractorSettings::default()),
            catalog,
            settings,
            limiter,
            in_flight: Mutex::new(HashSet::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_extractor(mut self, extractor: ContentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &FeedCatalog {
        &self.catalog
    }

    pub async fn is_online(&self) -> bool {
        self.fetcher.is_online().await
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Stop the running pass at the next item or feed batch boundary.
    ///
    /// Items already stored stay stored. Subsequent passes are skipped until
    /// [`OnlineAggregator::reset_cancel`] is called.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn begin(&self, query: &str) -> Option<InFlightGuard<'_>> {
        let key = normalize_query(query);
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            key,
        })
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Search the feeds for `query`, then fetch, extract and store the best
    /// matching pages.
    ///
    /// Fetch and parse failures are counted and skipped. Storage failures
    /// abort the pass. Afterwards the cache is trimmed to its budget.
    pub async fn search_and_save(&self, query: &str) -> Result<IngestReport> {
        if !self.settings.enabled {
            return Ok(IngestReport::skipped(SkipReason::Disabled));
        }
        if !self.fetcher.is_online().await {
            tracing::debug!(query = %query, "Offline, skipping ingestion");
            return Ok(IngestReport::skipped(SkipReason::Offline));
        }
        let Some(_guard) = self.begin(query) else {
            tracing::debug!(query = %query, "Ingestion already running for query");
            return Ok(IngestReport::skipped(SkipReason::AlreadyRunning));
        };
        if self.is_cancelled() {
            return Ok(IngestReport::skipped(SkipReason::Cancelled));
        }

        let keywords = keywords(query);
        if keywords.is_empty() {
            return Ok(IngestReport::default());
        }

        let limit = self.settings.max_results;
        let candidates = self.search_feeds(&keywords, limit).await;
        if self.is_cancelled() {
            return Ok(IngestReport::skipped(SkipReason::Cancelled));
        }

        let ranked = rank_candidates(&keywords, candidates, now(), limit);
        tracing::info!(query = %query, candidates = ranked.len(), "Fetching ranked candidates");

        let mut report = self
            .ingest(ranked.into_iter().map(Target::from).collect())
            .await?;
        report.evicted = self.enforce_cache_limit().await?;

        tracing::info!(
            query = %query,
            ingested = report.items.len(),
            duplicates = report.duplicates,
            paywalled = report.paywalled,
            failed = report.failed_fetches,
            evicted = report.evicted,
            "Ingestion finished"
        );
        Ok(report)
    }

    /// Collect feed items matching `keywords`, highest priority feeds first.
    ///
    /// Feeds are fetched in batches of `max_concurrent_fetches`. Collection
    /// stops after the batch that brings the total to `2 × limit`. Urls are
    /// deduplicated, keeping the first occurrence.
    pub async fn search_feeds(&self, keywords: &[String], limit: usize) -> Vec<OnlineResult> {
        let feeds = self.catalog.enabled_by_priority();
        let batch_size = self.settings.max_concurrent_fetches.max(1);
        let target = limit.saturating_mul(2);

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for batch in feeds.chunks(batch_size) {
            if self.is_cancelled() {
                break;
            }

            let parsed: Vec<(&FeedConfig, Option<RawFeed>)> = stream::iter(batch)
                .map(|feed| async move { (feed, self.fetch_feed(feed).await) })
                .buffered(batch_size)
                .collect()
                .await;

            for (feed, raw) in parsed {
                let Some(raw) = raw else { continue };
                for item in raw.items {
                    if item.link.is_empty()
                        || !matches_keywords(keywords, &item.title, &item.description)
                        || !seen.insert(item.link.clone())
                    {
                        continue;
                    }
                    candidates.push(OnlineResult {
                        url: item.link,
                        title: item.title,
                        snippet: item.description,
                        source: feed.name.clone(),
                        category: feed.category.clone(),
                        published: item.published,
                        relevance: 0.0,
                    });
                }
            }

            if candidates.len() >= target {
                break;
            }
        }

        tracing::debug!(feeds = feeds.len(), candidates = candidates.len(), "Feed search done");
        candidates
    }

    async fn fetch_feed(&self, feed: &FeedConfig) -> Option<RawFeed> {
        let response = match self.fetch(&feed.url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Failed to fetch feed");
                return None;
            }
        };
        match parse_feed(&response.body) {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Failed to parse feed");
                None
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.limiter.acquire(&domain_of(url)).await;
        self.fetcher.fetch(url, self.settings.fetch_timeout).await
    }

    /// Fetch `url` and turn it into a vault item without storing it.
    ///
    /// Returns `None` for paywalled pages.
    pub async fn fetch_and_extract(&self, url: &str) -> Result<Option<VaultItem>, FetchError> {
        let response = self.fetch(url).await?;
        let target = Target {
            url: url.to_string(),
            tags: Vec::new(),
            title: None,
            published: None,
        };
        Ok(self.build_item(&target, &response.body, now()))
    }

    /// Fetch, extract and store each url, in the given order.
    pub async fn fetch_multiple_and_save(&self, urls: &[String]) -> Result<IngestReport> {
        let targets = urls
            .iter()
            .map(|url| Target {
                url: url.clone(),
                tags: Vec::new(),
                title: None,
                published: None,
            })
            .collect();
        let mut report = self.ingest(targets).await?;
        report.evicted = self.enforce_cache_limit().await?;
        Ok(report)
    }

    async fn ingest(&self, targets: Vec<Target>) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let batch_size = self.settings.max_concurrent_fetches.max(1);

        'batches: for batch in targets.chunks(batch_size) {
            if self.is_cancelled() {
                report.skipped = Some(SkipReason::Cancelled);
                break;
            }

            let pages: Vec<Result<FetchResponse, FetchError>> = stream::iter(batch)
                .map(|target| self.fetch(&target.url))
                .buffered(batch_size)
                .collect()
                .await;

            for (target, page) in batch.iter().zip(pages) {
                if self.is_cancelled() {
                    report.skipped = Some(SkipReason::Cancelled);
                    break 'batches;
                }

                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(url = %target.url, error = %e, "Failed to fetch page");
                        report.failed_fetches += 1;
                        continue;
                    }
                };

                match self.store_page(target, &page.body).await? {
                    Stored::Inserted(item) => report.items.push(item),
                    Stored::Duplicate => report.duplicates += 1,
                    Stored::Paywalled => report.paywalled += 1,
                }
            }
        }

        Ok(report)
    }

    async fn store_page(&self, target: &Target, html: &str) -> Result<Stored> {
        let Some(item) = self.build_item(target, html, now()) else {
            tracing::debug!(url = %target.url, "Skipping paywalled page");
            return Ok(Stored::Paywalled);
        };

        if self.vault.get_by_id(&item.id).await?.is_some() {
            tracing::debug!(url = %target.url, id = %item.id, "Skipping duplicate");
            return Ok(Stored::Duplicate);
        }

        self.vault.insert(&item).await?;
        Ok(Stored::Inserted(item))
    }

    fn build_item(&self, target: &Target, html: &str, retrieved_at: i64) -> Option<VaultItem> {
        let content = self.extractor.extract(html, &target.url);
        if content.has_paywall {
            return None;
        }

        let title = match &target.title {
            Some(feed_title) if content.title == UNTITLED => feed_title.clone(),
            _ => content.title,
        };
        let published_at = content.publish_date.or(target.published);

        Some(VaultItem {
            id: item_id(&target.url, &title, published_at),
            title,
            url: target.url.clone(),
            source_domain: content.domain,
            author: Some(content.author).filter(|a| !a.is_empty()),
            published_at,
            retrieved_at,
            topic_tags: target.tags.clone(),
            text_snippet: content.snippet,
            text_clean: content.main_text,
            quotes: content.quotes,
            language: content.language,
            content_type: ARTICLE_CONTENT_TYPE.to_string(),
            license_note: None,
        })
    }

    // ========================================================================
    // Cache Management
    // ========================================================================

    /// Evict old items while the vault is over its size budget.
    ///
    /// Returns the number of items removed.
    pub async fn enforce_cache_limit(&self) -> Result<u64> {
        let budget = self
            .settings
            .cache_size_limit_mb
            .saturating_mul(BYTES_PER_MB)
            .min(i64::MAX as u64) as i64;

        let stats = self.vault.cache_stats().await?;
        if stats.total_bytes <= budget {
            return Ok(0);
        }

        let older_than = now() - i64::from(self.settings.prune_age_days) * DAY;
        let report = self.vault.evict_to_budget(budget, older_than).await?;
        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                bytes_before = report.bytes_before,
                bytes_after = report.bytes_after,
                "Evicted cached items"
            );
        }
        Ok(report.removed)
    }

    /// Delete items retrieved more than `days` days ago.
    pub async fn prune_old_cache(&self, days: u32) -> Result<u64> {
        self.vault
            .prune_older_than(now() - i64::from(days) * DAY)
            .await
    }

    pub async fn clear_cache(&self) -> Result<u64> {
        self.vault.clear().await
    }

    pub async fn cache_size_mb(&self) -> Result<f64> {
        let stats = self.vault.cache_stats().await?;
        Ok(stats.total_bytes as f64 / BYTES_PER_MB as f64)
    }

    pub async fn cached_items_count(&self) -> Result<i64> {
        self.vault.total_items().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    const FEED_URL: &str = "https://feeds.example.com/rss";
    const MATCHING_URL: &str = "https://news.example.com/water";
    const OTHER_URL: &str = "https://news.example.com/garden";

    struct StubFetcher {
        online: bool,
        pages: HashMap<String, Result<String, u16>>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(pages: &[(&str, Result<String, u16>)]) -> Self {
            Self {
                online: true,
                pages: pages
                    .iter()
                    .map(|(url, page)| (url.to_string(), page.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.pages.get(url) {
                Some(Ok(body)) => Ok(FetchResponse {
                    body: body.clone(),
                    status: 200,
                }),
                Some(Err(status)) => Err(FetchError::HttpStatus(*status)),
                None => Err(FetchError::HttpStatus(404)),
            }
        }

        async fn is_online(&self) -> bool {
            self.online
        }
    }

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link, description)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <description>{description}</description></item>"
                )
            })
            .collect();
        format!("<rss version=\"2.0\"><channel><title>Feed</title>{items}</channel></rss>")
    }

    fn article(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{title}</title></head><body><article><p>{body}</p></article></body></html>"
        )
    }

    fn water_feed() -> String {
        rss(&[
            ("Water purification in the field", MATCHING_URL, "Boiling and filters"),
            ("Garden planning", OTHER_URL, "Tomatoes and beans"),
        ])
    }

    fn water_article() -> String {
        article(
            "Water purification in the field",
            &"Boil water for one minute before drinking it in the backcountry. ".repeat(10),
        )
    }

    fn settings() -> AggregatorSettings {
        AggregatorSettings {
            per_host_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn catalog(urls: &[&str]) -> FeedCatalog {
        let mut catalog = FeedCatalog::new();
        for (i, url) in urls.iter().enumerate() {
            catalog
                .add(
                    FeedConfig::new(format!("Feed {i}"), *url)
                        .with_category("survival")
                        .with_priority(10 - i as i32),
                )
                .unwrap();
        }
        catalog
    }

    async fn aggregator(fetcher: Arc<StubFetcher>, catalog: FeedCatalog) -> (OnlineAggregator, Vault) {
        let vault = Vault::open(":memory:").await.unwrap();
        let aggregator = OnlineAggregator::new(vault.clone(), fetcher, catalog, settings());
        (aggregator, vault)
    }

    #[tokio::test]
    async fn test_search_and_save_ingests_matching_item() {
        let fetcher = Arc::new(StubFetcher::new(&[
            (FEED_URL, Ok(water_feed())),
            (MATCHING_URL, Ok(water_article())),
            (OTHER_URL, Ok(article("Garden planning", "Tomatoes"))),
        ]));
        let (aggregator, vault) = aggregator(fetcher.clone(), catalog(&[FEED_URL])).await;

        let report = aggregator.search_and_save("water purification").await.unwrap();

        assert!(report.ok());
        assert_eq!(report.skipped, None);
        assert_eq!(report.items.len(), 1);
        let item = &report.items[0];
        assert_eq!(item.url, MATCHING_URL);
        assert_eq!(item.title, "Water purification in the field");
        assert_eq!(item.source_domain, "news.example.com");
        assert_eq!(item.topic_tags, vec!["survival".to_string()]);
        assert_eq!(item.content_type, "article");
        assert_eq!(item.id, item_id(MATCHING_URL, &item.title, None));

        assert_eq!(vault.total_items().await.unwrap(), 1);
        // Feed plus one page; the non-matching item is never fetched
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_second_pass_counts_duplicates() {
        let fetcher = Arc::new(StubFetcher::new(&[
            (FEED_URL, Ok(water_feed())),
            (MATCHING_URL, Ok(water_article())),
        ]));
        let (aggregator, vault) = aggregator(fetcher, catalog(&[FEED_URL])).await;

        aggregator.search_and_save("water purification").await.unwrap();
        let report = aggregator.search_and_save("water purification").await.unwrap();

        assert!(!report.ok());
        assert_eq!(report.duplicates, 1);
        assert_eq!(vault.total_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_paywalled_and_failed_pages_are_skipped() {
        let feed = rss(&[
            ("Water purification tablets", "https://a.example.com/1", ""),
            ("Water purification straws", "https://b.example.com/2", ""),
        ]);
        let fetcher = Arc::new(StubFetcher::new(&[
            (FEED_URL, Ok(feed)),
            (
                "https://a.example.com/1",
                Ok(article("Tablets", "This story is for subscribers. Subscribe to read more.")),
            ),
            ("https://b.example.com/2", Err(503)),
        ]));
        let (aggregator, vault) = aggregator(fetcher, catalog(&[FEED_URL])).await;

        let report = aggregator.search_and_save("water purification").await.unwrap();

        assert_eq!(report.paywalled, 1);
        assert_eq!(report.failed_fetches, 1);
        assert!(report.items.is_empty());
        assert_eq!(vault.total_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_feed_is_skipped() {
        let second = "https://feeds.example.com/second";
        let fetcher = Arc::new(StubFetcher::new(&[
            (FEED_URL, Ok("<html>not a feed</html>".to_string())),
            (second, Ok(water_feed())),
            (MATCHING_URL, Ok(water_article())),
        ]));
        let (aggregator, _vault) = aggregator(fetcher, catalog(&[FEED_URL, second])).await;

        let report = aggregator.search_and_save("water purification").await.unwrap();
        assert_eq!(report.items.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_and_offline_do_not_fetch() {
        let mut stub = StubFetcher::new(&[(FEED_URL, Ok(water_feed()))]);
        stub.online = false;
        let fetcher = Arc::new(stub);
        let (aggregator, _vault) = aggregator(fetcher.clone(), catalog(&[FEED_URL])).await;

        let report = aggregator.search_and_save("water purification").await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Offline));

        let fetcher = Arc::new(StubFetcher::new(&[(FEED_URL, Ok(water_feed()))]));
        let vault = Vault::open(":memory:").await.unwrap();
        let disabled = OnlineAggregator::new(
            vault,
            fetcher.clone(),
            catalog(&[FEED_URL]),
            AggregatorSettings {
                enabled: false,
                ..settings()
            },
        );
        let report = disabled.search_and_save("water purification").await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Disabled));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_same_query_is_single_flight() {
        let fetcher = Arc::new(StubFetcher::new(&[(FEED_URL, Ok(water_feed()))]));
        let (aggregator, _vault) = aggregator(fetcher.clone(), catalog(&[FEED_URL])).await;

        let guard = aggregator.begin("Water   Purification");
        assert!(guard.is_some());

        let report = aggregator.search_and_save("water purification").await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::AlreadyRunning));
        assert_eq!(fetcher.calls(), 0);

        drop(guard);
        assert!(aggregator.begin("water purification").is_some());
    }

    #[tokio::test]
    async fn test_cancelled_pass_is_skipped() {
        let fetcher = Arc::new(StubFetcher::new(&[(FEED_URL, Ok(water_feed()))]));
        let (aggregator, _vault) = aggregator(fetcher.clone(), catalog(&[FEED_URL])).await;

        aggregator.cancel();
        let report = aggregator.search_and_save("water purification").await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Cancelled));
        assert_eq!(fetcher.calls(), 0);

        aggregator.reset_cancel();
        assert!(!aggregator.is_cancelled());
    }

    #[tokio::test]
    async fn test_feed_search_stops_once_enough_candidates() {
        let first = rss(&[
            ("Water purification one", "https://x.example.com/1", ""),
            ("Water purification two", "https://x.example.com/2", ""),
        ]);
        let second = "https://feeds.example.com/second";
        let fetcher = Arc::new(StubFetcher::new(&[
            (FEED_URL, Ok(first)),
            (second, Ok(water_feed())),
        ]));
        let vault = Vault::open(":memory:").await.unwrap();
        let aggregator = OnlineAggregator::new(
            vault,
            fetcher.clone(),
            catalog(&[FEED_URL, second]),
            AggregatorSettings {
                max_concurrent_fetches: 1,
                ..settings()
            },
        );

        let kw = keywords("water purification");
        let candidates = aggregator.search_feeds(&kw, 1).await;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].source, "Feed 0");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_feed_search_dedupes_urls() {
        let second = "https://feeds.example.com/second";
        let fetcher = Arc::new(StubFetcher::new(&[
            (FEED_URL, Ok(water_feed())),
            (second, Ok(water_feed())),
        ]));
        let (aggregator, _vault) = aggregator(fetcher, catalog(&[FEED_URL, second])).await;

        let candidates = aggregator
            .search_feeds(&keywords("water purification"), 10)
            .await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, "Feed 0");
    }

    #[tokio::test]
    async fn test_fetch_multiple_and_save_keeps_order() {
        let urls = vec![
            "https://a.example.com/first".to_string(),
            "https://a.example.com/missing".to_string(),
            "https://b.example.com/second".to_string(),
        ];
        let fetcher = Arc::new(StubFetcher::new(&[
            (urls[0].as_str(), Ok(article("First", "alpha"))),
            (urls[2].as_str(), Ok(article("Second", "beta"))),
        ]));
        let (aggregator, _vault) = aggregator(fetcher, FeedCatalog::new()).await;

        let report = aggregator.fetch_multiple_and_save(&urls).await.unwrap();
        let titles: Vec<&str> = report.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
        assert_eq!(report.failed_fetches, 1);
    }

    #[tokio::test]
    async fn test_fetch_and_extract_does_not_store() {
        let url = "https://a.example.com/page";
        let fetcher = Arc::new(StubFetcher::new(&[(url, Ok(article("Page", "words")))]));
        let (aggregator, vault) = aggregator(fetcher, FeedCatalog::new()).await;

        let item = aggregator.fetch_and_extract(url).await.unwrap().unwrap();
        assert_eq!(item.title, "Page");
        assert_eq!(vault.total_items().await.unwrap(), 0);

        let missing = aggregator.fetch_and_extract("https://a.example.com/none").await;
        assert!(matches!(missing, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_enforce_cache_limit_evicts_old_items() {
        let fetcher = Arc::new(StubFetcher::new(&[]));
        let vault = Vault::open(":memory:").await.unwrap();
        let aggregator = OnlineAggregator::new(
            vault.clone(),
            fetcher,
            FeedCatalog::new(),
            AggregatorSettings {
                cache_size_limit_mb: 0,
                ..settings()
            },
        );

        let old = VaultItem {
            id: "old".to_string(),
            title: "Old".to_string(),
            url: String::new(),
            source_domain: String::new(),
            author: None,
            published_at: None,
            retrieved_at: 1_000,
            topic_tags: Vec::new(),
            text_snippet: String::new(),
            text_clean: "stale".to_string(),
            quotes: Vec::new(),
            language: "en".to_string(),
            content_type: "article".to_string(),
            license_note: None,
        };
        let fresh = VaultItem {
            id: "fresh".to_string(),
            retrieved_at: now(),
            ..old.clone()
        };
        vault.insert(&old).await.unwrap();
        vault.insert(&fresh).await.unwrap();

        assert_eq!(aggregator.enforce_cache_limit().await.unwrap(), 1);
        assert!(vault.get_by_id("old").await.unwrap().is_none());
        assert!(vault.get_by_id("fresh").await.unwrap().is_some());
        assert_eq!(aggregator.cached_items_count().await.unwrap(), 1);
        assert!(aggregator.cache_size_mb().await.unwrap() > 0.0);

        assert_eq!(aggregator.clear_cache().await.unwrap(), 1);
        assert_eq!(aggregator.cached_items_count().await.unwrap(), 0);
    }
}
