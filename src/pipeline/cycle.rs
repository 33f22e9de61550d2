//! One end-to-end observation cycle: fetch every configured area, gate on
//! content hash, diff extracted items against the stored snapshot, record
//! changes, then dispatch due notifications and sweep expired events.

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{stable_key, AreaConfig, Config, KeyedItem};
use crate::notify::{BackoffPolicy, Channel, DispatchOutcome, Dispatcher};
use crate::pipeline::diff::{diff_items, DiffOutcome};
use crate::pipeline::gate::{self, GateDecision};
use crate::services::{ItemExtractor, PageFetcher};
use crate::storage::SqliteStore;

/// What one cycle did, aggregated across areas.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub executed_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Areas whose content changed and whose diff was applied (or previewed)
    pub areas_changed: usize,
    /// Areas skipped because their fingerprint matched the stored hash
    pub areas_unchanged: usize,
    /// Areas where fetch or extraction failed; their state is untouched
    pub areas_failed: usize,
    pub added_events: usize,
    pub removed_events: usize,
    pub unchanged_items: usize,
    pub dispatch: DispatchOutcome,
    pub swept_events: usize,
}

impl RunSummary {
    fn new(executed_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            executed_at,
            dry_run,
            areas_changed: 0,
            areas_unchanged: 0,
            areas_failed: 0,
            added_events: 0,
            removed_events: 0,
            unchanged_items: 0,
            dispatch: DispatchOutcome::default(),
            swept_events: 0,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.dry_run {
            "dry_run"
        } else if self.areas_failed > 0 {
            "partial"
        } else {
            "success"
        }
    }

    /// Short note persisted with the run row.
    pub fn note(&self) -> String {
        format!(
            "areas(changed {} / unchanged {} / failed {}) items(+{} / -{} / ={})",
            self.areas_changed,
            self.areas_unchanged,
            self.areas_failed,
            self.added_events,
            self.removed_events,
            self.unchanged_items,
        )
    }
}

enum AreaOutcome {
    Unchanged,
    Changed {
        added: usize,
        removed: usize,
        unchanged: usize,
    },
}

/// Run one full cycle against `store`.
///
/// Per-area failures are logged and counted but never abort the run; the
/// failed area keeps its previous hash, snapshot and `last_checked_at`, so
/// the next cycle retries it from the same baseline. With `dry_run` set the
/// diff for each changed area is computed and logged but nothing is written
/// except the run row, and no notifications go out.
pub async fn run_cycle(
    config: &Config,
    store: &SqliteStore,
    fetcher: &dyn PageFetcher,
    extractor: &dyn ItemExtractor,
    channels: &[Box<dyn Channel>],
    dry_run: bool,
) -> Result<RunSummary> {
    let executed_at = Utc::now();
    let mut summary = RunSummary::new(executed_at, dry_run);

    // Area rows exist from configuration time, before any observation.
    let urls: Vec<String> = config.areas.iter().map(|a| a.url.clone()).collect();
    store.sync_areas(&urls)?;

    // A bad volatile pattern is a configuration error, not an area failure.
    let mut jobs = Vec::with_capacity(config.areas.len());
    for area in &config.areas {
        let volatile = gate::compile_volatile_patterns(&area.volatile_patterns)?;
        jobs.push((area, volatile));
    }

    let channel_names = config.channel_names();
    let delay = std::time::Duration::from_millis(config.crawler.request_delay_ms);
    let mut page_stream = stream::iter(jobs)
        .map(|(area, volatile)| async move {
            let result = fetcher.fetch(&area.url).await;
            (area, volatile, result)
        })
        .buffer_unordered(config.crawler.max_concurrent);

    while let Some((area, volatile, result)) = page_stream.next().await {
        match result {
            Ok(content) => {
                match process_area(
                    store,
                    extractor,
                    config,
                    area,
                    &volatile,
                    &content,
                    executed_at,
                    &channel_names,
                    dry_run,
                ) {
                    Ok(AreaOutcome::Unchanged) => summary.areas_unchanged += 1,
                    Ok(AreaOutcome::Changed {
                        added,
                        removed,
                        unchanged,
                    }) => {
                        summary.areas_changed += 1;
                        summary.added_events += added;
                        summary.removed_events += removed;
                        summary.unchanged_items += unchanged;
                    }
                    Err(error) => {
                        summary.areas_failed += 1;
                        log::warn!("Skipping area {}: {}", area.url, error);
                    }
                }
            }
            Err(error) => {
                summary.areas_failed += 1;
                log::warn!("Failed to fetch area {}: {}", area.url, error);
            }
        }

        if delay.as_millis() > 0 {
            tokio::time::sleep(delay).await;
        }
    }

    if !dry_run {
        let policy = BackoffPolicy::new(
            config.watcher.backoff_base_secs,
            config.watcher.backoff_cap_secs,
        );
        let dispatcher = Dispatcher::new(store, channels, policy, config.watcher.max_notify_attempts);
        summary.dispatch = dispatcher.dispatch_due(Utc::now()).await?;

        let cutoff = executed_at - Duration::days(i64::from(config.watcher.retention_days));
        summary.swept_events = store.sweep_events(cutoff)?;

        let failed = store.failed_deliveries()?;
        if !failed.is_empty() {
            log::error!(
                "{} notification deliveries have exhausted their retries",
                failed.len()
            );
        }
    }

    store.add_run(executed_at, summary.status(), &summary.note())?;
    Ok(summary)
}

/// Gate, extract and diff one fetched area. Errors here leave the area's
/// stored state exactly as it was.
fn process_area(
    store: &SqliteStore,
    extractor: &dyn ItemExtractor,
    config: &Config,
    area_cfg: &AreaConfig,
    volatile: &[Regex],
    content: &str,
    now: DateTime<Utc>,
    channel_names: &[String],
    dry_run: bool,
) -> Result<AreaOutcome> {
    let area = store
        .area_by_url(&area_cfg.url)?
        .ok_or_else(|| AppError::storage(format!("area missing: {}", area_cfg.url)))?;

    let fresh = gate::fingerprint(content, volatile);
    if gate::evaluate(area.last_content_hash.as_deref(), &fresh) == GateDecision::Unchanged {
        log::debug!("Area unchanged: {}", area_cfg.url);
        if !dry_run {
            store.touch_area(area.id, now)?;
        }
        return Ok(AreaOutcome::Unchanged);
    }

    let raw = extractor.extract(area_cfg, content)?;
    let current = key_items(config, area.id, raw);
    let previous = store.active_items(area.id)?;
    let diff = diff_items(&previous, &current);

    if dry_run {
        log_preview(&area_cfg.url, &diff);
        return Ok(AreaOutcome::Changed {
            added: diff.added.len(),
            removed: diff.removed.len(),
            unchanged: diff.unchanged.len(),
        });
    }

    let changes = store.apply_cycle(area.id, now, &fresh, &diff, channel_names)?;
    if changes.total() > 0 {
        log::info!(
            "Area {}: +{} / -{} items",
            area_cfg.url,
            changes.added_events,
            changes.removed_events
        );
    }
    Ok(AreaOutcome::Changed {
        added: changes.added_events,
        removed: changes.removed_events,
        unchanged: diff.unchanged.len(),
    })
}

/// Assign stable keys, dropping items that cannot be keyed under the
/// configured policy.
fn key_items(config: &Config, area_id: i64, raw: Vec<crate::models::RawItem>) -> Vec<KeyedItem> {
    let policy = config.watcher.key_policy;
    raw.into_iter()
        .filter_map(|item| match stable_key(policy, area_id, &item) {
            Some(key) => Some(KeyedItem {
                key,
                name: item.name,
                url: item.url,
            }),
            None => {
                log::warn!("Dropping unkeyable item in area {}: {:?}", area_id, item.name);
                None
            }
        })
        .collect()
}

fn log_preview(url: &str, diff: &DiffOutcome) {
    for item in &diff.added {
        log::info!("[dry-run] {} would add: {}", url, item.name);
    }
    for item in &diff.removed {
        log::info!("[dry-run] {} would remove: {}", url, item.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{AreaSelectors, ItemStatus, RawItem};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    struct MapFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::fetch(url, "connection refused"))
        }
    }

    /// Parses one `name|url` pair per line, so tests can script pages as
    /// plain text instead of HTML. Lines without a pipe are ignored.
    struct LineExtractor;

    impl ItemExtractor for LineExtractor {
        fn extract(&self, _area: &AreaConfig, content: &str) -> Result<Vec<RawItem>> {
            Ok(content
                .lines()
                .filter_map(|line| line.split_once('|'))
                .map(|(name, url)| RawItem {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                })
                .collect())
        }
    }

    struct BrokenExtractor;

    impl ItemExtractor for BrokenExtractor {
        fn extract(&self, area: &AreaConfig, _content: &str) -> Result<Vec<RawItem>> {
            Err(AppError::extract(&area.url, "container matched nothing"))
        }
    }

    struct CountingChannel {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Channel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, message: &str) -> Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    const AREA_URL: &str = "https://example.com/list";

    fn test_store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();
        store
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.crawler.request_delay_ms = 0;
        config.areas = vec![AreaConfig {
            url: AREA_URL.to_string(),
            selectors: AreaSelectors {
                container: "ul".to_string(),
                row: "li".to_string(),
                name: "a".to_string(),
                link: None,
                link_attr: "href".to_string(),
            },
            volatile_patterns: Vec::new(),
        }];
        config.channels = vec![crate::models::ChannelConfig {
            name: "counting".to_string(),
            url: "https://hooks.example.com/x".to_string(),
            timeout_secs: 5,
        }];
        config
    }

    fn fetcher_with(content: &str) -> MapFetcher {
        let mut pages = HashMap::new();
        pages.insert(AREA_URL.to_string(), content.to_string());
        MapFetcher { pages }
    }

    fn counting_channels() -> (Vec<Box<dyn Channel>>, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let channels: Vec<Box<dyn Channel>> = vec![Box::new(CountingChannel {
            sent: Arc::clone(&sent),
        })];
        (channels, sent)
    }

    #[tokio::test]
    async fn first_cycle_records_and_notifies_added_items() {
        let config = test_config();
        let store = test_store();
        let (channels, sent) = counting_channels();
        let fetcher = fetcher_with("P1|https://example.com/p1\nP2|https://example.com/p2\n");

        let summary = run_cycle(&config, &store, &fetcher, &LineExtractor, &channels, false)
            .await
            .unwrap();

        assert_eq!(summary.areas_changed, 1);
        assert_eq!(summary.added_events, 2);
        assert_eq!(summary.removed_events, 0);
        assert_eq!(summary.dispatch.delivered, 2);
        assert_eq!(summary.status(), "success");
        let messages = sent.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.starts_with("New item listed:")));
        drop(messages);

        let area = store.area_by_url(AREA_URL).unwrap().unwrap();
        assert!(area.last_content_hash.is_some());
        assert_eq!(store.active_items(area.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn identical_content_skips_the_area_but_advances_checked_at() {
        let config = test_config();
        let store = test_store();
        let (channels, _sent) = counting_channels();
        let fetcher = fetcher_with("P1|https://example.com/p1\n");

        run_cycle(&config, &store, &fetcher, &LineExtractor, &channels, false)
            .await
            .unwrap();
        let after_first = store.area_by_url(AREA_URL).unwrap().unwrap();

        let summary = run_cycle(&config, &store, &fetcher, &LineExtractor, &channels, false)
            .await
            .unwrap();

        assert_eq!(summary.areas_unchanged, 1);
        assert_eq!(summary.added_events, 0);

        let after_second = store.area_by_url(AREA_URL).unwrap().unwrap();
        assert_eq!(after_second.last_content_hash, after_first.last_content_hash);
        assert!(after_second.last_checked_at >= after_first.last_checked_at);
        // No second wave of events for the same item.
        let events = store
            .events_between(
                after_first.last_checked_at.unwrap() - Duration::days(1),
                Utc::now() + Duration::days(1),
                None,
            )
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn changed_content_diffs_against_the_snapshot() {
        let config = test_config();
        let store = test_store();
        let (channels, _sent) = counting_channels();

        let first = fetcher_with("P1|https://example.com/p1\nP2|https://example.com/p2\n");
        run_cycle(&config, &store, &first, &LineExtractor, &channels, false)
            .await
            .unwrap();

        let second = fetcher_with("P2|https://example.com/p2\nP3|https://example.com/p3\n");
        let summary = run_cycle(&config, &store, &second, &LineExtractor, &channels, false)
            .await
            .unwrap();

        assert_eq!(summary.added_events, 1);
        assert_eq!(summary.removed_events, 1);
        assert_eq!(summary.unchanged_items, 1);

        let area = store.area_by_url(AREA_URL).unwrap().unwrap();
        let active = store.active_items(area.id).unwrap();
        let mut names: Vec<_> = active.iter().map(|i| i.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["P2", "P3"]);
    }

    #[tokio::test]
    async fn extraction_failure_leaves_area_untouched() {
        let config = test_config();
        let store = test_store();
        let (channels, _sent) = counting_channels();

        let first = fetcher_with("P1|https://example.com/p1\n");
        run_cycle(&config, &store, &first, &LineExtractor, &channels, false)
            .await
            .unwrap();
        let baseline = store.area_by_url(AREA_URL).unwrap().unwrap();

        // Different content so the gate opens, then extraction blows up.
        let second = fetcher_with("totally different markup\n");
        let summary = run_cycle(&config, &store, &second, &BrokenExtractor, &channels, false)
            .await
            .unwrap();

        assert_eq!(summary.areas_failed, 1);
        assert_eq!(summary.added_events, 0);
        assert_eq!(summary.removed_events, 0);
        assert_eq!(summary.status(), "partial");

        // Hash, snapshot and checked timestamp are all as before.
        let after = store.area_by_url(AREA_URL).unwrap().unwrap();
        assert_eq!(after.last_content_hash, baseline.last_content_hash);
        assert_eq!(after.last_checked_at, baseline.last_checked_at);
        let active = store.active_items(after.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, ItemStatus::Active);
    }

    #[tokio::test]
    async fn fetch_failure_is_counted_but_never_aborts_the_run() {
        let config = test_config();
        let store = test_store();
        let (channels, _sent) = counting_channels();
        let fetcher = MapFetcher {
            pages: HashMap::new(),
        };

        let summary = run_cycle(&config, &store, &fetcher, &LineExtractor, &channels, false)
            .await
            .unwrap();

        assert_eq!(summary.areas_failed, 1);
        assert_eq!(summary.status(), "partial");
        let area = store.area_by_url(AREA_URL).unwrap().unwrap();
        assert!(area.last_content_hash.is_none());
        assert!(area.last_checked_at.is_none());
    }

    #[tokio::test]
    async fn dry_run_previews_without_writing_or_notifying() {
        let config = test_config();
        let store = test_store();
        let (channels, sent) = counting_channels();
        let fetcher = fetcher_with("P1|https://example.com/p1\n");

        let summary = run_cycle(&config, &store, &fetcher, &LineExtractor, &channels, true)
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.added_events, 1);
        assert_eq!(summary.status(), "dry_run");
        assert_eq!(summary.dispatch, DispatchOutcome::default());

        let area = store.area_by_url(AREA_URL).unwrap().unwrap();
        assert!(area.last_content_hash.is_none());
        assert!(area.last_checked_at.is_none());
        assert!(store.active_items(area.id).unwrap().is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn volatile_patterns_keep_noisy_content_unchanged() {
        let mut config = test_config();
        config.areas[0].volatile_patterns = vec![r"stamp=\d+".to_string()];
        let store = test_store();
        let (channels, _sent) = counting_channels();

        let first = fetcher_with("P1|https://example.com/p1\nstamp=111\n");
        run_cycle(&config, &store, &first, &LineExtractor, &channels, false)
            .await
            .unwrap();

        let second = fetcher_with("P1|https://example.com/p1\nstamp=222\n");
        let summary = run_cycle(&config, &store, &second, &LineExtractor, &channels, false)
            .await
            .unwrap();

        assert_eq!(summary.areas_unchanged, 1);
        assert_eq!(summary.added_events, 0);
    }
}
