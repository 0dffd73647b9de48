//! Incremental poller: the safety net that converges the mirror when
//! webhooks are lost, delayed, or disabled.
//!
//! Each cycle re-fetches everything updated since the checkpoint minus a
//! backward overlap window, enqueues descriptor envelopes, and advances
//! the checkpoint page by page, only after the page is durably enqueued.
//! The queue's idempotent enqueue absorbs the deliberate over-fetch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use inflow_connectors::{ListQuery, UpstreamSource};
use inflow_core::{
    defaults, Checkpoint, CheckpointRepository, NewEnvelope, QueueRepository, Result, Source,
};

/// Poller behavior for one source.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Subtracted from the checkpoint each cycle to absorb clock skew and
    /// propagation races.
    pub overlap: chrono::Duration,
    /// Maximum pages per cycle; the rest is picked up next cycle via the
    /// persisted cursor.
    pub page_cap: u32,
    /// Checkpoint seed when none exists (the configured cutoff).
    pub seed_floor: Option<DateTime<Utc>>,
    /// Seed lookback when no floor is configured.
    pub seed_lookback: chrono::Duration,
    /// Whether the very first sync includes completed entities.
    pub include_completed_on_initial_sync: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            overlap: chrono::Duration::seconds(defaults::BACKFILL_OVERLAP_SECS),
            page_cap: defaults::BACKFILL_PAGE_CAP,
            seed_floor: None,
            seed_lookback: chrono::Duration::days(defaults::SEED_LOOKBACK_DAYS),
            include_completed_on_initial_sync: true,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub pages: u32,
    pub items: usize,
    /// Items newly enqueued (overlap re-deliveries dedup to zero).
    pub enqueued: usize,
    pub checkpoint: DateTime<Utc>,
}

/// Handle for a running poll loop.
pub struct PollerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

/// Incremental poller for one source.
pub struct Poller {
    client: Arc<dyn UpstreamSource>,
    queue: Arc<dyn QueueRepository>,
    checkpoints: Arc<dyn CheckpointRepository>,
    config: PollerConfig,
}

impl Poller {
    pub fn new(
        client: Arc<dyn UpstreamSource>,
        queue: Arc<dyn QueueRepository>,
        checkpoints: Arc<dyn CheckpointRepository>,
        config: PollerConfig,
    ) -> Self {
        Self {
            client,
            queue,
            checkpoints,
            config,
        }
    }

    pub fn source(&self) -> Source {
        self.client.source()
    }

    /// Run cycles on `interval` until shut down. One task per source keeps
    /// cycles from overlapping.
    pub fn spawn(self, interval: Duration) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(async move {
            info!(
                subsystem = "poller",
                source = %self.source(),
                interval_secs = interval.as_secs(),
                "Poller started"
            );
            loop {
                match self.run_cycle().await {
                    Ok(summary) => {
                        debug!(
                            subsystem = "poller",
                            source = %self.source(),
                            pages = summary.pages,
                            item_count = summary.items,
                            enqueued = summary.enqueued,
                            "Poll cycle complete"
                        );
                    }
                    Err(e) => {
                        error!(
                            subsystem = "poller",
                            source = %self.source(),
                            error = %e,
                            "Poll cycle aborted, checkpoint not advanced past last good page"
                        );
                    }
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subsystem = "poller", source = %self.source(), "Poller stopped");
                        return;
                    }
                    _ = sleep(interval) => {}
                }
            }
        });
        PollerHandle { shutdown_tx, join }
    }

    /// One full poll cycle: page through everything updated since
    /// `checkpoint - overlap`, enqueue descriptors, advance the checkpoint
    /// after each durably-enqueued page.
    #[instrument(skip(self), fields(source = %self.source()))]
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let source = self.source();
        let existing = self.checkpoints.get(source).await?;
        let initial_sync = existing.is_none();

        let base = match &existing {
            Some(checkpoint) => checkpoint.last_event_time,
            None => self
                .config
                .seed_floor
                .unwrap_or_else(|| Utc::now() - self.config.seed_lookback),
        };
        let since = base - self.config.overlap;
        let include_completed = if initial_sync {
            self.config.include_completed_on_initial_sync
        } else {
            true
        };
        // Resume a cursor left by a capped or aborted cycle.
        let mut cursor = existing.and_then(|c| c.last_cursor);

        let mut high_water = base;
        let mut pages = 0u32;
        let mut items_total = 0usize;
        let mut enqueued_total = 0usize;
        let mut exhausted = false;

        while pages < self.config.page_cap {
            let query = ListQuery::new(since)
                .with_cursor(cursor.as_deref())
                .include_completed(include_completed);
            let page = self.client.list_updated_since(query).await?;
            pages += 1;

            if !page.items.is_empty() {
                items_total += page.items.len();

                // The page maximum, not the last item: pages are not
                // guaranteed to arrive ordered by updated_at.
                let page_max = page.items.iter().filter_map(|i| i.updated_at).max();

                let envelopes: Vec<NewEnvelope> = page
                    .items
                    .iter()
                    .map(|item| {
                        NewEnvelope::page_item(source, item.external_id.as_str(), item.updated_at)
                    })
                    .collect();
                enqueued_total += self.queue.enqueue_batch(envelopes).await?;

                // The queue is now the durable hand-off for this page, so
                // the mark may advance even if processing is still pending.
                if let Some(max) = page_max {
                    high_water = high_water.max(max);
                }
                self.checkpoints
                    .set(&Checkpoint {
                        source,
                        last_event_time: high_water,
                        last_cursor: page.next_cursor.clone(),
                    })
                    .await?;
            }

            cursor = page.next_cursor;
            if page.exhausted {
                exhausted = true;
                break;
            }
        }

        if exhausted {
            // Clear any resume cursor; the next cycle starts a fresh window.
            self.checkpoints
                .set(&Checkpoint {
                    source,
                    last_event_time: high_water,
                    last_cursor: None,
                })
                .await?;
        }

        Ok(CycleSummary {
            pages,
            items: items_total,
            enqueued: enqueued_total,
            checkpoint: high_water,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use inflow_connectors::{UpdatedPage, UpstreamItem};
    use inflow_core::{
        EnqueueOutcome, Envelope, EnvelopeState, Error, SourceQueueStats,
    };

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    /// Scripted client: serves pages in order, records the queries it saw.
    struct StubClient {
        source: Source,
        pages: Mutex<Vec<Result<UpdatedPage>>>,
        queries: Mutex<Vec<(DateTime<Utc>, Option<String>, bool)>>,
    }

    impl StubClient {
        fn new(source: Source, pages: Vec<Result<UpdatedPage>>) -> Self {
            Self {
                source,
                pages: Mutex::new(pages),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UpstreamSource for StubClient {
        fn source(&self) -> Source {
            self.source
        }
        async fn list_updated_since(&self, query: ListQuery<'_>) -> Result<UpdatedPage> {
            self.queries.lock().unwrap().push((
                query.since,
                query.cursor.map(String::from),
                query.include_completed,
            ));
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(UpdatedPage {
                    exhausted: true,
                    ..Default::default()
                });
            }
            pages.remove(0)
        }
    }

    #[derive(Default)]
    struct StubQueue {
        enqueued: Mutex<Vec<NewEnvelope>>,
    }

    #[async_trait]
    impl QueueRepository for StubQueue {
        async fn enqueue(&self, envelope: NewEnvelope) -> Result<EnqueueOutcome> {
            self.enqueued.lock().unwrap().push(envelope);
            Ok(EnqueueOutcome::Inserted)
        }
        async fn enqueue_batch(&self, envelopes: Vec<NewEnvelope>) -> Result<usize> {
            let count = envelopes.len();
            self.enqueued.lock().unwrap().extend(envelopes);
            Ok(count)
        }
        async fn lease(
            &self,
            _: Source,
            _: i64,
            _: std::time::Duration,
        ) -> Result<Vec<Envelope>> {
            Ok(Vec::new())
        }
        async fn fail(&self, _: i64, _: &str, _: bool) -> Result<i32> {
            Ok(0)
        }
        async fn requeue_failed(&self, _: i64) -> Result<bool> {
            Ok(false)
        }
        async fn list(
            &self,
            _: EnvelopeState,
            _: Option<Source>,
            _: i64,
        ) -> Result<Vec<Envelope>> {
            Ok(Vec::new())
        }
        async fn stats(&self) -> Result<Vec<SourceQueueStats>> {
            Ok(Vec::new())
        }
        async fn cleanup_completed(&self, _: i64) -> Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct StubCheckpoints {
        current: Mutex<Option<Checkpoint>>,
    }

    #[async_trait]
    impl CheckpointRepository for StubCheckpoints {
        async fn get(&self, _: Source) -> Result<Option<Checkpoint>> {
            Ok(self.current.lock().unwrap().clone())
        }
        async fn set(&self, checkpoint: &Checkpoint) -> Result<()> {
            let mut current = self.current.lock().unwrap();
            // Same monotonic guard the real repository enforces.
            let last_event_time = match &*current {
                Some(existing) => existing.last_event_time.max(checkpoint.last_event_time),
                None => checkpoint.last_event_time,
            };
            *current = Some(Checkpoint {
                last_event_time,
                ..checkpoint.clone()
            });
            Ok(())
        }
    }

    fn item(id: &str, updated: &str) -> UpstreamItem {
        UpstreamItem {
            external_id: id.to_string(),
            updated_at: Some(ts(updated)),
        }
    }

    fn page(items: Vec<UpstreamItem>, next_cursor: Option<&str>) -> Result<UpdatedPage> {
        Ok(UpdatedPage {
            items,
            next_cursor: next_cursor.map(String::from),
            exhausted: next_cursor.is_none(),
        })
    }

    fn config_with_floor(floor: &str) -> PollerConfig {
        PollerConfig {
            seed_floor: Some(ts(floor)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_seed_and_overlap_applied() {
        let client = Arc::new(StubClient::new(
            Source::Missive,
            vec![page(vec![item("E7", "2025-10-15T12:02:00Z")], None)],
        ));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());
        *checkpoints.current.lock().unwrap() = Some(Checkpoint {
            source: Source::Missive,
            last_event_time: ts("2025-10-15T12:00:00Z"),
            last_cursor: None,
        });

        let poller = Poller::new(
            client.clone(),
            queue.clone(),
            checkpoints.clone(),
            PollerConfig::default(),
        );
        let summary = poller.run_cycle().await.unwrap();

        // since = checkpoint - 120s overlap.
        let queries = client.queries.lock().unwrap();
        assert_eq!(queries[0].0, ts("2025-10-15T11:58:00Z"));

        assert_eq!(summary.items, 1);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.checkpoint, ts("2025-10-15T12:02:00Z"));
        assert_eq!(
            checkpoints.current.lock().unwrap().as_ref().unwrap().last_event_time,
            ts("2025-10-15T12:02:00Z")
        );

        let enqueued = queue.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].external_id, "E7");
    }

    #[tokio::test]
    async fn test_first_run_seeds_from_floor() {
        let client = Arc::new(StubClient::new(Source::Teamwork, vec![page(vec![], None)]));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());

        let poller = Poller::new(
            client.clone(),
            queue,
            checkpoints.clone(),
            config_with_floor("2024-03-15T00:00:00Z"),
        );
        poller.run_cycle().await.unwrap();

        let queries = client.queries.lock().unwrap();
        // Floor minus overlap.
        assert_eq!(queries[0].0, ts("2024-03-14T23:58:00Z"));
        // An empty first poll still creates the checkpoint.
        assert_eq!(
            checkpoints.current.lock().unwrap().as_ref().unwrap().last_event_time,
            ts("2024-03-15T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_checkpoint_uses_page_maximum_not_last_item() {
        // updated_at values deliberately unordered within the page.
        let client = Arc::new(StubClient::new(
            Source::Teamwork,
            vec![page(
                vec![
                    item("a", "2025-10-15T12:05:00Z"),
                    item("b", "2025-10-15T12:01:00Z"),
                ],
                None,
            )],
        ));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());

        let poller = Poller::new(
            client,
            queue,
            checkpoints.clone(),
            config_with_floor("2025-10-15T12:00:00Z"),
        );
        let summary = poller.run_cycle().await.unwrap();
        assert_eq!(summary.checkpoint, ts("2025-10-15T12:05:00Z"));
    }

    #[tokio::test]
    async fn test_transient_abort_keeps_last_good_page_checkpoint() {
        let client = Arc::new(StubClient::new(
            Source::Teamwork,
            vec![
                page(vec![item("a", "2025-10-15T12:01:00Z")], Some("2")),
                Err(Error::TransientUpstream("503".into())),
            ],
        ));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());

        let poller = Poller::new(
            client,
            queue.clone(),
            checkpoints.clone(),
            config_with_floor("2025-10-15T12:00:00Z"),
        );
        let result = poller.run_cycle().await;
        assert!(result.is_err());

        // Page 1 was enqueued and checkpointed; the failed page advanced
        // nothing further, and the cursor allows resuming next cycle.
        assert_eq!(queue.enqueued.lock().unwrap().len(), 1);
        let checkpoint = checkpoints.current.lock().unwrap().clone().unwrap();
        assert_eq!(checkpoint.last_event_time, ts("2025-10-15T12:01:00Z"));
        assert_eq!(checkpoint.last_cursor.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_exhaustion_clears_cursor() {
        let client = Arc::new(StubClient::new(
            Source::Teamwork,
            vec![
                page(vec![item("a", "2025-10-15T12:01:00Z")], Some("2")),
                page(vec![item("b", "2025-10-15T12:02:00Z")], None),
            ],
        ));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());

        let poller = Poller::new(
            client,
            queue,
            checkpoints.clone(),
            config_with_floor("2025-10-15T12:00:00Z"),
        );
        let summary = poller.run_cycle().await.unwrap();
        assert_eq!(summary.pages, 2);

        let checkpoint = checkpoints.current.lock().unwrap().clone().unwrap();
        assert!(checkpoint.last_cursor.is_none());
        assert_eq!(checkpoint.last_event_time, ts("2025-10-15T12:02:00Z"));
    }

    #[tokio::test]
    async fn test_page_cap_stops_cycle_and_keeps_cursor() {
        let pages: Vec<Result<UpdatedPage>> = (0..5)
            .map(|i| {
                page(
                    vec![item(&format!("t{i}"), "2025-10-15T12:01:00Z")],
                    Some("next"),
                )
            })
            .collect();
        let client = Arc::new(StubClient::new(Source::Teamwork, pages));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());

        let config = PollerConfig {
            page_cap: 3,
            ..config_with_floor("2025-10-15T12:00:00Z")
        };
        let poller = Poller::new(client, queue, checkpoints.clone(), config);
        let summary = poller.run_cycle().await.unwrap();

        assert_eq!(summary.pages, 3);
        let checkpoint = checkpoints.current.lock().unwrap().clone().unwrap();
        assert_eq!(checkpoint.last_cursor.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_initial_sync_completed_filter() {
        let client = Arc::new(StubClient::new(Source::Teamwork, vec![page(vec![], None)]));
        let queue = Arc::new(StubQueue::default());
        let checkpoints = Arc::new(StubCheckpoints::default());

        let config = PollerConfig {
            include_completed_on_initial_sync: false,
            ..config_with_floor("2025-10-15T12:00:00Z")
        };
        let poller = Poller::new(client.clone(), queue, checkpoints.clone(), config);

        // First cycle: no checkpoint yet, filter applies.
        poller.run_cycle().await.unwrap();
        assert!(!client.queries.lock().unwrap()[0].2);

        // Second cycle: checkpoint exists, completed tasks always included.
        client.pages.lock().unwrap().push(page(vec![], None));
        poller.run_cycle().await.unwrap();
        assert!(client.queries.lock().unwrap()[1].2);
    }
}
