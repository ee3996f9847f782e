//! Snapshot store: serves the cached snapshot while fresh and rebuilds it
//! from the aggregator otherwise.
//!
//! Cache trouble never fails a read. A store opened without a cache, or one
//! whose reads and writes start erroring, degrades to building fresh
//! snapshots per request. Concurrent rebuilds are collapsed into one: callers
//! that lose the race re-check the cache before fetching.

use crate::cache::{SnapshotCache, SNAPSHOT_KEY, SNAPSHOT_TTL};
use crate::llama::{Fetcher, UpstreamError};
use crate::snapshot::Snapshot;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

type Clock = Box<dyn Fn() -> OffsetDateTime + Send + Sync>;

pub struct SnapshotStore {
    fetcher: Fetcher,
    cache: Option<SnapshotCache>,
    ttl: Duration,
    clock: Clock,
    rebuild: tokio::sync::Mutex<()>,
}

impl SnapshotStore {
    pub fn new(fetcher: Fetcher, cache: Option<SnapshotCache>) -> Self {
        Self {
            fetcher,
            cache,
            ttl: SNAPSHOT_TTL,
            clock: Box::new(OffsetDateTime::now_utc),
            rebuild: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replace the freshness clock. Reads and writes consult this clock for
    /// expiry; snapshot timestamps still come from the wall clock.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> OffsetDateTime + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// The current snapshot: cached if fresh, rebuilt from the aggregator
    /// otherwise. Only upstream failures surface; cache failures downgrade to
    /// an uncached rebuild.
    pub async fn get(&self) -> Result<Snapshot, UpstreamError> {
        let Some(cache) = &self.cache else {
            return self.fetcher.build_snapshot().await;
        };
        if let Some(snapshot) = self.read_fresh(cache) {
            return Ok(snapshot);
        }

        let _guard = self.rebuild.lock().await;
        // another caller may have rebuilt while we waited
        if let Some(snapshot) = self.read_fresh(cache) {
            return Ok(snapshot);
        }

        let snapshot = self.fetcher.build_snapshot().await?;
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                if let Err(err) = cache.put(SNAPSHOT_KEY, &json, (self.clock)()) {
                    warn!(error = %err, "cache write failed, serving uncached");
                }
            }
            Err(err) => warn!(error = %err, "snapshot serialization failed, not cached"),
        }
        Ok(snapshot)
    }

    fn read_fresh(&self, cache: &SnapshotCache) -> Option<Snapshot> {
        match cache.get_fresh(SNAPSHOT_KEY, self.ttl, (self.clock)()) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(snapshot) => {
                    debug!("cache hit");
                    Some(snapshot)
                }
                Err(err) => {
                    warn!(error = %err, "corrupt cache entry ignored");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "cache read failed");
                None
            }
        }
    }

    /// Drop the stored snapshot so the next read rebuilds. Best effort; a
    /// failed eviction is logged and the entry ages out on its own.
    pub fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.evict(SNAPSHOT_KEY) {
                warn!(error = %err, "cache eviction failed");
            }
        }
    }

    pub fn cache_healthy(&self) -> bool {
        match &self.cache {
            Some(cache) => cache.ping().is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llama::FetchConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    const OVERVIEW_QUERY: &str =
        "?excludeTotalDataChart=true&excludeTotalDataChartBreakdown=true&dataType=dailyFees";
    const CHART_QUERY: &str =
        "?excludeTotalDataChart=false&excludeTotalDataChartBreakdown=true&dataType=dailyFees";

    const T1: i64 = 1_704_067_200;

    async fn mount_upstream(
        server: &mut mockito::Server,
        hits: usize,
    ) -> (mockito::Mock, mockito::Mock) {
        let overview = server
            .mock("GET", format!("/{OVERVIEW_QUERY}").as_str())
            .with_status(200)
            .with_body(json!({ "allChains": ["Base"] }).to_string())
            .expect(hits)
            .create_async()
            .await;
        let chain = server
            .mock("GET", format!("/Base{CHART_QUERY}").as_str())
            .with_status(200)
            .with_body(json!({ "totalDataChart": [[T1, 5.0]] }).to_string())
            .expect(hits)
            .create_async()
            .await;
        (overview, chain)
    }

    fn fetcher_for(server: &mockito::Server) -> Fetcher {
        Fetcher::new(FetchConfig {
            base_url: server.url(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn ticking_clock(start: i64) -> (Arc<AtomicI64>, impl Fn() -> OffsetDateTime + Send + Sync) {
        let tick = Arc::new(AtomicI64::new(start));
        let handle = tick.clone();
        let clock = move || {
            OffsetDateTime::from_unix_timestamp(handle.load(Ordering::Relaxed)).unwrap()
        };
        (tick, clock)
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let mut server = mockito::Server::new_async().await;
        let (overview, chain) = mount_upstream(&mut server, 1).await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cache = SnapshotCache::open(tmp.path()).unwrap();
        let (_, clock) = ticking_clock(1_000);
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache)).with_clock(clock);

        let first = store.get().await.unwrap();
        let second = store.get().await.unwrap();
        assert_eq!(first.chain_data["Base"]["2024-01-01"], 5.0);
        assert_eq!(second.chain_data["Base"]["2024-01-01"], 5.0);
        overview.assert_async().await;
        chain.assert_async().await;
    }

    #[tokio::test]
    async fn expired_entry_triggers_rebuild() {
        let mut server = mockito::Server::new_async().await;
        let (overview, chain) = mount_upstream(&mut server, 2).await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cache = SnapshotCache::open(tmp.path()).unwrap();
        let (tick, clock) = ticking_clock(1_000);
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache))
            .with_ttl(Duration::seconds(60))
            .with_clock(clock);

        store.get().await.unwrap();
        tick.store(1_000 + 60, Ordering::Relaxed);
        store.get().await.unwrap();
        overview.assert_async().await;
        chain.assert_async().await;
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let mut server = mockito::Server::new_async().await;
        let (overview, chain) = mount_upstream(&mut server, 2).await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cache = SnapshotCache::open(tmp.path()).unwrap();
        let (_, clock) = ticking_clock(1_000);
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache)).with_clock(clock);

        store.get().await.unwrap();
        store.invalidate();
        store.get().await.unwrap();
        overview.assert_async().await;
        chain.assert_async().await;
    }

    #[tokio::test]
    async fn missing_cache_fetches_every_time() {
        let mut server = mockito::Server::new_async().await;
        let (overview, chain) = mount_upstream(&mut server, 2).await;
        let store = SnapshotStore::new(fetcher_for(&server), None);

        store.get().await.unwrap();
        store.get().await.unwrap();
        assert!(!store.cache_healthy());
        overview.assert_async().await;
        chain.assert_async().await;
    }

    #[tokio::test]
    async fn corrupt_cache_entry_rebuilds() {
        let mut server = mockito::Server::new_async().await;
        let (overview, chain) = mount_upstream(&mut server, 1).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache = SnapshotCache::open(&path).unwrap();
        let (_, clock) = ticking_clock(1_000);
        cache.put(SNAPSHOT_KEY, "{ not json", clock()).unwrap();
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache)).with_clock(clock);

        let snapshot = store.get().await.unwrap();
        assert_eq!(snapshot.chain_data["Base"]["2024-01-01"], 5.0);
        overview.assert_async().await;
        chain.assert_async().await;

        // the rebuild replaced the corrupt entry
        let reader = SnapshotCache::open(&path).unwrap();
        let stored = reader
            .get_fresh(SNAPSHOT_KEY, SNAPSHOT_TTL, OffsetDateTime::from_unix_timestamp(1_000).unwrap())
            .unwrap()
            .unwrap();
        let parsed: Snapshot = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed.chain_data["Base"]["2024-01-01"], 5.0);
    }

    #[tokio::test]
    async fn concurrent_gets_rebuild_once() {
        let mut server = mockito::Server::new_async().await;
        let (overview, chain) = mount_upstream(&mut server, 1).await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cache = SnapshotCache::open(tmp.path()).unwrap();
        let (_, clock) = ticking_clock(1_000);
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache)).with_clock(clock);

        let (a, b) = tokio::join!(store.get(), store.get());
        assert!(a.is_ok());
        assert!(b.is_ok());
        overview.assert_async().await;
        chain.assert_async().await;
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_when_cache_is_cold() {
        let mut server = mockito::Server::new_async().await;
        let _overview = server
            .mock("GET", format!("/{OVERVIEW_QUERY}").as_str())
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cache = SnapshotCache::open(tmp.path()).unwrap();
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache));

        assert!(store.get().await.is_err());
    }

    #[tokio::test]
    async fn cache_healthy_reports_open_backend() {
        let server = mockito::Server::new_async().await;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let cache = SnapshotCache::open(tmp.path()).unwrap();
        let store = SnapshotStore::new(fetcher_for(&server), Some(cache));
        assert!(store.cache_healthy());
    }
}
