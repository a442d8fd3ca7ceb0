//! Refresh scheduler
//!
//! Drives the aggregator: one refresh immediately at startup, then one per
//! configured interval for the life of the process. The loop awaits each
//! cycle before sleeping again, so at most one refresh is ever in flight and
//! the cache has exactly one writer.
//!
//! A startup failure is fatal (there is nothing to serve). A periodic failure
//! is logged and counted; the previously published snapshot keeps serving
//! until a later cycle succeeds. Shutdown discards any in-flight cycle rather
//! than committing partial work.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::api::Metrics;
use crate::config::MapConfig;
use crate::snapshot::SnapshotCache;
use crate::types::Snapshot;

pub struct Scheduler {
    aggregator: Arc<Aggregator>,
    cache: Arc<SnapshotCache>,
    config: Arc<MapConfig>,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(
        aggregator: Arc<Aggregator>,
        cache: Arc<SnapshotCache>,
        config: Arc<MapConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            aggregator,
            cache,
            config,
            metrics,
        }
    }

    /// Run until the shutdown signal flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        // Startup refresh. Without at least one snapshot the endpoint would
        // serve an empty map forever, so a failure here takes the process down.
        self.metrics.inc_refresh_attempts();
        let snapshot = self
            .aggregator
            .run()
            .await
            .context("initial refresh failed")?;
        self.commit(snapshot);

        let mut interval = tokio::time::interval(self.config.refresh_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("scheduler stopping");
                    break;
                }
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("scheduler stopping, discarding in-flight refresh");
                    break;
                }
                result = self.refresh() => {
                    let _ = result;
                }
            }
        }

        Ok(())
    }

    /// One periodic refresh; failures are absorbed here
    async fn refresh(&self) {
        self.metrics.inc_refresh_attempts();

        match self.aggregator.run().await {
            Ok(snapshot) => self.commit(snapshot),
            Err(e) => {
                error!("refresh cycle failed, keeping last snapshot: {}", e);
                self.metrics.inc_refresh_failures();
            }
        }
    }

    fn commit(&self, snapshot: Snapshot) {
        info!(
            "publishing snapshot: {} peers, {} map points",
            snapshot.peer_count,
            snapshot.points.len()
        );

        self.metrics.inc_refresh_completed();
        self.metrics.set_map_points(snapshot.points.len() as u64);
        self.metrics.set_last_refresh(snapshot.generated_at);
        self.cache.update(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientError, GeoResolver, LedgerClient, PeerDirectory};
    use crate::types::{Agreement, Location, PeerEntry, PeerId};
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Directory that succeeds for the first N calls, then fails
    struct FlakyDirectory {
        calls: AtomicUsize,
        succeed_first: usize,
    }

    #[async_trait]
    impl PeerDirectory for FlakyDirectory {
        async fn list_peers(&self, _deadline: Duration) -> Result<Vec<PeerEntry>, ClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.succeed_first {
                Ok(vec![PeerEntry {
                    peer_id: "p1".to_string(),
                    addr: "203.0.113.1".parse().unwrap(),
                }])
            } else {
                Err(ClientError::Unreachable("directory down".into()))
            }
        }
    }

    struct EmptyLedger;

    #[async_trait]
    impl LedgerClient for EmptyLedger {
        async fn agreements(
            &self,
            _peer_id: &PeerId,
            _deadline: Duration,
        ) -> Result<Vec<Agreement>, ClientError> {
            Ok(vec![])
        }
    }

    struct AnywhereGeo;

    impl GeoResolver for AnywhereGeo {
        fn resolve(&self, _addr: IpAddr) -> Result<Location, ClientError> {
            Ok(Location {
                lat: 52.52,
                lon: 13.40,
                name: "Berlin".to_string(),
            })
        }
    }

    fn scheduler(succeed_first: usize) -> (Scheduler, Arc<SnapshotCache>, Arc<Metrics>) {
        let mut config = MapConfig::default();
        config.refresh_interval_secs = 1;
        let config = Arc::new(config);

        let cache = Arc::new(SnapshotCache::new());
        let metrics = Arc::new(Metrics::new());

        let aggregator = Arc::new(Aggregator::new(
            Arc::new(FlakyDirectory {
                calls: AtomicUsize::new(0),
                succeed_first,
            }),
            Arc::new(EmptyLedger),
            Arc::new(AnywhereGeo),
            config.clone(),
            metrics.clone(),
        ));

        (
            Scheduler::new(aggregator, cache.clone(), config, metrics.clone()),
            cache,
            metrics,
        )
    }

    #[tokio::test]
    async fn test_startup_failure_is_fatal() {
        let (scheduler, cache, _metrics) = scheduler(0);
        let (_tx, rx) = watch::channel(false);

        let result = scheduler.run(rx).await;
        assert!(result.is_err());
        assert!(cache.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycles_keep_last_snapshot() {
        // First cycle succeeds, every later one fails: the snapshot from the
        // startup refresh must remain published.
        let (scheduler, cache, metrics) = scheduler(1);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let snapshot = cache.get().expect("startup snapshot still published");
        assert_eq!(snapshot.peer_count, 1);
        assert!(metrics.refresh_failures.load(Ordering::Relaxed) >= 1);
        assert_eq!(metrics.refresh_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_the_loop() {
        let (scheduler, _cache, metrics) = scheduler(usize::MAX);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // No further refreshes once the loop has exited.
        let attempts = metrics.refresh_attempts.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(metrics.refresh_attempts.load(Ordering::Relaxed), attempts);
    }
}
