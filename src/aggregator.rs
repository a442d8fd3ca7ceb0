//! Refresh cycle: discover, enrich, merge
//!
//! One run queries the directory for the full peer set, enriches every peer
//! concurrently (ledger agreements + geolocation, bounded fan-out), and merges
//! the results into per-geo-bucket aggregates. The finished snapshot is
//! returned to the scheduler; nothing here touches the cache, so a failed
//! cycle cannot disturb what readers currently see.
//!
//! ## Failure policy
//!
//! - Directory listing failure aborts the whole cycle.
//! - A single peer's ledger failure skips that peer and continues.
//! - A peer whose address has no geolocation is skipped: the output is keyed
//!   by map buckets, so a peer that cannot be placed contributes nothing.
//! - A cycle in which no peer survives enrichment produces no snapshot.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::Metrics;
use crate::clients::{GeoResolver, LedgerClient, PeerDirectory};
use crate::config::MapConfig;
use crate::geo;
use crate::types::{income_per_hour, DealTotals, Location, PeerEntry, PeerPoint, Snapshot};

/// Why a refresh cycle produced no snapshot
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("peer directory query failed: {0}")]
    Directory(#[source] crate::clients::ClientError),

    #[error("no peers survived enrichment ({listed} listed)")]
    NoPeers { listed: usize },
}

/// One peer that made it through enrichment
struct ResolvedPeer {
    location: Location,
    totals: DealTotals,
}

/// Running aggregate for one geo bucket
struct BucketAccum {
    lat: f64,
    lon: f64,
    peers: u64,
    totals: DealTotals,
}

pub struct Aggregator {
    directory: Arc<dyn PeerDirectory>,
    ledger: Arc<dyn LedgerClient>,
    geo: Arc<dyn GeoResolver>,
    config: Arc<MapConfig>,
    metrics: Arc<Metrics>,
}

impl Aggregator {
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        ledger: Arc<dyn LedgerClient>,
        geo: Arc<dyn GeoResolver>,
        config: Arc<MapConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            directory,
            ledger,
            geo,
            config,
            metrics,
        }
    }

    /// Execute one full refresh cycle
    pub async fn run(&self) -> Result<Snapshot, RefreshError> {
        let peers = self
            .directory
            .list_peers(self.config.directory_timeout())
            .await
            .map_err(RefreshError::Directory)?;

        let listed = peers.len();
        info!("directory listed {} peers", listed);
        self.metrics.set_peers_discovered(listed as u64);

        let resolved: Vec<ResolvedPeer> = stream::iter(peers)
            .map(|peer| self.enrich_peer(peer))
            .buffer_unordered(self.config.max_concurrent_lookups)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        if resolved.is_empty() {
            return Err(RefreshError::NoPeers { listed });
        }

        Ok(self.merge(resolved))
    }

    /// Enrich one peer with ledger and geolocation data
    ///
    /// Returns `None` when the peer is skipped; the reason has already been
    /// logged and counted.
    async fn enrich_peer(&self, peer: PeerEntry) -> Option<ResolvedPeer> {
        let agreements = match self
            .ledger
            .agreements(&peer.peer_id, self.config.ledger_timeout())
            .await
        {
            Ok(agreements) => agreements,
            Err(e) => {
                warn!("skipping peer {}: ledger query failed: {}", peer.peer_id, e);
                self.metrics.inc_peers_skipped_ledger();
                return None;
            }
        };

        // A peer with no agreements still counts toward its bucket; a peer
        // with no resolvable location does not exist for the map.
        let location = match self.geo.resolve(peer.addr) {
            Ok(location) => location,
            Err(e) => {
                warn!("skipping peer {}: cannot geolocate {}: {}", peer.peer_id, peer.addr, e);
                self.metrics.inc_peers_skipped_geo();
                return None;
            }
        };

        let mut totals = DealTotals::default();
        for agreement in &agreements {
            totals.add_agreement(agreement);
        }

        Some(ResolvedPeer { location, totals })
    }

    /// Merge resolved peers into per-bucket aggregates
    ///
    /// All published fields sum across the bucket's peers (ram_size included);
    /// the bucket coordinates come from whichever peer landed in the bucket
    /// first, which is always inside the bucket's geohash cell.
    fn merge(&self, resolved: Vec<ResolvedPeer>) -> Snapshot {
        let peer_count = resolved.len() as u64;
        let total_deals: u64 = resolved.iter().map(|p| p.totals.deals).sum();
        let mut buckets: HashMap<String, BucketAccum> = HashMap::new();

        for peer in resolved {
            let key = geo::encode(
                peer.location.lat,
                peer.location.lon,
                self.config.geohash_precision,
            );

            let accum = buckets.entry(key).or_insert_with(|| BucketAccum {
                lat: peer.location.lat,
                lon: peer.location.lon,
                peers: 0,
                totals: DealTotals::default(),
            });
            accum.peers += 1;
            accum.totals.merge(&peer.totals);
        }

        let points: HashMap<String, PeerPoint> = buckets
            .into_iter()
            .map(|(key, accum)| {
                let point = PeerPoint {
                    lat: accum.lat,
                    lon: accum.lon,
                    count: accum.peers,
                    income: income_per_hour(accum.totals.price_total),
                    cpu_count: accum.totals.cpu_cores,
                    gpu_count: accum.totals.gpu_units,
                    ram_size: accum.totals.ram_bytes,
                };
                (key, point)
            })
            .collect();

        info!(
            "merged {} peers ({} agreements) into {} map points",
            peer_count,
            total_deals,
            points.len()
        );
        Snapshot::new(points, peer_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientError;
    use crate::types::{Agreement, PeerId};
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::time::Duration;

    // In-memory collaborator doubles

    struct StaticDirectory(Result<Vec<PeerEntry>, ClientError>);

    #[async_trait]
    impl PeerDirectory for StaticDirectory {
        async fn list_peers(&self, _deadline: Duration) -> Result<Vec<PeerEntry>, ClientError> {
            self.0.clone()
        }
    }

    struct StaticLedger(HashMap<PeerId, Result<Vec<Agreement>, ClientError>>);

    #[async_trait]
    impl LedgerClient for StaticLedger {
        async fn agreements(
            &self,
            peer_id: &PeerId,
            _deadline: Duration,
        ) -> Result<Vec<Agreement>, ClientError> {
            self.0
                .get(peer_id)
                .cloned()
                .unwrap_or_else(|| Err(ClientError::NotFound(peer_id.clone())))
        }
    }

    struct StaticGeo(HashMap<IpAddr, Location>);

    impl GeoResolver for StaticGeo {
        fn resolve(&self, addr: IpAddr) -> Result<Location, ClientError> {
            self.0
                .get(&addr)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(addr.to_string()))
        }
    }

    fn entry(id: &str, addr: &str) -> PeerEntry {
        PeerEntry {
            peer_id: id.to_string(),
            addr: addr.parse().unwrap(),
        }
    }

    fn agreement(cpu: u64, gpu: u64, price: u128) -> Agreement {
        Agreement {
            cpu_cores: cpu,
            gpu_units: gpu,
            ram_bytes: 0,
            price_total: price,
        }
    }

    fn moscow() -> Location {
        Location {
            lat: 55.7512,
            lon: 37.6175,
            name: "Moscow".to_string(),
        }
    }

    fn aggregator(
        directory: StaticDirectory,
        ledger: StaticLedger,
        geo: StaticGeo,
    ) -> Aggregator {
        Aggregator::new(
            Arc::new(directory),
            Arc::new(ledger),
            Arc::new(geo),
            Arc::new(MapConfig::default()),
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_two_peers_merge_into_one_bucket() {
        // P1 has one agreement (2 cpu, no gpu, no income), P2 has none;
        // both resolve into the same city block.
        let directory = StaticDirectory(Ok(vec![
            entry("p1", "203.0.113.1"),
            entry("p2", "203.0.113.2"),
        ]));
        let ledger = StaticLedger(HashMap::from([
            ("p1".to_string(), Ok(vec![agreement(2, 0, 0)])),
            ("p2".to_string(), Ok(vec![])),
        ]));
        let geo = StaticGeo(HashMap::from([
            ("203.0.113.1".parse().unwrap(), moscow()),
            ("203.0.113.2".parse().unwrap(), moscow()),
        ]));

        let snapshot = aggregator(directory, ledger, geo).run().await.unwrap();

        assert_eq!(snapshot.peer_count, 2);
        assert_eq!(snapshot.points.len(), 1);

        let point = snapshot.points.values().next().unwrap();
        assert_eq!(point.count, 2);
        assert_eq!(point.cpu_count, 2);
        assert_eq!(point.gpu_count, 0);
        assert_eq!(point.income, 0.0);
        assert!((point.lat - 55.7512).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ledger_failure_skips_only_that_peer() {
        let directory = StaticDirectory(Ok(vec![
            entry("p1", "203.0.113.1"),
            entry("p2", "203.0.113.2"),
        ]));
        let ledger = StaticLedger(HashMap::from([
            ("p1".to_string(), Ok(vec![agreement(2, 0, 0)])),
            (
                "p2".to_string(),
                Err(ClientError::Timeout(Duration::from_secs(60))),
            ),
        ]));
        let geo = StaticGeo(HashMap::from([
            ("203.0.113.1".parse().unwrap(), moscow()),
            ("203.0.113.2".parse().unwrap(), moscow()),
        ]));

        let snapshot = aggregator(directory, ledger, geo).run().await.unwrap();

        // P2's timeout neither aborts the cycle nor leaks a partial record.
        assert_eq!(snapshot.peer_count, 1);
        let point = snapshot.points.values().next().unwrap();
        assert_eq!(point.count, 1);
        assert_eq!(point.cpu_count, 2);
    }

    #[tokio::test]
    async fn test_unresolvable_location_skips_peer() {
        let directory = StaticDirectory(Ok(vec![
            entry("p1", "203.0.113.1"),
            entry("p2", "203.0.113.99"),
        ]));
        let ledger = StaticLedger(HashMap::from([
            ("p1".to_string(), Ok(vec![agreement(1, 0, 0)])),
            ("p2".to_string(), Ok(vec![agreement(8, 4, 0)])),
        ]));
        // p2's address is not in the geo database
        let geo = StaticGeo(HashMap::from([(
            "203.0.113.1".parse().unwrap(),
            moscow(),
        )]));

        let snapshot = aggregator(directory, ledger, geo).run().await.unwrap();

        assert_eq!(snapshot.peer_count, 1);
        let point = snapshot.points.values().next().unwrap();
        assert_eq!(point.cpu_count, 1);
    }

    #[tokio::test]
    async fn test_directory_failure_aborts_cycle() {
        let directory =
            StaticDirectory(Err(ClientError::Unreachable("connection refused".into())));
        let ledger = StaticLedger(HashMap::new());
        let geo = StaticGeo(HashMap::new());

        let result = aggregator(directory, ledger, geo).run().await;
        assert!(matches!(result, Err(RefreshError::Directory(_))));
    }

    #[tokio::test]
    async fn test_no_survivors_is_an_error() {
        let directory = StaticDirectory(Ok(vec![entry("p1", "203.0.113.1")]));
        let ledger = StaticLedger(HashMap::from([(
            "p1".to_string(),
            Err(ClientError::Unreachable("down".into())),
        )]));
        let geo = StaticGeo(HashMap::new());

        let result = aggregator(directory, ledger, geo).run().await;
        assert!(matches!(result, Err(RefreshError::NoPeers { listed: 1 })));
    }

    #[tokio::test]
    async fn test_merge_is_order_independent() {
        let p1 = entry("p1", "203.0.113.1");
        let p2 = entry("p2", "203.0.113.2");
        let ledger_map = HashMap::from([
            ("p1".to_string(), Ok(vec![agreement(2, 1, 100)])),
            ("p2".to_string(), Ok(vec![agreement(4, 0, 300)])),
        ]);
        let geo_map: HashMap<IpAddr, Location> = HashMap::from([
            ("203.0.113.1".parse().unwrap(), moscow()),
            ("203.0.113.2".parse().unwrap(), moscow()),
        ]);

        let forward = aggregator(
            StaticDirectory(Ok(vec![p1.clone(), p2.clone()])),
            StaticLedger(ledger_map.clone()),
            StaticGeo(geo_map.clone()),
        )
        .run()
        .await
        .unwrap();

        let reverse = aggregator(
            StaticDirectory(Ok(vec![p2, p1])),
            StaticLedger(ledger_map),
            StaticGeo(geo_map),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(forward.points, reverse.points);
    }

    #[tokio::test]
    async fn test_income_sums_in_base_units() {
        use crate::types::BASE_UNITS_PER_TOKEN;

        // Two peers in one bucket, each earning half a token per hour.
        let half_per_hour = BASE_UNITS_PER_TOKEN / 3600 / 2;
        let directory = StaticDirectory(Ok(vec![
            entry("p1", "203.0.113.1"),
            entry("p2", "203.0.113.2"),
        ]));
        let ledger = StaticLedger(HashMap::from([
            ("p1".to_string(), Ok(vec![agreement(0, 0, half_per_hour)])),
            ("p2".to_string(), Ok(vec![agreement(0, 0, half_per_hour)])),
        ]));
        let geo = StaticGeo(HashMap::from([
            ("203.0.113.1".parse().unwrap(), moscow()),
            ("203.0.113.2".parse().unwrap(), moscow()),
        ]));

        let snapshot = aggregator(directory, ledger, geo).run().await.unwrap();
        let point = snapshot.points.values().next().unwrap();

        assert!((point.income - 1.0).abs() < 1e-6);
    }
}
