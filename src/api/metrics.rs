//! Metrics Collection
//!
//! Counters and gauges for monitoring the refresh pipeline and the publish
//! endpoint. Exported in Prometheus text and JSON forms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the peer map service
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Refresh cycles started
    pub refresh_attempts: AtomicU64,

    /// Refresh cycles that produced a snapshot
    pub refresh_completed: AtomicU64,

    /// Refresh cycles that aborted
    pub refresh_failures: AtomicU64,

    /// Peers in the most recent directory listing
    pub peers_discovered: AtomicU64,

    /// Peers skipped because their ledger query failed
    pub peers_skipped_ledger: AtomicU64,

    /// Peers skipped because their address had no geolocation
    pub peers_skipped_geo: AtomicU64,

    /// Map requests served
    pub map_requests: AtomicU64,

    /// Buckets in the currently published snapshot
    pub map_points: AtomicU64,

    /// When the published snapshot was generated (Unix seconds)
    pub last_refresh_unix: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_refresh_attempts(&self) {
        self.refresh_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refresh_completed(&self) {
        self.refresh_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refresh_failures(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_peers_skipped_ledger(&self) {
        self.peers_skipped_ledger.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_peers_skipped_geo(&self) {
        self.peers_skipped_geo.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_map_requests(&self) {
        self.map_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_peers_discovered(&self, count: u64) {
        self.peers_discovered.store(count, Ordering::Relaxed);
    }

    pub fn set_map_points(&self, count: u64) {
        self.map_points.store(count, Ordering::Relaxed);
    }

    pub fn set_last_refresh(&self, unix: u64) {
        self.last_refresh_unix.store(unix, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP peermap_uptime_seconds Service uptime in seconds\n\
             # TYPE peermap_uptime_seconds gauge\n\
             peermap_uptime_seconds {}\n\n",
            self.uptime_secs()
        ));

        output.push_str(&format!(
            "# HELP peermap_refresh_attempts_total Refresh cycles started\n\
             # TYPE peermap_refresh_attempts_total counter\n\
             peermap_refresh_attempts_total {}\n\n",
            self.refresh_attempts.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_refresh_completed_total Refresh cycles that published a snapshot\n\
             # TYPE peermap_refresh_completed_total counter\n\
             peermap_refresh_completed_total {}\n\n",
            self.refresh_completed.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_refresh_failures_total Refresh cycles that aborted\n\
             # TYPE peermap_refresh_failures_total counter\n\
             peermap_refresh_failures_total {}\n\n",
            self.refresh_failures.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_peers_discovered Peers in the latest directory listing\n\
             # TYPE peermap_peers_discovered gauge\n\
             peermap_peers_discovered {}\n\n",
            self.peers_discovered.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_peers_skipped_ledger_total Peers skipped on ledger failure\n\
             # TYPE peermap_peers_skipped_ledger_total counter\n\
             peermap_peers_skipped_ledger_total {}\n\n",
            self.peers_skipped_ledger.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_peers_skipped_geo_total Peers skipped with no geolocation\n\
             # TYPE peermap_peers_skipped_geo_total counter\n\
             peermap_peers_skipped_geo_total {}\n\n",
            self.peers_skipped_geo.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_map_requests_total Map requests served\n\
             # TYPE peermap_map_requests_total counter\n\
             peermap_map_requests_total {}\n\n",
            self.map_requests.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_map_points Buckets in the published snapshot\n\
             # TYPE peermap_map_points gauge\n\
             peermap_map_points {}\n\n",
            self.map_points.load(Ordering::Relaxed)
        ));

        output.push_str(&format!(
            "# HELP peermap_last_refresh_unix When the published snapshot was generated\n\
             # TYPE peermap_last_refresh_unix gauge\n\
             peermap_last_refresh_unix {}\n\n",
            self.last_refresh_unix.load(Ordering::Relaxed)
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "refresh": {
                "attempts": self.refresh_attempts.load(Ordering::Relaxed),
                "completed": self.refresh_completed.load(Ordering::Relaxed),
                "failures": self.refresh_failures.load(Ordering::Relaxed),
            },
            "peers": {
                "discovered": self.peers_discovered.load(Ordering::Relaxed),
                "skipped_ledger": self.peers_skipped_ledger.load(Ordering::Relaxed),
                "skipped_geo": self.peers_skipped_geo.load(Ordering::Relaxed),
            },
            "map_requests": self.map_requests.load(Ordering::Relaxed),
            "map_points": self.map_points.load(Ordering::Relaxed),
            "last_refresh_unix": self.last_refresh_unix.load(Ordering::Relaxed),
        })
    }
}
