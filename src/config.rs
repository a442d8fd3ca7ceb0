//! Service configuration
//!
//! Loaded from a TOML file with CLI overrides applied on top. All values are
//! read once at startup; the running tasks only ever see an `Arc` of the
//! final, validated configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the peer map service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    // === Collaborators ===

    /// Base URL of the peer directory service
    pub directory_url: String,

    /// Base URL of the economic ledger service
    pub ledger_url: String,

    /// Path to the GeoIP2/GeoLite2 city database
    pub geoip_db: PathBuf,

    // === Timing ===

    /// Interval between refresh cycles (seconds)
    pub refresh_interval_secs: u64,

    /// Deadline for one directory listing call (seconds)
    pub directory_timeout_secs: u64,

    /// Deadline for one per-peer ledger call (seconds)
    pub ledger_timeout_secs: u64,

    // === Aggregation ===

    /// Maximum in-flight per-peer enrichments within one cycle
    pub max_concurrent_lookups: usize,

    /// Geohash length used to bucket nearby peers (1-12 characters)
    pub geohash_precision: usize,

    // === Network ===

    /// Port for the HTTP publish/metrics API
    pub api_port: u16,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            directory_url: "http://127.0.0.1:14099".to_string(),
            ledger_url: "http://127.0.0.1:15021".to_string(),
            geoip_db: PathBuf::from("geo.mmdb"),

            // Timing: the upstream calls get a generous deadline; a cycle
            // that overruns the interval simply delays the next tick.
            refresh_interval_secs: 30,
            directory_timeout_secs: 60,
            ledger_timeout_secs: 60,

            max_concurrent_lookups: 16,
            geohash_precision: 6,

            api_port: 8090,
        }
    }
}

impl MapConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn with_geoip_db(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.geoip_db = path;
        }
        self
    }

    pub fn with_directory_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.directory_url = url;
        }
        self
    }

    pub fn with_ledger_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.ledger_url = url;
        }
        self
    }

    pub fn with_refresh_interval(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.refresh_interval_secs = secs;
        }
        self
    }

    // Duration views for the call sites

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be non-zero");
        }

        if self.directory_timeout_secs == 0 || self.ledger_timeout_secs == 0 {
            anyhow::bail!("collaborator timeouts must be non-zero");
        }

        if self.max_concurrent_lookups == 0 {
            anyhow::bail!("max_concurrent_lookups must be non-zero");
        }

        if self.geohash_precision == 0 || self.geohash_precision > 12 {
            anyhow::bail!(
                "geohash_precision ({}) must be between 1 and 12",
                self.geohash_precision
            );
        }

        Ok(())
    }
}
