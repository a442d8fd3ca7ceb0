//! Core types for the peer map aggregation pipeline
//!
//! These types flow from the external collaborators (directory, ledger, geo
//! database) through the aggregator into the published snapshot. Monetary
//! amounts stay in integer base units until the final normalization step so
//! that summing across many agreements never accumulates float drift.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Helper module for serializing u128 base-unit amounts as decimal strings
///
/// Prices exceed 2^53 routinely (10^18 base units per token), so they travel
/// as strings on the wire rather than JSON numbers.
mod amount_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        amount.to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// Stable peer identity issued by the directory service
pub type PeerId = String;

/// Base currency units per whole token (10^18)
pub const BASE_UNITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

/// Seconds per hour, for income-rate normalization
pub const SECONDS_PER_HOUR: u128 = 3600;

/// Get current Unix timestamp
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// COLLABORATOR RECORDS
// =============================================================================

/// One peer as advertised by the directory service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Stable peer identity (unique within one listing)
    pub peer_id: PeerId,

    /// Advertised public network address
    pub addr: IpAddr,
}

/// One active economic agreement reported by the ledger for a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    /// CPU cores committed under this agreement
    pub cpu_cores: u64,

    /// GPU units committed under this agreement
    pub gpu_units: u64,

    /// Memory committed under this agreement, bytes
    pub ram_bytes: u64,

    /// Price in base units per second
    #[serde(with = "amount_serde")]
    pub price_total: u128,
}

/// Resolved geolocation for a network address
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,

    /// Display name (city, falling back to country)
    pub name: String,
}

// =============================================================================
// AGGREGATION
// =============================================================================

/// Integer accumulation of one peer's agreements within one refresh cycle
///
/// All fields sum monotonically; the price stays in base units here and is
/// only converted to a float rate when the snapshot is finalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealTotals {
    /// Number of active agreements
    pub deals: u64,

    /// Summed CPU cores across agreements
    pub cpu_cores: u64,

    /// Summed GPU units across agreements
    pub gpu_units: u64,

    /// Summed memory across agreements, bytes
    pub ram_bytes: u64,

    /// Summed price across agreements, base units per second
    pub price_total: u128,
}

impl DealTotals {
    /// Fold one agreement into the running totals
    pub fn add_agreement(&mut self, agreement: &Agreement) {
        self.deals += 1;
        self.cpu_cores = self.cpu_cores.saturating_add(agreement.cpu_cores);
        self.gpu_units = self.gpu_units.saturating_add(agreement.gpu_units);
        self.ram_bytes = self.ram_bytes.saturating_add(agreement.ram_bytes);
        self.price_total = self.price_total.saturating_add(agreement.price_total);
    }

    /// Fold another peer's totals into this one (bucket merge)
    pub fn merge(&mut self, other: &DealTotals) {
        self.deals = self.deals.saturating_add(other.deals);
        self.cpu_cores = self.cpu_cores.saturating_add(other.cpu_cores);
        self.gpu_units = self.gpu_units.saturating_add(other.gpu_units);
        self.ram_bytes = self.ram_bytes.saturating_add(other.ram_bytes);
        self.price_total = self.price_total.saturating_add(other.price_total);
    }
}

/// Convert a summed per-second base-unit price into tokens per hour
///
/// The only place integer money becomes a float.
pub fn income_per_hour(price_total: u128) -> f64 {
    let per_hour = price_total.saturating_mul(SECONDS_PER_HOUR);
    per_hour as f64 / BASE_UNITS_PER_TOKEN as f64
}

// =============================================================================
// PUBLISHED RECORDS
// =============================================================================

/// One published map point: the aggregate of all peers in one geo bucket
///
/// Field names are the wire format consumed by the map frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPoint {
    pub lat: f64,
    pub lon: f64,

    /// Number of peers aggregated into this point
    pub count: u64,

    /// Combined income rate, tokens per hour
    pub income: f64,

    /// Combined CPU cores under active agreements
    pub cpu_count: u64,

    /// Combined GPU units under active agreements
    pub gpu_count: u64,

    /// Combined memory under active agreements, bytes
    pub ram_size: u64,
}

/// One complete, immutable aggregation of the network as of one refresh cycle
///
/// Built in full by the aggregator, then handed to the cache; never mutated
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Map points keyed by geohash bucket
    pub points: HashMap<String, PeerPoint>,

    /// When this snapshot was finished (Unix seconds)
    pub generated_at: u64,

    /// Peers that contributed to this snapshot
    pub peer_count: u64,
}

impl Snapshot {
    pub fn new(points: HashMap<String, PeerPoint>, peer_count: u64) -> Self {
        Self {
            points,
            generated_at: unix_now(),
            peer_count,
        }
    }

    /// Age of this snapshot in seconds
    pub fn age_secs(&self) -> u64 {
        unix_now().saturating_sub(self.generated_at)
    }
}
