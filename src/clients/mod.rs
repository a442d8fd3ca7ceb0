//! External collaborator clients
//!
//! The aggregator only sees these traits; production wiring injects the HTTP
//! and MaxMind implementations, tests inject in-memory doubles. All outbound
//! calls take an explicit deadline so a hung remote dependency costs one call,
//! never a stuck refresh loop.

mod directory;
mod geoip;
mod ledger;

pub use directory::HttpPeerDirectory;
pub use geoip::MaxMindResolver;
pub use ledger::HttpLedgerClient;

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

use crate::types::{Agreement, Location, PeerEntry, PeerId};

/// Failure taxonomy shared by all collaborator clients
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The remote service could not be reached
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within its deadline
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote answered with something we could not decode
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Directory service: the authoritative list of known peers
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// List all currently known peers and their advertised addresses
    async fn list_peers(&self, deadline: Duration) -> Result<Vec<PeerEntry>, ClientError>;
}

/// Ledger service: per-peer economic activity
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch the active agreements for one peer
    async fn agreements(
        &self,
        peer_id: &PeerId,
        deadline: Duration,
    ) -> Result<Vec<Agreement>, ClientError>;
}

/// Geolocation lookup: network address to coordinates and display name
///
/// Synchronous: the production implementation reads a memory-mapped local
/// database, there is no network call to suspend on.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, addr: IpAddr) -> Result<Location, ClientError>;
}
