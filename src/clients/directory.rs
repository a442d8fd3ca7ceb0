//! HTTP peer-directory client
//!
//! Fetches the full peer listing from the directory service as JSON:
//! `GET {base_url}/peers` -> `[{"peer_id": "...", "addr": "1.2.3.4"}, ...]`

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{ClientError, PeerDirectory};
use crate::types::PeerEntry;

pub struct HttpPeerDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPeerDirectory {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PeerDirectory for HttpPeerDirectory {
    async fn list_peers(&self, deadline: Duration) -> Result<Vec<PeerEntry>, ClientError> {
        let url = format!("{}/peers", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout(deadline)
                } else {
                    ClientError::Unreachable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ClientError::Unreachable(format!(
                "directory answered {}",
                response.status()
            )));
        }

        let peers: Vec<PeerEntry> = response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        debug!("directory listed {} peers", peers.len());
        Ok(peers)
    }
}
