//! HTTP ledger client
//!
//! Fetches one peer's active agreements from the economic-ledger service:
//! `GET {base_url}/deals/{peer_id}` -> `[{"cpu_cores": 2, "gpu_units": 0,
//! "ram_bytes": 0, "price_total": "500"}, ...]`
//!
//! Prices are decimal strings in base units per second; see
//! [`crate::types::Agreement`].

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::{ClientError, LedgerClient};
use crate::types::{Agreement, PeerId};

pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn agreements(
        &self,
        peer_id: &PeerId,
        deadline: Duration,
    ) -> Result<Vec<Agreement>, ClientError> {
        let url = format!("{}/deals/{}", self.base_url.trim_end_matches('/'), peer_id);

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

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(peer_id.clone()));
        }
        if !response.status().is_success() {
            return Err(ClientError::Unreachable(format!(
                "ledger answered {}",
                response.status()
            )));
        }

        let agreements: Vec<Agreement> = response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        debug!("ledger returned {} agreements for {}", agreements.len(), peer_id);
        Ok(agreements)
    }
}
