//! Sending half of the HTTP transport

use crate::WireEnvelope;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use tss_core::{Envelope, Error, PartyDirectory, PartyIdentity, Result, TransportSender};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts envelopes to peers at their directory addresses
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Base URL per party id
    peers: HashMap<String, String>,
    /// Request timeout
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for every party with a configured address
    ///
    /// Addresses without a scheme are taken as `http://host:port`.
    pub fn new(directory: &PartyDirectory) -> Self {
        let peers = directory
            .parties()
            .iter()
            .filter_map(|party| {
                directory
                    .address(&party.id)
                    .map(|address| (party.id.clone(), base_url(address)))
            })
            .collect();

        Self {
            client: Client::new(),
            peers,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll `/health` on every peer except `local_id` until all answer
    ///
    /// Logs each round that still finds peers down, then retries after
    /// `retry`.
    pub async fn wait_for_peers(&self, local_id: &str, retry: Duration) {
        let mut pending: Vec<(&String, &String)> = self
            .peers
            .iter()
            .filter(|(id, _)| id.as_str() != local_id)
            .collect();
        let mut rounds: u64 = 0;

        loop {
            let mut down = Vec::new();
            for (id, url) in pending {
                let healthy = self
                    .client
                    .get(format!("{url}/health"))
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map(|response| response.status().is_success())
                    .unwrap_or(false);
                if !healthy {
                    down.push((id, url));
                }
            }

            if down.is_empty() {
                info!(rounds, "All peers reachable");
                return;
            }

            rounds += 1;
            let ids: Vec<&str> = down.iter().map(|(id, _)| id.as_str()).collect();
            warn!(rounds, waiting_for = ?ids, "Peers not reachable yet");
            pending = down;
            tokio::time::sleep(retry).await;
        }
    }
}

#[async_trait]
impl TransportSender for HttpTransport {
    #[instrument(skip_all, fields(to = %to.id, phase = %envelope.phase))]
    async fn send(&self, to: &PartyIdentity, envelope: Envelope) -> Result<()> {
        let url = self.peers.get(&to.id).ok_or_else(|| Error::Transport {
            to: to.id.clone(),
            reason: "no address configured".into(),
        })?;

        let response = self
            .client
            .post(format!("{url}/v1/msg"))
            .json(&WireEnvelope::from(&envelope))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Transport {
                to: to.id.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport {
                to: to.id.clone(),
                reason: format!("POST failed with status {status}: {body}"),
            });
        }

        debug!(bytes = envelope.payload.len(), "Message delivered");
        Ok(())
    }
}

fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}
