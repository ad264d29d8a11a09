use anyhow::Result;
use axum::http::StatusCode;
use std::time::Duration;

use super::protocol::FORWARDED_HEADER;
use crate::config::ForwardingConfig;
use crate::directory::assignment::NodeInfo;
use crate::error::StateError;

/// Relays redirected reads to the owning node over HTTP.
pub struct Forwarder {
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl Forwarder {
    pub fn new(config: &ForwardingConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout: Duration::from_millis(config.timeout_ms),
            attempts: config.attempts.max(1),
        }
    }

    async fn get_with_retry(&self, url: String) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .get(url.clone())
                .header(FORWARDED_HEADER, "1")
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    tracing::debug!("Attempt {} for {} failed: {}", attempt + 1, url, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    /// Sends `path` to `owner` and returns its status and JSON body verbatim.
    ///
    /// A node that cannot be reached, or that answers with something other than
    /// JSON, is reported as `NodeUnreachable`.
    pub async fn forward(
        &self,
        owner: &NodeInfo,
        path: &str,
    ) -> std::result::Result<(StatusCode, serde_json::Value), StateError> {
        let url = format!("http://{}{}", owner.address(), path);
        let unreachable = |reason: String| StateError::NodeUnreachable {
            node: owner.id.clone(),
            reason,
        };

        let response = self.get_with_retry(url).await.map_err(|e| {
            tracing::warn!("Owner {} at {} unreachable: {}", owner.id, owner.address(), e);
            unreachable(e.to_string())
        })?;
        let status = response.status();
        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| unreachable(format!("invalid response body: {}", e)))?;

        Ok((status, body))
    }
}
