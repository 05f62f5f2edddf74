//! HTTP push convergence layer (section 4.6.3): `POST /push` with the
//! encoded bundle as the body, exponential backoff on failure. Receive-only
//! traffic arrives through the management HTTP API's ingress route instead,
//! so this agent never produces incoming bundles.

use crate::bpv7::{self, Bundle};
use crate::cla::{ClaError, Connection, ConvergenceLayerAgent};
use crate::consts::http::{DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::peer::Peer;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct HttpPushCla {
    id: String,
    client: Client,
    max_retries: u32,
}

impl HttpPushCla {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        HttpPushCla {
            id: "http".to_string(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for HttpPushCla {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConvergenceLayerAgent for HttpPushCla {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self) -> Result<(), ClaError> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<(), ClaError> {
        let encoded = bpv7::bundle::encode(bundle).map_err(|e| ClaError::InvalidMessage(e.to_string()))?;
        let url = format!("http://{}/push", peer.address);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(&url)
                .header("Content-Type", "application/octet-stream")
                .body(encoded.clone())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    if attempt > self.max_retries {
                        return Err(ClaError::HttpError(resp.status().as_u16()));
                    }
                }
                Err(_) => {
                    if attempt > self.max_retries {
                        return Err(ClaError::ConnectionClosed);
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
        }
    }

    async fn can_reach(&self, peer: &Peer) -> bool {
        let url = format!("http://{}/test", peer.address);
        self.client.get(&url).send().await.is_ok()
    }

    async fn get_connections(&self) -> Vec<Connection> {
        Vec::new()
    }

    async fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<(Bundle, Connection)>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_id() {
        let cla = HttpPushCla::new();
        assert_eq!(cla.name(), "http");
        assert_eq!(cla.id(), "http");
    }

    #[tokio::test]
    async fn test_take_incoming_always_none() {
        let cla = HttpPushCla::new();
        assert!(cla.take_incoming().await.is_none());
    }
}
