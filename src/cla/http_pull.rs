//! HTTP pull convergence layer (section 4.6.4): periodically polls each
//! known peer's `/status/bundles`, diffs against an in-agent known-set, and
//! downloads new bundles via `/download?bundle=<id>`. Send is unsupported.

use crate::bpv7::{self, Bundle, EndpointId};
use crate::cla::{ClaError, Connection, ConvergenceLayerAgent};
use crate::consts::http::DEFAULT_PULL_INTERVAL_SECS;
use crate::peer::{Peer, PeerManager};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

#[derive(Debug, Deserialize)]
struct BundleListResponse {
    bundles: Vec<String>,
}

pub struct HttpPullCla {
    id: String,
    client: Client,
    peer_manager: Arc<PeerManager>,
    interval_secs: u64,
    known: RwLock<HashMap<EndpointId, HashSet<String>>>,
    incoming_tx: mpsc::UnboundedSender<(Bundle, Connection)>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<(Bundle, Connection)>>>,
    stop_signal: Arc<Notify>,
}

impl HttpPullCla {
    pub fn new(peer_manager: Arc<PeerManager>) -> Self {
        Self::with_interval(peer_manager, DEFAULT_PULL_INTERVAL_SECS)
    }

    pub fn with_interval(peer_manager: Arc<PeerManager>, interval_secs: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        HttpPullCla {
            id: "httppull".to_string(),
            client: Client::new(),
            peer_manager,
            interval_secs,
            known: RwLock::new(HashMap::new()),
            incoming_tx: tx,
            incoming_rx: Mutex::new(Some(rx)),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    async fn poll_peer(client: &Client, tx: &mpsc::UnboundedSender<(Bundle, Connection)>, peer: &Peer, seen: &mut HashSet<String>) {
        let list_url = format!("http://{}/status/bundles", peer.address);
        let Ok(resp) = client.get(&list_url).send().await else {
            return;
        };
        let Ok(listed) = resp.json::<BundleListResponse>().await else {
            return;
        };
        for id in listed.bundles {
            if seen.contains(&id) {
                continue;
            }
            let download_url = format!("http://{}/download?bundle={}", peer.address, id);
            let Ok(resp) = client.get(&download_url).send().await else {
                continue;
            };
            let Ok(bytes) = resp.bytes().await else {
                continue;
            };
            if let Ok(bundle) = bpv7::bundle::decode(&bytes) {
                let connection = Connection::new(format!("httppull-{id}"), peer.address.clone(), "httppull");
                let _ = tx.send((bundle, connection));
            }
            seen.insert(id);
        }
    }
}

#[async_trait]
impl ConvergenceLayerAgent for HttpPullCla {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "httppull"
    }

    async fn start(&self) -> Result<(), ClaError> {
        let client = self.client.clone();
        let tx = self.incoming_tx.clone();
        let peer_manager = self.peer_manager.clone();
        let interval_secs = self.interval_secs;
        let stop_signal = self.stop_signal.clone();
        tokio::spawn(async move {
            let mut known: HashMap<EndpointId, HashSet<String>> = HashMap::new();
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_signal.notified() => break,
                }
                for peer in peer_manager.get_all() {
                    let seen = known.entry(peer.eid.clone()).or_default();
                    Self::poll_peer(&client, &tx, &peer, seen).await;
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stop_signal.notify_waiters();
    }

    async fn send_bundle(&self, _bundle: &Bundle, _peer: &Peer) -> Result<(), ClaError> {
        Err(ClaError::OperationNotSupported("httppull cannot send".to_string()))
    }

    async fn can_reach(&self, peer: &Peer) -> bool {
        let url = format!("http://{}/status/bundles", peer.address);
        self.client.get(&url).send().await.is_ok()
    }

    async fn get_connections(&self) -> Vec<Connection> {
        Vec::new()
    }

    async fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<(Bundle, Connection)>> {
        self.incoming_rx.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_is_unsupported() {
        let pm = Arc::new(PeerManager::new());
        let cla = HttpPullCla::new(pm.clone());
        let bundle = Bundle::new(EndpointId::from("dtn://src"), EndpointId::from("dtn://dst"), vec![1]);
        let peer = Peer::new(EndpointId::from("dtn://dst"), "127.0.0.1:1", crate::peer::PeerKind::Static);
        let result = cla.send_bundle(&bundle, &peer).await;
        assert!(matches!(result, Err(ClaError::OperationNotSupported(_))));
    }

    #[tokio::test]
    async fn test_take_incoming_returns_once() {
        let pm = Arc::new(PeerManager::new());
        let cla = HttpPullCla::new(pm);
        assert!(cla.take_incoming().await.is_some());
        assert!(cla.take_incoming().await.is_none());
    }
}
