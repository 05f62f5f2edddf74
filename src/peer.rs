//! Peer manager (section 4.3): tracks known peers, emits lifecycle events,
//! and enforces the staleness timeout. Grounded on the `DtnPeer` /
//! `process_peers` shape used by dtn7-family core orchestrators: `lastContact`
//! refreshed on every successful contact, `failCount` incremented on send
//! failure and reset on success, dynamic peers past the fail threshold are
//! pruning candidates.

use crate::bpv7::EndpointId;
use crate::consts::PEER_FAIL_COUNT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub eid: EndpointId,
    pub address: String,
    pub kind: PeerKind,
    pub announce_period_secs: Option<u64>,
    /// `(cla name, optional port)` pairs this peer is reachable through.
    pub cla_list: Vec<(String, Option<u16>)>,
    pub services: HashMap<u8, String>,
    pub last_contact_secs: u64,
    pub fail_count: u32,
}

impl Peer {
    pub fn new(eid: EndpointId, address: impl Into<String>, kind: PeerKind) -> Self {
        Peer {
            eid,
            address: address.into(),
            kind,
            announce_period_secs: None,
            cla_list: Vec::new(),
            services: HashMap::new(),
            last_contact_secs: now_secs(),
            fail_count: 0,
        }
    }

    pub fn has_cla(&self) -> bool {
        !self.cla_list.is_empty()
    }

    fn touch(&mut self) {
        self.last_contact_secs = now_secs();
        self.fail_count = 0;
    }

    pub fn is_stale(&self, peer_timeout_secs: u64) -> bool {
        now_secs().saturating_sub(self.last_contact_secs) > peer_timeout_secs
    }

    pub fn is_prunable_dynamic(&self) -> bool {
        matches!(self.kind, PeerKind::Dynamic) && self.fail_count > PEER_FAIL_COUNT_THRESHOLD
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered(Peer),
    Updated(Peer),
    Lost(EndpointId),
    ConnectionEstablished(EndpointId),
    ConnectionLost(EndpointId),
}

/// Tracks the node's known-peer table and publishes lifecycle events on an
/// unbounded channel (section 5: peer events are never dropped between
/// producer and consumer).
pub struct PeerManager {
    peers: RwLock<HashMap<EndpointId, Peer>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl PeerManager {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        PeerManager {
            peers: RwLock::new(HashMap::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Takes ownership of the event stream. Callable once; subsequent calls
    /// return `None`.
    pub async fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().await.take()
    }

    pub fn add_or_update(&self, mut peer: Peer) {
        let mut peers = self.peers.write().unwrap();
        match peers.get_mut(&peer.eid) {
            Some(existing) => {
                existing.address = peer.address.clone();
                existing.cla_list = peer.cla_list.clone();
                existing.services = peer.services.clone();
                existing.touch();
                let _ = self.events_tx.send(PeerEvent::Updated(existing.clone()));
            }
            None => {
                peer.touch();
                peers.insert(peer.eid.clone(), peer.clone());
                let _ = self.events_tx.send(PeerEvent::Discovered(peer));
            }
        }
    }

    pub fn remove(&self, eid: &EndpointId) {
        let removed = self.peers.write().unwrap().remove(eid);
        if removed.is_some() {
            let _ = self.events_tx.send(PeerEvent::Lost(eid.clone()));
        }
    }

    pub fn record_success(&self, eid: &EndpointId) {
        if let Some(peer) = self.peers.write().unwrap().get_mut(eid) {
            peer.touch();
        }
    }

    pub fn record_failure(&self, eid: &EndpointId) {
        if let Some(peer) = self.peers.write().unwrap().get_mut(eid) {
            peer.fail_count += 1;
        }
    }

    pub fn get_all(&self) -> Vec<Peer> {
        self.peers.read().unwrap().values().cloned().collect()
    }

    pub fn get_peer(&self, eid: &EndpointId) -> Option<Peer> {
        self.peers.read().unwrap().get(eid).cloned()
    }

    /// Janitor-driven pruning sweep (section 4.3/4.9): removes dynamic peers
    /// past the fail-count threshold and any peer that has gone stale.
    pub fn prune(&self, peer_timeout_secs: u64) -> Vec<EndpointId> {
        let doomed: Vec<EndpointId> = {
            let peers = self.peers.read().unwrap();
            peers
                .values()
                .filter(|p| p.is_prunable_dynamic() || p.is_stale(peer_timeout_secs))
                .map(|p| p.eid.clone())
                .collect()
        };
        for eid in &doomed {
            self.remove(eid);
        }
        doomed
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}
