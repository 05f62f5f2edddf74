//! Routing-agent abstraction (section 4.7): pluggable next-hop selection.
//! Routing agents never own the core orchestrator — per the cyclic-reference
//! design note (section 9), they receive a `LocalEndpointChecker` handle at
//! `configure()` rather than a back-pointer to the core itself.

pub mod epidemic;
pub mod flooding;
pub mod sink;
pub mod spray_and_wait;
pub mod static_routing;

use crate::bpv7::{Bundle, EndpointId};
use crate::peer::{Peer, PeerManager};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Lets a routing agent ask "is this endpoint mine?" without holding a
/// reference to the core orchestrator.
pub trait LocalEndpointChecker: Send + Sync {
    fn is_local_endpoint(&self, eid: &EndpointId) -> bool;
}

#[derive(Debug, Clone)]
pub enum RoutingNotification {
    PeerEncountered(Peer),
    PeerLost(EndpointId),
    UpdateConfig {
        command: String,
        params: HashMap<String, String>,
    },
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub bundle_id: String,
    pub next_hops: Vec<Peer>,
    pub is_local_delivery: bool,
}

impl Decision {
    pub fn local(bundle_id: String) -> Self {
        Decision {
            bundle_id,
            next_hops: Vec::new(),
            is_local_delivery: true,
        }
    }

    pub fn forward(bundle_id: String, next_hops: Vec<Peer>) -> Self {
        Decision {
            bundle_id,
            next_hops,
            is_local_delivery: false,
        }
    }

    pub fn none(bundle_id: String) -> Self {
        Decision {
            bundle_id,
            next_hops: Vec::new(),
            is_local_delivery: false,
        }
    }
}

#[async_trait]
pub trait RoutingAgent: Send + Sync {
    async fn configure(
        &self,
        peer_manager: Arc<PeerManager>,
        local_check: Arc<dyn LocalEndpointChecker>,
    );
    async fn start(&self);
    async fn stop(&self);
    async fn get_next_hops(&self, bundle: &Bundle) -> Decision;
    async fn handle_notification(&self, notification: RoutingNotification);
    fn get_state(&self) -> HashMap<String, String>;
}

/// Peers eligible to carry bundles for any of the flooding-family routers:
/// must have at least one CLA registered.
pub(crate) fn eligible_peers(peers: &[Peer]) -> impl Iterator<Item = &Peer> {
    peers.iter().filter(|p| p.has_cla())
}
