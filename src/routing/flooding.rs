//! Flooding routing (section 4.7.2): every peer with a CLA, every call, no
//! history, no suppression — a noise/robustness baseline.

use crate::bpv7::Bundle;
use crate::peer::PeerManager;
use crate::routing::{eligible_peers, Decision, LocalEndpointChecker, RoutingAgent, RoutingNotification};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct FloodingRouter {
    peer_manager: RwLock<Option<Arc<PeerManager>>>,
    local_check: RwLock<Option<Arc<dyn LocalEndpointChecker>>>,
}

impl FloodingRouter {
    pub fn new() -> Self {
        FloodingRouter {
            peer_manager: RwLock::new(None),
            local_check: RwLock::new(None),
        }
    }
}

impl Default for FloodingRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingAgent for FloodingRouter {
    async fn configure(
        &self,
        peer_manager: Arc<PeerManager>,
        local_check: Arc<dyn LocalEndpointChecker>,
    ) {
        *self.peer_manager.write().unwrap() = Some(peer_manager);
        *self.local_check.write().unwrap() = Some(local_check);
    }

    async fn start(&self) {}
    async fn stop(&self) {}

    async fn get_next_hops(&self, bundle: &Bundle) -> Decision {
        let bundle_id = bundle.id();
        if let Some(local_check) = self.local_check.read().unwrap().clone() {
            if local_check.is_local_endpoint(&bundle.primary.destination) {
                return Decision::local(bundle_id);
            }
        }
        let Some(peer_manager) = self.peer_manager.read().unwrap().clone() else {
            return Decision::none(bundle_id);
        };
        let all_peers = peer_manager.get_all();
        let next_hops: Vec<_> = eligible_peers(&all_peers).cloned().collect();
        if next_hops.is_empty() {
            Decision::none(bundle_id)
        } else {
            Decision::forward(bundle_id, next_hops)
        }
    }

    async fn handle_notification(&self, _notification: RoutingNotification) {}

    fn get_state(&self) -> HashMap<String, String> {
        HashMap::from([("algorithm".to_string(), "flooding".to_string())])
    }
}
