//! Binary spray-and-wait routing (section 4.7.3): a bundle starts with `L`
//! copies (7 when locally originated, 1 when received from elsewhere). In the
//! spray phase (`remainingCopies > 1`) each contact hands half the copies to
//! one fresh peer; once a node is down to its last copy it only forwards
//! directly to the destination (the wait phase).

use crate::bpv7::Bundle;
use crate::peer::PeerManager;
use crate::routing::{eligible_peers, Decision, LocalEndpointChecker, RoutingAgent, RoutingNotification};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

const DEFAULT_L_ORIGINATED: u32 = 7;
const DEFAULT_L_RECEIVED: u32 = 1;

struct SprayState {
    remaining_copies: u32,
    sprayed_to: HashSet<String>,
}

pub struct SprayAndWaitRouter {
    peer_manager: RwLock<Option<Arc<PeerManager>>>,
    local_check: RwLock<Option<Arc<dyn LocalEndpointChecker>>>,
    state: RwLock<HashMap<String, SprayState>>,
}

impl SprayAndWaitRouter {
    pub fn new() -> Self {
        SprayAndWaitRouter {
            peer_manager: RwLock::new(None),
            local_check: RwLock::new(None),
            state: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for SprayAndWaitRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingAgent for SprayAndWaitRouter {
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
        let destination = &bundle.primary.destination;

        if let Some(local_check) = self.local_check.read().unwrap().clone() {
            if local_check.is_local_endpoint(destination) {
                return Decision::local(bundle_id);
            }
        }

        let Some(peer_manager) = self.peer_manager.read().unwrap().clone() else {
            return Decision::none(bundle_id);
        };
        let all_peers = peer_manager.get_all();

        if let Some(direct) = all_peers.iter().find(|p| &p.eid == destination) {
            return Decision::forward(bundle_id, vec![direct.clone()]);
        }

        let mut state = self.state.write().unwrap();
        let entry = state.entry(bundle_id.clone()).or_insert_with(|| {
            let initial = if bundle.previous_node().is_none() {
                DEFAULT_L_ORIGINATED
            } else {
                DEFAULT_L_RECEIVED
            };
            SprayState {
                remaining_copies: initial,
                sprayed_to: HashSet::new(),
            }
        });

        if entry.remaining_copies <= 1 {
            // Wait phase: hold the last copy until a direct contact occurs.
            return Decision::none(bundle_id);
        }

        let candidate = eligible_peers(&all_peers)
            .find(|p| !entry.sprayed_to.contains(&p.eid.description()))
            .cloned();

        let Some(peer) = candidate else {
            return Decision::none(bundle_id);
        };

        let give_away = entry.remaining_copies / 2;
        entry.remaining_copies -= give_away;
        entry.sprayed_to.insert(peer.eid.description());

        Decision::forward(bundle_id, vec![peer])
    }

    async fn handle_notification(&self, notification: RoutingNotification) {
        if let RoutingNotification::PeerLost(eid) = notification {
            let mut state = self.state.write().unwrap();
            for entry in state.values_mut() {
                entry.sprayed_to.remove(&eid.description());
            }
        }
    }

    fn get_state(&self) -> HashMap<String, String> {
        let state = self.state.read().unwrap();
        HashMap::from([
            ("algorithm".to_string(), "spray_and_wait".to_string()),
            ("tracked_bundles".to_string(), state.len().to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpv7::EndpointId;
    use crate::peer::{Peer, PeerKind};

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    struct NoneLocal;
    impl LocalEndpointChecker for NoneLocal {
        fn is_local_endpoint(&self, _eid: &EndpointId) -> bool {
            false
        }
    }

    async fn setup_with_peers(n: usize) -> (SprayAndWaitRouter, Arc<PeerManager>) {
        let router = SprayAndWaitRouter::new();
        let pm = Arc::new(PeerManager::new());
        for i in 0..n {
            let mut peer = Peer::new(eid(&format!("dtn://peer{i}")), "addr", PeerKind::Dynamic);
            peer.cla_list.push(("tcp".to_string(), None));
            pm.add_or_update(peer);
        }
        router.configure(pm.clone(), Arc::new(NoneLocal)).await;
        (router, pm)
    }

    #[tokio::test]
    async fn test_originated_bundle_sprays_half_copies_to_first_contact() {
        let (router, _pm) = setup_with_peers(3).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops.len(), 1);
        let state = router.state.read().unwrap();
        let entry = state.get(&bundle.id()).unwrap();
        assert_eq!(entry.remaining_copies, 4);
    }

    #[tokio::test]
    async fn test_received_bundle_starts_in_wait_phase() {
        let (router, _pm) = setup_with_peers(2).await;
        let mut bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        bundle.set_previous_node(&eid("dtn://relay0"));
        let decision = router.get_next_hops(&bundle).await;
        assert!(decision.next_hops.is_empty());
    }

    #[tokio::test]
    async fn test_direct_peer_always_short_circuits() {
        let (router, pm) = setup_with_peers(0).await;
        let mut peer = Peer::new(eid("dtn://far"), "addr", PeerKind::Dynamic);
        peer.cla_list.push(("tcp".to_string(), None));
        pm.add_or_update(peer);
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops[0].eid, eid("dtn://far"));
    }

    #[tokio::test]
    async fn test_does_not_spray_same_peer_twice() {
        let (router, _pm) = setup_with_peers(1).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let first = router.get_next_hops(&bundle).await;
        assert_eq!(first.next_hops.len(), 1);
        let second = router.get_next_hops(&bundle).await;
        assert!(second.next_hops.is_empty());
    }
}
