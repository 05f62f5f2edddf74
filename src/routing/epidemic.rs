//! Epidemic routing (section 4.7.1). Grounded on the teacher's
//! `EpidemicRouting` (flood-to-all-unsent peers) generalized with a
//! per-bundle history and the dtn7-family pattern of purging a peer's
//! forwarding history entries when it is reported `Lost`, so a
//! re-`Discovered` peer is eligible again (P4).

use crate::bpv7::{Bundle, EndpointId};
use crate::consts::EPIDEMIC_HISTORY_CAP;
use crate::peer::{Peer, PeerManager};
use crate::routing::{eligible_peers, Decision, LocalEndpointChecker, RoutingAgent, RoutingNotification};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

pub struct EpidemicRouter {
    peer_manager: RwLock<Option<Arc<PeerManager>>>,
    local_check: RwLock<Option<Arc<dyn LocalEndpointChecker>>>,
    history: RwLock<HashMap<String, HashSet<String>>>,
    history_order: RwLock<VecDeque<String>>,
}

impl EpidemicRouter {
    pub fn new() -> Self {
        EpidemicRouter {
            peer_manager: RwLock::new(None),
            local_check: RwLock::new(None),
            history: RwLock::new(HashMap::new()),
            history_order: RwLock::new(VecDeque::new()),
        }
    }

    fn touch_history(&self, bundle_id: &str) {
        let mut history = self.history.write().unwrap();
        if !history.contains_key(bundle_id) {
            let mut order = self.history_order.write().unwrap();
            if order.len() >= EPIDEMIC_HISTORY_CAP {
                if let Some(oldest) = order.pop_front() {
                    history.remove(&oldest);
                }
            }
            order.push_back(bundle_id.to_string());
            history.insert(bundle_id.to_string(), HashSet::new());
        }
    }
}

impl Default for EpidemicRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingAgent for EpidemicRouter {
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

        self.touch_history(&bundle_id);
        let received_from = bundle.previous_node();

        let mut history = self.history.write().unwrap();
        let sent = history.entry(bundle_id.clone()).or_default();
        let next_hops: Vec<Peer> = eligible_peers(&all_peers)
            .filter(|p| !sent.contains(&p.eid.description()))
            .filter(|p| received_from.as_ref() != Some(&p.eid))
            .cloned()
            .collect();
        for peer in &next_hops {
            sent.insert(peer.eid.description());
        }

        if next_hops.is_empty() {
            Decision::none(bundle_id)
        } else {
            Decision::forward(bundle_id, next_hops)
        }
    }

    async fn handle_notification(&self, notification: RoutingNotification) {
        if let RoutingNotification::PeerLost(eid) = notification {
            let mut history = self.history.write().unwrap();
            for sent in history.values_mut() {
                sent.remove(&eid.description());
            }
        }
    }

    fn get_state(&self) -> HashMap<String, String> {
        let history = self.history.read().unwrap();
        HashMap::from([
            ("algorithm".to_string(), "epidemic".to_string()),
            ("tracked_bundles".to_string(), history.len().to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerKind;

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    struct NoneLocal;
    impl LocalEndpointChecker for NoneLocal {
        fn is_local_endpoint(&self, _eid: &EndpointId) -> bool {
            false
        }
    }

    async fn setup_with_peers(n: usize) -> (EpidemicRouter, Arc<PeerManager>) {
        let router = EpidemicRouter::new();
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
    async fn test_forwards_to_all_peers_first_time() {
        let (router, _pm) = setup_with_peers(3).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops.len(), 3);
        assert!(!decision.is_local_delivery);
    }

    #[tokio::test]
    async fn test_no_resend_to_same_peer_twice() {
        let (router, _pm) = setup_with_peers(2).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let first = router.get_next_hops(&bundle).await;
        assert_eq!(first.next_hops.len(), 2);
        let second = router.get_next_hops(&bundle).await;
        assert!(second.next_hops.is_empty());
    }

    #[tokio::test]
    async fn test_peer_lost_purges_history_allowing_resend() {
        let (router, _pm) = setup_with_peers(1).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        router.get_next_hops(&bundle).await;
        router
            .handle_notification(RoutingNotification::PeerLost(eid("dtn://peer0")))
            .await;
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_peer_short_circuits() {
        let (router, pm) = setup_with_peers(0).await;
        let mut peer = Peer::new(eid("dtn://far"), "addr", PeerKind::Dynamic);
        peer.cla_list.push(("tcp".to_string(), None));
        pm.add_or_update(peer);
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops.len(), 1);
        assert_eq!(decision.next_hops[0].eid, eid("dtn://far"));
    }

    #[tokio::test]
    async fn test_local_destination_short_circuits() {
        struct AllLocal;
        impl LocalEndpointChecker for AllLocal {
            fn is_local_endpoint(&self, _eid: &EndpointId) -> bool {
                true
            }
        }
        let router = EpidemicRouter::new();
        router
            .configure(Arc::new(PeerManager::new()), Arc::new(AllLocal))
            .await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://me"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert!(decision.is_local_delivery);
        assert!(decision.next_hops.is_empty());
    }
}
