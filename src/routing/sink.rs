//! Sink routing (section 4.7.5): always returns no next hops. Useful for a
//! node that only receives and locally delivers, never forwards.

use crate::bpv7::Bundle;
use crate::peer::PeerManager;
use crate::routing::{Decision, LocalEndpointChecker, RoutingAgent, RoutingNotification};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct SinkRouter {
    local_check: RwLock<Option<Arc<dyn LocalEndpointChecker>>>,
}

impl SinkRouter {
    pub fn new() -> Self {
        SinkRouter {
            local_check: RwLock::new(None),
        }
    }
}

impl Default for SinkRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingAgent for SinkRouter {
    async fn configure(
        &self,
        _peer_manager: Arc<PeerManager>,
        local_check: Arc<dyn LocalEndpointChecker>,
    ) {
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
        Decision::none(bundle_id)
    }

    async fn handle_notification(&self, _notification: RoutingNotification) {}

    fn get_state(&self) -> HashMap<String, String> {
        HashMap::from([("algorithm".to_string(), "sink".to_string())])
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

    #[tokio::test]
    async fn test_never_forwards() {
        let router = SinkRouter::new();
        let pm = Arc::new(PeerManager::new());
        let mut peer = Peer::new(eid("dtn://peer1"), "addr", PeerKind::Dynamic);
        peer.cla_list.push(("tcp".to_string(), None));
        pm.add_or_update(peer);
        router.configure(pm, Arc::new(NoneLocal)).await;

        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://far"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert!(decision.next_hops.is_empty());
        assert!(!decision.is_local_delivery);
    }

    #[tokio::test]
    async fn test_still_delivers_locally() {
        struct AllLocal;
        impl LocalEndpointChecker for AllLocal {
            fn is_local_endpoint(&self, _eid: &EndpointId) -> bool {
                true
            }
        }
        let router = SinkRouter::new();
        router
            .configure(Arc::new(PeerManager::new()), Arc::new(AllLocal))
            .await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://me"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert!(decision.is_local_delivery);
    }
}
