//! Static routing (section 4.7.4): an ordered table of
//! `{index, sourcePattern, destinationPattern, viaEid}` entries, first match
//! wins, glob patterns (`*`) compiled to anchored regexes. Reloadable at
//! runtime via `RoutingNotification::UpdateConfig{command: "reload", ...}`.

use crate::bpv7::{Bundle, EndpointId};
use crate::peer::PeerManager;
use crate::routing::{Decision, LocalEndpointChecker, RoutingAgent, RoutingNotification};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRouteSpec {
    pub index: u64,
    pub source_pattern: String,
    pub destination_pattern: String,
    pub via: String,
}

struct CompiledRoute {
    index: u64,
    source_re: Regex,
    destination_re: Regex,
    via: EndpointId,
}

fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::from("^");
    for part in pattern.split('*') {
        for (i, literal) in part.split('?').enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.push_str(&regex::escape(literal));
        }
        out.push_str(".*");
    }
    out.truncate(out.len() - 2);
    out.push('$');
    Regex::new(&out).unwrap_or_else(|_| Regex::new("^$").unwrap())
}

pub struct StaticRouter {
    routes: RwLock<Vec<CompiledRoute>>,
    peer_manager: RwLock<Option<Arc<PeerManager>>>,
    local_check: RwLock<Option<Arc<dyn LocalEndpointChecker>>>,
}

impl StaticRouter {
    pub fn new(specs: Vec<StaticRouteSpec>) -> Self {
        StaticRouter {
            routes: RwLock::new(compile(specs)),
            peer_manager: RwLock::new(None),
            local_check: RwLock::new(None),
        }
    }

    fn reload(&self, specs: Vec<StaticRouteSpec>) {
        *self.routes.write().unwrap() = compile(specs);
    }
}

fn compile(mut specs: Vec<StaticRouteSpec>) -> Vec<CompiledRoute> {
    specs.sort_by_key(|s| s.index);
    specs
        .into_iter()
        .map(|s| CompiledRoute {
            index: s.index,
            source_re: glob_to_regex(&s.source_pattern),
            destination_re: glob_to_regex(&s.destination_pattern),
            via: EndpointId::from(&s.via),
        })
        .collect()
}

#[async_trait]
impl RoutingAgent for StaticRouter {
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

        let source = bundle.primary.source.description();
        let destination = bundle.primary.destination.description();
        let routes = self.routes.read().unwrap();
        let matched = routes
            .iter()
            .find(|r| r.source_re.is_match(&source) && r.destination_re.is_match(&destination));

        let Some(route) = matched else {
            return Decision::none(bundle_id);
        };
        match peer_manager.get_peer(&route.via) {
            Some(peer) if peer.has_cla() => Decision::forward(bundle_id, vec![peer]),
            _ => Decision::none(bundle_id),
        }
    }

    async fn handle_notification(&self, notification: RoutingNotification) {
        if let RoutingNotification::UpdateConfig { command, params } = notification {
            if command == "reload" {
                if let Some(raw) = params.get("routes") {
                    if let Ok(specs) = serde_json::from_str::<Vec<StaticRouteSpec>>(raw) {
                        self.reload(specs);
                    }
                }
            }
        }
    }

    fn get_state(&self) -> HashMap<String, String> {
        let routes = self.routes.read().unwrap();
        let mut state = HashMap::from([("algorithm".to_string(), "static".to_string())]);
        state.insert("route_count".to_string(), routes.len().to_string());
        if let Some(first) = routes.first() {
            state.insert("first_route_index".to_string(), first.index.to_string());
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn spec(index: u64, src: &str, dst: &str, via: &str) -> StaticRouteSpec {
        StaticRouteSpec {
            index,
            source_pattern: src.to_string(),
            destination_pattern: dst.to_string(),
            via: via.to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let router = StaticRouter::new(vec![
            spec(1, "*", "dtn://b*", "dtn://relay-a"),
            spec(2, "*", "dtn://b*", "dtn://relay-b"),
        ]);
        let pm = Arc::new(PeerManager::new());
        for name in ["dtn://relay-a", "dtn://relay-b"] {
            let mut peer = Peer::new(eid(name), "addr", PeerKind::Static);
            peer.cla_list.push(("tcp".to_string(), None));
            pm.add_or_update(peer);
        }
        router.configure(pm, Arc::new(NoneLocal)).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://bob"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops.len(), 1);
        assert_eq!(decision.next_hops[0].eid, eid("dtn://relay-a"));
    }

    #[tokio::test]
    async fn test_no_match_returns_no_hops() {
        let router = StaticRouter::new(vec![spec(1, "*", "dtn://only-bob", "dtn://relay-a")]);
        let pm = Arc::new(PeerManager::new());
        router.configure(pm, Arc::new(NoneLocal)).await;
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://alice"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert!(decision.next_hops.is_empty());
    }

    #[test]
    fn test_glob_single_char_wildcard() {
        let re = glob_to_regex("dtn://node?/app");
        assert!(re.is_match("dtn://node1/app"));
        assert!(re.is_match("dtn://nodeX/app"));
        assert!(!re.is_match("dtn://node12/app"));
        assert!(!re.is_match("dtn://node/app"));
    }

    #[tokio::test]
    async fn test_reload_replaces_routes() {
        let router = StaticRouter::new(vec![spec(1, "*", "dtn://bob", "dtn://relay-a")]);
        let pm = Arc::new(PeerManager::new());
        let mut peer = Peer::new(eid("dtn://relay-b"), "addr", PeerKind::Static);
        peer.cla_list.push(("tcp".to_string(), None));
        pm.add_or_update(peer);
        router.configure(pm, Arc::new(NoneLocal)).await;

        let new_routes = serde_json::to_string(&vec![spec(1, "*", "dtn://bob", "dtn://relay-b")]).unwrap();
        let mut params = HashMap::new();
        params.insert("routes".to_string(), new_routes);
        router
            .handle_notification(RoutingNotification::UpdateConfig {
                command: "reload".to_string(),
                params,
            })
            .await;

        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://bob"), vec![1]);
        let decision = router.get_next_hops(&bundle).await;
        assert_eq!(decision.next_hops[0].eid, eid("dtn://relay-b"));
    }
}
