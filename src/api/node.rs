//! Core orchestrator (section 4.10): owns the store, the peer/service/
//! application registries, the convergence-layer registry, the routing
//! agent, and the bundle processor, and wires them together. Routing agents
//! never get a handle back to this type (section 9's cyclic-reference design
//! note) — they receive a small [`LocalEndpointChecker`] instead, and the
//! processor takes `&DtnNode` per call rather than storing a reference to it.

use crate::appagent::ApplicationAgent;
use crate::bpv7::{Bundle, EndpointId};
use crate::cla::http_pull::HttpPullCla;
use crate::cla::http_push::HttpPushCla;
use crate::cla::tcp::TcpCla;
use crate::cla::udp::UdpCla;
use crate::cla::{ClaError, ClaRegistry, ConvergenceLayerAgent};
use crate::config::{ClaConfig, NodeConfig};
use crate::peer::{Peer, PeerEvent, PeerKind, PeerManager};
use crate::processor::{BundleProcessor, ProcessorError};
use crate::routing::epidemic::EpidemicRouter;
use crate::routing::flooding::FloodingRouter;
use crate::routing::sink::SinkRouter;
use crate::routing::spray_and_wait::SprayAndWaitRouter;
use crate::routing::static_routing::{StaticRouteSpec, StaticRouter};
use crate::routing::{Decision, LocalEndpointChecker, RoutingAgent, RoutingNotification};
use crate::service::{Service, ServiceRegistry};
use crate::stats::{NodeStats, StatsSnapshot};
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::BundleStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Decoupled from `DtnNode` on purpose: a routing agent only ever needs to
/// know whether an endpoint belongs to this node, never anything else about
/// the core.
struct LocalChecker {
    node_id: EndpointId,
    registered: Arc<RwLock<HashSet<EndpointId>>>,
}

impl LocalEndpointChecker for LocalChecker {
    fn is_local_endpoint(&self, eid: &EndpointId) -> bool {
        is_local(&self.node_id, &self.registered, eid)
    }
}

fn is_local(node_id: &EndpointId, registered: &RwLock<HashSet<EndpointId>>, eid: &EndpointId) -> bool {
    if eid.is_none() {
        return false;
    }
    eid.node_part() == node_id.node_part() || registered.read().unwrap().contains(eid)
}

fn build_store(config: &NodeConfig) -> anyhow::Result<Arc<dyn BundleStore>> {
    match config.db.as_str() {
        "sqlite" => {
            let path = config
                .db_path
                .clone()
                .unwrap_or_else(|| format!("{}/bundles.sqlite3", config.workdir));
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        _ => Ok(Arc::new(MemoryStore::new())),
    }
}

fn build_routing_agent(config: &NodeConfig) -> Arc<dyn RoutingAgent> {
    match config.routing.as_str() {
        "flooding" => Arc::new(FloodingRouter::new()),
        "sink" => Arc::new(SinkRouter::new()),
        "sprayandwait" => Arc::new(SprayAndWaitRouter::new()),
        "static" => {
            let specs = config
                .routing_settings
                .get("static")
                .and_then(|settings| settings.get("routes"))
                .and_then(|raw| serde_json::from_str::<Vec<StaticRouteSpec>>(raw).ok())
                .unwrap_or_default();
            Arc::new(StaticRouter::new(specs))
        }
        _ => Arc::new(EpidemicRouter::new()),
    }
}

fn build_cla(
    entry: &ClaConfig,
    node_id: &EndpointId,
    peer_manager: &Arc<PeerManager>,
) -> Option<Arc<dyn ConvergenceLayerAgent>> {
    match entry.cla_type.as_str() {
        "tcp" => {
            let bind = entry.settings.get("bind").cloned().unwrap_or_else(|| "127.0.0.1:4556".to_string());
            Some(Arc::new(TcpCla::new(bind, node_id.clone())) as Arc<dyn ConvergenceLayerAgent>)
        }
        "udp" => {
            let bind = entry.settings.get("bind").cloned().unwrap_or_else(|| "127.0.0.1:4557".to_string());
            Some(Arc::new(UdpCla::new(bind)) as Arc<dyn ConvergenceLayerAgent>)
        }
        "http" => Some(Arc::new(HttpPushCla::new()) as Arc<dyn ConvergenceLayerAgent>),
        "httppull" => {
            let cla = match entry.settings.get("interval").and_then(|s| s.parse().ok()) {
                Some(secs) => HttpPullCla::with_interval(peer_manager.clone(), secs),
                None => HttpPullCla::new(peer_manager.clone()),
            };
            Some(Arc::new(cla) as Arc<dyn ConvergenceLayerAgent>)
        }
        other => {
            log::warn!("unknown convergence layer type in configuration: {other}");
            None
        }
    }
}

pub struct DtnNode {
    pub node_id: EndpointId,
    pub store: Arc<dyn BundleStore>,
    pub processor: BundleProcessor,
    pub cla_registry: Arc<ClaRegistry>,
    pub peer_manager: Arc<PeerManager>,
    pub service_registry: Arc<ServiceRegistry>,
    pub application_agent: Arc<ApplicationAgent>,
    pub routing_agent: Arc<dyn RoutingAgent>,
    pub stats: NodeStats,
    pub generate_status_reports: bool,
    registered_endpoints: Arc<RwLock<HashSet<EndpointId>>>,
    sequence: AtomicU64,
}

impl DtnNode {
    pub async fn new(config: NodeConfig) -> anyhow::Result<Arc<Self>> {
        let node_id = config.node_eid();
        let store = build_store(&config)?;
        let peer_manager = Arc::new(PeerManager::new());
        let service_registry = Arc::new(ServiceRegistry::new());
        let application_agent = Arc::new(ApplicationAgent::new());
        let cla_registry = Arc::new(ClaRegistry::new());
        let routing_agent = build_routing_agent(&config);

        let registered_endpoints: Arc<RwLock<HashSet<EndpointId>>> = Arc::new(RwLock::new(
            config.endpoints.iter().map(|s| EndpointId::from(s)).collect(),
        ));
        let local_check: Arc<dyn LocalEndpointChecker> = Arc::new(LocalChecker {
            node_id: node_id.clone(),
            registered: registered_endpoints.clone(),
        });
        routing_agent.configure(peer_manager.clone(), local_check).await;
        routing_agent.start().await;

        for (tag, eid_str) in &config.services {
            service_registry.register(Service {
                tag: *tag,
                endpoint: EndpointId::from(eid_str),
                description: format!("service {tag}"),
            });
        }

        for spec in &config.statics {
            let mut peer = Peer::new(EndpointId::from(&spec.eid), spec.address.clone(), PeerKind::Static);
            peer.cla_list = spec.cla.iter().map(|name| (name.clone(), None)).collect();
            peer_manager.add_or_update(peer);
        }

        {
            let mut peer_events = peer_manager
                .take_event_stream()
                .await
                .expect("peer event stream is taken exactly once, at startup");
            let routing_for_events = routing_agent.clone();
            tokio::spawn(async move {
                while let Some(event) = peer_events.recv().await {
                    let notification = match event {
                        PeerEvent::Discovered(p) | PeerEvent::Updated(p) => {
                            RoutingNotification::PeerEncountered(p)
                        }
                        PeerEvent::Lost(eid) => RoutingNotification::PeerLost(eid),
                        PeerEvent::ConnectionEstablished(_) | PeerEvent::ConnectionLost(_) => continue,
                    };
                    routing_for_events.handle_notification(notification).await;
                }
            });
        }

        let node = Arc::new(DtnNode {
            node_id,
            store,
            processor: BundleProcessor::new(),
            cla_registry,
            peer_manager,
            service_registry,
            application_agent,
            routing_agent,
            stats: NodeStats::new(),
            generate_status_reports: config.generate_status_reports,
            registered_endpoints,
            sequence: AtomicU64::new(0),
        });

        for cla_config in &config.clas {
            if let Some(cla) = build_cla(cla_config, &node.node_id, &node.peer_manager) {
                node.register_cla(cla).await?;
            }
        }

        Ok(node)
    }

    pub fn is_local_endpoint(&self, eid: &EndpointId) -> bool {
        is_local(&self.node_id, &self.registered_endpoints, eid)
    }

    pub async fn register_endpoint(&self, eid: EndpointId) {
        self.registered_endpoints.write().unwrap().insert(eid);
    }

    pub async fn unregister_endpoint(&self, eid: &EndpointId) {
        self.registered_endpoints.write().unwrap().remove(eid);
        self.application_agent.unregister(eid);
    }

    pub async fn get_routing_decision(&self, bundle: &Bundle) -> Decision {
        self.routing_agent.get_next_hops(bundle).await
    }

    /// Tries every CLA the peer is reachable through, in registration order,
    /// stopping at the first success (section 4.8 `forward`).
    pub async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> bool {
        for cla in self.cla_registry.find_clas_for_peer(peer) {
            match cla.send_bundle(bundle, peer).await {
                Ok(()) => {
                    self.peer_manager.record_success(&peer.eid);
                    self.stats.record_outgoing();
                    return true;
                }
                Err(e) => {
                    log::warn!("send via {} to {} failed: {e}", cla.name(), peer.address);
                }
            }
        }
        self.peer_manager.record_failure(&peer.eid);
        false
    }

    /// Registers and starts a convergence-layer agent, then spawns a task
    /// draining its incoming channel into the bundle processor.
    pub async fn register_cla(self: &Arc<Self>, cla: Arc<dyn ConvergenceLayerAgent>) -> Result<(), ClaError> {
        cla.start().await?;
        if let Some(mut rx) = cla.take_incoming().await {
            let core = Arc::clone(self);
            tokio::spawn(async move {
                while let Some((bundle, _connection)) = rx.recv().await {
                    let _ = core.processor.receive(&core, bundle).await;
                }
            });
        }
        self.cla_registry.register(cla);
        Ok(())
    }

    pub fn register_service(&self, service: Service) {
        self.service_registry.register(service);
    }

    /// Builds and transmits a locally-originated bundle, returning its id.
    pub async fn submit_bundle(
        &self,
        destination: EndpointId,
        source: Option<EndpointId>,
        payload: Vec<u8>,
        lifetime_secs: u64,
    ) -> Result<String, ProcessorError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let bundle = Bundle::with_lifetime(
            source.unwrap_or_else(|| self.node_id.clone()),
            destination,
            payload,
            lifetime_secs,
            sequence,
        );
        let id = bundle.id();
        self.processor.transmit(self, bundle).await?;
        Ok(id)
    }

    pub async fn stats_snapshot(&self) -> StatsSnapshot {
        let stored = self.store.count().await.unwrap_or(0);
        self.stats.snapshot(stored)
    }
}
