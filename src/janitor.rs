//! Periodic maintenance (section 4.9): sweeps deleted or expired bundles out
//! of the store, prunes stale or failing peers, and retries bundles still
//! forward-pending once a convergence layer is active.

use crate::api::node::DtnNode;
use crate::store::{BundleStore, Constraints};
use std::sync::Arc;
use std::time::Duration;

pub struct Janitor {
    interval_secs: u64,
    peer_timeout_secs: u64,
}

impl Janitor {
    pub fn new(interval_secs: u64, peer_timeout_secs: u64) -> Self {
        Janitor {
            interval_secs,
            peer_timeout_secs,
        }
    }

    /// Runs the maintenance sweep on a fixed interval until the process exits.
    pub fn spawn(self, core: Arc<DtnNode>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
            loop {
                ticker.tick().await;
                self.sweep(&core).await;
            }
        });
    }

    async fn sweep(&self, core: &DtnNode) {
        self.sweep_bundles(core).await;
        for eid in core.peer_manager.prune(self.peer_timeout_secs) {
            log::info!("janitor pruned stale peer {eid}");
        }
        self.retry_forwarding(core).await;
    }

    /// Physically removes deleted bundles and expired bundles the processor
    /// only marked rather than removed.
    async fn sweep_bundles(&self, core: &DtnNode) {
        let Ok(ids) = core.store.all_ids().await else {
            return;
        };
        for id in ids {
            let deleted = core
                .store
                .get_metadata(&id)
                .await
                .ok()
                .flatten()
                .map(|pack| pack.is_deleted())
                .unwrap_or(false);
            let expired = core
                .store
                .get_bundle(&id)
                .await
                .ok()
                .flatten()
                .map(|bundle| bundle.is_expired())
                .unwrap_or(false);
            if !deleted && !expired {
                continue;
            }
            if core.store.remove(&id).await.is_ok() && expired && !deleted {
                core.stats.record_broken();
            }
        }
    }

    async fn retry_forwarding(&self, core: &DtnNode) {
        if !core.cla_registry.is_active() {
            return;
        }
        let Ok(packs) = core.store.all_bundles().await else {
            return;
        };
        for pack in packs {
            if !pack.constraints.contains(Constraints::FORWARD_PENDING) {
                continue;
            }
            if let Ok(Some(bundle)) = core.store.get_bundle(&pack.id).await {
                let _ = core.processor.retry_forward(core, bundle, pack).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpv7::{Bundle, EndpointId};
    use crate::config::NodeConfig;

    async fn test_core() -> Arc<DtnNode> {
        DtnNode::new(NodeConfig::for_tests(EndpointId::from("dtn://n1")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_bundle() {
        let core = test_core().await;
        let bundle = Bundle::with_lifetime(
            core.node_id.clone(),
            EndpointId::from("dtn://n1/app"),
            vec![1],
            0,
            0,
        );
        core.store.push(&bundle).await.unwrap();
        let janitor = Janitor::new(1, 300);
        janitor.sweep_bundles(&core).await;
        assert!(!core.store.has_item(&bundle.id()).await.unwrap());
        assert_eq!(core.stats_snapshot().await.broken, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_already_deleted_bundle() {
        let core = test_core().await;
        let bundle = Bundle::new(core.node_id.clone(), EndpointId::from("dtn://n1/app"), vec![1]);
        let mut pack = core.store.push(&bundle).await.unwrap();
        pack.constraints.insert(Constraints::DELETED);
        core.store.update_metadata(pack).await.unwrap();
        let janitor = Janitor::new(1, 300);
        janitor.sweep_bundles(&core).await;
        assert!(!core.store.has_item(&bundle.id()).await.unwrap());
        assert_eq!(core.stats_snapshot().await.broken, 0);
    }

    #[tokio::test]
    async fn test_prune_reports_stale_peers() {
        use crate::peer::{Peer, PeerKind};
        let core = test_core().await;
        let mut peer = Peer::new(EndpointId::from("dtn://stale"), "addr", PeerKind::Static);
        peer.last_contact_secs = 0;
        core.peer_manager.add_or_update(peer);
        let janitor = Janitor::new(1, 60);
        janitor.sweep(&core).await;
        assert!(core.peer_manager.get_peer(&EndpointId::from("dtn://stale")).is_none());
    }
}
