//! CLA registry: tracks instantiated convergence-layer agents and resolves
//! which ones can carry a bundle to a given peer (section 4.8 `forward`,
//! step 2: "find CLAs via `claRegistry.findCLAsForPeer(peer)`").

use crate::cla::ConvergenceLayerAgent;
use crate::peer::Peer;
use std::sync::{Arc, RwLock};

pub struct ClaRegistry {
    clas: RwLock<Vec<Arc<dyn ConvergenceLayerAgent>>>,
}

impl ClaRegistry {
    pub fn new() -> Self {
        ClaRegistry {
            clas: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, cla: Arc<dyn ConvergenceLayerAgent>) {
        self.clas.write().unwrap().push(cla);
    }

    pub fn all(&self) -> Vec<Arc<dyn ConvergenceLayerAgent>> {
        self.clas.read().unwrap().clone()
    }

    /// CLAs whose family name appears in the peer's CLA list, in
    /// registration order (the order `forward` tries them in).
    pub fn find_clas_for_peer(&self, peer: &Peer) -> Vec<Arc<dyn ConvergenceLayerAgent>> {
        let names: Vec<&str> = peer.cla_list.iter().map(|(name, _)| name.as_str()).collect();
        self.clas
            .read()
            .unwrap()
            .iter()
            .filter(|cla| names.contains(&cla.name()))
            .cloned()
            .collect()
    }

    pub fn is_active(&self) -> bool {
        !self.clas.read().unwrap().is_empty()
    }
}

impl Default for ClaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
