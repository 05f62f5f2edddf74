//! Service registry (section 4.5): maps a well-known service tag to the
//! endpoint advertising it.

use crate::bpv7::EndpointId;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub tag: u8,
    pub endpoint: EndpointId,
    pub description: String,
}

/// Tag uniquely identifies a service within the node; `register` overwrites
/// whatever was previously registered under that tag.
pub struct ServiceRegistry {
    services: RwLock<HashMap<u8, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry {
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, service: Service) {
        self.services.write().unwrap().insert(service.tag, service);
    }

    pub fn lookup(&self, tag: u8) -> Option<Service> {
        self.services.read().unwrap().get(&tag).cloned()
    }

    pub fn all(&self) -> Vec<Service> {
        self.services.read().unwrap().values().cloned().collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
