use crate::bpv7::{Bundle, EndpointId};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bundle lifecycle constraints tracked alongside the stored bytes (section 3).
    ///
    /// `dispatchPending` and `forwardPending` are mutually exclusive at steady
    /// state (I-3); the processor is responsible for upholding that, the bit
    /// set itself does not enforce it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Constraints: u8 {
        const DISPATCH_PENDING   = 0b0000_0001;
        const FORWARD_PENDING    = 0b0000_0010;
        const REASSEMBLY_PENDING = 0b0000_0100;
        const CONTRAINDICATED    = 0b0000_1000;
        const DELETED            = 0b0001_0000;
    }
}

/// The in-store descriptor for a bundle: identity, routing-relevant fields
/// pulled out of the primary block, and lifecycle constraints (section 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePack {
    pub id: String,
    pub source: EndpointId,
    pub destination: EndpointId,
    pub creation_time_ms: u64,
    pub size: u64,
    pub constraints: Constraints,
}

impl BundlePack {
    pub fn from_bundle(bundle: &Bundle, encoded_size: u64) -> Self {
        BundlePack {
            id: bundle.id(),
            source: bundle.primary.source.clone(),
            destination: bundle.primary.destination.clone(),
            creation_time_ms: bundle.primary.creation_timestamp.to_unix_ms(),
            size: encoded_size,
            constraints: Constraints::empty(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.constraints.contains(Constraints::DELETED)
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    #[test]
    fn test_from_bundle_derives_id_and_fields() {
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![1, 2, 3]);
        let pack = BundlePack::from_bundle(&bundle, 42);
        assert_eq!(pack.id, bundle.id());
        assert_eq!(pack.source, eid("dtn://src"));
        assert_eq!(pack.size, 42);
        assert!(!pack.is_deleted());
    }

    #[test]
    fn test_deleted_flag() {
        let bundle = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![]);
        let mut pack = BundlePack::from_bundle(&bundle, 1);
        assert!(!pack.is_deleted());
        pack.constraints |= Constraints::DELETED;
        assert!(pack.is_deleted());
    }

    #[test]
    fn test_dispatch_and_forward_pending_are_distinct_bits() {
        let mut c = Constraints::DISPATCH_PENDING;
        assert!(c.contains(Constraints::DISPATCH_PENDING));
        assert!(!c.contains(Constraints::FORWARD_PENDING));
        c.remove(Constraints::DISPATCH_PENDING);
        c.insert(Constraints::FORWARD_PENDING);
        assert!(!c.contains(Constraints::DISPATCH_PENDING));
        assert!(c.contains(Constraints::FORWARD_PENDING));
    }
}
