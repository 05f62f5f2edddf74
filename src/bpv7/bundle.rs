use crate::bpv7::endpoint::EndpointId;
use anyhow::{Context, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds between the Unix epoch and the DTN epoch (2000-01-01T00:00:00Z).
pub const DTN_EPOCH_OFFSET_MS: u64 = 946_684_800_000;

pub const BLOCK_TYPE_PAYLOAD: u64 = 1;
pub const BLOCK_TYPE_PREVIOUS_NODE: u64 = 2;
pub const BLOCK_TYPE_BUNDLE_AGE: u64 = 6;
pub const BLOCK_TYPE_HOP_COUNT: u64 = 7;

bitflags! {
    /// Primary-block bundle processing control flags (spec section 3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BundleControlFlags: u32 {
        const ADMINISTRATIVE_RECORD    = 0b0000_0001;
        const REQUEST_RECEPTION_REPORT = 0b0000_0010;
        const REQUEST_FORWARD_REPORT   = 0b0000_0100;
        const REQUEST_DELIVERY_REPORT  = 0b0000_1000;
        const REQUEST_DELETION_REPORT  = 0b0001_0000;
    }
}

bitflags! {
    /// Canonical-block control flags (spec section 3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct BlockControlFlags: u32 {
        const DELETE_BUNDLE_ON_FAILURE = 0b0000_0001;
        const REMOVE_BLOCK_ON_FAILURE  = 0b0000_0010;
        const STATUS_REPORT_ON_FAILURE = 0b0000_0100;
    }
}

/// Bundle creation timestamp: milliseconds since the DTN epoch, plus a
/// sequence number disambiguating bundles created in the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationTimestamp {
    pub dtn_time_ms: u64,
    pub sequence: u64,
}

impl CreationTimestamp {
    pub fn now(sequence: u64) -> Self {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        CreationTimestamp {
            dtn_time_ms: unix_ms.saturating_sub(DTN_EPOCH_OFFSET_MS),
            sequence,
        }
    }

    pub fn to_unix_ms(self) -> u64 {
        self.dtn_time_ms + DTN_EPOCH_OFFSET_MS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryBlock {
    pub version: u8,
    pub source: EndpointId,
    pub destination: EndpointId,
    pub report_to: EndpointId,
    pub creation_timestamp: CreationTimestamp,
    /// Seconds. The management API and config layer deal in milliseconds in a
    /// few places (see the Open Questions decision on ambiguous lifetime
    /// units) and must convert on ingest; this field is always seconds.
    pub lifetime_secs: u64,
    pub control_flags: BundleControlFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalBlock {
    pub block_type: u64,
    pub block_number: u64,
    pub flags: BlockControlFlags,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub primary: PrimaryBlock,
    pub canonicals: Vec<CanonicalBlock>,
}

impl Bundle {
    /// Build a bundle carrying a single payload block, as produced by local
    /// submission (application agent / management API send endpoint).
    pub fn new(source: EndpointId, destination: EndpointId, payload: Vec<u8>) -> Self {
        Self::with_lifetime(source, destination, payload, 3600, 0)
    }

    pub fn with_lifetime(
        source: EndpointId,
        destination: EndpointId,
        payload: Vec<u8>,
        lifetime_secs: u64,
        sequence: u64,
    ) -> Self {
        Bundle {
            primary: PrimaryBlock {
                version: 7,
                source,
                destination,
                report_to: EndpointId::none(),
                creation_timestamp: CreationTimestamp::now(sequence),
                lifetime_secs,
                control_flags: BundleControlFlags::empty(),
            },
            canonicals: vec![CanonicalBlock {
                block_type: BLOCK_TYPE_PAYLOAD,
                block_number: 1,
                flags: BlockControlFlags::empty(),
                data: payload,
            }],
        }
    }

    /// Canonical bundle identifier: `"<source>-<creationMillis>-<sequence>"`.
    pub fn id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.primary.source.description(),
            self.primary.creation_timestamp.dtn_time_ms,
            self.primary.creation_timestamp.sequence
        )
    }

    pub fn payload(&self) -> &[u8] {
        self.canonicals
            .iter()
            .find(|c| c.block_type == BLOCK_TYPE_PAYLOAD)
            .map(|c| c.data.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_administrative_record(&self) -> bool {
        self.primary
            .control_flags
            .contains(BundleControlFlags::ADMINISTRATIVE_RECORD)
    }

    /// Hop count, if a hop-count extension block is present.
    pub fn hop_count(&self) -> Option<(u64, u64)> {
        let block = self
            .canonicals
            .iter()
            .find(|c| c.block_type == BLOCK_TYPE_HOP_COUNT)?;
        serde_cbor::from_slice::<(u64, u64)>(&block.data).ok()
    }

    /// The endpoint that forwarded this bundle to us, if a previous-node
    /// block is present (used for epidemic routing's loop prevention).
    pub fn previous_node(&self) -> Option<EndpointId> {
        let block = self
            .canonicals
            .iter()
            .find(|c| c.block_type == BLOCK_TYPE_PREVIOUS_NODE)?;
        serde_cbor::from_slice(&block.data).ok()
    }

    /// Increment (or insert) the hop-count block, used when forwarding.
    pub fn increment_hop_count(&mut self) {
        if let Some(block) = self
            .canonicals
            .iter_mut()
            .find(|c| c.block_type == BLOCK_TYPE_HOP_COUNT)
        {
            if let Ok((limit, count)) = serde_cbor::from_slice::<(u64, u64)>(&block.data) {
                block.data = serde_cbor::to_vec(&(limit, count + 1)).unwrap_or_default();
            }
        } else {
            let next_number = self.canonicals.len() as u64 + 1;
            self.canonicals.push(CanonicalBlock {
                block_type: BLOCK_TYPE_HOP_COUNT,
                block_number: next_number,
                flags: BlockControlFlags::empty(),
                data: serde_cbor::to_vec(&(30u64, 1u64)).unwrap_or_default(),
            });
        }
    }

    /// Stamp (or replace) the previous-node block, done on every forward.
    pub fn set_previous_node(&mut self, node: &EndpointId) {
        let encoded = serde_cbor::to_vec(node).unwrap_or_default();
        if let Some(block) = self
            .canonicals
            .iter_mut()
            .find(|c| c.block_type == BLOCK_TYPE_PREVIOUS_NODE)
        {
            block.data = encoded;
        } else {
            let next_number = self.canonicals.len() as u64 + 1;
            self.canonicals.push(CanonicalBlock {
                block_type: BLOCK_TYPE_PREVIOUS_NODE,
                block_number: next_number,
                flags: BlockControlFlags::empty(),
                data: encoded,
            });
        }
    }

    /// Expiry predicate: `now > creationTime + lifetime`, DTN time converted
    /// to Unix milliseconds.
    pub fn is_expired(&self) -> bool {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let expiry_ms =
            self.primary.creation_timestamp.to_unix_ms() + self.primary.lifetime_secs * 1000;
        now_ms > expiry_ms
    }
}

pub fn encode(bundle: &Bundle) -> Result<Vec<u8>> {
    serde_cbor::to_vec(bundle).context("encoding bundle to CBOR")
}

pub fn decode(bytes: &[u8]) -> Result<Bundle> {
    serde_cbor::from_slice(bytes).context("decoding bundle from CBOR")
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    #[test]
    fn test_bundle_new_defaults() {
        let b = Bundle::new(eid("dtn://src"), eid("dtn://dest"), b"hi".to_vec());
        assert_eq!(b.primary.version, 7);
        assert_eq!(b.primary.lifetime_secs, 3600);
        assert_eq!(b.payload(), b"hi");
        assert!(!b.is_expired());
    }

    #[test]
    fn test_bundle_expired() {
        let mut b = Bundle::with_lifetime(eid("dtn://src"), eid("dtn://dest"), vec![1], 1, 0);
        b.primary.creation_timestamp.dtn_time_ms = 0;
        assert!(b.is_expired());
    }

    #[test]
    fn test_id_format() {
        let b = Bundle::with_lifetime(eid("dtn://src"), eid("dtn://dest"), vec![], 3600, 42);
        let id = b.id();
        assert!(id.starts_with("dtn://src-"));
        assert!(id.ends_with("-42"));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let b = Bundle::new(eid("dtn://src"), eid("dtn://dest"), b"payload".to_vec());
        let bytes = encode(&b).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id(), b.id());
        assert_eq!(decoded.payload(), b.payload());
    }

    #[test]
    fn test_administrative_record_flag() {
        let mut b = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![]);
        assert!(!b.is_administrative_record());
        b.primary.control_flags = BundleControlFlags::ADMINISTRATIVE_RECORD;
        assert!(b.is_administrative_record());
    }

    #[test]
    fn test_hop_count_increment() {
        let mut b = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![]);
        assert!(b.hop_count().is_none());
        b.increment_hop_count();
        assert_eq!(b.hop_count(), Some((30, 1)));
        b.increment_hop_count();
        assert_eq!(b.hop_count(), Some((30, 2)));
    }

    #[test]
    fn test_previous_node_stamped_on_forward() {
        let mut b = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![]);
        b.set_previous_node(&eid("dtn://relay1"));
        let block = b
            .canonicals
            .iter()
            .find(|c| c.block_type == BLOCK_TYPE_PREVIOUS_NODE)
            .unwrap();
        let decoded: EndpointId = serde_cbor::from_slice(&block.data).unwrap();
        assert_eq!(decoded, eid("dtn://relay1"));
        b.set_previous_node(&eid("dtn://relay2"));
        let count = b
            .canonicals
            .iter()
            .filter(|c| c.block_type == BLOCK_TYPE_PREVIOUS_NODE)
            .count();
        assert_eq!(count, 1);
    }
}
