use crate::bpv7::bundle::{
    Bundle, BundleControlFlags, CreationTimestamp, BLOCK_TYPE_PAYLOAD,
};
use crate::bpv7::endpoint::EndpointId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which milestone of a bundle's life a status report asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReportKind {
    Received,
    Forwarded,
    Delivered,
    Deleted,
}

/// Reason code carried in a status report (RFC 9171 section 6.1.3, subset
/// relevant to the behaviors this node actually produces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReason {
    NoInformation,
    LifetimeExpired,
    ForwardedOverUnidirectionalLink,
    TransmissionCanceled,
    DepletedStorage,
    DestinationEndpointIdUnintelligible,
    NoRouteToDestination,
    NoTimelyContactWithNextNode,
    BlockUnintelligible,
}

impl StatusReason {
    fn code(self) -> u8 {
        match self {
            StatusReason::NoInformation => 0,
            StatusReason::LifetimeExpired => 1,
            StatusReason::ForwardedOverUnidirectionalLink => 2,
            StatusReason::TransmissionCanceled => 3,
            StatusReason::DepletedStorage => 4,
            StatusReason::DestinationEndpointIdUnintelligible => 5,
            StatusReason::NoRouteToDestination => 6,
            StatusReason::NoTimelyContactWithNextNode => 7,
            StatusReason::BlockUnintelligible => 8,
        }
    }
}

/// Administrative-record payload for a bundle status report.
///
/// Serialized as the payload block of a bundle with the
/// `ADMINISTRATIVE_RECORD` control flag set (see `build`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub kind: StatusReportKind,
    pub reason_code: u8,
    /// Identity of the bundle this report describes: its original source and
    /// creation timestamp, which together with the source form the bundle id.
    pub bundle_source: EndpointId,
    pub bundle_creation_timestamp: CreationTimestamp,
}

impl StatusReport {
    pub fn new(
        kind: StatusReportKind,
        reason: StatusReason,
        bundle_source: EndpointId,
        bundle_creation_timestamp: CreationTimestamp,
    ) -> Self {
        StatusReport {
            kind,
            reason_code: reason.code(),
            bundle_source,
            bundle_creation_timestamp,
        }
    }
}

/// Build the bundle that carries a status report for `subject`, addressed to
/// its `report_to` endpoint, only if `subject` actually requested that class
/// of report via its primary-block control flags. Returns `None` when no
/// report should be sent (no report-to endpoint, or the flag isn't set, or
/// the node is configured not to generate status reports at all).
///
/// Mirrors the conditional `send_status_report_*` family found in reference
/// bundle-protocol-agent implementations: one report bundle per milestone,
/// gated per-flag, addressed to the subject's `report_to`.
pub fn build_report_bundle(
    subject: &Bundle,
    kind: StatusReportKind,
    reason: StatusReason,
    this_node: &EndpointId,
    generate_status_reports: bool,
) -> Result<Option<Bundle>> {
    if !generate_status_reports {
        return Ok(None);
    }
    if subject.primary.report_to.is_none() {
        return Ok(None);
    }
    let requested = match kind {
        StatusReportKind::Received => subject
            .primary
            .control_flags
            .contains(BundleControlFlags::REQUEST_RECEPTION_REPORT),
        StatusReportKind::Forwarded => subject
            .primary
            .control_flags
            .contains(BundleControlFlags::REQUEST_FORWARD_REPORT),
        StatusReportKind::Delivered => subject
            .primary
            .control_flags
            .contains(BundleControlFlags::REQUEST_DELIVERY_REPORT),
        StatusReportKind::Deleted => subject
            .primary
            .control_flags
            .contains(BundleControlFlags::REQUEST_DELETION_REPORT),
    };
    if !requested {
        return Ok(None);
    }

    let report = StatusReport::new(
        kind,
        reason,
        subject.primary.source.clone(),
        subject.primary.creation_timestamp,
    );
    let payload = serde_cbor::to_vec(&report).context("encoding status report payload")?;

    let mut bundle = Bundle::new(
        this_node.clone(),
        subject.primary.report_to.clone(),
        payload,
    );
    bundle.primary.control_flags = BundleControlFlags::ADMINISTRATIVE_RECORD;
    bundle.primary.report_to = EndpointId::none();
    bundle.canonicals[0].block_type = BLOCK_TYPE_PAYLOAD;
    Ok(Some(bundle))
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    #[test]
    fn test_no_report_when_flag_not_requested() {
        let subject = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![1]);
        let report = build_report_bundle(
            &subject,
            StatusReportKind::Received,
            StatusReason::NoInformation,
            &eid("dtn://this"),
            true,
        )
        .unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn test_no_report_without_report_to() {
        let mut subject = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![1]);
        subject.primary.control_flags = BundleControlFlags::REQUEST_RECEPTION_REPORT;
        let report = build_report_bundle(
            &subject,
            StatusReportKind::Received,
            StatusReason::NoInformation,
            &eid("dtn://this"),
            true,
        )
        .unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn test_report_built_when_requested() {
        let mut subject = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![1]);
        subject.primary.control_flags = BundleControlFlags::REQUEST_DELIVERY_REPORT;
        subject.primary.report_to = eid("dtn://src/reports");
        let bundle = build_report_bundle(
            &subject,
            StatusReportKind::Delivered,
            StatusReason::NoInformation,
            &eid("dtn://this"),
            true,
        )
        .unwrap()
        .expect("report expected");
        assert!(bundle.is_administrative_record());
        assert_eq!(bundle.primary.destination, eid("dtn://src/reports"));
        assert_eq!(bundle.primary.source, eid("dtn://this"));
        let report: StatusReport = serde_cbor::from_slice(bundle.payload()).unwrap();
        assert_eq!(report.kind, StatusReportKind::Delivered);
        assert_eq!(report.bundle_source, eid("dtn://src"));
    }

    #[test]
    fn test_disabled_globally() {
        let mut subject = Bundle::new(eid("dtn://src"), eid("dtn://dest"), vec![1]);
        subject.primary.control_flags = BundleControlFlags::REQUEST_DELETION_REPORT;
        subject.primary.report_to = eid("dtn://src/reports");
        let report = build_report_bundle(
            &subject,
            StatusReportKind::Deleted,
            StatusReason::LifetimeExpired,
            &eid("dtn://this"),
            false,
        )
        .unwrap();
        assert!(report.is_none());
    }
}
