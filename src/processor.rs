//! Bundle processor (section 4.8): the core bundle-lifecycle state machine
//! — `receive`/`transmit`/`dispatch`/`forward`/`localDelivery`. Owned by the
//! core orchestrator; every method takes `&DtnNode` rather than holding a
//! back-reference, so the processor never needs its own handle on its owner
//! (section 9, cyclic-reference design note).

use crate::api::node::DtnNode;
use crate::bpv7::status_report::{build_report_bundle, StatusReason, StatusReportKind};
use crate::bpv7::Bundle;
use crate::consts::SEEN_BUNDLE_CACHE_CAP;
use crate::store::{BundlePack, Constraints};
use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("no core reference available")]
    NoCoreReference,
    #[error("source is not a local endpoint")]
    InvalidSource,
    #[error("bundle has expired")]
    BundleExpired,
    #[error("duplicate bundle")]
    DuplicateBundle,
    #[error("bundle deleted on ingress")]
    BundleDeleted,
    #[error("invalid administrative record")]
    InvalidAdministrativeRecord,
    #[error("destination is not a local endpoint")]
    NoLocalEndpoint,
}

pub struct BundleProcessor {
    seen_bundles: RwLock<HashSet<String>>,
    seen_order: RwLock<VecDeque<String>>,
}

impl BundleProcessor {
    pub fn new() -> Self {
        BundleProcessor {
            seen_bundles: RwLock::new(HashSet::new()),
            seen_order: RwLock::new(VecDeque::new()),
        }
    }

    fn mark_seen(&self, id: &str) -> bool {
        let mut seen = self.seen_bundles.write().unwrap();
        if seen.contains(id) {
            return false;
        }
        let mut order = self.seen_order.write().unwrap();
        if order.len() >= SEEN_BUNDLE_CACHE_CAP {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        order.push_back(id.to_string());
        seen.insert(id.to_string());
        true
    }

    /// A bundle arriving from a CLA or an internally-looped administrative record.
    pub async fn receive(&self, core: &DtnNode, bundle: Bundle) -> Result<(), ProcessorError> {
        let id = bundle.id();

        if !self.mark_seen(&id) {
            core.stats.record_duplicate();
            return Err(ProcessorError::DuplicateBundle);
        }

        if bundle.is_expired() {
            self.maybe_send_status_report(
                core,
                &bundle,
                StatusReportKind::Deleted,
                StatusReason::LifetimeExpired,
            )
            .await;
            return Err(ProcessorError::BundleExpired);
        }

        let mut pack = core
            .store
            .push(&bundle)
            .await
            .map_err(|_| ProcessorError::BundleDeleted)?;
        core.stats.record_incoming();

        self.maybe_send_status_report(
            core,
            &bundle,
            StatusReportKind::Received,
            StatusReason::NoInformation,
        )
        .await;

        if bundle.is_administrative_record() {
            self.handle_administrative_record(&bundle);
            return Ok(());
        }

        for block in &bundle.canonicals {
            use crate::bpv7::bundle::{
                BLOCK_TYPE_BUNDLE_AGE, BLOCK_TYPE_HOP_COUNT, BLOCK_TYPE_PAYLOAD, BLOCK_TYPE_PREVIOUS_NODE,
            };
            if matches!(
                block.block_type,
                BLOCK_TYPE_PAYLOAD | BLOCK_TYPE_PREVIOUS_NODE | BLOCK_TYPE_BUNDLE_AGE | BLOCK_TYPE_HOP_COUNT
            ) {
                continue;
            }
            use crate::bpv7::BlockControlFlags;
            if block.flags.contains(BlockControlFlags::DELETE_BUNDLE_ON_FAILURE) {
                self.maybe_send_status_report(
                    core,
                    &bundle,
                    StatusReportKind::Deleted,
                    StatusReason::BlockUnintelligible,
                )
                .await;
                let _ = core.store.remove(&id).await;
                return Err(ProcessorError::BundleDeleted);
            } else if block.flags.contains(BlockControlFlags::STATUS_REPORT_ON_FAILURE) {
                self.maybe_send_status_report(
                    core,
                    &bundle,
                    StatusReportKind::Received,
                    StatusReason::BlockUnintelligible,
                )
                .await;
            }
        }

        pack.constraints.insert(Constraints::DISPATCH_PENDING);
        let _ = core.store.update_metadata(pack.clone()).await;
        self.dispatch(core, bundle, pack).await
    }

    /// A bundle originated locally (management API, application agent send).
    pub async fn transmit(&self, core: &DtnNode, bundle: Bundle) -> Result<(), ProcessorError> {
        if !core.is_local_endpoint(&bundle.primary.source) {
            return Err(ProcessorError::InvalidSource);
        }
        if bundle.is_expired() {
            return Err(ProcessorError::BundleExpired);
        }
        let mut pack = core
            .store
            .push(&bundle)
            .await
            .map_err(|_| ProcessorError::BundleDeleted)?;
        pack.constraints.insert(Constraints::DISPATCH_PENDING);
        let _ = core.store.update_metadata(pack.clone()).await;
        self.dispatch(core, bundle, pack).await
    }

    /// Re-attempts dispatch for a bundle still marked forward-pending, driven
    /// by the periodic maintenance sweep once at least one convergence layer
    /// is active.
    pub async fn retry_forward(
        &self,
        core: &DtnNode,
        bundle: Bundle,
        pack: BundlePack,
    ) -> Result<(), ProcessorError> {
        self.dispatch(core, bundle, pack).await
    }

    async fn dispatch(&self, core: &DtnNode, bundle: Bundle, mut pack: BundlePack) -> Result<(), ProcessorError> {
        pack.constraints.remove(Constraints::DISPATCH_PENDING);
        let _ = core.store.update_metadata(pack.clone()).await;

        let decision = core.get_routing_decision(&bundle).await;
        if decision.is_local_delivery {
            return self.local_delivery(core, bundle, pack).await;
        }
        if !decision.next_hops.is_empty() {
            pack.constraints.insert(Constraints::FORWARD_PENDING);
            let _ = core.store.update_metadata(pack.clone()).await;
            return self.forward(core, bundle, pack, decision.next_hops).await;
        }

        if !bundle.primary.destination.is_none() {
            self.maybe_send_status_report(
                core,
                &bundle,
                StatusReportKind::Deleted,
                StatusReason::NoRouteToDestination,
            )
            .await;
        }
        core.stats.record_failed();
        Ok(())
    }

    async fn forward(
        &self,
        core: &DtnNode,
        mut bundle: Bundle,
        mut pack: BundlePack,
        peers: Vec<crate::peer::Peer>,
    ) -> Result<(), ProcessorError> {
        if bundle.is_expired() {
            self.maybe_send_status_report(
                core,
                &bundle,
                StatusReportKind::Deleted,
                StatusReason::LifetimeExpired,
            )
            .await;
            pack.constraints.remove(Constraints::FORWARD_PENDING);
            pack.constraints.insert(Constraints::DELETED);
            let _ = core.store.update_metadata(pack).await;
            return Err(ProcessorError::BundleExpired);
        }

        bundle.set_previous_node(&core.node_id);
        bundle.increment_hop_count();

        let mut any_success = false;
        for peer in &peers {
            if core.send_bundle(&bundle, peer).await {
                any_success = true;
            }
        }

        pack.constraints.remove(Constraints::FORWARD_PENDING);
        let _ = core.store.update_metadata(pack).await;

        if any_success {
            self.maybe_send_status_report(
                core,
                &bundle,
                StatusReportKind::Forwarded,
                StatusReason::NoInformation,
            )
            .await;
        } else {
            core.stats.record_failed();
        }
        Ok(())
    }

    async fn local_delivery(
        &self,
        core: &DtnNode,
        bundle: Bundle,
        mut pack: BundlePack,
    ) -> Result<(), ProcessorError> {
        if !core.is_local_endpoint(&bundle.primary.destination) {
            return Err(ProcessorError::NoLocalEndpoint);
        }
        core.application_agent.deliver_bundle(bundle.clone());
        core.stats.record_delivered();
        self.maybe_send_status_report(
            core,
            &bundle,
            StatusReportKind::Delivered,
            StatusReason::NoInformation,
        )
        .await;
        pack.constraints.insert(Constraints::DELETED);
        let _ = core.store.update_metadata(pack).await;
        Ok(())
    }

    fn handle_administrative_record(&self, bundle: &Bundle) {
        match serde_cbor::from_slice::<crate::bpv7::StatusReport>(bundle.payload()) {
            Ok(report) => log::info!(
                "received status report: kind={:?} reason={:?} for bundle source={}",
                report.kind,
                report.reason_code,
                report.bundle_source
            ),
            Err(e) => log::warn!("unparseable administrative record: {e}"),
        }
    }

    async fn maybe_send_status_report(
        &self,
        core: &DtnNode,
        subject: &Bundle,
        kind: StatusReportKind,
        reason: StatusReason,
    ) {
        let Ok(Some(report_bundle)) =
            build_report_bundle(subject, kind, reason, &core.node_id, core.generate_status_reports)
        else {
            return;
        };
        Box::pin(self.transmit(core, report_bundle)).await.ok();
    }
}

impl Default for BundleProcessor {
    fn default() -> Self {
        Self::new()
    }
}
