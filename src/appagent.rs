//! Application agent (section 4.4): maps local endpoints to delivery
//! queues and matches group patterns for bundles that don't exactly match a
//! registered endpoint.

use crate::bpv7::{Bundle, EndpointId};
use crate::consts::PENDING_QUEUE_CAP;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// A registered local endpoint: either a pull queue or a push delegate.
enum Registration {
    Queue(mpsc::UnboundedSender<Bundle>),
    Delegate(Box<dyn Fn(Bundle) + Send + Sync>),
}

pub struct ApplicationAgent {
    registrations: RwLock<HashMap<EndpointId, Registration>>,
    pending: RwLock<HashMap<EndpointId, VecDeque<Bundle>>>,
}

impl ApplicationAgent {
    pub fn new() -> Self {
        ApplicationAgent {
            registrations: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Register a pull endpoint; returns the receiving half of its queue.
    /// Draining replays any bundles queued before registration, in FIFO
    /// order.
    pub fn register_queue(&self, eid: EndpointId) -> mpsc::UnboundedReceiver<Bundle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let drained: Vec<Bundle> = self
            .pending
            .write()
            .unwrap()
            .remove(&eid)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default();
        for bundle in drained {
            let _ = tx.send(bundle);
        }
        self.registrations
            .write()
            .unwrap()
            .insert(eid, Registration::Queue(tx));
        rx
    }

    /// Register a push endpoint whose delegate is invoked synchronously on
    /// each delivered bundle.
    pub fn register_delegate(&self, eid: EndpointId, delegate: Box<dyn Fn(Bundle) + Send + Sync>) {
        let drained: Vec<Bundle> = self
            .pending
            .write()
            .unwrap()
            .remove(&eid)
            .map(|q| q.into_iter().collect())
            .unwrap_or_default();
        for bundle in drained {
            delegate(bundle);
        }
        self.registrations
            .write()
            .unwrap()
            .insert(eid, Registration::Delegate(delegate));
    }

    pub fn unregister(&self, eid: &EndpointId) {
        self.registrations.write().unwrap().remove(eid);
    }

    pub fn is_registered(&self, eid: &EndpointId) -> bool {
        self.registrations.read().unwrap().contains_key(eid)
    }

    /// Deliver a bundle to its destination. Returns `true` iff delivered
    /// immediately to a registration (exact match, then pattern match);
    /// `false` means it was queued pending a later registration.
    pub fn deliver_bundle(&self, bundle: Bundle) -> bool {
        let destination = bundle.primary.destination.clone();
        {
            let registrations = self.registrations.read().unwrap();
            if let Some(reg) = registrations.get(&destination) {
                Self::dispatch(reg, bundle);
                return true;
            }
            for (pattern_eid, reg) in registrations.iter() {
                if destination.matches(&pattern_eid.description()) {
                    Self::dispatch(reg, bundle);
                    return true;
                }
            }
        }
        let mut pending = self.pending.write().unwrap();
        let queue = pending.entry(destination).or_default();
        if queue.len() >= PENDING_QUEUE_CAP {
            queue.pop_front();
        }
        queue.push_back(bundle);
        false
    }

    fn dispatch(reg: &Registration, bundle: Bundle) {
        match reg {
            Registration::Queue(tx) => {
                let _ = tx.send(bundle);
            }
            Registration::Delegate(delegate) => delegate(bundle),
        }
    }

    /// Returns and removes the oldest pending bundle queued for `eid`,
    /// used by the management API's `/endpoint` poll route.
    pub fn take_pending(&self, eid: &EndpointId) -> Option<Bundle> {
        self.pending.write().unwrap().get_mut(eid)?.pop_front()
    }
}

impl Default for ApplicationAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    fn bundle_to(dest: &str) -> Bundle {
        Bundle::new(eid("dtn://sender"), eid(dest), vec![1, 2, 3])
    }

    #[test]
    fn test_exact_match_delivers_immediately() {
        let agent = ApplicationAgent::new();
        let mut rx = agent.register_queue(eid("dtn://node1/echo"));
        let delivered = agent.deliver_bundle(bundle_to("dtn://node1/echo"));
        assert!(delivered);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_undelivered_bundle_is_queued_then_drained_on_registration() {
        let agent = ApplicationAgent::new();
        let delivered = agent.deliver_bundle(bundle_to("dtn://node1/later"));
        assert!(!delivered);
        let mut rx = agent.register_queue(eid("dtn://node1/later"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_pattern_match_delivers_to_group() {
        let agent = ApplicationAgent::new();
        let mut rx = agent.register_queue(eid("dtn://node1/app/*"));
        let delivered = agent.deliver_bundle(bundle_to("dtn://node1/app/inbox"));
        assert!(delivered);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_pending_queue_caps_and_drops_oldest() {
        let agent = ApplicationAgent::new();
        for i in 0..(PENDING_QUEUE_CAP + 5) {
            let bundle = Bundle::with_lifetime(
                eid("dtn://sender"),
                eid("dtn://node1/overflow"),
                vec![i as u8],
                3600,
                i as u64,
            );
            agent.deliver_bundle(bundle);
        }
        let mut count = 0;
        while agent.take_pending(&eid("dtn://node1/overflow")).is_some() {
            count += 1;
        }
        assert_eq!(count, PENDING_QUEUE_CAP);
    }

    #[test]
    fn test_unregister_falls_back_to_queueing() {
        let agent = ApplicationAgent::new();
        let _rx = agent.register_queue(eid("dtn://node1/x"));
        agent.unregister(&eid("dtn://node1/x"));
        let delivered = agent.deliver_bundle(bundle_to("dtn://node1/x"));
        assert!(!delivered);
        assert!(agent.take_pending(&eid("dtn://node1/x")).is_some());
    }
}
