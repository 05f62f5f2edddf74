//! UDP convergence layer (section 4.6.2): one encoded bundle per datagram,
//! no framing, no ack, no retry. The receiver has no peer identity beyond
//! the packet's source address, so it stamps a synthetic connection id.

use crate::bpv7::{self, Bundle};
use crate::cla::{now_secs, ClaError, Connection, ConvergenceLayerAgent};
use crate::consts::udp::MAX_BUNDLE_SIZE;
use crate::peer::Peer;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, Notify};

pub struct UdpCla {
    id: String,
    bind_addr: String,
    max_bundle_size: usize,
    incoming_tx: mpsc::UnboundedSender<(Bundle, Connection)>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<(Bundle, Connection)>>>,
    connections: RwLock<Vec<Connection>>,
    stop_signal: Arc<Notify>,
}

impl UdpCla {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        UdpCla {
            id: "udp".to_string(),
            bind_addr: bind_addr.into(),
            max_bundle_size: MAX_BUNDLE_SIZE,
            incoming_tx: tx,
            incoming_rx: Mutex::new(Some(rx)),
            connections: RwLock::new(Vec::new()),
            stop_signal: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ConvergenceLayerAgent for UdpCla {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "udp"
    }

    async fn start(&self) -> Result<(), ClaError> {
        let socket = UdpSocket::bind(&self.bind_addr)
            .await
            .map_err(|e| ClaError::InvalidPeerAddress(e.to_string()))?;
        let tx = self.incoming_tx.clone();
        let stop_signal = self.stop_signal.clone();
        let max_size = self.max_bundle_size;
        tokio::spawn(async move {
            let mut buf = vec![0u8; max_size];
            loop {
                let received = tokio::select! {
                    r = socket.recv_from(&mut buf) => r,
                    _ = stop_signal.notified() => break,
                };
                let (len, addr) = match received {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                match bpv7::bundle::decode(&buf[..len]) {
                    Ok(bundle) => {
                        let connection = Connection::new(
                            format!("udp-{addr}-{}", now_secs()),
                            addr.to_string(),
                            "udp",
                        );
                        let _ = tx.send((bundle, connection));
                    }
                    Err(_) => continue,
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stop_signal.notify_waiters();
    }

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<(), ClaError> {
        let encoded = bpv7::bundle::encode(bundle).map_err(|e| ClaError::InvalidMessage(e.to_string()))?;
        if encoded.len() > self.max_bundle_size {
            return Err(ClaError::BundleTooLarge {
                actual: encoded.len(),
                max: self.max_bundle_size,
            });
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ClaError::InvalidPeerAddress(e.to_string()))?;
        socket
            .send_to(&encoded, &peer.address)
            .await
            .map_err(|e| ClaError::InvalidPeerAddress(e.to_string()))?;
        self.connections
            .write()
            .unwrap()
            .push(Connection::new(peer.address.clone(), peer.address.clone(), "udp"));
        Ok(())
    }

    async fn can_reach(&self, peer: &Peer) -> bool {
        peer.address.parse::<std::net::SocketAddr>().is_ok()
    }

    async fn get_connections(&self) -> Vec<Connection> {
        self.connections.read().unwrap().clone()
    }

    async fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<(Bundle, Connection)>> {
        self.incoming_rx.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpv7::EndpointId;
    use crate::peer::PeerKind;

    #[tokio::test]
    async fn test_oversize_bundle_rejected() {
        let cla = UdpCla::new("127.0.0.1:0");
        let bundle = Bundle::new(
            EndpointId::from("dtn://src"),
            EndpointId::from("dtn://dst"),
            vec![0u8; MAX_BUNDLE_SIZE + 1],
        );
        let peer = Peer::new(EndpointId::from("dtn://peer"), "127.0.0.1:9", PeerKind::Static);
        let result = cla.send_bundle(&bundle, &peer).await;
        assert!(matches!(result, Err(ClaError::BundleTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_send_and_receive_round_trip() {
        // Bind directly to learn the ephemeral port before starting the agent.
        let bound = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = bound.local_addr().unwrap();
        drop(bound);
        let receiver = UdpCla::new(addr.to_string());
        receiver.start().await.unwrap();
        let mut incoming = receiver.take_incoming().await.unwrap();

        let sender = UdpCla::new("127.0.0.1:0");
        let bundle = Bundle::new(EndpointId::from("dtn://src"), EndpointId::from("dtn://dst"), b"hi".to_vec());
        let peer = Peer::new(EndpointId::from("dtn://dst"), addr.to_string(), PeerKind::Static);
        sender.send_bundle(&bundle, &peer).await.unwrap();

        let (received, connection) = incoming.recv().await.unwrap();
        assert_eq!(received.id(), bundle.id());
        assert_eq!(connection.cla_type, "udp");
    }
}
