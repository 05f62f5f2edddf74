//! TCPCLv4 (RFC 9174) convergence layer (section 4.6.1). Grounded on the
//! teacher's `TcpClaListener`/`TcpClaClient` length-prefixed-CBOR exchange,
//! generalized into the full contact-header → SESS_INIT → message-loop state
//! machine, restricted to single-segment transfers as the source does.

use crate::bpv7::{self, Bundle, EndpointId};
use crate::cla::{now_secs, ClaError, Connection, ConvergenceLayerAgent};
use crate::consts::tcpcl::*;
use crate::peer::Peer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};

enum TcplMessage {
    XferSegment { flags: u8, transfer_id: u64, data: Vec<u8> },
    XferAck { flags: u8, transfer_id: u64, length: u64 },
    XferRefuse { reason: u8, transfer_id: u64 },
    Keepalive,
    SessTerm { flags: u8, reason: u8 },
    MsgReject { reason: u8, rejected_type: u8 },
}

async fn write_contact_header<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), ClaError> {
    w.write_all(&CONTACT_MAGIC).await.map_err(io_err)?;
    w.write_all(&[CONTACT_VERSION, 0x00]).await.map_err(io_err)?;
    Ok(())
}

async fn read_contact_header<R: AsyncRead + Unpin>(r: &mut R) -> Result<(), ClaError> {
    let mut buf = [0u8; 6];
    r.read_exact(&mut buf).await.map_err(|_| ClaError::IncompleteData)?;
    if buf[0..4] != CONTACT_MAGIC {
        return Err(ClaError::InvalidProtocol("bad contact magic".to_string()));
    }
    if buf[4] != CONTACT_VERSION {
        return Err(ClaError::UnsupportedVersion(buf[4]));
    }
    Ok(())
}

struct SessInitParams {
    keepalive_secs: u16,
    segment_mru: u64,
    transfer_mru: u64,
    node_id: String,
}

async fn write_sess_init<W: AsyncWrite + Unpin>(
    w: &mut W,
    params: &SessInitParams,
) -> Result<(), ClaError> {
    let node_bytes = params.node_id.as_bytes();
    w.write_all(&[MSG_SESS_INIT]).await.map_err(io_err)?;
    w.write_all(&params.keepalive_secs.to_be_bytes()).await.map_err(io_err)?;
    w.write_all(&params.segment_mru.to_be_bytes()).await.map_err(io_err)?;
    w.write_all(&params.transfer_mru.to_be_bytes()).await.map_err(io_err)?;
    w.write_all(&(node_bytes.len() as u16).to_be_bytes()).await.map_err(io_err)?;
    w.write_all(node_bytes).await.map_err(io_err)?;
    w.write_all(&0u32.to_be_bytes()).await.map_err(io_err)?; // extLen
    Ok(())
}

async fn read_sess_init<R: AsyncRead + Unpin>(r: &mut R) -> Result<SessInitParams, ClaError> {
    let mut ty = [0u8; 1];
    r.read_exact(&mut ty).await.map_err(|_| ClaError::IncompleteData)?;
    if ty[0] != MSG_SESS_INIT {
        return Err(ClaError::InvalidMessage(format!("expected SESS_INIT, got {}", ty[0])));
    }
    let mut fixed = [0u8; 2 + 8 + 8 + 2];
    r.read_exact(&mut fixed).await.map_err(|_| ClaError::IncompleteData)?;
    let keepalive_secs = u16::from_be_bytes([fixed[0], fixed[1]]);
    let segment_mru = u64::from_be_bytes(fixed[2..10].try_into().unwrap());
    let transfer_mru = u64::from_be_bytes(fixed[10..18].try_into().unwrap());
    let node_id_len = u16::from_be_bytes([fixed[18], fixed[19]]) as usize;
    let mut node_id_bytes = vec![0u8; node_id_len];
    r.read_exact(&mut node_id_bytes).await.map_err(|_| ClaError::IncompleteData)?;
    let node_id = String::from_utf8(node_id_bytes)
        .map_err(|_| ClaError::InvalidMessage("non-utf8 node id".to_string()))?;
    let mut ext_len_buf = [0u8; 4];
    r.read_exact(&mut ext_len_buf).await.map_err(|_| ClaError::IncompleteData)?;
    let ext_len = u32::from_be_bytes(ext_len_buf) as usize;
    let mut ext = vec![0u8; ext_len];
    r.read_exact(&mut ext).await.map_err(|_| ClaError::IncompleteData)?;
    Ok(SessInitParams {
        keepalive_secs,
        segment_mru,
        transfer_mru,
        node_id,
    })
}

async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &TcplMessage) -> Result<(), ClaError> {
    match msg {
        TcplMessage::XferSegment { flags, transfer_id, data } => {
            w.write_all(&[MSG_XFER_SEGMENT]).await.map_err(io_err)?;
            w.write_all(&[*flags]).await.map_err(io_err)?;
            w.write_all(&transfer_id.to_be_bytes()).await.map_err(io_err)?;
            // One transfer-length extension: type(u16) + len(u16) + value(u64).
            let mut ext = Vec::new();
            ext.extend_from_slice(&EXT_TRANSFER_LENGTH.to_be_bytes());
            ext.extend_from_slice(&8u16.to_be_bytes());
            ext.extend_from_slice(&(data.len() as u64).to_be_bytes());
            w.write_all(&(ext.len() as u32).to_be_bytes()).await.map_err(io_err)?;
            w.write_all(&ext).await.map_err(io_err)?;
            w.write_all(&(data.len() as u64).to_be_bytes()).await.map_err(io_err)?;
            w.write_all(data).await.map_err(io_err)?;
        }
        TcplMessage::XferAck { flags, transfer_id, length } => {
            w.write_all(&[MSG_XFER_ACK]).await.map_err(io_err)?;
            w.write_all(&[*flags]).await.map_err(io_err)?;
            w.write_all(&transfer_id.to_be_bytes()).await.map_err(io_err)?;
            w.write_all(&length.to_be_bytes()).await.map_err(io_err)?;
        }
        TcplMessage::XferRefuse { reason, transfer_id } => {
            w.write_all(&[MSG_XFER_REFUSE]).await.map_err(io_err)?;
            w.write_all(&[*reason]).await.map_err(io_err)?;
            w.write_all(&transfer_id.to_be_bytes()).await.map_err(io_err)?;
        }
        TcplMessage::Keepalive => {
            w.write_all(&[MSG_KEEPALIVE]).await.map_err(io_err)?;
        }
        TcplMessage::SessTerm { flags, reason } => {
            w.write_all(&[MSG_SESS_TERM]).await.map_err(io_err)?;
            w.write_all(&[*flags, *reason]).await.map_err(io_err)?;
        }
        TcplMessage::MsgReject { reason, rejected_type } => {
            w.write_all(&[MSG_REJECT]).await.map_err(io_err)?;
            w.write_all(&[*reason, *rejected_type]).await.map_err(io_err)?;
        }
    }
    w.flush().await.map_err(io_err)?;
    Ok(())
}

async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<TcplMessage, ClaError> {
    let mut ty = [0u8; 1];
    r.read_exact(&mut ty).await.map_err(|_| ClaError::ConnectionClosed)?;
    match ty[0] {
        MSG_XFER_SEGMENT => {
            let mut head = [0u8; 1 + 8 + 4];
            r.read_exact(&mut head).await.map_err(|_| ClaError::IncompleteData)?;
            let flags = head[0];
            let transfer_id = u64::from_be_bytes(head[1..9].try_into().unwrap());
            let ext_len = u32::from_be_bytes(head[9..13].try_into().unwrap()) as usize;
            let mut ext = vec![0u8; ext_len];
            r.read_exact(&mut ext).await.map_err(|_| ClaError::IncompleteData)?;
            let mut data_len_buf = [0u8; 8];
            r.read_exact(&mut data_len_buf).await.map_err(|_| ClaError::IncompleteData)?;
            let data_len = u64::from_be_bytes(data_len_buf) as usize;
            let mut data = vec![0u8; data_len];
            r.read_exact(&mut data).await.map_err(|_| ClaError::IncompleteData)?;
            Ok(TcplMessage::XferSegment { flags, transfer_id, data })
        }
        MSG_XFER_ACK => {
            let mut body = [0u8; 1 + 8 + 8];
            r.read_exact(&mut body).await.map_err(|_| ClaError::IncompleteData)?;
            Ok(TcplMessage::XferAck {
                flags: body[0],
                transfer_id: u64::from_be_bytes(body[1..9].try_into().unwrap()),
                length: u64::from_be_bytes(body[9..17].try_into().unwrap()),
            })
        }
        MSG_XFER_REFUSE => {
            let mut body = [0u8; 1 + 8];
            r.read_exact(&mut body).await.map_err(|_| ClaError::IncompleteData)?;
            Ok(TcplMessage::XferRefuse {
                reason: body[0],
                transfer_id: u64::from_be_bytes(body[1..9].try_into().unwrap()),
            })
        }
        MSG_KEEPALIVE => Ok(TcplMessage::Keepalive),
        MSG_SESS_TERM => {
            let mut body = [0u8; 2];
            r.read_exact(&mut body).await.map_err(|_| ClaError::IncompleteData)?;
            Ok(TcplMessage::SessTerm { flags: body[0], reason: body[1] })
        }
        MSG_REJECT => {
            let mut body = [0u8; 2];
            r.read_exact(&mut body).await.map_err(|_| ClaError::IncompleteData)?;
            Ok(TcplMessage::MsgReject { reason: body[0], rejected_type: body[1] })
        }
        other => Err(ClaError::InvalidMessage(format!("unknown message type {other}"))),
    }
}

fn io_err(e: std::io::Error) -> ClaError {
    ClaError::InvalidProtocol(e.to_string())
}

/// Receive loop for one established connection: decodes `XFER_SEGMENT`s,
/// acks or refuses, forwards complete bundles upstream, exits on
/// `SESS_TERM` or IO error. Runs a keepalive-send task alongside (section
/// 4.6.1) so the session stays alive on links with long idle gaps between
/// transfers.
async fn receive_loop<S>(
    stream: S,
    tx: mpsc::UnboundedSender<(Bundle, Connection)>,
    connection: Connection,
    keepalive_secs: u16,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, writer) = io::split(stream);
    let writer = Arc::new(Mutex::new(writer));

    let keepalive_task = (keepalive_secs > 0).then(|| {
        let writer = writer.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(keepalive_secs as u64));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut w = writer.lock().await;
                if write_message(&mut *w, &TcplMessage::Keepalive).await.is_err() {
                    break;
                }
            }
        })
    });

    loop {
        let msg = match read_message(&mut reader).await {
            Ok(m) => m,
            Err(_) => break,
        };
        match msg {
            TcplMessage::XferSegment { transfer_id, data, .. } => {
                match bpv7::bundle::decode(&data) {
                    Ok(bundle) => {
                        let ack = TcplMessage::XferAck {
                            flags: XFER_FLAG_START | XFER_FLAG_END,
                            transfer_id,
                            length: data.len() as u64,
                        };
                        let acked = write_message(&mut *writer.lock().await, &ack).await;
                        if acked.is_err() {
                            break;
                        }
                        if tx.send((bundle, connection.clone())).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let refuse = TcplMessage::XferRefuse { reason: 0, transfer_id };
                        let refused = write_message(&mut *writer.lock().await, &refuse).await;
                        if refused.is_err() {
                            break;
                        }
                    }
                }
            }
            TcplMessage::Keepalive => continue,
            TcplMessage::SessTerm { .. } => break,
            _ => continue,
        }
    }
    if let Some(task) = keepalive_task {
        task.abort();
    }
}

pub struct TcpCla {
    id: String,
    bind_addr: String,
    node_id: EndpointId,
    incoming_tx: mpsc::UnboundedSender<(Bundle, Connection)>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<(Bundle, Connection)>>>,
    connections: RwLock<Vec<Connection>>,
    next_transfer_id: AtomicU64,
    stop_signal: Arc<Notify>,
}

impl TcpCla {
    pub fn new(bind_addr: impl Into<String>, node_id: EndpointId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        TcpCla {
            id: "tcp".to_string(),
            bind_addr: bind_addr.into(),
            node_id,
            incoming_tx: tx,
            incoming_rx: Mutex::new(Some(rx)),
            connections: RwLock::new(Vec::new()),
            next_transfer_id: AtomicU64::new(1),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    fn sess_init_params(&self) -> SessInitParams {
        SessInitParams {
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            segment_mru: DEFAULT_SEGMENT_MRU,
            transfer_mru: DEFAULT_TRANSFER_MRU,
            node_id: self.node_id.description(),
        }
    }
}

#[async_trait]
impl ConvergenceLayerAgent for TcpCla {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "tcp"
    }

    async fn start(&self) -> Result<(), ClaError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| ClaError::InvalidPeerAddress(e.to_string()))?;
        let tx = self.incoming_tx.clone();
        let params = self.sess_init_params();
        let stop_signal = self.stop_signal.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    a = listener.accept() => a,
                    _ = stop_signal.notified() => break,
                };
                let (mut stream, addr) = match accepted {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let tx = tx.clone();
                let params = SessInitParams {
                    keepalive_secs: params.keepalive_secs,
                    segment_mru: params.segment_mru,
                    transfer_mru: params.transfer_mru,
                    node_id: params.node_id.clone(),
                };
                tokio::spawn(async move {
                    if inbound_handshake(&mut stream, &params).await.is_err() {
                        return;
                    }
                    let connection = Connection::new(addr.to_string(), addr.to_string(), "tcp");
                    receive_loop(stream, tx, connection, params.keepalive_secs).await;
                });
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stop_signal.notify_waiters();
    }

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<(), ClaError> {
        let mut stream = TcpStream::connect(&peer.address)
            .await
            .map_err(|e| ClaError::InvalidPeerAddress(e.to_string()))?;
        let params = self.sess_init_params();
        outbound_handshake(&mut stream, &params).await?;

        let encoded = bpv7::bundle::encode(bundle)
            .map_err(|e| ClaError::InvalidMessage(e.to_string()))?;
        let transfer_id = self.next_transfer_id.fetch_add(1, Ordering::Relaxed);
        let segment = TcplMessage::XferSegment {
            flags: XFER_FLAG_START | XFER_FLAG_END,
            transfer_id,
            data: encoded,
        };
        write_message(&mut stream, &segment).await?;

        match read_message(&mut stream).await {
            Ok(TcplMessage::XferAck { .. }) => {
                self.connections.write().unwrap().push(Connection::new(
                    peer.address.clone(),
                    peer.address.clone(),
                    "tcp",
                ));
                Ok(())
            }
            Ok(TcplMessage::XferRefuse { .. }) => {
                Err(ClaError::InvalidMessage("peer refused transfer".to_string()))
            }
            _ => Err(ClaError::ConnectionClosed),
        }
    }

    async fn can_reach(&self, peer: &Peer) -> bool {
        TcpStream::connect(&peer.address).await.is_ok()
    }

    async fn get_connections(&self) -> Vec<Connection> {
        self.connections.read().unwrap().clone()
    }

    async fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<(Bundle, Connection)>> {
        self.incoming_rx.lock().await.take()
    }
}

async fn outbound_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    params: &SessInitParams,
) -> Result<(), ClaError> {
    write_contact_header(stream).await?;
    read_contact_header(stream).await?;
    write_sess_init(stream, params).await?;
    read_sess_init(stream).await?;
    Ok(())
}

async fn inbound_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    params: &SessInitParams,
) -> Result<(), ClaError> {
    read_contact_header(stream).await?;
    write_contact_header(stream).await?;
    read_sess_init(stream).await?;
    write_sess_init(stream, params).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_contact_header_round_trip() {
        let (mut a, mut b) = duplex(64);
        write_contact_header(&mut a).await.unwrap();
        read_contact_header(&mut b).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_magic_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(b"xxxx\x04\x00").await.unwrap();
        let result = read_contact_header(&mut b).await;
        assert!(matches!(result, Err(ClaError::InvalidProtocol(_))));
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(b"dtn!\x09\x00").await.unwrap();
        let result = read_contact_header(&mut b).await;
        assert!(matches!(result, Err(ClaError::UnsupportedVersion(9))));
    }

    #[tokio::test]
    async fn test_sess_init_round_trip() {
        let (mut a, mut b) = duplex(256);
        let params = SessInitParams {
            keepalive_secs: 15,
            segment_mru: 1024,
            transfer_mru: 2048,
            node_id: "dtn://n1".to_string(),
        };
        write_sess_init(&mut a, &params).await.unwrap();
        let decoded = read_sess_init(&mut b).await.unwrap();
        assert_eq!(decoded.keepalive_secs, 15);
        assert_eq!(decoded.node_id, "dtn://n1");
    }

    #[tokio::test]
    async fn test_xfer_segment_round_trip_acks_with_matching_length() {
        let (mut a, mut b) = duplex(4096);
        let bundle = Bundle::new(EndpointId::from("dtn://src"), EndpointId::from("dtn://dst"), b"hi".to_vec());
        let encoded = bpv7::bundle::encode(&bundle).unwrap();
        let segment = TcplMessage::XferSegment {
            flags: XFER_FLAG_START | XFER_FLAG_END,
            transfer_id: 1,
            data: encoded.clone(),
        };
        write_message(&mut a, &segment).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new("c1", "peer", "tcp");
        tokio::spawn(async move {
            receive_loop(b, tx, connection, 0).await;
        });

        match read_message(&mut a).await.unwrap() {
            TcplMessage::XferAck { length, .. } => assert_eq!(length, encoded.len() as u64),
            _ => panic!("expected XferAck"),
        }
        let (received, _conn) = rx.recv().await.unwrap();
        assert_eq!(received.id(), bundle.id());
    }

    #[tokio::test]
    async fn test_garbage_segment_is_refused() {
        let (mut a, b) = duplex(4096);
        let segment = TcplMessage::XferSegment {
            flags: XFER_FLAG_START | XFER_FLAG_END,
            transfer_id: 7,
            data: vec![0xff, 0xff, 0xff],
        };
        write_message(&mut a, &segment).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new("c1", "peer", "tcp");
        tokio::spawn(async move {
            receive_loop(b, tx, connection, 0).await;
        });
        match read_message(&mut a).await.unwrap() {
            TcplMessage::XferRefuse { transfer_id, .. } => assert_eq!(transfer_id, 7),
            _ => panic!("expected XferRefuse"),
        }
    }

    #[tokio::test]
    async fn test_keepalive_task_sends_on_interval() {
        let (mut a, b) = duplex(4096);
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::new("c1", "peer", "tcp");
        tokio::spawn(async move {
            receive_loop(b, tx, connection, 1).await;
        });
        match read_message(&mut a).await.unwrap() {
            TcplMessage::Keepalive => {}
            _ => panic!("expected Keepalive"),
        }
    }
}
