//! The boundary between this crate and a full node's session layer.
//! `TcpTransport` below frames each message with a 4-byte big-endian length
//! prefix and a `bincode`-encoded payload, matching the rest of this
//! crate's serialization choice.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::addrman::AddressManager;
use crate::clock::Clock;
use crate::handlers;
use crate::model::{PeerEndpoint, TimestampedPeer};
use crate::relay::RelaySender;

/// Outbound wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundMessage {
    RequestPeers,
    RespondPeersFullNode { peer_list: Vec<TimestampedPeer> },
}

/// Inbound wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboundMessage {
    RespondPeers {
        peer_list: Vec<TimestampedPeer>,
        is_full_node: bool,
    },
    RequestPeers,
}

/// A peer's advertised identity, as returned by `get_full_node_peerinfos`
/// and `get_local_peerinfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub endpoint: PeerEndpoint,
    pub is_full_node: bool,
}

/// Opaque handle to an established session, returned by `start_client` and
/// accepted by `close`/`push_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// The session layer this crate relies on but does not itself implement.
/// Production code wires a real P2P stack (handshake, inventory relay,
/// block sync) behind this trait; [`TcpTransport`] below is a minimal
/// concrete implementation sufficient for the gossip surface this crate
/// owns.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_client(
        &self,
        endpoint: &PeerEndpoint,
        disconnect_after_handshake: bool,
    ) -> anyhow::Result<ConnectionId>;

    async fn push_message(&self, connection: ConnectionId, message: OutboundMessage) -> anyhow::Result<()>;

    async fn close(&self, connection: ConnectionId);

    fn get_outbound_connections(&self) -> Vec<ConnectionId>;
    fn get_full_node_connections(&self) -> Vec<ConnectionId>;
    fn get_connections(&self) -> Vec<ConnectionId>;
    fn get_full_node_peerinfos(&self) -> Vec<PeerInfo>;
    fn get_local_peerinfo(&self) -> PeerInfo;
    fn count_outbound_connections(&self) -> usize {
        self.get_outbound_connections().len()
    }

    fn endpoint_of(&self, connection: ConnectionId) -> Option<PeerEndpoint>;
}

struct Session {
    id: ConnectionId,
    endpoint: PeerEndpoint,
    // A tokio mutex, not parking_lot: the guard is held across the `.await`
    // points in `write_frame`, and only a tokio guard stays `Send` there.
    write_half: tokio::sync::Mutex<OwnedWriteHalf>,
    outbound: bool,
    is_full_node: bool,
}

/// The registered-callback context a session's reader task dispatches
/// inbound messages through, once the core has finished constructing its
/// address manager and relay handle (`TcpTransport::set_core`).
struct Core {
    addrman: Arc<AddressManager>,
    relay: RelaySender,
    clock: Arc<dyn Clock>,
}

/// Minimal concrete [`Transport`]: plain TCP with length-prefixed `bincode`
/// framing, no handshake negotiation beyond peer-info exchange. Good enough
/// to exercise discovery and relay end to end; a production deployment
/// would substitute a transport backed by the node's real session manager.
pub struct TcpTransport {
    local: PeerInfo,
    sessions: Mutex<Vec<Arc<Session>>>,
    next_id: std::sync::atomic::AtomicU64,
    core: OnceLock<Core>,
    /// Lets `&self` methods spawn 'static reader tasks over an owned
    /// `Arc<Self>`, without requiring every caller (the `Transport` trait
    /// takes `&self`) to already hold one.
    self_handle: OnceLock<Weak<TcpTransport>>,
}

impl TcpTransport {
    pub fn new(local_endpoint: PeerEndpoint) -> Arc<Self> {
        let this = Arc::new(Self {
            local: PeerInfo {
                endpoint: local_endpoint,
                is_full_node: true,
            },
            sessions: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
            core: OnceLock::new(),
            self_handle: OnceLock::new(),
        });
        let _ = this.self_handle.set(Arc::downgrade(&this));
        this
    }

    /// Registers the address manager and relay handle that inbound-message
    /// handlers dispatch into. Mirrors the `set_full_node_peers_callback`
    /// registration point: the transport owns session I/O, the core owns
    /// what happens to a decoded message.
    pub fn set_core(&self, addrman: Arc<AddressManager>, relay: RelaySender, clock: Arc<dyn Clock>) {
        let _ = self.core.set(Core { addrman, relay, clock });
    }

    /// Accept inbound TCP connections on `listener` forever, registering
    /// each as a full-node session.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    self.register(stream, addr, false);
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                }
            }
        }
    }

    fn register(&self, stream: TcpStream, addr: SocketAddr, outbound: bool) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        let (read_half, write_half) = stream.into_split();
        let session = Arc::new(Session {
            id,
            endpoint: PeerEndpoint::new(addr.ip().to_string(), addr.port()),
            write_half: tokio::sync::Mutex::new(write_half),
            outbound,
            is_full_node: true,
        });
        self.sessions.lock().push(session);
        if let Some(strong) = self.self_handle.get().and_then(Weak::upgrade) {
            tokio::spawn(strong.read_loop(id, read_half));
        }
        id
    }

    /// Reads frames off `read_half` until the peer disconnects, decoding
    /// each as an [`InboundMessage`] and dispatching it to the registered
    /// handlers in `handlers.rs`. A transient decode/IO error ends this
    /// session's reader without affecting any other.
    async fn read_loop(self: Arc<Self>, id: ConnectionId, mut read_half: OwnedReadHalf) {
        loop {
            let bytes = match Self::read_frame_from(&mut read_half).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(?id, %err, "session reader ending");
                    return;
                }
            };
            let message: InboundMessage = match bincode::deserialize(&bytes) {
                Ok(message) => message,
                Err(err) => {
                    warn!(?id, %err, "dropping malformed inbound frame");
                    continue;
                }
            };
            self.dispatch(id, message).await;
        }
    }

    async fn dispatch(&self, from: ConnectionId, message: InboundMessage) {
        let Some(core) = self.core.get() else {
            return;
        };
        let Some(source) = self.endpoint_of(from) else {
            return;
        };
        match message {
            InboundMessage::RespondPeers { peer_list, is_full_node } => {
                handlers::respond_peers(&core.addrman, &core.relay, &*core.clock, from, &source, is_full_node, peer_list);
            }
            InboundMessage::RequestPeers => {
                if let Some(reply) = handlers::request_peers(self, &core.addrman, from) {
                    if let Err(err) = self.push_message(from, reply).await {
                        warn!(?from, %err, "failed to answer request_peers");
                    }
                }
            }
        }
    }

    async fn write_frame(write_half: &mut OwnedWriteHalf, bytes: &[u8]) -> std::io::Result<()> {
        let len = bytes.len() as u32;
        write_half.write_all(&len.to_be_bytes()).await?;
        write_half.write_all(bytes).await
    }

    async fn read_frame_from(read_half: &mut OwnedReadHalf) -> std::io::Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        read_half.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        read_half.read_exact(&mut payload).await?;
        Ok(payload)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start_client(
        &self,
        endpoint: &PeerEndpoint,
        _disconnect_after_handshake: bool,
    ) -> anyhow::Result<ConnectionId> {
        let addr: SocketAddr = format!("{}:{}", endpoint.host, endpoint.port).parse()?;
        let stream = TcpStream::connect(addr).await?;
        debug!(%endpoint, "dialed peer");
        Ok(self.register(stream, addr, true))
    }

    async fn push_message(&self, connection: ConnectionId, message: OutboundMessage) -> anyhow::Result<()> {
        let session = {
            let sessions = self.sessions.lock();
            sessions.iter().find(|s| s.id == connection).cloned()
        };
        let Some(session) = session else {
            anyhow::bail!("unknown connection {:?}", connection);
        };
        let bytes = bincode::serialize(&message)?;
        let mut write_half = session.write_half.lock().await;
        Self::write_frame(&mut write_half, &bytes).await?;
        Ok(())
    }

    async fn close(&self, connection: ConnectionId) {
        self.sessions.lock().retain(|s| s.id != connection);
    }

    fn get_outbound_connections(&self) -> Vec<ConnectionId> {
        self.sessions.lock().iter().filter(|s| s.outbound).map(|s| s.id).collect()
    }

    fn get_full_node_connections(&self) -> Vec<ConnectionId> {
        self.sessions.lock().iter().filter(|s| s.is_full_node).map(|s| s.id).collect()
    }

    fn get_connections(&self) -> Vec<ConnectionId> {
        self.sessions.lock().iter().map(|s| s.id).collect()
    }

    fn get_full_node_peerinfos(&self) -> Vec<PeerInfo> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.is_full_node)
            .map(|s| PeerInfo {
                endpoint: s.endpoint.clone(),
                is_full_node: true,
            })
            .collect()
    }

    fn get_local_peerinfo(&self) -> PeerInfo {
        self.local.clone()
    }

    fn endpoint_of(&self, connection: ConnectionId) -> Option<PeerEndpoint> {
        self.sessions
            .lock()
            .iter()
            .find(|s| s.id == connection)
            .map(|s| s.endpoint.clone())
    }
}
