//! Datagram transport
//!
//! Delivery is best-effort: messages may be lost, duplicated or reordered and
//! the protocol tolerates all three. [`UdpTransport`] is the production
//! implementation. [`MemoryNetwork`] connects any number of in-process
//! [`MemoryTransport`]s with the same semantics, for tests.

use crate::error::{Result, SwimError};
use crate::member::PeerId;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

/// Receive buffer size; large enough for any UDP payload
const RECV_BUFFER_SIZE: usize = 65_536;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `to`
    async fn send(&self, bytes: &[u8], to: &PeerId) -> Result<()>;

    /// Wait for the next datagram and the address it came from
    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)>;

    /// Address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;
}

// ============================================================================
// UDP
// ============================================================================

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind to `addr` (`host:port`, port 0 for ephemeral)
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(addr = %socket.local_addr()?, "UDP transport bound");
        Ok(Self { socket })
    }

    async fn resolve(peer: &PeerId) -> Result<SocketAddr> {
        lookup_host((peer.host.as_str(), peer.port))
            .await
            .map_err(|e| SwimError::Network(format!("failed to resolve {}: {}", peer, e)))?
            .next()
            .ok_or_else(|| SwimError::Unreachable(peer.clone()))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, bytes: &[u8], to: &PeerId) -> Result<()> {
        let addr = Self::resolve(to).await?;
        self.socket.send_to(bytes, addr).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

// ============================================================================
// In-memory
// ============================================================================

type Datagram = (Vec<u8>, SocketAddr);

/// Shared switchboard for in-process transports. Every endpoint lives on
/// 127.0.0.1; ports are assigned from 40000 upwards unless requested.
#[derive(Clone)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<PeerId, mpsc::UnboundedSender<Datagram>>>,
    blocked: Arc<DashSet<(PeerId, PeerId)>>,
    next_port: Arc<AtomicU16>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
            blocked: Arc::new(DashSet::new()),
            next_port: Arc::new(AtomicU16::new(40_000)),
        }
    }

    /// Attach a new endpoint. Port 0 picks a free one.
    pub fn bind(&self, port: u16) -> Result<MemoryTransport> {
        let port = if port == 0 {
            self.next_port.fetch_add(1, Ordering::Relaxed)
        } else {
            port
        };
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let id = PeerId::from(addr);

        let (tx, rx) = mpsc::unbounded_channel();
        let registration = tx.downgrade();
        match self.endpoints.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(SwimError::Network(format!("address in use: {}", addr)));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }

        Ok(MemoryTransport {
            network: self.clone(),
            addr,
            registration,
            inbox: Mutex::new(rx),
        })
    }

    /// Drop every datagram addressed to `peer` from now on
    pub fn disconnect(&self, peer: &PeerId) -> bool {
        self.endpoints.remove(peer).is_some()
    }

    /// Drop traffic between `a` and `b` in both directions
    pub fn block(&self, a: &PeerId, b: &PeerId) {
        self.blocked.insert((a.clone(), b.clone()));
        self.blocked.insert((b.clone(), a.clone()));
    }

    pub fn unblock(&self, a: &PeerId, b: &PeerId) {
        self.blocked.remove(&(a.clone(), b.clone()));
        self.blocked.remove(&(b.clone(), a.clone()));
    }

    fn deliver(&self, bytes: &[u8], from: SocketAddr, to: &PeerId) {
        if self.blocked.contains(&(PeerId::from(from), to.clone())) {
            trace!(%from, %to, "Datagram blocked");
            return;
        }
        let delivered = self
            .endpoints
            .get(to)
            .map(|tx| tx.send((bytes.to_vec(), from)).is_ok())
            .unwrap_or(false);
        if !delivered {
            trace!(%from, %to, "Datagram dropped");
        }
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    addr: SocketAddr,
    registration: mpsc::WeakUnboundedSender<Datagram>,
    inbox: Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, bytes: &[u8], to: &PeerId) -> Result<()> {
        self.network.deliver(bytes, self.addr, to);
        Ok(())
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(SwimError::TransportClosed)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        // The port may have been disconnected and bound again by someone else
        if let Some(own) = self.registration.upgrade() {
            self.network
                .endpoints
                .remove_if(&PeerId::from(self.addr), |_, tx| tx.same_channel(&own));
        }
    }
}
