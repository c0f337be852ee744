//! In-process network for nodes with [`NodeAddress::Local`] addresses.
//!
//! Each bound name maps to a channel of server-side pipe halves. Connecting
//! creates a `tokio::io::duplex` pair and hands one half to the listener, so
//! nodes and clients exchange real bytes through the same codec as TCP, with
//! no sockets involved.
//!
//! ```text
//! connect("node-3") ──► endpoints["node-3"] ──► LocalListener::accept()
//!        │                                              │
//!   DuplexStream  ◄═══════════ duplex pipe ═══════════► DuplexStream
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protosim_types::NodeAddress;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Buffer size of each direction of an in-process pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Pending connections a local listener queues before connects fail.
const BACKLOG: usize = 128;

#[derive(Debug)]
struct Endpoint {
    id: u64,
    incoming: mpsc::Sender<DuplexStream>,
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: DashMap<String, Endpoint>,
    bind_delays: DashMap<String, Duration>,
    next_id: AtomicU64,
}

/// Table of in-process listeners. Cheap to clone; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later bind of `name` take `delay` before it completes.
    pub fn set_bind_delay(&self, name: impl Into<String>, delay: Duration) {
        self.inner.bind_delays.insert(name.into(), delay);
    }

    pub fn clear_bind_delay(&self, name: &str) {
        self.inner.bind_delays.remove(name);
    }

    /// Listen on `name`. Fails with `AddrInUse` if someone already does.
    pub async fn bind(&self, name: &str) -> io::Result<LocalListener> {
        let delay = self.inner.bind_delays.get(name).map(|d| *d);
        if let Some(delay) = delay {
            trace!(name, ?delay, "Delaying local bind");
            tokio::time::sleep(delay).await;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(BACKLOG);
        match self.inner.endpoints.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("local address {} already in use", name),
                ))
            }
            Entry::Vacant(entry) => {
                entry.insert(Endpoint { id, incoming: tx });
            }
        }
        debug!(name, "Local listener bound");
        Ok(LocalListener {
            name: name.to_string(),
            id,
            incoming: rx,
            network: self.clone(),
        })
    }

    /// Open a pipe to the listener on `name`.
    pub async fn connect(&self, name: &str) -> io::Result<DuplexStream> {
        let incoming = self
            .inner
            .endpoints
            .get(name)
            .map(|endpoint| endpoint.incoming.clone())
            .ok_or_else(|| refused(name))?;
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        incoming.send(server).await.map_err(|_| refused(name))?;
        Ok(client)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.inner.endpoints.contains_key(name)
    }
}

fn refused(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("nothing listening on local address {}", name),
    )
}

/// Accepting side of a local address. Dropping it unbinds the name.
#[derive(Debug)]
pub struct LocalListener {
    name: String,
    id: u64,
    incoming: mpsc::Receiver<DuplexStream>,
    network: LocalNetwork,
}

impl LocalListener {
    pub async fn accept(&mut self) -> io::Result<DuplexStream> {
        self.incoming.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "local listener closed")
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        self.network
            .inner
            .endpoints
            .remove_if(&self.name, |_, endpoint| endpoint.id == self.id);
        // Pipes queued but never accepted see end of stream.
        self.incoming.close();
        trace!(name = %self.name, "Local listener unbound");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transport-independent stream and listener
// ═══════════════════════════════════════════════════════════════════════

/// A client connection as seen by a node.
#[derive(Debug)]
pub enum NodeStream {
    Tcp(TcpStream),
    Local(DuplexStream),
}

impl NodeStream {
    /// Human-readable peer, for logs and the activity log.
    pub fn peer(&self) -> String {
        match self {
            NodeStream::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            NodeStream::Local(_) => "local".to_string(),
        }
    }
}

impl AsyncRead for NodeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            NodeStream::Local(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NodeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            NodeStream::Local(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            NodeStream::Local(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NodeStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            NodeStream::Local(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A bound listener of either kind.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    Local(LocalListener),
}

impl Listener {
    /// Bind `address`, returning the listener and the address actually bound
    /// (port 0 is replaced by the port the OS picked).
    pub(crate) async fn bind(
        address: &NodeAddress,
        local: &LocalNetwork,
    ) -> io::Result<(Self, NodeAddress)> {
        match address {
            NodeAddress::Inet(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let bound = listener.local_addr()?;
                Ok((Listener::Tcp(listener), NodeAddress::Inet(bound)))
            }
            NodeAddress::Local(name) => {
                let listener = local.bind(name).await?;
                Ok((Listener::Local(listener), address.clone()))
            }
        }
    }

    pub(crate) async fn accept(&mut self) -> io::Result<NodeStream> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok(NodeStream::Tcp(stream))
            }
            Listener::Local(listener) => listener.accept().await.map(NodeStream::Local),
        }
    }
}

/// Connect to a node address of either kind.
pub async fn connect(address: &NodeAddress, local: &LocalNetwork) -> io::Result<NodeStream> {
    match address {
        NodeAddress::Inet(addr) => TcpStream::connect(addr).await.map(NodeStream::Tcp),
        NodeAddress::Local(name) => local.connect(name).await.map(NodeStream::Local),
    }
}
