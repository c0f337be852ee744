//! Registered topology: clusters, data centers and nodes bound to listeners.
//!
//! # Admission
//!
//! Each [`BoundNode`] decides how new connections are treated:
//!
//! ```text
//!                 reject(RejectStartup)
//!   ┌───────────┐ ────────────────────► ┌──────────────────┐
//!   │ Accepting │                       │ RejectingStartup │  listener open,
//!   └───────────┘ ◄──────────────────── └──────────────────┘  STARTUP unanswered
//!      │    ▲          accept()
//!      │    │ accept(): re-bind same address
//!      ▼    │
//!   ┌───────────┐
//!   │  Unbound  │  listener closed, connects refused
//!   └───────────┘
//! ```
//!
//! A rejection with `after > 0` lets that many more connections through
//! before it takes effect. Connections that are already open are never
//! affected by admission changes.

use crate::connection::{self, ConnectionHandle};
use crate::error::ServerError;
use crate::local::{Listener, NodeStream};
use crate::server::Shared;
use dashmap::DashMap;
use parking_lot::Mutex;
use protosim_stubbing::CloseKind;
use protosim_types::{
    ClusterId, ClusterTopology, DataCenterId, NodeAddress, NodeId, NodeKey, NodeTopology,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// How a node treats new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionState {
    Accepting,
    /// Connections open, but their STARTUP gets no answer.
    RejectingStartup,
    /// The listener is closed.
    Unbound,
}

/// What [`BoundNode::reject_new_connections`] switches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectScope {
    RejectStartup,
    Unbind,
}

#[derive(Debug)]
struct Admission {
    state: AdmissionState,
    /// Rejection waiting for `remaining` more connections.
    pending: Option<(u32, RejectScope)>,
}

/// What the accept loop does with a freshly accepted connection.
struct Admitted {
    reject_startup: bool,
    unbind_now: bool,
}

#[derive(Debug)]
struct ListenerSlot {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// ═══════════════════════════════════════════════════════════════════════
// BoundNode
// ═══════════════════════════════════════════════════════════════════════

/// A node listening on its address.
#[derive(Debug)]
pub struct BoundNode {
    key: NodeKey,
    name: String,
    address: NodeAddress,
    /// Whether `address` came from the server's resolver.
    resolved: bool,
    topology: Arc<ClusterTopology>,
    shared: Weak<Shared>,
    admission: Mutex<Admission>,
    listener: Mutex<Option<ListenerSlot>>,
    /// Serializes admission changes that re-bind or unbind.
    transition: tokio::sync::Mutex<()>,
    connections: DashMap<u64, ConnectionHandle>,
    next_connection: AtomicU64,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl BoundNode {
    pub(crate) fn new(
        node: &NodeTopology,
        resolved: bool,
        topology: Arc<ClusterTopology>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            key: node.key,
            name: node.name.clone(),
            address: node.address.clone(),
            resolved,
            topology,
            shared,
            admission: Mutex::new(Admission {
                state: AdmissionState::Accepting,
                pending: None,
            }),
            listener: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            connections: DashMap::new(),
            next_connection: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn key(&self) -> NodeKey {
        self.key
    }

    pub fn id(&self) -> NodeId {
        self.key.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address the node listens on.
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn topology(&self) -> &Arc<ClusterTopology> {
        &self.topology
    }

    pub fn admission_state(&self) -> AdmissionState {
        self.admission.lock().state
    }

    /// Whether the listener is currently open.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|slot| !slot.task.is_finished())
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Start serving on an already bound listener.
    pub(crate) fn start(self: &Arc<Self>, listener: Listener) {
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(accept_loop(Arc::clone(self), listener, cancel.clone()));
        *self.listener.lock() = Some(ListenerSlot { cancel, task });
    }

    /// Stop admitting connections normally.
    ///
    /// With `after <= 0` the rejection applies to the next connection attempt.
    /// Otherwise exactly `after` more connections are accepted first.
    /// Existing connections stay open either way.
    pub async fn reject_new_connections(
        self: &Arc<Self>,
        after: i32,
        scope: RejectScope,
    ) -> Result<(), ServerError> {
        let _transition = self.transition.lock().await;
        if self.cancel.is_cancelled() {
            return Err(ServerError::Shutdown);
        }

        if after > 0 {
            self.admission.lock().pending = Some((after as u32, scope));
            debug!(node = %self.key, after, ?scope, "Rejection scheduled");
            return Ok(());
        }

        match scope {
            RejectScope::RejectStartup => {
                if self.admission_state() == AdmissionState::Unbound {
                    self.stop_listener().await;
                    self.rebind().await?;
                }
                let mut admission = self.admission.lock();
                admission.state = AdmissionState::RejectingStartup;
                admission.pending = None;
            }
            RejectScope::Unbind => {
                {
                    let mut admission = self.admission.lock();
                    admission.state = AdmissionState::Unbound;
                    admission.pending = None;
                }
                self.stop_listener().await;
            }
        }
        info!(node = %self.key, ?scope, "Rejecting new connections");
        Ok(())
    }

    /// Go back to accepting, re-binding the same address if unbound.
    pub async fn accept_new_connections(self: &Arc<Self>) -> Result<(), ServerError> {
        let _transition = self.transition.lock().await;
        if self.cancel.is_cancelled() {
            return Err(ServerError::Shutdown);
        }

        let unbound = {
            let mut admission = self.admission.lock();
            admission.pending = None;
            admission.state == AdmissionState::Unbound
        };
        if unbound {
            self.stop_listener().await;
            self.rebind().await?;
        }
        self.admission.lock().state = AdmissionState::Accepting;
        info!(node = %self.key, "Accepting new connections");
        Ok(())
    }

    /// Close every open connection of this node. Returns how many were asked to close.
    pub fn close_connections(&self, kind: CloseKind) -> usize {
        let mut closed = 0;
        for entry in self.connections.iter() {
            if entry.value().close(kind) {
                closed += 1;
            }
        }
        debug!(node = %self.key, ?kind, closed, "Closing connections");
        closed
    }

    /// Close the listener and every connection, then wait for them to finish.
    pub(crate) async fn shutdown(&self) {
        let _transition = self.transition.lock().await;
        self.cancel.cancel();
        self.stop_listener().await;
        self.tasks.close();
        self.tasks.wait().await;
        debug!(node = %self.key, "Node shut down");
    }

    async fn stop_listener(&self) {
        let slot = self.listener.lock().take();
        if let Some(slot) = slot {
            slot.cancel.cancel();
            if let Err(e) = slot.task.await {
                warn!(node = %self.key, error = ?e, "Listener task failed");
            }
        }
    }

    async fn rebind(self: &Arc<Self>) -> Result<(), ServerError> {
        let shared = self.shared.upgrade().ok_or(ServerError::Shutdown)?;
        let (listener, _) = Listener::bind(&self.address, &shared.local)
            .await
            .map_err(|source| ServerError::Bind {
                node: self.key,
                address: self.address.clone(),
                source,
            })?;
        self.start(listener);
        debug!(node = %self.key, address = %self.address, "Listener re-bound");
        Ok(())
    }

    /// Apply admission to a connection that was just accepted.
    fn admit(&self) -> Admitted {
        let mut admission = self.admission.lock();
        let reject_startup = admission.state == AdmissionState::RejectingStartup;
        let mut unbind_now = false;
        if let Some((remaining, scope)) = admission.pending {
            if remaining <= 1 {
                admission.pending = None;
                match scope {
                    RejectScope::RejectStartup => {
                        admission.state = AdmissionState::RejectingStartup
                    }
                    RejectScope::Unbind => {
                        admission.state = AdmissionState::Unbound;
                        unbind_now = true;
                    }
                }
            } else {
                admission.pending = Some((remaining - 1, scope));
            }
        }
        Admitted {
            reject_startup,
            unbind_now,
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: NodeStream, reject_startup: bool) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let peer = stream.peer();
        let (handle, control) = ConnectionHandle::new(peer.clone());
        self.connections.insert(id, handle);
        debug!(node = %self.key, connection = id, %peer, reject_startup, "Connection accepted");

        let node = Arc::clone(self);
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            let context = connection::Context {
                id,
                peer,
                node: Arc::clone(&node),
                shared,
                reject_startup,
                control,
                cancel,
            };
            connection::run(context, stream).await;
            node.connections.remove(&id);
        });
    }
}

async fn accept_loop(node: Arc<BoundNode>, mut listener: Listener, cancel: CancellationToken) {
    info!(node = %node.key, address = %node.address, "Listening");
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(stream) => {
                let admitted = node.admit();
                node.spawn_connection(stream, admitted.reject_startup);
                if admitted.unbind_now {
                    info!(node = %node.key, "Unbinding after scheduled connections");
                    break;
                }
            }
            Err(e) if matches!(listener, Listener::Local(_)) => {
                debug!(node = %node.key, error = %e, "Local listener closed");
                break;
            }
            Err(e) => {
                warn!(node = %node.key, error = %e, "Accept failed");
            }
        }
    }
    drop(listener);
    debug!(node = %node.key, "Listener closed");
}

// ═══════════════════════════════════════════════════════════════════════
// BoundDataCenter / BoundCluster
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct BoundDataCenter {
    id: DataCenterId,
    name: String,
    nodes: Vec<Arc<BoundNode>>,
}

impl BoundDataCenter {
    pub(crate) fn new(id: DataCenterId, name: String, nodes: Vec<Arc<BoundNode>>) -> Self {
        Self { id, name, nodes }
    }

    pub fn id(&self) -> DataCenterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Arc<BoundNode>] {
        &self.nodes
    }
}

/// A registered cluster.
#[derive(Debug)]
pub struct BoundCluster {
    topology: Arc<ClusterTopology>,
    data_centers: Vec<BoundDataCenter>,
}

impl BoundCluster {
    pub(crate) fn new(topology: Arc<ClusterTopology>, data_centers: Vec<BoundDataCenter>) -> Self {
        Self {
            topology,
            data_centers,
        }
    }

    pub fn id(&self) -> ClusterId {
        self.topology.id
    }

    pub fn name(&self) -> &str {
        &self.topology.name
    }

    /// Snapshot of ids, names, addresses and peer info.
    pub fn topology(&self) -> &Arc<ClusterTopology> {
        &self.topology
    }

    pub fn data_centers(&self) -> &[BoundDataCenter] {
        &self.data_centers
    }

    pub fn data_center(&self, id: DataCenterId) -> Option<&BoundDataCenter> {
        self.data_centers.iter().find(|dc| dc.id == id)
    }

    /// Every node, data center by data center.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<BoundNode>> {
        self.data_centers.iter().flat_map(|dc| dc.nodes.iter())
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<BoundNode>> {
        self.nodes().find(|node| node.id() == id)
    }

    pub(crate) async fn shutdown(&self) {
        futures::future::join_all(self.nodes().map(|node| node.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protosim_types::{ClusterSpec, NodeAddress};

    fn unstarted_node() -> Arc<BoundNode> {
        let mut spec = ClusterSpec::builder().with_nodes(&[1]).build();
        spec.assign_ids(ClusterId(0));
        spec.data_centers[0].nodes[0].address = Some(NodeAddress::Local("n".into()));
        let topology = Arc::new(ClusterTopology::from_spec(&spec).unwrap());
        let node = topology.nodes().next().unwrap().clone();
        Arc::new(BoundNode::new(&node, false, topology, Weak::new()))
    }

    #[tokio::test]
    async fn test_scheduled_reject_startup_counts_accepted_connections() {
        let node = unstarted_node();
        node.reject_new_connections(2, RejectScope::RejectStartup)
            .await
            .unwrap();

        assert!(!node.admit().reject_startup);
        assert_eq!(node.admission_state(), AdmissionState::Accepting);
        assert!(!node.admit().reject_startup);
        assert_eq!(node.admission_state(), AdmissionState::RejectingStartup);
        assert!(node.admit().reject_startup);
    }

    #[tokio::test]
    async fn test_scheduled_unbind_fires_on_last_connection() {
        let node = unstarted_node();
        node.reject_new_connections(3, RejectScope::Unbind)
            .await
            .unwrap();

        assert!(!node.admit().unbind_now);
        assert!(!node.admit().unbind_now);
        assert!(node.admit().unbind_now);
        assert_eq!(node.admission_state(), AdmissionState::Unbound);
    }

    #[tokio::test]
    async fn test_immediate_reject_startup() {
        let node = unstarted_node();
        node.reject_new_connections(-1, RejectScope::RejectStartup)
            .await
            .unwrap();
        assert_eq!(node.admission_state(), AdmissionState::RejectingStartup);
        assert!(node.admit().reject_startup);
    }

    #[tokio::test]
    async fn test_shut_down_node_refuses_changes() {
        let node = unstarted_node();
        node.shutdown().await;
        assert!(matches!(
            node.accept_new_connections().await,
            Err(ServerError::Shutdown)
        ));
    }
}
