//! The server: registry of bound clusters, stubs and activity.

use crate::activity::{ActivityEntry, ActivityLog};
use crate::bound::{BoundCluster, BoundDataCenter, BoundNode};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::local::{Listener, LocalNetwork};
use crate::resolver::AddressResolver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::try_join_all;
use protosim_stubbing::{CloseKind, DisconnectScope, Prime, PrimeKind, StubStore};
use protosim_types::{
    ClusterId, ClusterSpec, ClusterTopology, DataCenterSpec, NodeAddress, NodeKey, NodeSpec,
    NodeTopology, Scope, Topology,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared by the server handle, bound nodes and connection tasks.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) stubs: StubStore,
    pub(crate) activity: ActivityLog,
    pub(crate) local: LocalNetwork,
    resolver: Arc<dyn AddressResolver>,
    registry: DashMap<ClusterId, Arc<BoundCluster>>,
    next_cluster_id: AtomicU64,
}

impl Shared {
    /// Close connections of nodes around `origin`. Returns how many were asked to close.
    pub(crate) fn close_connections(
        &self,
        origin: NodeKey,
        scope: DisconnectScope,
        kind: CloseKind,
    ) -> usize {
        let Some(cluster) = self
            .registry
            .get(&origin.cluster)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return 0;
        };
        cluster
            .nodes()
            .filter(|node| match scope {
                DisconnectScope::Connection | DisconnectScope::Node => node.key() == origin,
                DisconnectScope::DataCenter => node.key().data_center == origin.data_center,
                DisconnectScope::Cluster => true,
            })
            .map(|node| node.close_connections(kind))
            .sum()
    }

    fn allocate_cluster_id(&self) -> ClusterId {
        loop {
            let id = ClusterId(self.next_cluster_id.fetch_add(1, Ordering::Relaxed));
            if !self.registry.contains_key(&id) {
                return id;
            }
        }
    }

    fn release_all<'a>(&self, addresses: impl IntoIterator<Item = &'a NodeAddress>) {
        for address in addresses {
            self.resolver.release(address);
        }
    }
}

/// Read-only snapshot of the registered clusters.
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistry {
    clusters: BTreeMap<ClusterId, Arc<BoundCluster>>,
}

impl ClusterRegistry {
    pub fn get(&self, id: ClusterId) -> Option<&Arc<BoundCluster>> {
        self.clusters.get(&id)
    }

    pub fn contains(&self, id: ClusterId) -> bool {
        self.clusters.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Clusters in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BoundCluster>> {
        self.clusters.values()
    }
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    resolver: Option<Arc<dyn AddressResolver>>,
    local: Option<LocalNetwork>,
}

impl ServerBuilder {
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this resolver instead of the one described by the config.
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Share an in-process network, e.g. with test clients.
    pub fn with_local_network(mut self, local: LocalNetwork) -> Self {
        self.local = Some(local);
        self
    }

    pub fn build(self) -> Server {
        let resolver = self
            .resolver
            .unwrap_or_else(|| self.config.resolver.build());
        Server {
            shared: Arc::new(Shared {
                stubs: StubStore::new(),
                activity: ActivityLog::with_capacity(self.config.activity_log_capacity),
                local: self.local.unwrap_or_default(),
                resolver,
                registry: DashMap::new(),
                next_cluster_id: AtomicU64::new(0),
                config: self.config,
            }),
        }
    }
}

/// Simulated clusters speaking the native protocol.
///
/// Cloning yields another handle to the same server.
#[derive(Debug, Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn new(config: ServerConfig) -> Self {
        Self::builder().with_config(config).build()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// The in-process network nodes with local addresses listen on.
    pub fn local_network(&self) -> &LocalNetwork {
        &self.shared.local
    }

    // ═══════════════════════════════════════════════════════════════════
    // Topology
    // ═══════════════════════════════════════════════════════════════════

    /// Bind every node of a cluster, data center or lone node.
    ///
    /// Missing ids are assigned and missing addresses resolved. Nodes bind
    /// concurrently, each within the configured bind timeout. If any node
    /// fails to bind, every listener opened by this call is closed, resolved
    /// addresses are released and nothing is registered.
    pub async fn register(
        &self,
        topology: impl Into<Topology>,
    ) -> Result<Arc<BoundCluster>, ServerError> {
        let shared = &self.shared;
        let mut spec = normalize(topology.into())?;
        validate(&spec)?;
        if let Some(id) = spec.id {
            if shared.registry.contains_key(&id) {
                return Err(already_registered(id));
            }
        }
        let id = spec.id.unwrap_or_else(|| shared.allocate_cluster_id());
        spec.assign_ids(id);

        let resolved = resolve_addresses(shared, &mut spec)?;
        let Some(planned) = ClusterTopology::from_spec(&spec) else {
            shared.release_all(&resolved);
            return Err(ServerError::config("topology is missing ids or addresses"));
        };

        let binds = planned.nodes().map(|node| bind(shared, node));
        let listeners = match try_join_all(binds).await {
            Ok(listeners) => listeners,
            Err(e) => {
                shared.release_all(&resolved);
                warn!(cluster = %id, error = %e, "Registration failed, rolled back");
                return Err(e);
            }
        };

        let mut topology = planned;
        for (node, (_, bound)) in topology
            .data_centers
            .iter_mut()
            .flat_map(|dc| dc.nodes.iter_mut())
            .zip(&listeners)
        {
            node.address = bound.clone();
        }
        let topology = Arc::new(topology);

        let mut listeners = listeners.into_iter();
        let mut started = Vec::with_capacity(spec.node_count());
        let mut data_centers = Vec::with_capacity(topology.data_centers.len());
        for dc in &topology.data_centers {
            let mut nodes = Vec::with_capacity(dc.nodes.len());
            for node in &dc.nodes {
                let Some((listener, _)) = listeners.next() else {
                    break;
                };
                let was_resolved = spec_address(&spec, node).is_some_and(|a| resolved.contains(a));
                let bound = Arc::new(BoundNode::new(
                    node,
                    was_resolved,
                    Arc::clone(&topology),
                    Arc::downgrade(shared),
                ));
                started.push((Arc::clone(&bound), listener));
                nodes.push(bound);
            }
            data_centers.push(BoundDataCenter::new(dc.id, dc.name.clone(), nodes));
        }
        let cluster = Arc::new(BoundCluster::new(Arc::clone(&topology), data_centers));

        match shared.registry.entry(id) {
            Entry::Occupied(_) => {
                drop(started);
                shared.release_all(&resolved);
                return Err(already_registered(id));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&cluster));
            }
        }
        for (node, listener) in started {
            node.start(listener);
        }

        info!(
            cluster = %id,
            name = %cluster.name(),
            data_centers = cluster.data_centers().len(),
            nodes = topology.nodes().count(),
            "Cluster registered"
        );
        Ok(cluster)
    }

    /// Register a lone node inside a synthetic single-node cluster.
    pub async fn register_node(&self, node: NodeSpec) -> Result<Arc<BoundNode>, ServerError> {
        let cluster = self.register(node).await?;
        let node = cluster.nodes().next().cloned();
        node.ok_or_else(|| ServerError::config("registered cluster has no node"))
    }

    /// Close every listener and connection of a cluster and forget it.
    pub async fn unregister(&self, id: ClusterId) -> Result<Arc<BoundCluster>, ServerError> {
        let (_, cluster) = self
            .shared
            .registry
            .remove(&id)
            .ok_or_else(|| ServerError::config(format!("cluster {} is not registered", id)))?;

        cluster.shutdown().await;
        for node in cluster.nodes() {
            if node.is_resolved() {
                self.shared.resolver.release(node.address());
            }
        }
        info!(cluster = %id, "Cluster unregistered");
        Ok(cluster)
    }

    /// Unregister the cluster a definition was registered as.
    ///
    /// Fails if the definition never had an id assigned.
    pub async fn unregister_spec(&self, spec: &ClusterSpec) -> Result<Arc<BoundCluster>, ServerError> {
        let id = spec
            .id
            .ok_or_else(|| ServerError::config("cluster has no id, it was never registered"))?;
        self.unregister(id).await
    }

    /// Snapshot of the registered clusters.
    pub fn cluster_registry(&self) -> ClusterRegistry {
        ClusterRegistry {
            clusters: self
                .shared
                .registry
                .iter()
                .map(|entry| (*entry.key(), Arc::clone(entry.value())))
                .collect(),
        }
    }

    pub fn cluster(&self, id: ClusterId) -> Option<Arc<BoundCluster>> {
        self.shared
            .registry
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Find a bound node by its full key.
    pub fn node(&self, key: &NodeKey) -> Option<Arc<BoundNode>> {
        let cluster = self.cluster(key.cluster)?;
        let node = cluster.nodes().find(|node| node.key() == *key).cloned();
        node
    }

    /// Unregister every cluster.
    pub async fn shutdown(&self) {
        let ids: Vec<ClusterId> = self.shared.registry.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Err(e) = self.unregister(id).await {
                debug!(cluster = %id, error = %e, "Cluster already gone during shutdown");
            }
        }
        info!("Server shut down");
    }

    // ═══════════════════════════════════════════════════════════════════
    // Stubs and activity
    // ═══════════════════════════════════════════════════════════════════

    /// Add a user stub. Newer primes take precedence over older ones.
    pub fn prime(&self, prime: Prime) -> Result<(), ServerError> {
        self.shared.stubs.prime(prime)?;
        Ok(())
    }

    /// Remove user stubs of `kind` whose scope lies within `scope`.
    pub fn clear(&self, scope: &Scope, kind: PrimeKind) -> usize {
        let removed = self.shared.stubs.clear(scope, kind);
        debug!(%scope, ?kind, removed, "Primes cleared");
        removed
    }

    pub fn activity_log(&self, scope: &Scope) -> Vec<ActivityEntry> {
        self.shared.activity.entries(scope)
    }

    pub fn clear_activity_log(&self, scope: &Scope) -> usize {
        self.shared.activity.clear(scope)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registration helpers
// ═══════════════════════════════════════════════════════════════════════

fn already_registered(id: ClusterId) -> ServerError {
    ServerError::config(format!("cluster {} is already registered", id))
}

/// Wrap lone data centers and nodes into a cluster.
fn normalize(topology: Topology) -> Result<ClusterSpec, ServerError> {
    match topology {
        Topology::Cluster(spec) => Ok(spec),
        Topology::DataCenter(dc) => {
            if dc.membership().is_some() {
                return Err(ServerError::config(
                    "data center belongs to a cluster, register the cluster instead",
                ));
            }
            let mut cluster = ClusterSpec::default();
            cluster.add_data_center(dc);
            Ok(cluster)
        }
        Topology::Node(node) => {
            if node.membership().is_some() {
                return Err(ServerError::config(
                    "node belongs to a cluster, register the cluster instead",
                ));
            }
            let mut dc = DataCenterSpec::default();
            dc.add_node(node);
            let mut cluster = ClusterSpec::default();
            cluster.add_data_center(dc);
            Ok(cluster)
        }
    }
}

fn validate(spec: &ClusterSpec) -> Result<(), ServerError> {
    let mut dc_ids = HashSet::new();
    for dc in &spec.data_centers {
        if let Some(id) = dc.id {
            if !dc_ids.insert(id) {
                return Err(ServerError::config(format!("duplicate data center id {}", id)));
            }
        }
    }
    let mut node_ids = HashSet::new();
    for node in spec.nodes() {
        if let Some(id) = node.id {
            if !node_ids.insert(id) {
                return Err(ServerError::config(format!("duplicate node id {}", id)));
            }
        }
    }
    Ok(())
}

/// Fill in missing addresses. Returns the addresses taken from the resolver.
fn resolve_addresses(
    shared: &Shared,
    spec: &mut ClusterSpec,
) -> Result<Vec<NodeAddress>, ServerError> {
    let mut resolved = Vec::new();
    for node in spec.data_centers.iter_mut().flat_map(|dc| dc.nodes.iter_mut()) {
        if node.address.is_some() {
            continue;
        }
        match shared.resolver.next() {
            Ok(address) => {
                resolved.push(address.clone());
                node.address = Some(address);
            }
            Err(e) => {
                shared.release_all(&resolved);
                return Err(e.into());
            }
        }
    }
    Ok(resolved)
}

/// Address a node had before binding.
fn spec_address<'a>(spec: &'a ClusterSpec, node: &NodeTopology) -> Option<&'a NodeAddress> {
    spec.nodes()
        .find(|n| n.id == Some(node.key.node))
        .and_then(|n| n.address.as_ref())
}

async fn bind(
    shared: &Shared,
    node: &NodeTopology,
) -> Result<(Listener, NodeAddress), ServerError> {
    let timeout = shared.config.bind_timeout;
    match tokio::time::timeout(timeout, Listener::bind(&node.address, &shared.local)).await {
        Ok(Ok((listener, bound))) => {
            debug!(node = %node.key, address = %bound, "Node bound");
            Ok((listener, bound))
        }
        Ok(Err(source)) => Err(ServerError::Bind {
            node: node.key,
            address: node.address.clone(),
            source,
        }),
        Err(_) => Err(ServerError::BindTimeout {
            node: node.key,
            address: node.address.clone(),
            timeout,
        }),
    }
}
