//! Topology definitions and snapshots.
//!
//! A topology is a tree: a [`ClusterSpec`] owns its [`DataCenterSpec`]s, which
//! own their [`NodeSpec`]s. Children never hold references to their parents;
//! they carry a [`Membership`] marker with the parent identifiers instead, so
//! the server can tell a node that was carved out of a cluster from one that
//! was built on its own.
//!
//! Definitions are mutable until registration. Once the server has assigned
//! identifiers and addresses it produces a [`ClusterTopology`], an immutable
//! snapshot shared with every bound node.

use crate::{ClusterId, DataCenterId, NodeAddress, NodeId, NodeKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form metadata advertised through peer tables (`release_version`,
/// `rack`, `tokens`, ...).
pub type PeerInfo = BTreeMap<String, String>;

/// Non-owning link from a child definition to its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Membership {
    pub cluster: Option<ClusterId>,
    pub data_center: Option<DataCenterId>,
}

// ═══════════════════════════════════════════════════════════════════════
// Definitions
// ═══════════════════════════════════════════════════════════════════════

/// Definition of a single node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: Option<NodeId>,
    pub name: Option<String>,
    /// Explicit listen address. Resolved by the server when absent.
    pub address: Option<NodeAddress>,
    #[serde(default)]
    pub peer_info: PeerInfo,
    #[serde(skip)]
    membership: Option<Membership>,
}

impl NodeSpec {
    pub fn builder() -> NodeSpecBuilder {
        NodeSpecBuilder::default()
    }

    /// Parent identifiers, present when the node was added to a data center.
    pub fn membership(&self) -> Option<Membership> {
        self.membership
    }
}

/// Builder for [`NodeSpec`].
#[derive(Debug, Default)]
pub struct NodeSpecBuilder {
    spec: NodeSpec,
}

impl NodeSpecBuilder {
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.spec.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<NodeAddress>) -> Self {
        self.spec.address = Some(address.into());
        self
    }

    pub fn with_peer_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.peer_info.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> NodeSpec {
        self.spec
    }
}

/// Definition of a data center.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCenterSpec {
    pub id: Option<DataCenterId>,
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub peer_info: PeerInfo,
    #[serde(skip)]
    membership: Option<Membership>,
}

impl DataCenterSpec {
    pub fn builder() -> DataCenterSpecBuilder {
        DataCenterSpecBuilder::default()
    }

    /// Parent identifiers, present when the data center was added to a cluster.
    pub fn membership(&self) -> Option<Membership> {
        self.membership
    }

    /// Add a node, marking it as a member of this data center.
    pub fn add_node(&mut self, mut node: NodeSpec) -> &mut NodeSpec {
        node.membership = Some(Membership {
            cluster: self.membership.and_then(|m| m.cluster),
            data_center: self.id,
        });
        self.nodes.push(node);
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    fn refresh_membership(&mut self, cluster: Option<ClusterId>) {
        self.membership = Some(Membership {
            cluster,
            data_center: None,
        });
        let marker = Membership {
            cluster,
            data_center: self.id,
        };
        for node in &mut self.nodes {
            node.membership = Some(marker);
        }
    }
}

/// Builder for [`DataCenterSpec`].
#[derive(Debug, Default)]
pub struct DataCenterSpecBuilder {
    spec: DataCenterSpec,
    node_count: usize,
}

impl DataCenterSpecBuilder {
    pub fn with_id(mut self, id: DataCenterId) -> Self {
        self.spec.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    /// Add `count` nodes with default settings.
    pub fn with_nodes(mut self, count: usize) -> Self {
        self.node_count += count;
        self
    }

    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.spec.add_node(node);
        self
    }

    pub fn with_peer_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.peer_info.insert(key.into(), value.into());
        self
    }

    pub fn build(mut self) -> DataCenterSpec {
        for _ in 0..self.node_count {
            self.spec.add_node(NodeSpec::default());
        }
        self.spec
    }
}

/// Definition of a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub id: Option<ClusterId>,
    pub name: Option<String>,
    #[serde(default)]
    pub data_centers: Vec<DataCenterSpec>,
    #[serde(default)]
    pub peer_info: PeerInfo,
}

impl ClusterSpec {
    pub fn builder() -> ClusterSpecBuilder {
        ClusterSpecBuilder::default()
    }

    /// Add a data center, marking it and its nodes as members of this cluster.
    pub fn add_data_center(&mut self, mut dc: DataCenterSpec) -> &mut DataCenterSpec {
        dc.refresh_membership(self.id);
        self.data_centers.push(dc);
        let last = self.data_centers.len() - 1;
        &mut self.data_centers[last]
    }

    /// All node definitions, data center by data center.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.data_centers.iter().flat_map(|dc| dc.nodes.iter())
    }

    pub fn node_count(&self) -> usize {
        self.data_centers.iter().map(|dc| dc.nodes.len()).sum()
    }

    /// Fill in missing identifiers.
    ///
    /// The cluster id is only set when absent. Data centers and nodes are
    /// numbered in order (nodes across the whole cluster), skipping ids
    /// already claimed by explicitly numbered ones.
    pub fn assign_ids(&mut self, id: ClusterId) {
        let cluster_id = *self.id.get_or_insert(id);

        let mut taken_dcs: Vec<DataCenterId> =
            self.data_centers.iter().filter_map(|dc| dc.id).collect();
        let mut next_dc = 0u64;
        let mut taken: Vec<NodeId> = self.nodes().filter_map(|n| n.id).collect();
        let mut next_node = 0u64;

        for dc in &mut self.data_centers {
            if dc.id.is_none() {
                while taken_dcs.contains(&DataCenterId(next_dc)) {
                    next_dc += 1;
                }
                dc.id = Some(DataCenterId(next_dc));
                taken_dcs.push(DataCenterId(next_dc));
            }
            for node in &mut dc.nodes {
                if node.id.is_none() {
                    while taken.contains(&NodeId(next_node)) {
                        next_node += 1;
                    }
                    node.id = Some(NodeId(next_node));
                    taken.push(NodeId(next_node));
                }
            }
            dc.refresh_membership(Some(cluster_id));
        }
    }
}

/// Builder for [`ClusterSpec`].
#[derive(Debug, Default)]
pub struct ClusterSpecBuilder {
    spec: ClusterSpec,
    dc_node_counts: Vec<usize>,
}

impl ClusterSpecBuilder {
    pub fn with_id(mut self, id: ClusterId) -> Self {
        self.spec.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    /// Add one data center per entry, each with the given number of nodes.
    pub fn with_nodes(mut self, nodes_per_dc: &[usize]) -> Self {
        self.dc_node_counts.extend_from_slice(nodes_per_dc);
        self
    }

    pub fn with_data_center(mut self, dc: DataCenterSpec) -> Self {
        self.spec.add_data_center(dc);
        self
    }

    pub fn with_peer_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.peer_info.insert(key.into(), value.into());
        self
    }

    pub fn build(mut self) -> ClusterSpec {
        for count in self.dc_node_counts {
            self.spec
                .add_data_center(DataCenterSpec::builder().with_nodes(count).build());
        }
        self.spec
    }
}

/// Anything that can be registered with a server.
///
/// Lone data centers and nodes are wrapped into a synthetic cluster during
/// registration.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    Cluster(ClusterSpec),
    DataCenter(DataCenterSpec),
    Node(NodeSpec),
}

impl From<ClusterSpec> for Topology {
    fn from(spec: ClusterSpec) -> Self {
        Topology::Cluster(spec)
    }
}

impl From<DataCenterSpec> for Topology {
    fn from(spec: DataCenterSpec) -> Self {
        Topology::DataCenter(spec)
    }
}

impl From<NodeSpec> for Topology {
    fn from(spec: NodeSpec) -> Self {
        Topology::Node(spec)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════════

/// Immutable view of a registered cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterTopology {
    pub id: ClusterId,
    pub name: String,
    pub peer_info: PeerInfo,
    pub data_centers: Vec<DataCenterTopology>,
}

/// Immutable view of a registered data center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataCenterTopology {
    pub id: DataCenterId,
    pub name: String,
    pub peer_info: PeerInfo,
    pub nodes: Vec<NodeTopology>,
}

/// Immutable view of a registered node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTopology {
    pub key: NodeKey,
    pub name: String,
    pub address: NodeAddress,
    pub peer_info: PeerInfo,
}

impl ClusterTopology {
    /// Build a snapshot from a spec whose ids and addresses are all assigned.
    ///
    /// Returns `None` if any id or address is still missing.
    pub fn from_spec(spec: &ClusterSpec) -> Option<Self> {
        let id = spec.id?;
        let mut data_centers = Vec::with_capacity(spec.data_centers.len());
        for dc in &spec.data_centers {
            let dc_id = dc.id?;
            let mut nodes = Vec::with_capacity(dc.nodes.len());
            for node in &dc.nodes {
                let node_id = node.id?;
                nodes.push(NodeTopology {
                    key: NodeKey::new(id, dc_id, node_id),
                    name: node
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("node{}", node_id)),
                    address: node.address.clone()?,
                    peer_info: node.peer_info.clone(),
                });
            }
            data_centers.push(DataCenterTopology {
                id: dc_id,
                name: dc.name.clone().unwrap_or_else(|| format!("dc{}", dc_id)),
                peer_info: dc.peer_info.clone(),
                nodes,
            });
        }
        Some(Self {
            id,
            name: spec.name.clone().unwrap_or_else(|| format!("cluster{}", id)),
            peer_info: spec.peer_info.clone(),
            data_centers,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeTopology> {
        self.data_centers.iter().flat_map(|dc| dc.nodes.iter())
    }

    pub fn node(&self, key: &NodeKey) -> Option<&NodeTopology> {
        self.nodes().find(|n| n.key == *key)
    }

    pub fn data_center(&self, id: DataCenterId) -> Option<&DataCenterTopology> {
        self.data_centers.iter().find(|dc| dc.id == id)
    }

    /// Look up a metadata value, falling back from node to data center to cluster.
    pub fn peer_info(&self, key: &NodeKey, name: &str) -> Option<&str> {
        let node = self.node(key).and_then(|n| n.peer_info.get(name));
        let dc = || {
            self.data_center(key.data_center)
                .and_then(|dc| dc.peer_info.get(name))
        };
        node.or_else(dc)
            .or_else(|| self.peer_info.get(name))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creates_data_centers_and_nodes() {
        let cluster = ClusterSpec::builder().with_nodes(&[3, 2]).build();
        assert_eq!(cluster.data_centers.len(), 2);
        assert_eq!(cluster.node_count(), 5);
        assert!(cluster.nodes().all(|n| n.membership().is_some()));
    }

    #[test]
    fn test_assign_ids_numbers_nodes_across_cluster() {
        let mut cluster = ClusterSpec::builder().with_nodes(&[2, 2]).build();
        cluster.assign_ids(ClusterId(9));

        assert_eq!(cluster.id, Some(ClusterId(9)));
        let ids: Vec<u64> = cluster.nodes().map(|n| n.id.unwrap().0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(cluster.data_centers[1].id, Some(DataCenterId(1)));

        let marker = cluster.data_centers[1].nodes[0].membership().unwrap();
        assert_eq!(marker.cluster, Some(ClusterId(9)));
        assert_eq!(marker.data_center, Some(DataCenterId(1)));
    }

    #[test]
    fn test_assign_ids_keeps_explicit_values() {
        let mut dc = DataCenterSpec::builder().build();
        dc.add_node(NodeSpec::builder().with_id(NodeId(0)).build());
        dc.add_node(NodeSpec::default());
        let mut cluster = ClusterSpec::builder()
            .with_id(ClusterId(4))
            .with_data_center(dc)
            .build();

        cluster.assign_ids(ClusterId(100));

        assert_eq!(cluster.id, Some(ClusterId(4)));
        let ids: Vec<u64> = cluster.nodes().map(|n| n.id.unwrap().0).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_assign_ids_skips_explicit_data_center_ids() {
        let mut cluster = ClusterSpec::builder()
            .with_data_center(DataCenterSpec::builder().with_id(DataCenterId(0)).build())
            .with_data_center(DataCenterSpec::builder().build())
            .with_data_center(DataCenterSpec::builder().with_id(DataCenterId(2)).build())
            .with_data_center(DataCenterSpec::builder().build())
            .build();

        cluster.assign_ids(ClusterId(0));

        let ids: Vec<u64> = cluster
            .data_centers
            .iter()
            .map(|dc| dc.id.unwrap().0)
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let mut cluster = ClusterSpec::builder()
            .with_data_center(DataCenterSpec::builder().with_id(DataCenterId(1)).build())
            .with_data_center(DataCenterSpec::builder().build())
            .build();
        cluster.assign_ids(ClusterId(0));
        assert_eq!(cluster.data_centers[0].id, Some(DataCenterId(1)));
        assert_eq!(cluster.data_centers[1].id, Some(DataCenterId(0)));
    }

    #[test]
    fn test_standalone_node_has_no_membership() {
        let node = NodeSpec::builder().with_name("solo").build();
        assert!(node.membership().is_none());
    }

    #[test]
    fn test_snapshot_requires_addresses() {
        let mut cluster = ClusterSpec::builder().with_nodes(&[1]).build();
        cluster.assign_ids(ClusterId(0));
        assert!(ClusterTopology::from_spec(&cluster).is_none());

        cluster.data_centers[0].nodes[0].address = Some(NodeAddress::Local("a".into()));
        let topology = ClusterTopology::from_spec(&cluster).unwrap();
        assert_eq!(topology.name, "cluster0");
        assert_eq!(topology.data_centers[0].name, "dc0");
        assert_eq!(topology.nodes().count(), 1);
    }

    #[test]
    fn test_peer_info_falls_back_to_parents() {
        let mut cluster = ClusterSpec::builder()
            .with_peer_info("release_version", "4.0.0")
            .with_nodes(&[2])
            .build();
        cluster.data_centers[0]
            .peer_info
            .insert("rack".into(), "rack9".into());
        cluster.data_centers[0].nodes[1]
            .peer_info
            .insert("release_version".into(), "3.11.4".into());
        cluster.assign_ids(ClusterId(0));
        for (i, node) in cluster.data_centers[0].nodes.iter_mut().enumerate() {
            node.address = Some(NodeAddress::Local(format!("n{}", i)));
        }

        let topology = ClusterTopology::from_spec(&cluster).unwrap();
        let first = topology.data_centers[0].nodes[0].key;
        let second = topology.data_centers[0].nodes[1].key;
        assert_eq!(topology.peer_info(&first, "release_version"), Some("4.0.0"));
        assert_eq!(topology.peer_info(&second, "release_version"), Some("3.11.4"));
        assert_eq!(topology.peer_info(&first, "rack"), Some("rack9"));
        assert_eq!(topology.peer_info(&first, "missing"), None);
    }
}
