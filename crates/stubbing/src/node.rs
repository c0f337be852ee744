use protosim_protocol::SupportedVersions;
use protosim_types::{ClusterTopology, NodeKey, NodeTopology};

/// Server-wide values advertised by every simulated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Returned in SUPPORTED and `system.local.cql_version`.
    pub cql_version: String,
    /// Default `release_version` when peer info does not set one.
    pub release_version: String,
    pub partitioner: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            cql_version: "3.4.4".to_string(),
            release_version: "3.11.4".to_string(),
            partitioner: "org.apache.cassandra.dht.Murmur3Partitioner".to_string(),
        }
    }
}

/// The node a request arrived on, as seen by stubs.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub key: NodeKey,
    pub topology: &'a ClusterTopology,
    pub versions: &'a SupportedVersions,
    pub info: &'a ServerInfo,
}

impl<'a> NodeView<'a> {
    pub fn node(&self) -> Option<&'a NodeTopology> {
        self.topology.node(&self.key)
    }

    /// Peer metadata for this node, falling back to its data center and cluster.
    pub fn peer_info(&self, name: &str) -> Option<&'a str> {
        self.topology.peer_info(&self.key, name)
    }
}
