//! Identifier newtypes for the simulated topology.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a cluster within a running server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

/// Identifies a data center within its cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DataCenterId(pub u64);

/// Identifies a node within its cluster.
///
/// Node ids are numbered across the whole cluster (the first data center's
/// nodes come first), so a node id alone is unique inside one cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DataCenterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-wide identity of a bound node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub cluster: ClusterId,
    pub data_center: DataCenterId,
    pub node: NodeId,
}

impl NodeKey {
    pub fn new(cluster: ClusterId, data_center: DataCenterId, node: NodeId) -> Self {
        Self {
            cluster,
            data_center,
            node,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.data_center, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_display() {
        let key = NodeKey::new(ClusterId(3), DataCenterId(1), NodeId(7));
        assert_eq!(key.to_string(), "3/1/7");
    }

    #[test]
    fn test_node_key_ordering_follows_hierarchy() {
        let a = NodeKey::new(ClusterId(0), DataCenterId(1), NodeId(0));
        let b = NodeKey::new(ClusterId(1), DataCenterId(0), NodeId(0));
        assert!(a < b);
    }
}
