//! Scopes restrict stubs, logs and clears to part of the topology.

use crate::{ClusterId, DataCenterId, NodeId, NodeKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A (possibly empty) path into the topology.
///
/// An unset level matches everything below it, so `Scope::default()` matches
/// every node of every cluster. A data center without a cluster, or a node
/// without a data center, is never produced by the constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Scope {
    pub cluster: Option<ClusterId>,
    pub data_center: Option<DataCenterId>,
    pub node: Option<NodeId>,
}

impl Scope {
    /// Matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn cluster(cluster: ClusterId) -> Self {
        Self {
            cluster: Some(cluster),
            ..Self::default()
        }
    }

    pub fn data_center(cluster: ClusterId, data_center: DataCenterId) -> Self {
        Self {
            cluster: Some(cluster),
            data_center: Some(data_center),
            node: None,
        }
    }

    pub fn node(key: NodeKey) -> Self {
        Self {
            cluster: Some(key.cluster),
            data_center: Some(key.data_center),
            node: Some(key.node),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.cluster.is_none() && self.data_center.is_none() && self.node.is_none()
    }

    /// Whether the node lies within this scope.
    pub fn contains(&self, key: &NodeKey) -> bool {
        self.cluster.map_or(true, |c| c == key.cluster)
            && self.data_center.map_or(true, |dc| dc == key.data_center)
            && self.node.map_or(true, |n| n == key.node)
    }

    /// Whether `other` lies entirely within this scope.
    ///
    /// Every level set here must be set to the same value in `other`.
    pub fn covers(&self, other: &Scope) -> bool {
        fn level<T: PartialEq>(outer: Option<T>, inner: Option<T>) -> bool {
            match (outer, inner) {
                (None, _) => true,
                (Some(o), Some(i)) => o == i,
                (Some(_), None) => false,
            }
        }
        level(self.cluster, other.cluster)
            && level(self.data_center, other.data_center)
            && level(self.node, other.node)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.cluster, self.data_center, self.node) {
            (None, _, _) => write!(f, "*"),
            (Some(c), None, _) => write!(f, "{}", c),
            (Some(c), Some(dc), None) => write!(f, "{}/{}", c, dc),
            (Some(c), Some(dc), Some(n)) => write!(f, "{}/{}/{}", c, dc, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: u64, dc: u64, n: u64) -> NodeKey {
        NodeKey::new(ClusterId(c), DataCenterId(dc), NodeId(n))
    }

    #[test]
    fn test_contains() {
        assert!(Scope::any().contains(&key(1, 2, 3)));
        assert!(Scope::cluster(ClusterId(1)).contains(&key(1, 2, 3)));
        assert!(!Scope::cluster(ClusterId(0)).contains(&key(1, 2, 3)));
        assert!(Scope::data_center(ClusterId(1), DataCenterId(2)).contains(&key(1, 2, 3)));
        assert!(!Scope::data_center(ClusterId(1), DataCenterId(0)).contains(&key(1, 2, 3)));
        assert!(Scope::node(key(1, 2, 3)).contains(&key(1, 2, 3)));
        assert!(!Scope::node(key(1, 2, 4)).contains(&key(1, 2, 3)));
    }

    #[test]
    fn test_covers() {
        let cluster = Scope::cluster(ClusterId(1));
        let dc = Scope::data_center(ClusterId(1), DataCenterId(0));
        let node = Scope::node(key(1, 0, 5));

        assert!(Scope::any().covers(&cluster));
        assert!(cluster.covers(&dc));
        assert!(cluster.covers(&node));
        assert!(dc.covers(&node));
        assert!(!node.covers(&dc));
        assert!(!cluster.covers(&Scope::any()));
        assert!(!Scope::cluster(ClusterId(2)).covers(&dc));
    }

    #[test]
    fn test_display() {
        assert_eq!(Scope::any().to_string(), "*");
        assert_eq!(Scope::node(key(1, 0, 5)).to_string(), "1/0/5");
    }
}
