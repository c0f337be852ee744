//! Core types for protosim.
//!
//! This crate provides the vocabulary shared by every other crate:
//!
//! - **Identifiers**: ClusterId, DataCenterId, NodeId and the composite NodeKey
//! - **Addresses**: real socket addresses and in-process names
//! - **Topology**: cluster/data center/node definitions and the immutable
//!   snapshots produced once a cluster is registered
//! - **Scope**: a path into the topology used to target stubs and logs
//!
//! # Design Philosophy
//!
//! No async runtime, no I/O. It does not depend on any other workspace crate,
//! making it the foundation layer.

mod address;
mod identifiers;
mod scope;
mod topology;

pub use address::{AddressParseError, NodeAddress};
pub use identifiers::{ClusterId, DataCenterId, NodeId, NodeKey};
pub use scope::Scope;
pub use topology::{
    ClusterSpec, ClusterSpecBuilder, ClusterTopology, DataCenterSpec, DataCenterSpecBuilder,
    DataCenterTopology, Membership, NodeSpec, NodeSpecBuilder, NodeTopology, PeerInfo, Topology,
};
