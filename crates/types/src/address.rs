//! Network addresses a simulated node can listen on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Prefix used when rendering in-process addresses.
const LOCAL_PREFIX: &str = "local:";

/// Address of a simulated node.
///
/// `Inet` addresses are real sockets; `Local` addresses live in an
/// in-process network and are only reachable from the same process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAddress {
    Inet(SocketAddr),
    Local(String),
}

impl NodeAddress {
    /// The socket address, if this is a real network address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            NodeAddress::Inet(addr) => Some(*addr),
            NodeAddress::Local(_) => None,
        }
    }

    /// The IP to advertise in peer metadata.
    ///
    /// In-process addresses have no IP; they advertise loopback so clients
    /// reading peer tables still see a well-formed inet.
    pub fn advertised_ip(&self) -> IpAddr {
        match self {
            NodeAddress::Inet(addr) => addr.ip(),
            NodeAddress::Local(_) => IpAddr::from([127, 0, 0, 1]),
        }
    }

    /// The port to advertise in peer metadata.
    pub fn advertised_port(&self) -> u16 {
        match self {
            NodeAddress::Inet(addr) => addr.port(),
            NodeAddress::Local(_) => 0,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, NodeAddress::Local(_))
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        NodeAddress::Inet(addr)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddress::Inet(addr) => write!(f, "{}", addr),
            NodeAddress::Local(name) => write!(f, "{}{}", LOCAL_PREFIX, name),
        }
    }
}

/// Error parsing a [`NodeAddress`].
#[derive(Debug, Error)]
#[error("invalid node address: {0}")]
pub struct AddressParseError(pub String);

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix(LOCAL_PREFIX) {
            if name.is_empty() {
                return Err(AddressParseError(s.to_string()));
            }
            return Ok(NodeAddress::Local(name.to_string()));
        }
        s.parse::<SocketAddr>()
            .map(NodeAddress::Inet)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}
