//! Address resolution for nodes registered without an explicit address.
//!
//! Resolvers hand out addresses that are not currently in use and take them
//! back on release. Released addresses are handed out again before new ones
//! are minted, so repeated register/unregister cycles stay on a small set of
//! addresses.

use crate::error::ResolverError;
use parking_lot::Mutex;
use protosim_types::NodeAddress;
use std::collections::VecDeque;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};

/// Produces unique node addresses.
///
/// Implementations must hand out distinct addresses to concurrent callers.
pub trait AddressResolver: Send + Sync + fmt::Debug {
    /// A fresh address nobody else holds.
    fn next(&self) -> Result<NodeAddress, ResolverError>;

    /// Return an address previously produced by [`next`](Self::next).
    fn release(&self, address: &NodeAddress) {
        let _ = address;
    }
}

/// Next usable host address after `ip`, skipping network and broadcast
/// octets. Fails when the first octet would change.
fn advance_ip(ip: Ipv4Addr) -> Result<Ipv4Addr, ResolverError> {
    let first = ip.octets()[0];
    let mut raw = u32::from(ip);
    loop {
        raw = raw
            .checked_add(1)
            .ok_or_else(|| ResolverError::Exhausted(format!("no address after {}", ip)))?;
        let next = Ipv4Addr::from(raw);
        let octets = next.octets();
        if octets[0] != first {
            return Err(ResolverError::Exhausted(format!(
                "no address after {} within {}.0.0.0/8",
                ip, first
            )));
        }
        if octets[3] != 0 && octets[3] != 255 {
            return Ok(next);
        }
    }
}

fn push_released(released: &mut VecDeque<SocketAddr>, addr: SocketAddr) {
    if !released.contains(&addr) {
        released.push_back(addr);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Incrementing IP
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct IpState {
    /// Next IP to mint, `None` once the range is used up.
    next: Option<Ipv4Addr>,
    released: VecDeque<SocketAddr>,
}

/// One fixed port per IP: 127.0.1.1:9042, 127.0.1.2:9042, ...
#[derive(Debug)]
pub struct IncrementingIpResolver {
    port: u16,
    state: Mutex<IpState>,
}

impl IncrementingIpResolver {
    pub fn new(starting_ip: Ipv4Addr, port: u16) -> Self {
        Self {
            port,
            state: Mutex::new(IpState {
                next: Some(starting_ip),
                released: VecDeque::new(),
            }),
        }
    }
}

impl AddressResolver for IncrementingIpResolver {
    fn next(&self) -> Result<NodeAddress, ResolverError> {
        let mut state = self.state.lock();
        if let Some(addr) = state.released.pop_front() {
            return Ok(NodeAddress::Inet(addr));
        }
        let ip = state
            .next
            .ok_or_else(|| ResolverError::Exhausted("incrementing IP range used up".into()))?;
        state.next = advance_ip(ip).ok();
        Ok(NodeAddress::Inet(SocketAddr::new(ip.into(), self.port)))
    }

    fn release(&self, address: &NodeAddress) {
        if let Some(addr) = address.socket_addr() {
            if addr.port() == self.port {
                push_released(&mut self.state.lock().released, addr);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Node per port
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct PortState {
    ip: Ipv4Addr,
    /// Next port to mint on `ip`; `None` when `ip` is used up.
    port: Option<u16>,
    exhausted: bool,
    released: VecDeque<SocketAddr>,
}

/// Every port of a range on one IP before moving to the next IP.
#[derive(Debug)]
pub struct NodePerPortResolver {
    ports: RangeInclusive<u16>,
    state: Mutex<PortState>,
}

impl NodePerPortResolver {
    pub fn new(starting_ip: Ipv4Addr, ports: RangeInclusive<u16>) -> Self {
        Self {
            state: Mutex::new(PortState {
                ip: starting_ip,
                port: Some(*ports.start()),
                exhausted: ports.is_empty(),
                released: VecDeque::new(),
            }),
            ports,
        }
    }
}

impl AddressResolver for NodePerPortResolver {
    fn next(&self) -> Result<NodeAddress, ResolverError> {
        let mut state = self.state.lock();
        if let Some(addr) = state.released.pop_front() {
            return Ok(NodeAddress::Inet(addr));
        }
        if state.exhausted {
            return Err(ResolverError::Exhausted("node-per-port range used up".into()));
        }
        let port = match state.port {
            Some(port) => port,
            None => {
                match advance_ip(state.ip) {
                    Ok(ip) => state.ip = ip,
                    Err(e) => {
                        state.exhausted = true;
                        return Err(e);
                    }
                }
                *self.ports.start()
            }
        };
        state.port = port.checked_add(1).filter(|p| self.ports.contains(p));
        Ok(NodeAddress::Inet(SocketAddr::new(state.ip.into(), port)))
    }

    fn release(&self, address: &NodeAddress) {
        if let Some(addr) = address.socket_addr() {
            if self.ports.contains(&addr.port()) {
                push_released(&mut self.state.lock().released, addr);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Virtual
// ═══════════════════════════════════════════════════════════════════════

/// Unique within the process, so resolvers of different servers sharing a
/// [`LocalNetwork`](crate::LocalNetwork) never collide.
static NEXT_VIRTUAL: AtomicU64 = AtomicU64::new(0);

/// In-process addresses with no IP or port: `local:node-0`, `local:node-1`, ...
#[derive(Debug, Default)]
pub struct VirtualResolver;

impl VirtualResolver {
    pub fn new() -> Self {
        Self
    }
}

impl AddressResolver for VirtualResolver {
    fn next(&self) -> Result<NodeAddress, ResolverError> {
        let n = NEXT_VIRTUAL.fetch_add(1, Ordering::Relaxed);
        Ok(NodeAddress::Local(format!("node-{}", n)))
    }
}
