//! Server configuration.

use crate::activity::DEFAULT_ACTIVITY_LOG_CAPACITY;
use crate::resolver::{
    AddressResolver, IncrementingIpResolver, NodePerPortResolver, VirtualResolver,
};
use protosim_protocol::{SupportedVersions, DEFAULT_MAX_FRAME_LENGTH};
use protosim_stubbing::ServerInfo;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

/// How addresses are generated for nodes registered without one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverPolicy {
    /// One fixed port per IP, advancing the IP on every call.
    #[default]
    IncrementingIp,
    /// Every port of a range on one IP before advancing the IP.
    NodePerPort,
    /// In-process addresses on a [`LocalNetwork`](crate::LocalNetwork).
    Virtual,
}

/// Parameters of the address resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub policy: ResolverPolicy,
    /// First IP handed out by the IP-based policies.
    ///
    /// Default: 127.0.1.1
    pub starting_ip: Ipv4Addr,
    /// Port used by [`ResolverPolicy::IncrementingIp`].
    ///
    /// Default: 9042
    pub port: u16,
    /// Ports used by [`ResolverPolicy::NodePerPort`].
    ///
    /// Default: 49152..=65535
    pub port_range: RangeInclusive<u16>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            policy: ResolverPolicy::default(),
            starting_ip: Ipv4Addr::new(127, 0, 1, 1),
            port: 9042,
            port_range: 49152..=65535,
        }
    }
}

impl ResolverConfig {
    pub fn with_policy(mut self, policy: ResolverPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the resolver this configuration describes.
    pub fn build(&self) -> Arc<dyn AddressResolver> {
        match self.policy {
            ResolverPolicy::IncrementingIp => {
                Arc::new(IncrementingIpResolver::new(self.starting_ip, self.port))
            }
            ResolverPolicy::NodePerPort => Arc::new(NodePerPortResolver::new(
                self.starting_ip,
                self.port_range.clone(),
            )),
            ResolverPolicy::Virtual => Arc::new(VirtualResolver::new()),
        }
    }
}

/// Configuration for a [`Server`](crate::Server).
///
/// # Example
///
/// ```
/// use protosim_server::{ResolverPolicy, ServerConfig};
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_bind_timeout(Duration::from_secs(2))
///     .with_resolver_policy(ResolverPolicy::Virtual);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a single node may take to bind before registration fails.
    ///
    /// Default: 10 seconds
    pub bind_timeout: Duration,

    pub resolver: ResolverConfig,

    /// Protocol versions nodes accept. Frames on other versions are answered
    /// with a protocol error at the highest of these.
    ///
    /// Default: 3, 4, 5
    pub protocol_versions: SupportedVersions,

    /// Frames with a longer body are skipped as malformed.
    ///
    /// Default: 256 MiB
    pub max_frame_length: usize,

    /// Values advertised in SUPPORTED and the peer tables.
    pub server_info: ServerInfo,

    /// Activity log entries kept before the oldest are dropped. Zero turns
    /// the log off.
    ///
    /// Default: 10000
    pub activity_log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_secs(10),
            resolver: ResolverConfig::default(),
            protocol_versions: SupportedVersions::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            server_info: ServerInfo::default(),
            activity_log_capacity: DEFAULT_ACTIVITY_LOG_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = timeout;
        self
    }

    pub fn with_resolver_policy(mut self, policy: ResolverPolicy) -> Self {
        self.resolver.policy = policy;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_protocol_versions(mut self, versions: SupportedVersions) -> Self {
        self.protocol_versions = versions;
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.server_info = info;
        self
    }

    pub fn with_activity_log_capacity(mut self, capacity: usize) -> Self {
        self.activity_log_capacity = capacity;
        self
    }
}
