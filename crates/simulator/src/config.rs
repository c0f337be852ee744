//! Simulator configuration file.
//!
//! Every section is optional. Example:
//!
//! ```toml
//! [server]
//! bind_timeout_ms = 5000
//! protocol_versions = [3, 4, 5]
//! activity_log_capacity = 1000
//!
//! [resolver]
//! policy = "node-per-port"
//! starting_ip = "127.0.1.1"
//! port_range = [49152, 65535]
//!
//! [cluster]
//! name = "sim"
//! data_centers = [3, 3]
//!
//! [cluster.peer_info]
//! release_version = "4.0.0"
//! ```

use anyhow::{bail, Context, Result};
use protosim_protocol::SupportedVersions;
use protosim_server::{ResolverConfig, ResolverPolicy, ServerConfig};
use protosim_types::{ClusterSpec, DataCenterSpec, PeerInfo};
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Top-level simulator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub resolver: ResolverSection,

    #[serde(default)]
    pub cluster: ClusterSection,
}

/// Node listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Per-node bind timeout in milliseconds
    #[serde(default = "default_bind_timeout_ms")]
    pub bind_timeout_ms: u64,

    /// Protocol versions nodes accept
    #[serde(default = "default_protocol_versions")]
    pub protocol_versions: Vec<u8>,

    /// Largest accepted frame body in bytes
    pub max_frame_length: Option<usize>,

    /// Requests kept in the activity log, 0 to disable it
    pub activity_log_capacity: Option<usize>,
}

fn default_bind_timeout_ms() -> u64 {
    10_000
}

fn default_protocol_versions() -> Vec<u8> {
    vec![3, 4, 5]
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_timeout_ms: default_bind_timeout_ms(),
            protocol_versions: default_protocol_versions(),
            max_frame_length: None,
            activity_log_capacity: None,
        }
    }
}

/// Address resolution for nodes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverSection {
    #[serde(default)]
    pub policy: ResolverPolicy,

    pub starting_ip: Option<Ipv4Addr>,

    /// Port of the incrementing-ip policy
    pub port: Option<u16>,

    /// Inclusive `[first, last]` ports of the node-per-port policy
    pub port_range: Option<[u16; 2]>,
}

/// The cluster to register.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSection {
    pub name: Option<String>,

    /// Node count of each data center
    #[serde(default = "default_data_centers")]
    pub data_centers: Vec<usize>,

    #[serde(default)]
    pub peer_info: PeerInfo,
}

fn default_data_centers() -> Vec<usize> {
    vec![1]
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            name: None,
            data_centers: default_data_centers(),
            peer_info: PeerInfo::new(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Server configuration described by this file.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let versions = SupportedVersions::new(self.server.protocol_versions.iter().copied())
            .with_context(|| {
                format!(
                    "Unusable protocol versions {:?}, expected a non-empty set of versions >= 3",
                    self.server.protocol_versions
                )
            })?;

        let mut resolver = ResolverConfig::default().with_policy(self.resolver.policy);
        if let Some(ip) = self.resolver.starting_ip {
            resolver.starting_ip = ip;
        }
        if let Some(port) = self.resolver.port {
            resolver.port = port;
        }
        if let Some([first, last]) = self.resolver.port_range {
            if first > last {
                bail!("Empty port range [{}, {}]", first, last);
            }
            resolver.port_range = first..=last;
        }

        let mut config = ServerConfig::default()
            .with_bind_timeout(Duration::from_millis(self.server.bind_timeout_ms))
            .with_resolver(resolver)
            .with_protocol_versions(versions);
        if let Some(max) = self.server.max_frame_length {
            config = config.with_max_frame_length(max);
        }
        if let Some(capacity) = self.server.activity_log_capacity {
            config = config.with_activity_log_capacity(capacity);
        }
        Ok(config)
    }

    /// Definition of the cluster to register.
    pub fn cluster_spec(&self) -> Result<ClusterSpec> {
        if self.cluster.data_centers.is_empty() || self.cluster.data_centers.contains(&0) {
            bail!(
                "Every data center needs at least one node, got {:?}",
                self.cluster.data_centers
            );
        }
        let mut builder = ClusterSpec::builder();
        if let Some(name) = &self.cluster.name {
            builder = builder.with_name(name.clone());
        }
        for (key, value) in &self.cluster.peer_info {
            builder = builder.with_peer_info(key.clone(), value.clone());
        }
        for count in &self.cluster.data_centers {
            builder = builder.with_data_center(DataCenterSpec::builder().with_nodes(*count).build());
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SimulatorConfig::parse("").unwrap();
        let server = config.server_config().unwrap();
        assert_eq!(server.bind_timeout, Duration::from_secs(10));
        assert_eq!(server.resolver.policy, ResolverPolicy::IncrementingIp);
        assert_eq!(server.activity_log_capacity, 10_000);
        assert_eq!(config.cluster_spec().unwrap().node_count(), 1);
    }

    #[test]
    fn test_full_file() {
        let config = SimulatorConfig::parse(
            r#"
            [server]
            bind_timeout_ms = 250
            protocol_versions = [4]
            activity_log_capacity = 0

            [resolver]
            policy = "node-per-port"
            starting_ip = "127.0.2.1"
            port_range = [50000, 50010]

            [cluster]
            name = "sim"
            data_centers = [2, 3]

            [cluster.peer_info]
            release_version = "4.0.0"
            "#,
        )
        .unwrap();

        let server = config.server_config().unwrap();
        assert_eq!(server.bind_timeout, Duration::from_millis(250));
        assert_eq!(server.protocol_versions.highest().0, 4);
        assert_eq!(server.activity_log_capacity, 0);
        assert_eq!(server.resolver.port_range, 50000..=50010);
        assert_eq!(server.resolver.starting_ip, Ipv4Addr::new(127, 0, 2, 1));

        let spec = config.cluster_spec().unwrap();
        assert_eq!(spec.name.as_deref(), Some("sim"));
        assert_eq!(spec.node_count(), 5);
        assert_eq!(spec.peer_info["release_version"], "4.0.0");
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = SimulatorConfig::parse("[server]\nprotocol_versions = [1, 2]").unwrap();
        assert!(config.server_config().is_err());

        let config = SimulatorConfig::parse("[cluster]\ndata_centers = [2, 0]").unwrap();
        assert!(config.cluster_spec().is_err());

        assert!(SimulatorConfig::parse("[server]\nbind_timeout = 5").is_err());
    }
}
