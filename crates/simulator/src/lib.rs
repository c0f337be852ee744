//! Run a simulated cluster from a configuration file.
//!
//! The `protosim` binary loads a [`SimulatorConfig`], registers one cluster
//! and serves it until interrupted. [`Simulator`] is the same flow as a
//! library, for embedding in test harnesses.

mod config;

pub use config::{ClusterSection, ResolverSection, ServerSection, SimulatorConfig};

use anyhow::{Context, Result};
use protosim_server::{BoundCluster, Server};
use std::sync::Arc;
use tracing::info;

/// A server with one registered cluster.
#[derive(Debug)]
pub struct Simulator {
    server: Server,
    cluster: Arc<BoundCluster>,
}

impl Simulator {
    /// Build the server and register the configured cluster.
    pub async fn start(config: &SimulatorConfig) -> Result<Self> {
        let server = Server::new(config.server_config()?);
        let spec = config.cluster_spec()?;
        let cluster = server
            .register(spec)
            .await
            .context("Failed to register cluster")?;

        for dc in cluster.data_centers() {
            for node in dc.nodes() {
                info!(
                    data_center = %dc.name(),
                    node = %node.name(),
                    address = %node.address(),
                    "Node listening"
                );
            }
        }
        info!(
            cluster = %cluster.name(),
            nodes = cluster.nodes().count(),
            "Cluster ready"
        );
        Ok(Self { server, cluster })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn cluster(&self) -> &Arc<BoundCluster> {
        &self.cluster
    }

    /// Unregister the cluster and close every connection.
    pub async fn stop(self) -> Result<()> {
        self.server
            .unregister(self.cluster.id())
            .await
            .context("Failed to unregister cluster")?;
        self.server.shutdown().await;
        Ok(())
    }
}
