//! Simulated native-protocol clusters.
//!
//! A [`Server`] binds every node of a registered topology to its own listener
//! and answers requests from stubs:
//!
//! ```text
//!                 ┌──────────────────────── Server ─────────────────────────┐
//!   register() ──►│ resolve addresses ─► bind all (timeout) ─► registry     │
//!                 │                                           │              │
//!                 │   BoundCluster ─► BoundDataCenter ─► BoundNode           │
//!                 │                                     │ accept loop        │
//!                 │                                     ▼                    │
//!   client ──────►│ listener ─► connection task ─► StubStore ─► actions      │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Nodes listen on real TCP addresses or on names of an in-process
//! [`LocalNetwork`]; both carry the same frames through the same codec.
//!
//! # Example
//!
//! ```no_run
//! use protosim_server::{ResolverPolicy, Server, ServerConfig};
//! use protosim_types::ClusterSpec;
//!
//! # async fn run() -> Result<(), protosim_server::ServerError> {
//! let server = Server::new(ServerConfig::default().with_resolver_policy(ResolverPolicy::Virtual));
//! let cluster = server
//!     .register(ClusterSpec::builder().with_nodes(&[3, 3]).build())
//!     .await?;
//! for node in cluster.nodes() {
//!     println!("{} listening on {}", node.key(), node.address());
//! }
//! server.unregister(cluster.id()).await?;
//! # Ok(())
//! # }
//! ```

mod activity;
mod bound;
mod config;
mod connection;
mod error;
mod local;
mod resolver;
mod server;
pub mod testing;

pub use activity::{ActivityEntry, ActivityLog, DEFAULT_ACTIVITY_LOG_CAPACITY};
pub use bound::{AdmissionState, BoundCluster, BoundDataCenter, BoundNode, RejectScope};
pub use config::{ResolverConfig, ResolverPolicy, ServerConfig};
pub use error::{ResolverError, ServerError};
pub use local::{connect, LocalListener, LocalNetwork, NodeStream};
pub use resolver::{AddressResolver, IncrementingIpResolver, NodePerPortResolver, VirtualResolver};
pub use server::{ClusterRegistry, Server, ServerBuilder};
