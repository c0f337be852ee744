//! Stubs every node answers without being primed.
//!
//! These cover what a driver needs to open a session: handshake, options,
//! event registration, keyspace switching and the peer tables used for
//! topology discovery. The peer rows are generated from the registered
//! topology, with per-node/per-DC/per-cluster peer info overriding defaults.

use crate::action::Action;
use crate::node::NodeView;
use crate::request::Request;
use bytes::{BufMut, Bytes, BytesMut};
use protosim_protocol::{
    AuthToken, ColumnSpec, DataType, ErrorBody, Message, ResultBody, Rows, RowsMetadata,
    Supported,
};
use protosim_types::{ClusterId, NodeKey, NodeTopology};
use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use uuid::Uuid;

static USE_KEYSPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*use\s+"?([A-Za-z0-9_]+)"?\s*;?\s*$"#).expect("valid regex")
});
static SYSTEM_LOCAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+.*\bfrom\s+system\.local\b").expect("valid regex")
});
static SYSTEM_PEERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+.*\bfrom\s+system\.peers\b").expect("valid regex")
});
static SYSTEM_PEERS_V2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*select\s+.*\bfrom\s+system\.peers_v2\b").expect("valid regex")
});

/// Built-in stubs, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Startup,
    Options,
    Register,
    AuthResponse,
    UseKeyspace,
    SystemLocal,
    SystemPeers,
    SystemPeersV2,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::Startup,
        Builtin::Options,
        Builtin::Register,
        Builtin::AuthResponse,
        Builtin::UseKeyspace,
        Builtin::SystemLocal,
        Builtin::SystemPeers,
        Builtin::SystemPeersV2,
    ];

    pub fn matches(&self, request: &Request<'_>) -> bool {
        match (self, request) {
            (Builtin::Startup, Request::Startup) => true,
            (Builtin::Options, Request::Options) => true,
            (Builtin::Register, Request::Register) => true,
            (Builtin::AuthResponse, Request::AuthResponse) => true,
            (Builtin::UseKeyspace, Request::Query { text, .. }) => USE_KEYSPACE.is_match(text),
            (Builtin::SystemLocal, Request::Query { text, .. }) => SYSTEM_LOCAL.is_match(text),
            (Builtin::SystemPeers, Request::Query { text, .. }) => SYSTEM_PEERS.is_match(text),
            (Builtin::SystemPeersV2, Request::Query { text, .. }) => {
                SYSTEM_PEERS_V2.is_match(text)
            }
            _ => false,
        }
    }

    pub fn actions(&self, node: &NodeView<'_>, request: &Request<'_>) -> Vec<Action> {
        let message = match self {
            Builtin::Startup | Builtin::Register => Message::Ready,
            Builtin::Options => Message::Supported(supported(node)),
            Builtin::AuthResponse => Message::AuthSuccess(AuthToken::default()),
            Builtin::UseKeyspace => {
                let keyspace = request
                    .text()
                    .and_then(|text| USE_KEYSPACE.captures(text))
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                Message::Result(ResultBody::SetKeyspace(keyspace))
            }
            Builtin::SystemLocal => Message::Result(ResultBody::Rows(local_rows(node))),
            Builtin::SystemPeers => Message::Result(ResultBody::Rows(peer_rows(node))),
            Builtin::SystemPeersV2 => {
                Message::Error(ErrorBody::invalid("unconfigured table peers_v2"))
            }
        };
        vec![Action::Respond(message)]
    }
}

fn supported(node: &NodeView<'_>) -> Supported {
    let mut options = BTreeMap::new();
    options.insert(
        "CQL_VERSION".to_string(),
        vec![node.info.cql_version.clone()],
    );
    options.insert("COMPRESSION".to_string(), Vec::new());
    options.insert("PROTOCOL_VERSIONS".to_string(), node.versions.labels());
    Supported { options }
}

// ─── Peer tables ───

fn text(s: &str) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(s.as_bytes()))
}

fn inet(ip: IpAddr) -> Option<Bytes> {
    Some(match ip {
        IpAddr::V4(v4) => Bytes::copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => Bytes::copy_from_slice(&v6.octets()),
    })
}

fn uuid_cell(id: Uuid) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(id.as_bytes()))
}

fn text_set(items: &[String]) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_i32(items.len() as i32);
    for item in items {
        buf.put_i32(item.len() as i32);
        buf.put_slice(item.as_bytes());
    }
    Some(buf.freeze())
}

fn derived_uuid(domain: &str) -> Uuid {
    let hash = blake3::hash(domain.as_bytes());
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&hash.as_bytes()[..16]);
    uuid::Builder::from_random_bytes(raw).into_uuid()
}

fn host_id(node: &NodeView<'_>, key: &NodeKey) -> Uuid {
    node.topology
        .peer_info(key, "host_id")
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| derived_uuid(&format!("host:{}", key)))
}

/// Same for every node of a cluster so drivers see schema agreement.
fn schema_version(node: &NodeView<'_>, cluster: ClusterId) -> Uuid {
    node.topology
        .peer_info(&node.key, "schema_version")
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| derived_uuid(&format!("schema:{}", cluster)))
}

/// Tokens spread evenly over the Murmur3 ring within each data center,
/// offset by data center so tokens never collide across DCs.
fn tokens(node: &NodeView<'_>, peer: &NodeTopology) -> Vec<String> {
    if let Some(explicit) = node.topology.peer_info(&peer.key, "tokens") {
        return explicit
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    let Some(dc) = node.topology.data_center(peer.key.data_center) else {
        return Vec::new();
    };
    let count = dc.nodes.len().max(1) as i128;
    let index = dc
        .nodes
        .iter()
        .position(|n| n.key == peer.key)
        .unwrap_or(0) as i128;
    let dc_offset = peer.key.data_center.0 as i128 * 100;
    let token = i64::MIN as i128 + index * ((1i128 << 64) / count) + dc_offset;
    vec![token.clamp(i64::MIN as i128, i64::MAX as i128).to_string()]
}

fn string_or<'a>(node: &NodeView<'a>, key: &NodeKey, name: &str, default: &'a str) -> &'a str {
    node.topology.peer_info(key, name).unwrap_or(default)
}

fn column(table: &str, name: &str, ty: DataType) -> ColumnSpec {
    ColumnSpec::new("system", table, name, ty)
}

fn local_rows(node: &NodeView<'_>) -> Rows {
    let columns = vec![
        column("local", "key", DataType::Varchar),
        column("local", "bootstrapped", DataType::Varchar),
        column("local", "broadcast_address", DataType::Inet),
        column("local", "cluster_name", DataType::Varchar),
        column("local", "cql_version", DataType::Varchar),
        column("local", "data_center", DataType::Varchar),
        column("local", "gossip_generation", DataType::Int),
        column("local", "host_id", DataType::Uuid),
        column("local", "listen_address", DataType::Inet),
        column("local", "native_protocol_version", DataType::Varchar),
        column("local", "partitioner", DataType::Varchar),
        column("local", "rack", DataType::Varchar),
        column("local", "release_version", DataType::Varchar),
        column("local", "rpc_address", DataType::Inet),
        column("local", "schema_version", DataType::Uuid),
        column("local", "tokens", DataType::Set(Box::new(DataType::Varchar))),
    ];

    let mut rows = Vec::new();
    if let Some(me) = node.node() {
        let key = me.key;
        let ip = me.address.advertised_ip();
        let dc_name = node
            .topology
            .data_center(key.data_center)
            .map(|dc| dc.name.as_str())
            .unwrap_or_default();
        let highest = node.versions.highest().0.to_string();
        rows.push(vec![
            text("local"),
            text("COMPLETED"),
            inet(ip),
            text(&node.topology.name),
            text(&node.info.cql_version),
            text(dc_name),
            Some(Bytes::copy_from_slice(&1i32.to_be_bytes())),
            uuid_cell(host_id(node, &key)),
            inet(ip),
            text(&highest),
            text(string_or(node, &key, "partitioner", &node.info.partitioner)),
            text(string_or(node, &key, "rack", "rack1")),
            text(string_or(
                node,
                &key,
                "release_version",
                &node.info.release_version,
            )),
            inet(ip),
            uuid_cell(schema_version(node, key.cluster)),
            text_set(&tokens(node, me)),
        ]);
    }

    Rows {
        metadata: RowsMetadata::new(columns),
        rows,
    }
}

fn peer_rows(node: &NodeView<'_>) -> Rows {
    let columns = vec![
        column("peers", "peer", DataType::Inet),
        column("peers", "data_center", DataType::Varchar),
        column("peers", "host_id", DataType::Uuid),
        column("peers", "preferred_ip", DataType::Inet),
        column("peers", "rack", DataType::Varchar),
        column("peers", "release_version", DataType::Varchar),
        column("peers", "rpc_address", DataType::Inet),
        column("peers", "schema_version", DataType::Uuid),
        column("peers", "tokens", DataType::Set(Box::new(DataType::Varchar))),
    ];

    let rows = node
        .topology
        .data_centers
        .iter()
        .flat_map(|dc| dc.nodes.iter().map(move |peer| (dc, peer)))
        .filter(|(_, peer)| peer.key != node.key)
        .map(|(dc, peer)| {
            let ip = peer.address.advertised_ip();
            vec![
                inet(ip),
                text(&dc.name),
                uuid_cell(host_id(node, &peer.key)),
                None,
                text(string_or(node, &peer.key, "rack", "rack1")),
                text(string_or(
                    node,
                    &peer.key,
                    "release_version",
                    &node.info.release_version,
                )),
                inet(ip),
                uuid_cell(schema_version(node, peer.key.cluster)),
                text_set(&tokens(node, peer)),
            ]
        })
        .collect();

    Rows {
        metadata: RowsMetadata::new(columns),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ServerInfo;
    use crate::request::PreparedRegistry;
    use protosim_protocol::{Frame, ProtocolVersion, Query, SupportedVersions};
    use protosim_types::{ClusterSpec, ClusterTopology, NodeAddress};

    fn topology() -> ClusterTopology {
        let mut spec = ClusterSpec::builder()
            .with_name("sim")
            .with_nodes(&[2, 1])
            .build();
        spec.assign_ids(ClusterId(0));
        for (i, dc) in spec.data_centers.iter_mut().enumerate() {
            for (j, node) in dc.nodes.iter_mut().enumerate() {
                let addr = format!("127.0.{}.{}:9042", i + 1, j + 1);
                node.address = Some(NodeAddress::Inet(addr.parse().unwrap()));
            }
        }
        spec.data_centers[1]
            .nodes[0]
            .peer_info
            .insert("rack".into(), "rackX".into());
        ClusterTopology::from_spec(&spec).unwrap()
    }

    fn query_actions(text: &str) -> Option<Vec<Action>> {
        let topology = topology();
        let versions = SupportedVersions::default();
        let info = ServerInfo::default();
        let node = NodeView {
            key: topology.data_centers[0].nodes[0].key,
            topology: &topology,
            versions: &versions,
            info: &info,
        };
        let frame = Frame::new(ProtocolVersion::V4, 0, Message::Query(Query::new(text)));
        let request = Request::resolve(&frame, &PreparedRegistry::new()).unwrap();
        Builtin::ALL
            .iter()
            .find(|b| b.matches(&request))
            .map(|b| b.actions(&node, &request))
    }

    fn rows_of(actions: Vec<Action>) -> Rows {
        match actions.into_iter().next() {
            Some(Action::Respond(Message::Result(ResultBody::Rows(rows)))) => rows,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_use_keyspace() {
        let actions = query_actions("USE \"MyKs\";").unwrap();
        assert_eq!(
            actions,
            vec![Action::Respond(Message::Result(ResultBody::SetKeyspace(
                "MyKs".to_string()
            )))]
        );
        assert!(query_actions("USE a b").is_none());
    }

    #[test]
    fn test_system_local_describes_receiving_node() {
        let rows = rows_of(query_actions("SELECT * FROM system.local WHERE key='local'").unwrap());
        assert_eq!(rows.rows.len(), 1);
        let row = &rows.rows[0];
        assert_eq!(row[3].as_deref(), Some(&b"sim"[..]));
        assert_eq!(row[5].as_deref(), Some(&b"dc0"[..]));
        assert_eq!(row[2].as_deref(), Some(&[127, 0, 1, 1][..]));
        assert_eq!(row[9].as_deref(), Some(&b"5"[..]));
    }

    #[test]
    fn test_system_peers_lists_other_nodes() {
        let rows = rows_of(query_actions("select peer, rack from system.peers").unwrap());
        assert_eq!(rows.rows.len(), 2);
        let racks: Vec<_> = rows.rows.iter().map(|r| r[4].clone()).collect();
        assert!(racks.contains(&text("rackX")));
        assert!(racks.contains(&text("rack1")));
    }

    #[test]
    fn test_peers_v2_is_unconfigured() {
        let actions = query_actions("SELECT * FROM system.peers_v2").unwrap();
        match &actions[0] {
            Action::Respond(Message::Error(body)) => {
                assert_eq!(body.message, "unconfigured table peers_v2")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tokens_distinct_across_cluster() {
        let topology = topology();
        let versions = SupportedVersions::default();
        let info = ServerInfo::default();
        let node = NodeView {
            key: topology.data_centers[0].nodes[0].key,
            topology: &topology,
            versions: &versions,
            info: &info,
        };
        let all: Vec<Vec<String>> = topology.nodes().map(|n| tokens(&node, n)).collect();
        assert_eq!(all[0], vec![i64::MIN.to_string()]);
        assert_ne!(all[0], all[1]);
        assert_ne!(all[0], all[2]);
    }
}
