//! Registration, admission and request handling against live nodes.

use bytes::Bytes;
use protosim_protocol::{
    CqlValue, DataType, ErrorKind, Frame, Message, Opcode, ProtocolVersion, ResultBody, Startup,
};
use protosim_server::testing::MockClient;
use protosim_server::{AdmissionState, RejectScope, ResolverPolicy, Server, ServerConfig, ServerError};
use protosim_stubbing::{
    CloseKind, DisconnectScope, Prime, PrimeKind, PrimedResult, QueryWhen, Then,
};
use protosim_types::{
    ClusterId, ClusterSpec, DataCenterId, DataCenterSpec, NodeAddress, NodeSpec, Scope,
};
use std::collections::HashSet;
use std::io;
use std::time::{Duration, Instant};
use tracing_test::traced_test;

/// How long to wait before concluding a response is not coming.
const SILENCE: Duration = Duration::from_millis(300);

fn server() -> Server {
    Server::new(
        ServerConfig::default()
            .with_resolver_policy(ResolverPolicy::Virtual)
            .with_bind_timeout(Duration::from_millis(500)),
    )
}

fn local(name: &str) -> NodeAddress {
    NodeAddress::Local(name.to_string())
}

fn tcp_any_port() -> NodeAddress {
    NodeAddress::Inet("127.0.0.1:0".parse().unwrap())
}

async fn client(server: &Server, address: &NodeAddress) -> MockClient {
    MockClient::connect(address, server.local_network())
        .await
        .unwrap()
}

async fn assert_ready(client: &mut MockClient) {
    let stream = client.startup().await.unwrap();
    let reply = client.next().await.unwrap();
    assert_eq!(reply.stream_id, stream);
    assert_eq!(reply.message, Message::Ready);
}

// ═══════════════════════════════════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════════════════════════════════

#[traced_test]
#[tokio::test]
async fn test_register_node() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();

    let registry = server.cluster_registry();
    assert_eq!(registry.len(), 1);
    let cluster = registry.get(node.key().cluster).unwrap();
    assert_eq!(cluster.data_centers().len(), 1);
    assert_eq!(cluster.nodes().count(), 1);
    assert!(node.address().is_local());

    let mut client = client(&server, node.address()).await;
    assert_ready(&mut client).await;
}

#[traced_test]
#[tokio::test]
async fn test_register_node_belonging_to_a_cluster_fails() {
    let server = server();
    let cluster = ClusterSpec::builder().with_nodes(&[1]).build();
    let node = cluster.data_centers[0].nodes[0].clone();
    let dc = cluster.data_centers[0].clone();

    let err = server.register_node(node).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)), "{err}");
    let err = server.register(dc).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)), "{err}");
    assert!(server.cluster_registry().is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_register_lone_data_center() {
    let server = server();
    let dc = DataCenterSpec::builder().with_nodes(3).build();
    let cluster = server.register(dc).await.unwrap();
    assert_eq!(cluster.data_centers().len(), 1);
    assert_eq!(cluster.nodes().count(), 3);
}

#[traced_test]
#[tokio::test]
async fn test_register_cluster() {
    let server = server();
    let spec = ClusterSpec::builder().with_nodes(&[5, 5]).build();
    let cluster = server.register(spec).await.unwrap();

    let registry = server.cluster_registry();
    assert!(std::sync::Arc::ptr_eq(
        registry.get(cluster.id()).unwrap(),
        &cluster
    ));
    assert_eq!(cluster.data_centers().len(), 2);
    let mut missing = cluster.nodes().next().unwrap().key();
    missing.node = protosim_types::NodeId(99);
    assert!(server.node(&missing).is_none());

    let mut ids = HashSet::new();
    let mut addresses = HashSet::new();
    for dc in cluster.data_centers() {
        assert_eq!(dc.nodes().len(), 5);
        for node in dc.nodes() {
            assert!(ids.insert(node.id()));
            assert!(addresses.insert(node.address().clone()));
            assert!(std::sync::Arc::ptr_eq(&server.node(&node.key()).unwrap(), node));
            let mut client = client(&server, node.address()).await;
            assert_ready(&mut client).await;
        }
    }
}

#[traced_test]
#[tokio::test]
async fn test_register_cluster_with_some_data_center_ids_set() {
    let server = server();
    let spec = ClusterSpec::builder()
        .with_data_center(
            DataCenterSpec::builder()
                .with_id(DataCenterId(1))
                .with_nodes(1)
                .build(),
        )
        .with_data_center(DataCenterSpec::builder().with_nodes(1).build())
        .build();
    let cluster = server.register(spec).await.unwrap();

    let ids: Vec<DataCenterId> = cluster.data_centers().iter().map(|dc| dc.id()).collect();
    assert_eq!(ids, vec![DataCenterId(1), DataCenterId(0)]);

    let scope = Scope::data_center(cluster.id(), DataCenterId(1));
    let matched: Vec<_> = cluster
        .nodes()
        .filter(|node| scope.contains(&node.key()))
        .collect();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].key().data_center, DataCenterId(1));
    assert_eq!(
        cluster.data_center(DataCenterId(0)).unwrap().nodes()[0].key(),
        cluster.data_centers()[1].nodes()[0].key()
    );
}

#[traced_test]
#[tokio::test]
async fn test_register_cluster_over_tcp() {
    let server = server();
    let spec = ClusterSpec::builder()
        .with_data_center(
            DataCenterSpec::builder()
                .with_node(NodeSpec::builder().with_address(tcp_any_port()).build())
                .with_node(NodeSpec::builder().with_address(tcp_any_port()).build())
                .build(),
        )
        .build();
    let cluster = server.register(spec).await.unwrap();

    for node in cluster.nodes() {
        let addr = node.address().socket_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(
            cluster.topology().node(&node.key()).unwrap().address,
            *node.address()
        );
        let mut client = client(&server, node.address()).await;
        assert_ready(&mut client).await;
    }
}

#[traced_test]
#[tokio::test]
async fn test_register_cluster_fails_when_node_already_bound() {
    let server = server();
    let spec = ClusterSpec::builder()
        .with_data_center(
            DataCenterSpec::builder()
                .with_node(NodeSpec::builder().with_address(local("dup")).build())
                .with_node(NodeSpec::builder().with_address(local("dup")).build())
                .build(),
        )
        .build();

    match server.register(spec).await {
        Err(ServerError::Bind { source, .. }) => {
            assert_eq!(source.kind(), io::ErrorKind::AddrInUse)
        }
        other => panic!("expected bind failure, got {:?}", other),
    }
    assert!(server.cluster_registry().is_empty());
    assert!(!server.local_network().is_bound("dup"));

    // Same shape without the collision registers cleanly.
    let spec = ClusterSpec::builder()
        .with_data_center(
            DataCenterSpec::builder()
                .with_node(NodeSpec::builder().with_address(local("dup")).build())
                .with_node(NodeSpec::builder().with_address(local("other")).build())
                .build(),
        )
        .build();
    let cluster = server.register(spec).await.unwrap();
    assert_eq!(cluster.nodes().count(), 2);
}

#[traced_test]
#[tokio::test]
async fn test_register_fails_when_tcp_port_taken() {
    let server = server();
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = NodeAddress::Inet(taken.local_addr().unwrap());

    let err = server
        .register_node(NodeSpec::builder().with_address(address).build())
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Bind { .. }), "{err}");
    assert!(!err.is_timeout());
    assert!(server.cluster_registry().is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_register_cluster_fails_when_bind_times_out() {
    let server = server();
    server
        .local_network()
        .set_bind_delay("slow", Duration::from_secs(1));
    let spec = ClusterSpec::builder()
        .with_data_center(
            DataCenterSpec::builder()
                .with_node(NodeSpec::builder().with_address(local("fast")).build())
                .with_node(NodeSpec::builder().with_address(local("slow")).build())
                .build(),
        )
        .build();

    let err = server.register(spec).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert!(server.cluster_registry().is_empty());
    assert!(!server.local_network().is_bound("fast"));
    assert!(!server.local_network().is_bound("slow"));
}

#[traced_test]
#[tokio::test]
async fn test_register_duplicate_cluster_id_fails() {
    let server = server();
    let spec = ClusterSpec::builder()
        .with_id(ClusterId(7))
        .with_nodes(&[1])
        .build();
    server.register(spec.clone()).await.unwrap();

    let err = server.register(spec).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)), "{err}");
    assert_eq!(server.cluster_registry().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
// Unregistration
// ═══════════════════════════════════════════════════════════════════════

#[traced_test]
#[tokio::test]
async fn test_unregister_cluster() {
    let server = server();
    let cluster = server
        .register(ClusterSpec::builder().with_nodes(&[2, 2]).build())
        .await
        .unwrap();

    let mut clients = Vec::new();
    for node in cluster.nodes() {
        let mut client = client(&server, node.address()).await;
        assert_ready(&mut client).await;
        clients.push(client);
    }

    let removed = server.unregister(cluster.id()).await.unwrap();
    assert_eq!(removed.id(), cluster.id());
    assert!(server.cluster_registry().is_empty());

    for client in &mut clients {
        assert!(client.is_closed(Duration::from_secs(2)).await);
    }
    for node in cluster.nodes() {
        assert!(!node.is_listening());
        let err = MockClient::connect(node.address(), server.local_network())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    // A second unregister of the same id fails.
    assert!(matches!(
        server.unregister(cluster.id()).await,
        Err(ServerError::Config(_))
    ));
}

#[traced_test]
#[tokio::test]
async fn test_unregister_cluster_without_id() {
    let server = server();
    let spec = ClusterSpec::builder().with_nodes(&[1]).build();
    let err = server.unregister_spec(&spec).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)), "{err}");
}

#[traced_test]
#[tokio::test]
async fn test_unregister_cluster_not_registered() {
    let server = server();
    let err = server.unregister(ClusterId(42)).await.unwrap_err();
    assert!(matches!(err, ServerError::Config(_)), "{err}");
}

#[traced_test]
#[tokio::test]
async fn test_shutdown_unregisters_everything() {
    let server = server();
    server.register_node(NodeSpec::default()).await.unwrap();
    server
        .register(ClusterSpec::builder().with_nodes(&[2]).build())
        .await
        .unwrap();
    assert_eq!(server.cluster_registry().len(), 2);

    server.shutdown().await;
    assert!(server.cluster_registry().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// Admission
// ═══════════════════════════════════════════════════════════════════════

#[traced_test]
#[tokio::test]
async fn test_stop_accepting_startup_and_accept_again() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut existing = client(&server, node.address()).await;
    assert_ready(&mut existing).await;

    node.reject_new_connections(-1, RejectScope::RejectStartup)
        .await
        .unwrap();
    assert_eq!(node.admission_state(), AdmissionState::RejectingStartup);

    // Connects, but STARTUP is never answered.
    let mut rejected = client(&server, node.address()).await;
    rejected.startup().await.unwrap();
    assert!(rejected.next_within(SILENCE).await.unwrap().is_none());

    // Already open connections are unaffected.
    assert_ready(&mut existing).await;

    node.accept_new_connections().await.unwrap();
    assert_eq!(node.admission_state(), AdmissionState::Accepting);
    let mut accepted = client(&server, node.address()).await;
    assert_ready(&mut accepted).await;
}

#[traced_test]
#[tokio::test]
async fn test_stop_accepting_connections_and_accept_again() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut existing = client(&server, node.address()).await;
    assert_ready(&mut existing).await;

    node.reject_new_connections(-1, RejectScope::Unbind)
        .await
        .unwrap();
    assert_eq!(node.admission_state(), AdmissionState::Unbound);
    let err = MockClient::connect(node.address(), server.local_network())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);

    assert_ready(&mut existing).await;

    node.accept_new_connections().await.unwrap();
    assert!(node.is_listening());
    let mut accepted = client(&server, node.address()).await;
    assert_ready(&mut accepted).await;
}

#[traced_test]
#[tokio::test]
async fn test_unbind_and_rebind_over_tcp() {
    let server = server();
    let node = server
        .register_node(NodeSpec::builder().with_address(tcp_any_port()).build())
        .await
        .unwrap();
    let mut existing = client(&server, node.address()).await;
    assert_ready(&mut existing).await;

    node.reject_new_connections(0, RejectScope::Unbind)
        .await
        .unwrap();
    assert!(MockClient::connect(node.address(), server.local_network())
        .await
        .is_err());
    assert_ready(&mut existing).await;

    node.accept_new_connections().await.unwrap();
    let mut accepted = client(&server, node.address()).await;
    assert_ready(&mut accepted).await;
}

#[traced_test]
#[tokio::test]
async fn test_stop_accepting_connections_after_5() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    node.reject_new_connections(5, RejectScope::Unbind)
        .await
        .unwrap();

    let mut clients = Vec::new();
    for _ in 0..5 {
        let mut client = client(&server, node.address()).await;
        assert_ready(&mut client).await;
        clients.push(client);
    }
    assert_eq!(node.admission_state(), AdmissionState::Unbound);
    assert!(MockClient::connect(node.address(), server.local_network())
        .await
        .is_err());
    assert_eq!(node.connection_count(), 5);

    // The drained connections keep working.
    for client in &mut clients {
        assert_ready(client).await;
    }
}

#[traced_test]
#[tokio::test]
async fn test_unbind_after_2_over_tcp() {
    let server = server();
    let node = server
        .register_node(NodeSpec::builder().with_address(tcp_any_port()).build())
        .await
        .unwrap();
    node.reject_new_connections(2, RejectScope::Unbind)
        .await
        .unwrap();

    let mut clients = Vec::new();
    for _ in 0..2 {
        let mut client = client(&server, node.address()).await;
        assert_ready(&mut client).await;
        clients.push(client);
    }
    assert_eq!(node.admission_state(), AdmissionState::Unbound);
    let err = MockClient::connect(node.address(), server.local_network())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    assert_eq!(node.connection_count(), 2);
    for client in &mut clients {
        assert_ready(client).await;
    }

    node.accept_new_connections().await.unwrap();
    let mut accepted = client(&server, node.address()).await;
    assert_ready(&mut accepted).await;
}

#[traced_test]
#[tokio::test]
async fn test_reject_startup_after_2() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    node.reject_new_connections(2, RejectScope::RejectStartup)
        .await
        .unwrap();

    for _ in 0..2 {
        let mut client = client(&server, node.address()).await;
        assert_ready(&mut client).await;
    }
    let mut third = client(&server, node.address()).await;
    third.startup().await.unwrap();
    assert!(third.next_within(SILENCE).await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════
// Protocol versions
// ═══════════════════════════════════════════════════════════════════════

#[traced_test]
#[tokio::test]
async fn test_unsupported_protocol_version_gets_protocol_error() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut client = client(&server, node.address())
        .await
        .with_version(ProtocolVersion(6));

    let stream = client.startup().await.unwrap();
    let reply = client.next().await.unwrap();
    assert_eq!(reply.version, ProtocolVersion::V5);
    assert_eq!(reply.stream_id, stream);
    match reply.message {
        Message::Error(body) => {
            assert_eq!(body.kind, ErrorKind::Protocol);
            assert_eq!(
                body.message,
                "Invalid or unsupported protocol version (6); supported versions are (3/v3, 4/v4, 5/v5)"
            );
        }
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert!(client.next_within(SILENCE).await.unwrap().is_none());

    // The same connection still works on a supported version.
    client
        .send_frame(Frame::new(
            ProtocolVersion::V4,
            9,
            Message::Startup(Startup::new()),
        ))
        .await
        .unwrap();
    let reply = client.next().await.unwrap();
    assert_eq!(reply.stream_id, 9);
    assert_eq!(reply.message, Message::Ready);
}

#[traced_test]
#[tokio::test]
async fn test_v1_header_is_rejected_in_band() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut client = client(&server, node.address()).await;

    // v1 STARTUP: version, flags, one-byte stream, opcode, empty body.
    client
        .send_raw(Bytes::from_static(&[0x01, 0x00, 0x03, 0x01, 0, 0, 0, 0]))
        .await
        .unwrap();
    let reply = client.next().await.unwrap();
    assert_eq!(reply.version, ProtocolVersion::V5);
    assert_eq!(reply.stream_id, 3);
    assert!(matches!(reply.message, Message::Error(ref body) if body.kind == ErrorKind::Protocol));

    assert_ready(&mut client).await;
}

#[traced_test]
#[tokio::test]
async fn test_unsupported_version_with_huge_length_closes_after_error() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut client = client(&server, node.address()).await;

    // v6 STARTUP header declaring a 0x7FFFFFFF byte body.
    client
        .send_raw(Bytes::from_static(&[
            0x06, 0x00, 0x00, 0x05, 0x01, 0x7F, 0xFF, 0xFF, 0xFF,
        ]))
        .await
        .unwrap();
    let reply = client.next().await.unwrap();
    assert_eq!(reply.version, ProtocolVersion::V5);
    assert_eq!(reply.stream_id, 5);
    assert!(matches!(reply.message, Message::Error(ref body) if body.kind == ErrorKind::Protocol));

    assert!(client.is_closed(SILENCE).await);
}

// ═══════════════════════════════════════════════════════════════════════
// Stubs over the wire
// ═══════════════════════════════════════════════════════════════════════

#[traced_test]
#[tokio::test]
async fn test_primed_query_returns_rows() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    server
        .prime(Prime::new(
            QueryWhen::exact("SELECT name FROM users"),
            PrimedResult::rows(
                vec![("name", DataType::Varchar)],
                vec![vec![CqlValue::from("alice")]],
            ),
        ))
        .unwrap();

    let mut client = client(&server, node.address()).await;
    assert_ready(&mut client).await;

    let stream = client.query("SELECT name FROM users").await.unwrap();
    let reply = client.next().await.unwrap();
    assert_eq!(reply.stream_id, stream);
    match reply.message {
        Message::Result(ResultBody::Rows(rows)) => {
            assert_eq!(rows.rows, vec![vec![Some(Bytes::from_static(b"alice"))]]);
        }
        other => panic!("expected rows, got {:?}", other),
    }

    client.query("SELECT name FROM admins").await.unwrap();
    assert!(client.next_within(SILENCE).await.unwrap().is_none());

    let log = server.activity_log(&Scope::node(node.key()));
    let queries: Vec<_> = log
        .iter()
        .filter(|entry| entry.opcode == Opcode::Query)
        .map(|entry| (entry.query.as_deref(), entry.primed))
        .collect();
    assert_eq!(
        queries,
        vec![
            (Some("SELECT name FROM users"), true),
            (Some("SELECT name FROM admins"), false),
        ]
    );
    assert_eq!(server.clear_activity_log(&Scope::any()), log.len());
    assert!(server.activity_log(&Scope::any()).is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_activity_log_can_be_turned_off() {
    let server = Server::new(
        ServerConfig::default()
            .with_resolver_policy(ResolverPolicy::Virtual)
            .with_activity_log_capacity(0),
    );
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut client = client(&server, node.address()).await;
    assert_ready(&mut client).await;

    assert!(server.activity_log(&Scope::any()).is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_scoped_prime_and_clear() {
    let server = server();
    let a = server.register_node(NodeSpec::default()).await.unwrap();
    let b = server.register_node(NodeSpec::default()).await.unwrap();
    server
        .prime(
            Prime::new(QueryWhen::exact("ping"), PrimedResult::Void)
                .with_scope(Scope::cluster(a.key().cluster)),
        )
        .unwrap();

    let mut on_a = client(&server, a.address()).await;
    let mut on_b = client(&server, b.address()).await;
    on_a.query("ping").await.unwrap();
    assert_eq!(
        on_a.next().await.unwrap().message,
        Message::Result(ResultBody::Void)
    );
    on_b.query("ping").await.unwrap();
    assert!(on_b.next_within(SILENCE).await.unwrap().is_none());

    assert_eq!(server.clear(&Scope::cluster(a.key().cluster), PrimeKind::All), 1);
    on_a.query("ping").await.unwrap();
    assert!(on_a.next_within(SILENCE).await.unwrap().is_none());
}

#[traced_test]
#[tokio::test]
async fn test_delay_does_not_block_other_connections() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let delay = Duration::from_millis(800);
    server
        .prime(Prime::new(
            QueryWhen::exact("slow"),
            Then::new(PrimedResult::Void).with_delay(delay),
        ))
        .unwrap();

    let mut slow = client(&server, node.address()).await;
    let mut fast = client(&server, node.address()).await;

    let started = Instant::now();
    let slow_stream = slow.query("slow").await.unwrap();
    let startup_stream = slow.startup().await.unwrap();

    assert_ready(&mut fast).await;
    assert!(started.elapsed() < delay);

    // Requests on the delayed connection queue behind the delay.
    let first = slow.next().await.unwrap();
    assert!(started.elapsed() >= delay);
    assert_eq!(first.stream_id, slow_stream);
    assert_eq!(first.message, Message::Result(ResultBody::Void));
    let second = slow.next().await.unwrap();
    assert_eq!(second.stream_id, startup_stream);
    assert_eq!(second.message, Message::Ready);
}

#[traced_test]
#[tokio::test]
async fn test_close_node_scope_disconnects_every_connection_of_the_node() {
    let server = server();
    let cluster = server
        .register(ClusterSpec::builder().with_nodes(&[2]).build())
        .await
        .unwrap();
    let nodes: Vec<_> = cluster.nodes().cloned().collect();
    server
        .prime(Prime::new(
            QueryWhen::exact("kill"),
            PrimedResult::close(DisconnectScope::Node, CloseKind::Disconnect),
        ))
        .unwrap();

    let mut first = client(&server, nodes[0].address()).await;
    let mut second = client(&server, nodes[0].address()).await;
    let mut other = client(&server, nodes[1].address()).await;
    assert_ready(&mut second).await;
    assert_ready(&mut other).await;

    first.query("kill").await.unwrap();
    assert!(first.is_closed(Duration::from_secs(2)).await);
    assert!(second.is_closed(Duration::from_secs(2)).await);
    assert_ready(&mut other).await;

    // The node itself keeps listening.
    let mut again = client(&server, nodes[0].address()).await;
    assert_ready(&mut again).await;
}

#[traced_test]
#[tokio::test]
async fn test_respond_then_close_connection() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    server
        .prime(Prime::new(
            QueryWhen::exact("bye"),
            Then::new(PrimedResult::Void)
                .then_close(DisconnectScope::Connection, CloseKind::Disconnect),
        ))
        .unwrap();

    let mut client = client(&server, node.address()).await;
    client.query("bye").await.unwrap();
    assert_eq!(
        client.next().await.unwrap().message,
        Message::Result(ResultBody::Void)
    );
    assert!(client.is_closed(Duration::from_secs(2)).await);
}

#[traced_test]
#[tokio::test]
async fn test_node_close_connections() {
    let server = server();
    let node = server.register_node(NodeSpec::default()).await.unwrap();
    let mut client = client(&server, node.address()).await;
    assert_ready(&mut client).await;
    assert_eq!(node.connection_count(), 1);

    assert_eq!(node.close_connections(CloseKind::Disconnect), 1);
    assert!(client.is_closed(Duration::from_secs(2)).await);
}
