//! Starting and stopping a configured cluster.

use protosim_protocol::Message;
use protosim_server::testing::MockClient;
use protosim_simulator::{Simulator, SimulatorConfig};
use tracing_test::traced_test;

#[traced_test]
#[tokio::test]
async fn test_start_serves_every_node_then_stop() {
    let config = SimulatorConfig::parse(
        r#"
        [server]
        bind_timeout_ms = 1000

        [resolver]
        policy = "virtual"

        [cluster]
        name = "sim"
        data_centers = [2, 1]
        "#,
    )
    .unwrap();

    let simulator = Simulator::start(&config).await.unwrap();
    let cluster = simulator.cluster().clone();
    assert_eq!(cluster.name(), "sim");
    assert_eq!(cluster.nodes().count(), 3);

    for node in cluster.nodes() {
        let mut client = MockClient::connect(node.address(), simulator.server().local_network())
            .await
            .unwrap();
        client.startup().await.unwrap();
        assert_eq!(client.next().await.unwrap().message, Message::Ready);
    }

    let server = simulator.server().clone();
    simulator.stop().await.unwrap();
    assert!(server.cluster_registry().is_empty());
}
