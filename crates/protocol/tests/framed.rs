//! Both codecs talking to each other over an in-memory pipe.

use futures::{SinkExt, StreamExt};
use protosim_protocol::{
    ClientCodec, ErrorBody, ErrorKind, Frame, Inbound, Message, ProtocolVersion, Query,
    ServerCodec, Startup, SupportedVersions, DEFAULT_MAX_FRAME_LENGTH,
};
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_unsupported_version_answered_then_supported_version_works() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let versions = SupportedVersions::default();
    let mut server = Framed::new(
        server_io,
        ServerCodec::new(versions.clone(), DEFAULT_MAX_FRAME_LENGTH),
    );
    let mut client = Framed::new(client_io, ClientCodec::new());

    client
        .send(Frame::new(
            ProtocolVersion(6),
            1,
            Message::Startup(Startup::new()),
        ))
        .await
        .unwrap();

    match server.next().await.unwrap().unwrap() {
        Inbound::Unsupported { version, stream_id } => {
            assert_eq!(version, 6);
            let reply = Frame::new(
                versions.highest(),
                stream_id,
                Message::Error(ErrorBody::protocol(versions.unsupported_message(version))),
            );
            server.send(reply).await.unwrap();
        }
        other => panic!("expected unsupported version, got {:?}", other),
    }

    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply.version, ProtocolVersion::V5);
    assert_eq!(reply.stream_id, 1);
    match reply.message {
        Message::Error(body) => {
            assert_eq!(body.kind, ErrorKind::Protocol);
            assert!(body.message.contains("(6)"));
        }
        other => panic!("expected error, got {:?}", other),
    }

    client
        .send(Frame::new(
            ProtocolVersion::V4,
            2,
            Message::Startup(Startup::new()),
        ))
        .await
        .unwrap();
    match server.next().await.unwrap().unwrap() {
        Inbound::Frame(frame) => {
            assert_eq!(frame.version, ProtocolVersion::V4);
            server.send(frame.reply(Message::Ready)).await.unwrap();
        }
        other => panic!("expected frame, got {:?}", other),
    }
    let ready = client.next().await.unwrap().unwrap();
    assert_eq!(ready.message, Message::Ready);
    assert_eq!(ready.stream_id, 2);
}

#[tokio::test]
async fn test_query_frame_survives_transport() {
    let (client_io, server_io) = tokio::io::duplex(1024);
    let mut server = Framed::new(
        server_io,
        ServerCodec::new(SupportedVersions::default(), DEFAULT_MAX_FRAME_LENGTH),
    );
    let mut client = Framed::new(client_io, ClientCodec::new());

    let sent = Frame::new(
        ProtocolVersion::V5,
        42,
        Message::Query(Query::new("SELECT release_version FROM system.local")),
    );
    client.send(sent.clone()).await.unwrap();

    match server.next().await.unwrap().unwrap() {
        Inbound::Frame(frame) => assert_eq!(frame, sent),
        other => panic!("expected frame, got {:?}", other),
    }
}
