//! What a matched stub asks the connection to do.

use protosim_protocol::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which connections a close action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectScope {
    /// Only the connection the request arrived on.
    Connection,
    /// Every connection to the receiving node.
    Node,
    /// Every connection to any node in the receiving node's data center.
    DataCenter,
    /// Every connection to any node in the receiving node's cluster.
    Cluster,
}

/// How a connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// Close both directions.
    Disconnect,
    /// Stop reading; responses can still be written.
    ShutdownRead,
    /// Stop writing; the client sees end of stream but requests are still read.
    ShutdownWrite,
}

/// One step of a stub's response, executed in order on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a response frame on the request's stream.
    Respond(Message),
    /// Hold back the following actions. Other connections are not affected.
    Delay(Duration),
    Close {
        scope: DisconnectScope,
        kind: CloseKind,
    },
    /// Matched, but deliberately send nothing.
    NoResponse,
}
