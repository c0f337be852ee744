//! Per-connection task: decode, match, execute actions.
//!
//! Each accepted connection runs in its own task:
//!
//! ```text
//!   ┌──────────┐   Inbound   ┌────────────┐  Vec<Action>  ┌──────────────┐
//!   │  Framed  │ ──────────► │ StubStore  │ ────────────► │ run actions  │
//!   │ (codec)  │             │  ::handle  │               │ in order     │
//!   └──────────┘             └────────────┘               └──────────────┘
//!        ▲                                                       │
//!        └────────────── responses, delays, closes ◄─────────────┘
//! ```
//!
//! Actions of one request finish before the next frame is read, so a delay
//! holds back later requests on the same connection while other connections
//! keep being served by their own tasks.

use crate::activity::ActivityEntry;
use crate::bound::BoundNode;
use crate::local::NodeStream;
use crate::server::Shared;
use futures::{SinkExt, StreamExt};
use protosim_protocol::{ErrorBody, Frame, Inbound, Message, ServerCodec};
use protosim_stubbing::{Action, CloseKind, DisconnectScope, NodeView, Request};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Node-side handle to a running connection.
#[derive(Debug)]
pub(crate) struct ConnectionHandle {
    peer: String,
    control: mpsc::UnboundedSender<CloseKind>,
}

impl ConnectionHandle {
    pub(crate) fn new(peer: String) -> (Self, mpsc::UnboundedReceiver<CloseKind>) {
        let (control, rx) = mpsc::unbounded_channel();
        (Self { peer, control }, rx)
    }

    /// Ask the connection to close. Returns false if it already exited.
    pub(crate) fn close(&self, kind: CloseKind) -> bool {
        trace!(peer = %self.peer, ?kind, "Close requested");
        self.control.send(kind).is_ok()
    }
}

/// Everything a connection task needs besides its stream.
pub(crate) struct Context {
    pub(crate) id: u64,
    pub(crate) peer: String,
    pub(crate) node: Arc<BoundNode>,
    pub(crate) shared: Arc<Shared>,
    /// STARTUP gets no answer on this connection.
    pub(crate) reject_startup: bool,
    pub(crate) control: mpsc::UnboundedReceiver<CloseKind>,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Connection {
    framed: Framed<NodeStream, ServerCodec>,
    reading: bool,
    writing: bool,
}

impl Connection {
    async fn send(&mut self, frame: Frame) -> Flow {
        if !self.writing {
            trace!(stream = frame.stream_id, "Write side shut down, dropping response");
            return Flow::Continue;
        }
        match self.framed.send(frame).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                debug!(error = %e, "Write failed, abandoning remaining actions");
                Flow::Stop
            }
        }
    }

    async fn close(&mut self, kind: CloseKind) -> Flow {
        match kind {
            CloseKind::Disconnect => return Flow::Stop,
            CloseKind::ShutdownRead => self.reading = false,
            CloseKind::ShutdownWrite => {
                if self.writing {
                    self.writing = false;
                    if let Err(e) = self.framed.close().await {
                        debug!(error = %e, "Shutting down write side failed");
                    }
                }
            }
        }
        if self.reading || self.writing {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }
}

pub(crate) async fn run(mut cx: Context, stream: NodeStream) {
    let config = &cx.shared.config;
    let codec = ServerCodec::new(config.protocol_versions.clone(), config.max_frame_length);
    let mut conn = Connection {
        framed: Framed::new(stream, codec),
        reading: true,
        writing: true,
    };

    loop {
        let inbound = tokio::select! {
            _ = cx.cancel.cancelled() => break,
            Some(kind) = cx.control.recv() => {
                if conn.close(kind).await == Flow::Stop {
                    break;
                }
                continue;
            }
            inbound = conn.framed.next(), if conn.reading => inbound,
            else => break,
        };

        let flow = match inbound {
            Some(Ok(inbound)) => handle_inbound(&cx, &mut conn, inbound).await,
            Some(Err(e)) => {
                warn!(node = %cx.node.key(), connection = cx.id, error = %e, "Undecodable stream");
                Flow::Stop
            }
            None => {
                trace!(node = %cx.node.key(), connection = cx.id, "Peer closed");
                Flow::Stop
            }
        };
        if flow == Flow::Stop {
            break;
        }
    }
    debug!(node = %cx.node.key(), connection = cx.id, peer = %cx.peer, "Connection closed");
}

async fn handle_inbound(cx: &Context, conn: &mut Connection, inbound: Inbound) -> Flow {
    match inbound {
        Inbound::Frame(frame) => handle_frame(cx, conn, frame).await,
        Inbound::Unsupported { version, stream_id } => {
            let versions = conn.framed.codec().versions();
            let reply = Frame::new(
                versions.highest(),
                stream_id,
                Message::Error(ErrorBody::protocol(versions.unsupported_message(version))),
            );
            debug!(node = %cx.node.key(), version, "Rejecting unsupported protocol version");
            conn.send(reply).await
        }
        Inbound::Malformed {
            version,
            stream_id,
            reason,
        } => {
            debug!(node = %cx.node.key(), %version, %reason, "Malformed frame");
            let reply = Frame::new(version, stream_id, Message::Error(ErrorBody::protocol(reason)));
            conn.send(reply).await
        }
    }
}

async fn handle_frame(cx: &Context, conn: &mut Connection, frame: Frame) -> Flow {
    let shared = &cx.shared;
    let node = &cx.node;

    if cx.reject_startup && matches!(frame.message, Message::Startup(_)) {
        debug!(node = %node.key(), connection = cx.id, "Ignoring STARTUP");
        record(cx, &frame, false);
        return Flow::Continue;
    }

    let view = NodeView {
        key: node.key(),
        topology: node.topology(),
        versions: &shared.config.protocol_versions,
        info: &shared.config.server_info,
    };
    let matched = shared.stubs.handle(&view, &frame);
    record(cx, &frame, matched.as_ref().is_some_and(|m| m.primed));

    let Some(matched) = matched else {
        return Flow::Continue;
    };
    for action in matched.actions {
        let flow = match action {
            Action::Respond(message) => conn.send(frame.reply(message)).await,
            Action::Delay(delay) => {
                tokio::select! {
                    _ = cx.cancel.cancelled() => Flow::Stop,
                    _ = tokio::time::sleep(delay) => Flow::Continue,
                }
            }
            Action::Close {
                scope: DisconnectScope::Connection,
                kind,
            } => conn.close(kind).await,
            Action::Close { scope, kind } => {
                shared.close_connections(node.key(), scope, kind);
                Flow::Continue
            }
            Action::NoResponse => Flow::Continue,
        };
        if flow == Flow::Stop {
            return Flow::Stop;
        }
    }
    Flow::Continue
}

fn record(cx: &Context, frame: &Frame, primed: bool) {
    let request = Request::resolve(frame, cx.shared.stubs.prepared());
    let query = request.as_ref().and_then(Request::text);
    cx.shared.activity.record(ActivityEntry::new(
        cx.node.key(),
        cx.id,
        &cx.peer,
        frame,
        query,
        primed,
    ));
}
