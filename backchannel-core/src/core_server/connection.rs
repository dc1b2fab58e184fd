//! Per-connection driver
//!
//! One task per socket reads frames and runs the session state machine; a
//! second task owns the write half so the heartbeat sweep and the reader can
//! both queue outbound frames without fighting over the sink.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::core_session::protocol::{ServerMessage, CONNECTED_GREETING};
use crate::core_session::{ConnectionSession, SessionContext};

/// Sent with the final `error` frame on the fatal path.
const FATAL_GOODBYE: &str = "An error occurred and you must be disconnected. Sorry!";

/// Commands the sweep can push into a connection's driver.
#[derive(Debug)]
pub(crate) enum Control {
    /// Silent forced close; the peer is presumed unreachable.
    Terminate,
}

/// Shared view of one live connection, held by the connection table.
pub(crate) struct ConnectionHandle {
    id: u64,
    /// Reset to false by each sweep, back to true on pong receipt.
    alive: AtomicBool,
    outbound: mpsc::UnboundedSender<Message>,
    control: mpsc::UnboundedSender<Control>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: u64,
        outbound: mpsc::UnboundedSender<Message>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            outbound,
            control,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_stale(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn send_ping(&self) {
        let _ = self.outbound.send(Message::Ping(Vec::new()));
    }

    pub(crate) fn terminate(&self) {
        let _ = self.control.send(Control::Terminate);
    }
}

/// All live connections, shared between the accept loop and the sweep.
pub(crate) type ConnectionTable = Arc<Mutex<HashMap<u64, Arc<ConnectionHandle>>>>;

pub(crate) fn new_connection_table() -> ConnectionTable {
    Arc::new(Mutex::new(HashMap::new()))
}

pub(crate) fn table_handles(table: &ConnectionTable) -> Vec<Arc<ConnectionHandle>> {
    table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .cloned()
        .collect()
}

fn table_insert(table: &ConnectionTable, handle: Arc<ConnectionHandle>) {
    table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(handle.id(), handle);
}

fn table_remove(table: &ConnectionTable, id: u64) {
    table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
}

/// Queue a reply frame. A peer that already went away is a silent no-op.
fn send_reply(outbound: &mpsc::UnboundedSender<Message>, message: &ServerMessage) {
    match message.encode() {
        Ok(text) => {
            let _ = outbound.send(Message::Text(text));
        }
        Err(e) => warn!("Failed to encode reply frame: {}", e),
    }
}

/// Drive one connection from accept to teardown.
pub(crate) async fn drive_connection(
    id: u64,
    stream: WebSocketStream<TcpStream>,
    ctx: SessionContext,
    table: ConnectionTable,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Control>();

    let handle = Arc::new(ConnectionHandle::new(id, out_tx.clone(), control_tx));
    table_insert(&table, handle.clone());

    // writer drains the queue until every sender is gone, then closes
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    info!(conn = id, "New connection established on WS");
    send_reply(&out_tx, &ServerMessage::Connected(CONNECTED_GREETING.to_string()));

    let mut session = ConnectionSession::new(ctx);

    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(Control::Terminate) | None => {
                    debug!(conn = id, "Connection reaped by heartbeat sweep");
                    break;
                }
            },
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !dispatch_frame(id, &mut session, &text, &out_tx).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    // the protocol is text-only, but a peer that frames its
                    // JSON as binary still gets parsed like the text path
                    match String::from_utf8(bytes) {
                        Ok(text) => {
                            if !dispatch_frame(id, &mut session, &text, &out_tx).await {
                                break;
                            }
                        }
                        Err(_) => {
                            error!(conn = id, "Received non-UTF-8 binary frame");
                            send_reply(&out_tx, &ServerMessage::Error(FATAL_GOODBYE.to_string()));
                            break;
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => handle.mark_alive(),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = out_tx.send(Message::Pong(payload));
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn = id, "Peer closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn = id, "Socket error: {}", e);
                    break;
                }
            }
        }
    }

    session.teardown();
    table_remove(&table, id);

    // release every outbound sender so the writer can flush and close
    drop(handle);
    drop(out_tx);
    let _ = writer.await;
    info!(conn = id, "Connection closed");
}

/// Returns `false` when the error was fatal and the caller must tear down.
async fn dispatch_frame(
    id: u64,
    session: &mut ConnectionSession,
    text: &str,
    out_tx: &mpsc::UnboundedSender<Message>,
) -> bool {
    match session.handle_frame(text).await {
        Ok(replies) => {
            for reply in &replies {
                send_reply(out_tx, reply);
            }
            true
        }
        Err(e) => {
            error!(conn = id, "Fatal connection error: {}", e);
            send_reply(out_tx, &ServerMessage::Error(FATAL_GOODBYE.to_string()));
            false
        }
    }
}
