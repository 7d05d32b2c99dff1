//! Broadcast chat socket lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use metrics::counter;
use relay_core::wire::chat::ChatMessage;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::{LIMIT_REASON, frame_text, reject, spawn_outbound};
use crate::connection::ClientConnection;
use crate::hub::BroadcastHub;
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;

/// How long to let the forwarder flush after the read loop ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a broadcast session for a connected client.
///
/// 1. Registers the connection with the hub (refusing it with 1013 if full)
/// 2. Decodes each inbound text frame as `{"user","message"}`, falling back
///    to an anonymous sender, and fans out `"<user>: <message>"`
/// 3. Forwards queued frames and pings via the outbound task
/// 4. Disconnects on close, read error, or eviction by the hub
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn run_broadcast_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    rx: mpsc::Receiver<Arc<String>>,
    hub: Arc<BroadcastHub>,
    ping_interval: Option<Duration>,
) {
    if let Err(e) = hub.connect(Arc::clone(&connection)) {
        counter!(CONNECTIONS_REJECTED_TOTAL, "transport" => "ws").increment(1);
        warn!(error = %e, "rejecting broadcast connection");
        reject(ws, LIMIT_REASON).await;
        return;
    }
    info!(active = hub.count(), "broadcast client connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let closed = connection.closed_token();
    let outbound = spawn_outbound(ws_tx, rx, closed.clone(), ping_interval);

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = closed.cancelled() => {
                debug!("connection closed by server");
                break;
            }
        };
        match msg {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read ended");
                break;
            }
            Some(Ok(msg)) => {
                let Some(text) = frame_text(&msg) else {
                    continue;
                };
                let chat = ChatMessage::decode_lenient(&text);
                let delivered = hub.broadcast(&chat.render());
                debug!(user = %chat.user, delivered, "chat message relayed");
            }
        }
    }

    hub.disconnect(&connection.id);
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, outbound).await;
    info!(active = hub.count(), "broadcast client disconnected");
}
