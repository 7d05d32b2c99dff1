//! Duplex stream socket: the client drives its own stream session with
//! `{"action": "start_stream" | "stop_stream"}` and receives events as JSON
//! text frames.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use metrics::counter;
use relay_core::wire::command::StreamCommand;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::{LIMIT_REASON, frame_text, reject, spawn_outbound};
use crate::connection::ClientConnection;
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;
use crate::registry::ConnectionRegistry;
use crate::stream::StreamSessionManager;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a duplex stream session for a connected client.
///
/// The session is not started until the client asks for it. Malformed or
/// unknown commands are logged and ignored. On disconnect the session is
/// cancelled before the connection leaves the registry.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn run_stream_socket(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    rx: mpsc::Receiver<Arc<String>>,
    registry: Arc<ConnectionRegistry>,
    streams: Arc<StreamSessionManager>,
    ping_interval: Option<Duration>,
) {
    if let Err(e) = registry.register(Arc::clone(&connection)) {
        counter!(CONNECTIONS_REJECTED_TOTAL, "transport" => "ws").increment(1);
        warn!(error = %e, "rejecting stream socket");
        reject(ws, LIMIT_REASON).await;
        return;
    }
    info!("stream socket connected");

    let (ws_tx, mut ws_rx) = ws.split();
    let closed = connection.closed_token();
    let outbound = spawn_outbound(ws_tx, rx, closed.clone(), ping_interval);

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = closed.cancelled() => break,
        };
        let text = match msg {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read ended");
                break;
            }
            Some(Ok(msg)) => match frame_text(&msg) {
                Some(text) => text,
                None => continue,
            },
        };

        let result = match StreamCommand::parse(&text) {
            Ok(StreamCommand::Start) => streams.start(&connection.id),
            Ok(StreamCommand::Stop) => streams.stop(&connection.id),
            Err(e) => {
                warn!(error = %e, "ignoring stream command");
                continue;
            }
        };
        match result {
            Ok(state) => debug!(?state, "stream command applied"),
            Err(e) => warn!(error = %e, "stream command failed"),
        }
    }

    streams.close_connection(&connection.id);
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, outbound).await;
    info!("stream socket disconnected");
}
