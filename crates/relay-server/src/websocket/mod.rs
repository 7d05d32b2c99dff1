//! WebSocket transports: the broadcast chat socket and the duplex stream
//! socket. Both share the outbound forwarder defined here.

pub mod session;
pub mod stream_ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Close reason sent when the registry is full.
pub const LIMIT_REASON: &str = "connection limit exceeded";

/// Refuse an upgraded socket with close code 1013 (try again later).
pub async fn reject(mut ws: WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: close_code::AGAIN,
        reason: reason.to_owned().into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}

/// Forward queued frames to the socket, interleaving transport pings.
///
/// Ends when the queue closes, a write fails, or `closed` is cancelled. On
/// cancellation, frames already queued are flushed and a close frame is
/// sent.
pub fn spawn_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    closed: CancellationToken,
    ping_interval: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ping = ping_interval.map(tokio::time::interval);
        if let Some(ping) = ping.as_mut() {
            // Skip the immediate first tick
            let _ = ping.tick().await;
        }

        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                () = closed.cancelled() => {
                    while let Ok(text) = rx.try_recv() {
                        if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                            return;
                        }
                    }
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: "server closed connection".to_owned().into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                () = next_ping(&mut ping) => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("outbound forwarder finished");
    })
}

/// Resolve on the next ping tick, or never when pings are disabled.
async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Extract text from a Text or UTF-8 Binary frame.
pub(crate) fn frame_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(t) => Some(t.to_string()),
        Message::Binary(data) => std::str::from_utf8(data).ok().map(str::to_owned),
        _ => None,
    }
}
