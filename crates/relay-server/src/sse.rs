//! `GET /sse-stream`: one-way Server-Sent Events stream.
//!
//! Each request registers a stream connection, starts its session, and
//! streams the connection's queued frames as the response body. Dropping
//! the body (client gone) tears the connection down.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use metrics::counter;
use relay_core::ConnectionId;
use relay_core::wire::sse;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::{ClientConnection, ConnectionKind, EventFraming};
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;
use crate::server::{AppState, error_response, shutting_down_response};
use crate::stream::StreamSessionManager;

/// Response header carrying the connection id for the control endpoints.
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// Tears the connection down when the response body is dropped.
struct DisconnectGuard {
    id: ConnectionId,
    streams: Arc<StreamSessionManager>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.streams.close_connection(&self.id);
        info!(conn_id = %self.id, "sse client disconnected");
    }
}

/// GET /sse-stream
pub async fn sse_stream(State(state): State<AppState>) -> Response {
    let (connection, rx) = ClientConnection::with_channel(
        ConnectionKind::Stream(EventFraming::Sse),
        state.config.channel_capacity,
    );
    let closed = connection.closed_token();

    let id = match state.registry.register(connection) {
        Ok(id) => id,
        Err(e) => {
            counter!(CONNECTIONS_REJECTED_TOTAL, "transport" => "sse").increment(1);
            warn!(error = %e, "rejecting sse connection");
            return error_response(&e);
        }
    };

    let guard = DisconnectGuard {
        id: id.clone(),
        streams: Arc::clone(&state.streams),
    };
    // Checked after registering so a shutdown pass either saw this
    // connection or is visible here.
    if state.shutdown.is_shutting_down() {
        drop(guard);
        return shutting_down_response();
    }
    if let Err(e) = state.streams.start(&id) {
        warn!(conn_id = %id, error = %e, "failed to start stream session");
        drop(guard);
        return error_response(&e);
    }
    info!(conn_id = %id, "sse client connected");

    let body = Body::from_stream(frames(rx, closed, guard));
    sse_response(body, &id)
}

/// Drain the connection queue into body chunks. After `closed` fires,
/// frames already queued are still emitted before the body ends.
fn frames(
    mut rx: mpsc::Receiver<Arc<String>>,
    closed: CancellationToken,
    guard: DisconnectGuard,
) -> impl Stream<Item = Result<String, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        let mut draining = false;
        loop {
            let next = if draining {
                rx.try_recv().ok()
            } else {
                tokio::select! {
                    biased;
                    frame = rx.recv() => frame,
                    () = closed.cancelled() => {
                        draining = true;
                        rx.try_recv().ok()
                    }
                }
            };
            let Some(frame) = next else { break };
            yield Ok::<_, Infallible>(String::clone(&frame));
        }
    }
}

fn sse_response(body: Body, id: &ConnectionId) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    let _ = headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(sse::CONTENT_TYPE));
    let _ = headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let _ = headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    let _ = headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    let _ = headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        let _ = headers.insert(CONNECTION_ID_HEADER, value);
    }
    response
}
