//! Per-connection stream sessions.
//!
//! Each running session owns one background task that pulls from the
//! [`EventSource`] and pushes framed events to exactly one connection.
//!
//! ```text
//! Idle ──start──▶ Running ──stop──▶ Idle
//!                    │
//!                    └──threshold──▶ Failed ──start──▶ Running
//! ```
//!
//! Every delivery happens under the session's send gate after re-checking
//! its cancellation token, and `stop` cancels under the same gate. Once
//! `stop` returns no further `message` event can reach the client.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use relay_core::{ConnectionId, Event, RelayError, Result, StreamSessionId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ClientConnection;
use crate::generator::EventSource;
use crate::metrics::{
    STREAM_ESCALATIONS_TOTAL, STREAM_EVENTS_TOTAL, STREAM_FAILURES_TOTAL, STREAM_SESSIONS_ACTIVE,
};
use crate::registry::ConnectionRegistry;

/// Reason carried by the `close` event sent on stop.
pub const STOP_REASON: &str = "Stream stopped";

/// Lifecycle state of a connection's stream session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No task running.
    #[default]
    Idle,
    /// Task delivering events.
    Running,
    /// Terminated by the consecutive-failure threshold.
    Failed,
}

/// A running session's handles.
struct ActiveSession {
    session_id: StreamSessionId,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
    connection: Arc<ClientConnection>,
}

impl ActiveSession {
    /// Cancel under the send gate, optionally sending a final event first.
    fn cancel_with(&self, last: Option<&Event>) {
        let _gate = self.gate.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        if let Some(event) = last {
            if let Err(e) = self.connection.send_event(event) {
                debug!(conn_id = %self.connection.id, error = %e, "final event not delivered");
            }
        }
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct SessionSlot {
    state: SessionState,
    active: Option<ActiveSession>,
}

type SessionTable = Arc<Mutex<HashMap<ConnectionId, SessionSlot>>>;

/// Starts, stops and tears down stream sessions.
pub struct StreamSessionManager {
    registry: Arc<ConnectionRegistry>,
    source: Arc<dyn EventSource>,
    failure_threshold: u32,
    sessions: SessionTable,
}

impl StreamSessionManager {
    /// Create a manager over the shared registry.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        source: Arc<dyn EventSource>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            registry,
            source,
            failure_threshold: failure_threshold.max(1),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start the connection's session.
    ///
    /// No-op if already running; a failed session restarts with a fresh
    /// failure counter. Must be called within a Tokio runtime.
    pub fn start(&self, id: &ConnectionId) -> Result<SessionState> {
        let connection = self.stream_connection(id)?;

        let mut sessions = self.sessions.lock();
        if connection.is_closed() {
            return Err(RelayError::ConnectionNotFound(id.to_string()));
        }
        let slot = sessions.entry(id.clone()).or_default();
        if slot.state == SessionState::Running {
            debug!(conn_id = %id, "stream already running");
            return Ok(SessionState::Running);
        }

        let restart = slot.state == SessionState::Failed;
        let session_id = StreamSessionId::new();
        let cancel = connection.closed_token().child_token();
        let gate = Arc::new(Mutex::new(()));
        slot.state = SessionState::Running;
        slot.active = Some(ActiveSession {
            session_id: session_id.clone(),
            cancel: cancel.clone(),
            gate: Arc::clone(&gate),
            connection: Arc::clone(&connection),
        });
        let running = running_count(&sessions);
        drop(sessions);

        gauge!(STREAM_SESSIONS_ACTIVE).set(running as f64);
        info!(conn_id = %id, session_id = %session_id, restart, "stream session started");

        let task = SessionTask {
            session_id,
            connection,
            source: Arc::clone(&self.source),
            cancel,
            gate,
            threshold: self.failure_threshold,
            sessions: Arc::clone(&self.sessions),
        };
        drop(tokio::spawn(task.run()));
        Ok(SessionState::Running)
    }

    /// Stop the connection's session, sending a `close` event.
    ///
    /// No-op unless running. When this returns no further `message` event
    /// will be delivered.
    pub fn stop(&self, id: &ConnectionId) -> Result<SessionState> {
        let _ = self.stream_connection(id)?;
        Ok(self.stop_session(id))
    }

    fn stop_session(&self, id: &ConnectionId) -> SessionState {
        let mut sessions = self.sessions.lock();
        let Some(slot) = sessions.get_mut(id) else {
            return SessionState::Idle;
        };
        if slot.state != SessionState::Running {
            return slot.state;
        }
        let active = slot.active.take();
        slot.state = SessionState::Idle;
        let running = running_count(&sessions);
        drop(sessions);

        if let Some(active) = active {
            active.cancel_with(Some(&Event::close(STOP_REASON)));
            info!(conn_id = %id, session_id = %active.session_id, "stream session stopped");
        }
        gauge!(STREAM_SESSIONS_ACTIVE).set(running as f64);
        SessionState::Idle
    }

    /// Tear down a closed connection: cancel its session, drop all session
    /// state, then remove it from the registry. Idempotent.
    ///
    /// The connection is closed while the session table is held, so a
    /// concurrent [`start`](Self::start) either finished before teardown (and
    /// is cancelled here) or observes the closed connection and refuses.
    pub fn close_connection(&self, id: &ConnectionId) {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(id).and_then(|slot| slot.active);
        if let Some(active) = &removed {
            active.cancel_with(None);
            active.connection.close();
        }
        if let Some(conn) = self.registry.get(id) {
            conn.close();
        }
        let running = running_count(&sessions);
        drop(sessions);

        if let Some(active) = removed {
            debug!(conn_id = %id, session_id = %active.session_id, "stream session cancelled on disconnect");
            gauge!(STREAM_SESSIONS_ACTIVE).set(running as f64);
        }
        let _ = self.registry.unregister(id);
    }

    /// Stop every running session (each receives `close`). Returns how many
    /// were stopped.
    pub fn stop_all(&self) -> usize {
        let running: Vec<ConnectionId> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, slot)| slot.state == SessionState::Running)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &running {
            let _ = self.stop_session(id);
        }
        running.len()
    }

    /// Current state; `Idle` for connections without a session.
    pub fn state(&self, id: &ConnectionId) -> SessionState {
        self.sessions
            .lock()
            .get(id)
            .map_or(SessionState::Idle, |slot| slot.state)
    }

    /// Number of running sessions.
    pub fn active_count(&self) -> usize {
        running_count(&self.sessions.lock())
    }

    fn stream_connection(&self, id: &ConnectionId) -> Result<Arc<ClientConnection>> {
        let connection = self
            .registry
            .get(id)
            .ok_or_else(|| RelayError::ConnectionNotFound(id.to_string()))?;
        if !connection.kind.is_stream() {
            return Err(RelayError::NotStreamConnection(id.to_string()));
        }
        Ok(connection)
    }
}

fn running_count(sessions: &HashMap<ConnectionId, SessionSlot>) -> usize {
    sessions
        .values()
        .filter(|slot| slot.state == SessionState::Running)
        .count()
}

/// The background half of a running session.
struct SessionTask {
    session_id: StreamSessionId,
    connection: Arc<ClientConnection>,
    source: Arc<dyn EventSource>,
    cancel: CancellationToken,
    gate: Arc<Mutex<()>>,
    threshold: u32,
    sessions: SessionTable,
}

impl SessionTask {
    async fn run(self) {
        let mut failures = 0;
        if self
            .settle(self.deliver(&Event::connected()), &mut failures)
            .is_continue()
        {
            loop {
                if self.cancel.is_cancelled() {
                    break;
                }
                let outcome = self.source.next().and_then(|event| self.deliver(&event));
                if self.settle(outcome, &mut failures).is_break() {
                    break;
                }
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(self.source.interval()) => {}
                }
            }
        }
        self.release();
        debug!(conn_id = %self.connection.id, session_id = %self.session_id, "stream task exited");
    }

    /// Clear the slot if this task still owns it. Stop, escalation and
    /// teardown clear it themselves; this covers the connection token being
    /// cancelled underneath a running session.
    fn release(&self) {
        let mut sessions = self.sessions.lock();
        let id = &self.connection.id;
        let owned = sessions.get(id).is_some_and(|slot| {
            slot.active
                .as_ref()
                .is_some_and(|a| a.session_id == self.session_id)
        });
        if !owned {
            return;
        }
        if self.connection.is_closed() {
            let _ = sessions.remove(id);
        } else if let Some(slot) = sessions.get_mut(id) {
            slot.active = None;
            slot.state = SessionState::Idle;
        }
        let running = running_count(&sessions);
        drop(sessions);

        gauge!(STREAM_SESSIONS_ACTIVE).set(running as f64);
        debug!(conn_id = %id, session_id = %self.session_id, "stream session released");
    }

    /// Deliver one event unless the session has been cancelled.
    /// `Ok(false)` means cancelled.
    fn deliver(&self, event: &Event) -> Result<bool> {
        let _gate = self.gate.lock();
        if self.cancel.is_cancelled() {
            return Ok(false);
        }
        self.connection.send_event(event)?;
        counter!(STREAM_EVENTS_TOTAL, "event" => event.kind().as_str()).increment(1);
        Ok(true)
    }

    /// Fold one cycle's outcome into the consecutive-failure counter.
    fn settle(&self, outcome: Result<bool>, failures: &mut u32) -> ControlFlow<()> {
        match outcome {
            Ok(true) => {
                *failures = 0;
                ControlFlow::Continue(())
            }
            Ok(false) => ControlFlow::Break(()),
            Err(e) if !e.counts_toward_escalation() => {
                debug!(
                    conn_id = %self.connection.id,
                    session_id = %self.session_id,
                    error = %e,
                    "stream task ending"
                );
                ControlFlow::Break(())
            }
            Err(e) => {
                *failures += 1;
                counter!(STREAM_FAILURES_TOTAL, "category" => e.category()).increment(1);
                warn!(
                    conn_id = %self.connection.id,
                    session_id = %self.session_id,
                    failures = *failures,
                    threshold = self.threshold,
                    error = %e,
                    "stream cycle failed"
                );
                if *failures >= self.threshold {
                    self.escalate(&e);
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        }
    }

    /// Mark the session failed, emit one `error` event, and cancel.
    fn escalate(&self, cause: &RelayError) {
        let mut sessions = self.sessions.lock();
        let owned = sessions.get_mut(&self.connection.id).is_some_and(|slot| {
            let ours = slot
                .active
                .as_ref()
                .is_some_and(|a| a.session_id == self.session_id);
            if ours {
                slot.active = None;
                slot.state = SessionState::Failed;
            }
            ours
        });
        let running = running_count(&sessions);
        drop(sessions);

        let gate = self.gate.lock();
        if owned && !self.cancel.is_cancelled() {
            let event = Event::error(format!(
                "Stream terminated after {} consecutive failures: {cause}",
                self.threshold
            ));
            if let Err(e) = self.connection.send_event(&event) {
                debug!(conn_id = %self.connection.id, error = %e, "error event not delivered");
            }
        }
        self.cancel.cancel();
        drop(gate);

        if owned {
            counter!(STREAM_ESCALATIONS_TOTAL).increment(1);
            gauge!(STREAM_SESSIONS_ACTIVE).set(running as f64);
            warn!(
                conn_id = %self.connection.id,
                session_id = %self.session_id,
                error = %cause,
                "stream session failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use relay_core::wire::sse::{SseDecoder, SseFrame};
    use relay_core::Reading;
    use tokio::sync::mpsc;

    use crate::connection::{ConnectionKind, EventFraming};

    const TICK: Duration = Duration::from_millis(10);

    /// Succeeds or fails according to a script, then always succeeds.
    struct ScriptedSource {
        script: Mutex<VecDeque<bool>>,
    }

    impl ScriptedSource {
        fn new(script: &[bool]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
            }
        }

        fn ok() -> Self {
            Self::new(&[])
        }
    }

    impl EventSource for ScriptedSource {
        fn next(&self) -> Result<Event> {
            if self.script.lock().pop_front().unwrap_or(true) {
                Ok(Event::message(Reading {
                    temperature: 20.0,
                    humidity: 50.0,
                    pressure: 1010.0,
                    timestamp: chrono::Utc::now(),
                }))
            } else {
                Err(RelayError::GenerationFailure("sensor offline".into()))
            }
        }

        fn interval(&self) -> Duration {
            TICK
        }
    }

    struct AlwaysFailing;

    impl EventSource for AlwaysFailing {
        fn next(&self) -> Result<Event> {
            Err(RelayError::GenerationFailure("boom".into()))
        }

        fn interval(&self) -> Duration {
            TICK
        }
    }

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        manager: Arc<StreamSessionManager>,
    }

    fn harness(source: impl EventSource + 'static) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new(512));
        let manager = Arc::new(StreamSessionManager::new(
            Arc::clone(&registry),
            Arc::new(source),
            3,
        ));
        Harness { registry, manager }
    }

    impl Harness {
        fn tracked_slots(&self) -> usize {
            self.manager.sessions.lock().len()
        }
    }

    impl Harness {
        fn open(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
            let (conn, rx) =
                ClientConnection::with_channel(ConnectionKind::Stream(EventFraming::Sse), 64);
            let _ = self.registry.register(conn.clone()).unwrap();
            (conn, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<SseFrame> {
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            frames.extend(decoder.push(&chunk));
        }
        frames
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Arc<String>>) -> SseFrame {
        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        SseDecoder::new().push(&chunk).remove(0)
    }

    #[tokio::test]
    async fn connected_is_first_event() {
        let h = harness(ScriptedSource::ok());
        let (conn, mut rx) = h.open();
        assert_eq!(h.manager.start(&conn.id).unwrap(), SessionState::Running);

        let first = next_frame(&mut rx).await;
        assert_eq!(first.event, "connected");
        assert_eq!(first.data, "Connection established");
        for _ in 0..3 {
            assert_eq!(next_frame(&mut rx).await.event, "message");
        }
    }

    #[tokio::test]
    async fn start_twice_is_noop() {
        let h = harness(ScriptedSource::ok());
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();
        assert_eq!(h.manager.start(&conn.id).unwrap(), SessionState::Running);
        assert_eq!(h.manager.active_count(), 1);

        tokio::time::sleep(TICK * 5).await;
        let connected = drain(&mut rx)
            .iter()
            .filter(|f| f.event == "connected")
            .count();
        assert_eq!(connected, 1);
    }

    #[tokio::test]
    async fn stop_is_immediate() {
        let h = harness(ScriptedSource::ok());
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();
        tokio::time::sleep(TICK * 4).await;

        assert_eq!(h.manager.stop(&conn.id).unwrap(), SessionState::Idle);
        let before = drain(&mut rx);
        assert_eq!(before.last().unwrap().event, "close");
        assert_eq!(before.last().unwrap().data, STOP_REASON);

        tokio::time::sleep(TICK * 5).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(h.manager.state(&conn.id), SessionState::Idle);
        assert_eq!(h.manager.active_count(), 0);
    }

    #[tokio::test]
    async fn stop_when_idle_is_noop() {
        let h = harness(ScriptedSource::ok());
        let (conn, mut rx) = h.open();
        assert_eq!(h.manager.stop(&conn.id).unwrap(), SessionState::Idle);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn restart_after_stop_emits_connected_again() {
        let h = harness(ScriptedSource::ok());
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();
        let _ = h.manager.stop(&conn.id).unwrap();
        let _ = drain(&mut rx);

        let _ = h.manager.start(&conn.id).unwrap();
        assert_eq!(next_frame(&mut rx).await.event, "connected");
    }

    #[tokio::test]
    async fn escalates_after_three_consecutive_failures() {
        let h = harness(AlwaysFailing);
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();

        assert_eq!(next_frame(&mut rx).await.event, "connected");
        let error = next_frame(&mut rx).await;
        assert_eq!(error.event, "error");
        assert!(error.data.contains("3 consecutive failures"));

        assert_eq!(h.manager.state(&conn.id), SessionState::Failed);
        assert_eq!(h.manager.active_count(), 0);
        tokio::time::sleep(TICK * 5).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn non_consecutive_failures_do_not_escalate() {
        let h = harness(ScriptedSource::new(&[false, false, true, false, false, true]));
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();

        tokio::time::sleep(TICK * 12).await;
        let frames = drain(&mut rx);
        assert!(frames.iter().all(|f| f.event != "error"));
        assert!(frames.iter().filter(|f| f.event == "message").count() >= 2);
        assert_eq!(h.manager.state(&conn.id), SessionState::Running);
    }

    #[tokio::test]
    async fn exactly_at_threshold() {
        let h = harness(ScriptedSource::new(&[false, false, true, false, false, false]));
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();

        let kinds: Vec<String> = {
            let mut kinds = Vec::new();
            loop {
                let frame = next_frame(&mut rx).await;
                let done = frame.event == "error";
                kinds.push(frame.event);
                if done {
                    break;
                }
            }
            kinds
        };
        assert_eq!(kinds, ["connected", "message", "error"]);
        assert_eq!(h.manager.state(&conn.id), SessionState::Failed);
    }

    #[tokio::test]
    async fn restart_from_failed() {
        let h = harness(ScriptedSource::new(&[false, false, false]));
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();
        assert_eq!(next_frame(&mut rx).await.event, "connected");
        assert_eq!(next_frame(&mut rx).await.event, "error");

        assert_eq!(h.manager.start(&conn.id).unwrap(), SessionState::Running);
        assert_eq!(next_frame(&mut rx).await.event, "connected");
        assert_eq!(next_frame(&mut rx).await.event, "message");
    }

    #[tokio::test]
    async fn close_connection_removes_connection_and_session() {
        let h = harness(ScriptedSource::ok());
        let (conn, mut rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();
        tokio::time::sleep(TICK * 3).await;

        h.manager.close_connection(&conn.id);
        assert_eq!(h.registry.count(), 0);
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.manager.state(&conn.id), SessionState::Idle);
        assert!(conn.is_closed());

        let _ = drain(&mut rx);
        tokio::time::sleep(TICK * 4).await;
        assert!(drain(&mut rx).is_empty());

        h.manager.close_connection(&conn.id);
    }

    #[tokio::test]
    async fn start_after_teardown_began_is_refused() {
        let h = harness(ScriptedSource::ok());
        let (conn, _rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();

        // The connection handle was resolved before teardown ran.
        h.manager.close_connection(&conn.id);
        let _ = h.registry.register(conn.clone()).unwrap();
        assert_matches!(
            h.manager.start(&conn.id),
            Err(RelayError::ConnectionNotFound(_))
        );
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.tracked_slots(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn start_racing_teardown_leaves_no_session() {
        let h = harness(ScriptedSource::ok());
        for _ in 0..200 {
            let (conn, _rx) = h.open();
            let manager = Arc::clone(&h.manager);
            let id = conn.id.clone();
            let starter = tokio::spawn(async move {
                let _ = manager.start(&id);
                let _ = manager.start(&id);
            });
            h.manager.close_connection(&conn.id);
            starter.await.unwrap();
        }

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(h.registry.count(), 0);
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.tracked_slots(), 0);
    }

    #[tokio::test]
    async fn session_released_when_connection_token_cancelled() {
        let h = harness(ScriptedSource::ok());
        let (conn, _rx) = h.open();
        let _ = h.manager.start(&conn.id).unwrap();
        assert_eq!(h.manager.active_count(), 1);

        // Transport closed without going through close_connection
        conn.close();
        tokio::time::timeout(Duration::from_secs(2), async {
            while h.tracked_slots() > 0 {
                tokio::time::sleep(TICK).await;
            }
        })
        .await
        .expect("slot was never released");
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.manager.state(&conn.id), SessionState::Idle);
    }

    #[tokio::test]
    async fn repeated_cycles_do_not_leak() {
        let h = harness(ScriptedSource::ok());
        for _ in 0..20 {
            let (conn, _rx) = h.open();
            let _ = h.manager.start(&conn.id).unwrap();
            h.manager.close_connection(&conn.id);
        }
        assert_eq!(h.registry.count(), 0);
        assert_eq!(h.manager.active_count(), 0);
        assert_eq!(h.tracked_slots(), 0);
    }

    #[tokio::test]
    async fn start_on_closed_connection_rejected() {
        let h = harness(ScriptedSource::ok());
        let (conn, _rx) = h.open();
        conn.close();
        assert_matches!(
            h.manager.start(&conn.id),
            Err(RelayError::ConnectionNotFound(_))
        );
    }

    #[tokio::test]
    async fn unknown_and_broadcast_connections_rejected() {
        let h = harness(ScriptedSource::ok());
        assert_matches!(
            h.manager.start(&ConnectionId::from("nope")),
            Err(RelayError::ConnectionNotFound(_))
        );

        let (chat, _rx) = ClientConnection::with_channel(ConnectionKind::Broadcast, 4);
        let _ = h.registry.register(chat.clone()).unwrap();
        assert_matches!(
            h.manager.stop(&chat.id),
            Err(RelayError::NotStreamConnection(_))
        );
    }

    #[tokio::test]
    async fn stop_all_sends_close_to_each() {
        let h = harness(ScriptedSource::ok());
        let (a, mut rx_a) = h.open();
        let (b, mut rx_b) = h.open();
        let _ = h.manager.start(&a.id).unwrap();
        let _ = h.manager.start(&b.id).unwrap();
        tokio::time::sleep(TICK * 2).await;

        assert_eq!(h.manager.stop_all(), 2);
        assert_eq!(drain(&mut rx_a).last().unwrap().event, "close");
        assert_eq!(drain(&mut rx_b).last().unwrap().event, "close");
        assert_eq!(h.manager.active_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_counts_toward_threshold() {
        let registry = Arc::new(ConnectionRegistry::new(4));
        let manager =
            StreamSessionManager::new(Arc::clone(&registry), Arc::new(ScriptedSource::ok()), 3);
        let (conn, mut rx) =
            ClientConnection::with_channel(ConnectionKind::Stream(EventFraming::Sse), 1);
        let _ = registry.register(conn.clone()).unwrap();
        let _ = manager.start(&conn.id).unwrap();

        tokio::time::sleep(TICK * 8).await;
        assert_eq!(manager.state(&conn.id), SessionState::Failed);
        assert_eq!(next_frame(&mut rx).await.event, "connected");
        assert!(rx.try_recv().is_err());
    }
}
