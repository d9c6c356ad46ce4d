//! Connection supervision.
//!
//! The [`ConnectionSupervisor`] owns the transport for the whole life of a
//! session. It is the only writer: session configuration, caller input,
//! function results and heartbeat probes all go through it. Each connection
//! gets its own reader and heartbeat task; when either reports a failure, or a
//! write fails, the supervisor reconnects with exponential backoff and restores
//! the session (configuration, then conversation turns, then the message whose
//! write failed) before resuming the outbound queue.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use super::base::{HeartbeatConfig, RealtimeError, RealtimeResult, ReconnectPolicy, SessionState};
use super::context::ConversationContext;
use super::events::{ErrorKind, EventPayload, EventSink, SessionUpdate, TranscriptRole};
use super::heartbeat::{HeartbeatMonitor, HeartbeatOutcome, Liveness};
use super::metrics::SessionMetrics;
use super::openai::ClientEvent;
use super::state::StateCell;
use super::transport::{
    Transport, TransportChannel, TransportMessage, TransportSink, TransportStream,
};

/// Upper bound for a single transport write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for the closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Fatal Error Slot
// =============================================================================

/// The error that ended a session, if any.
#[derive(Debug, Default)]
pub struct FatalSlot {
    error: Mutex<Option<RealtimeError>>,
    reported: AtomicBool,
}

impl FatalSlot {
    /// Record the error. Only the first one is kept.
    pub fn set(&self, err: RealtimeError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn get(&self) -> Option<RealtimeError> {
        self.error.lock().clone()
    }

    /// The error, the first time this is called after it was set.
    pub fn take_report(&self) -> Option<RealtimeError> {
        let err = self.get()?;
        if self.reported.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(err)
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

enum ConnectionEnd {
    /// Closed on request; the supervisor exits
    Closed,
    /// Transport failure; reconnect
    Lost { reason: String, uptime: Duration },
}

/// Shared session handles the supervisor writes to.
pub struct SupervisorHandles {
    pub context: Arc<ConversationContext>,
    pub events: Arc<EventSink>,
    pub metrics: Arc<SessionMetrics>,
    pub state: Arc<StateCell>,
    pub fatal: Arc<FatalSlot>,
    /// Inbound messages, in arrival order, for the dispatcher
    pub raw_tx: mpsc::UnboundedSender<TransportMessage>,
    pub tracker: TaskTracker,
    /// Graceful close request from the caller
    pub shutdown: CancellationToken,
    /// Session-wide teardown, fired when the session dies
    pub teardown: CancellationToken,
}

pub struct ConnectionSupervisor {
    session_id: String,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatConfig,
    session_update: ClientEvent,
    handles: SupervisorHandles,
}

impl ConnectionSupervisor {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        heartbeat: HeartbeatConfig,
        session_update: ClientEvent,
        handles: SupervisorHandles,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            policy,
            heartbeat,
            session_update,
            handles,
        }
    }

    /// Connect, then keep the session connected until closed or out of retries.
    pub async fn run(self, mut outbound_rx: mpsc::Receiver<ClientEvent>) {
        let mut pending: Option<ClientEvent> = None;

        let (mut channel, mut attempts) = match self.connect_initial().await {
            Ok(Some(connected)) => connected,
            Ok(None) => return,
            Err(e) => return self.fail(e),
        };
        self.handles.state.transition(SessionState::Connected);

        loop {
            let end = self.drive(channel, &mut outbound_rx, &mut pending).await;
            let (reason, uptime) = match end {
                ConnectionEnd::Closed => {
                    info!(session_id = %self.session_id, "Connection closed");
                    return;
                }
                ConnectionEnd::Lost { reason, uptime } => (reason, uptime),
            };

            // Only a connection that stayed up for a full heartbeat interval
            // earns a fresh retry budget.
            if uptime >= self.heartbeat.interval() {
                attempts = 0;
            }

            warn!(
                session_id = %self.session_id,
                reason = %reason,
                uptime_ms = uptime.as_millis() as u64,
                "Connection lost"
            );
            self.handles.metrics.record_error();
            self.handles
                .events
                .emit(EventPayload::error(ErrorKind::Transport, reason.clone()));
            self.handles.state.transition(SessionState::Reconnecting);

            channel = match self.reconnect(&mut attempts, reason, &mut pending).await {
                Ok(Some(channel)) => channel,
                Ok(None) => return,
                Err(e) => return self.fail(e),
            };

            self.handles.metrics.record_reconnect();
            self.handles.state.transition(SessionState::Connected);
            self.handles
                .events
                .emit(EventPayload::SessionUpdated(SessionUpdate::Reconnected {
                    attempts,
                }));
            info!(session_id = %self.session_id, attempts, "Reconnected");
        }
    }

    /// First attempt is immediate; failures back off per the policy.
    /// Returns `None` if closed while waiting.
    async fn connect_initial(&self) -> RealtimeResult<Option<(TransportChannel, u32)>> {
        let mut attempts: u32 = 0;
        info!(
            session_id = %self.session_id,
            endpoint = %self.transport.endpoint(),
            "Connecting"
        );

        loop {
            let err = match self.attempt(false, &mut None).await {
                None => return Ok(None),
                Some(Ok(channel)) => return Ok(Some((channel, attempts))),
                Some(Err(e)) => e,
            };

            let retryable = !matches!(err, RealtimeError::AuthenticationFailed(_));
            if !retryable || !self.policy.should_retry(attempts) {
                return Err(RealtimeError::ConnectionFailed {
                    attempts: attempts + 1,
                    reason: err.to_string(),
                });
            }

            let delay = self.policy.delay(attempts);
            attempts += 1;
            warn!(
                session_id = %self.session_id,
                error = %err,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Connection attempt failed, retrying"
            );

            tokio::select! {
                _ = self.handles.shutdown.cancelled() => return Ok(None),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Back off and reconnect until a connection is restored or the budget is spent.
    async fn reconnect(
        &self,
        attempts: &mut u32,
        mut last_error: String,
        pending: &mut Option<ClientEvent>,
    ) -> RealtimeResult<Option<TransportChannel>> {
        loop {
            if !self.policy.should_retry(*attempts) {
                return Err(RealtimeError::ReconnectExhausted {
                    attempts: *attempts,
                    last_error,
                });
            }

            let delay = self.policy.delay(*attempts);
            *attempts += 1;
            info!(
                session_id = %self.session_id,
                attempt = *attempts,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Attempting reconnection"
            );
            self.handles
                .events
                .emit(EventPayload::SessionUpdated(SessionUpdate::Reconnecting {
                    attempt: *attempts,
                    delay_ms: delay.as_millis() as u64,
                }));

            tokio::select! {
                _ = self.handles.shutdown.cancelled() => return Ok(None),
                _ = sleep(delay) => {}
            }

            match self.attempt(true, pending).await {
                None => return Ok(None),
                Some(Ok(channel)) => return Ok(Some(channel)),
                Some(Err(RealtimeError::AuthenticationFailed(reason))) => {
                    return Err(RealtimeError::ReconnectExhausted {
                        attempts: *attempts,
                        last_error: format!("authentication failed: {reason}"),
                    });
                }
                Some(Err(e)) => {
                    warn!(session_id = %self.session_id, attempt = *attempts, error = %e, "Reconnection attempt failed");
                    last_error = e.to_string();
                }
            }
        }
    }

    /// One connection attempt bounded by the policy's connect timeout.
    /// Returns `None` if the session is closed while the attempt is in flight.
    async fn attempt(
        &self,
        replay: bool,
        pending: &mut Option<ClientEvent>,
    ) -> Option<RealtimeResult<TransportChannel>> {
        let limit = self.policy.connect_timeout();
        tokio::select! {
            biased;
            _ = self.handles.shutdown.cancelled() => None,
            result = timeout(limit, self.establish(replay, pending)) => Some(match result {
                Ok(result) => result,
                Err(_) => Err(RealtimeError::Transport(format!(
                    "connect timed out after {}ms",
                    limit.as_millis()
                ))),
            }),
        }
    }

    /// Open a connection and restore the session on it.
    async fn establish(
        &self,
        replay: bool,
        pending: &mut Option<ClientEvent>,
    ) -> RealtimeResult<TransportChannel> {
        let TransportChannel { mut sink, stream } = self.transport.connect().await?;

        self.write_raw(&mut sink, &self.session_update).await?;

        if replay {
            let turns = self.handles.context.replay_events();
            debug!(session_id = %self.session_id, turns = turns.len(), "Replaying conversation");
            for event in &turns {
                self.write_raw(&mut sink, event).await?;
            }
        }

        // Cleared only once written, so an abandoned attempt keeps it.
        if let Some(event) = pending.as_ref() {
            self.write_event(&mut sink, event).await?;
        }
        *pending = None;

        Ok(TransportChannel { sink, stream })
    }

    /// Serve one connection until it fails or the session closes.
    async fn drive(
        &self,
        channel: TransportChannel,
        outbound_rx: &mut mpsc::Receiver<ClientEvent>,
        pending: &mut Option<ClientEvent>,
    ) -> ConnectionEnd {
        let started = Instant::now();
        let TransportChannel { mut sink, stream } = channel;

        let conn = self.handles.shutdown.child_token();
        let liveness = Liveness::new();
        let (probe_tx, mut probe_rx) = mpsc::channel::<Bytes>(4);
        let (pong_tx, mut pong_rx) = mpsc::channel::<Bytes>(16);

        let mut reader = self.handles.tracker.spawn(read_loop(
            stream,
            self.handles.raw_tx.clone(),
            pong_tx,
            liveness.clone(),
            conn.clone(),
        ));
        let mut monitor = self.handles.tracker.spawn(
            HeartbeatMonitor::new(self.heartbeat.clone(), liveness).run(probe_tx, conn.clone()),
        );
        let mut reader_done = false;
        let mut monitor_done = false;

        let lost = |reason: String| ConnectionEnd::Lost {
            reason,
            uptime: started.elapsed(),
        };

        let end = loop {
            tokio::select! {
                biased;

                _ = self.handles.shutdown.cancelled() => {
                    self.flush_and_close(&mut sink, outbound_rx).await;
                    break ConnectionEnd::Closed;
                }

                reason = &mut reader => {
                    reader_done = true;
                    break lost(reason.unwrap_or_else(|e| format!("reader task failed: {e}")));
                }

                outcome = &mut monitor => {
                    monitor_done = true;
                    let reason = match outcome {
                        Ok(HeartbeatOutcome::TimedOut { silent_for }) => {
                            format!("heartbeat timeout after {}ms without acknowledgment", silent_for.as_millis())
                        }
                        Ok(other) => format!("heartbeat stopped: {other:?}"),
                        Err(e) => format!("heartbeat task failed: {e}"),
                    };
                    break lost(reason);
                }

                Some(data) = probe_rx.recv() => {
                    if let Err(e) = self.write(&mut sink, TransportMessage::Ping(data)).await {
                        break lost(e.to_string());
                    }
                }

                Some(data) = pong_rx.recv() => {
                    if let Err(e) = self.write(&mut sink, TransportMessage::Pong(data)).await {
                        break lost(e.to_string());
                    }
                }

                event = outbound_rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.write_event(&mut sink, &event).await {
                            *pending = Some(event);
                            break lost(e.to_string());
                        }
                    }
                    None => {
                        self.close_sink(&mut sink).await;
                        break ConnectionEnd::Closed;
                    }
                },
            }
        };

        // Stop this connection's tasks before another connection can start.
        conn.cancel();
        if !reader_done {
            let _ = reader.await;
        }
        if !monitor_done {
            let _ = monitor.await;
        }
        end
    }

    async fn flush_and_close(
        &self,
        sink: &mut TransportSink,
        outbound_rx: &mut mpsc::Receiver<ClientEvent>,
    ) {
        while let Ok(event) = outbound_rx.try_recv() {
            if let Err(e) = self.write_event(sink, &event).await {
                debug!(session_id = %self.session_id, error = %e, "Dropping unsent messages on close");
                break;
            }
        }
        self.close_sink(sink).await;
    }

    async fn close_sink(&self, sink: &mut TransportSink) {
        let closing = async {
            sink.send(TransportMessage::normal_close()).await?;
            sink.close().await
        };
        match timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => debug!(session_id = %self.session_id, "Close frame sent"),
            Ok(Err(e)) => debug!(session_id = %self.session_id, error = %e, "Close handshake failed"),
            Err(_) => debug!(session_id = %self.session_id, "Close handshake timed out"),
        }
    }

    /// Write a caller-visible event and account for it.
    async fn write_event(&self, sink: &mut TransportSink, event: &ClientEvent) -> RealtimeResult<()> {
        self.write_raw(sink, event).await?;
        if let Some(text) = event.as_user_text() {
            self.handles.context.push(TranscriptRole::User, text);
        }
        Ok(())
    }

    async fn write_raw(&self, sink: &mut TransportSink, event: &ClientEvent) -> RealtimeResult<()> {
        let json = event.to_json()?;
        self.write(sink, TransportMessage::Text(json)).await?;
        self.handles.metrics.record_sent();
        trace!(session_id = %self.session_id, kind = event.kind(), "Sent event");
        Ok(())
    }

    async fn write(&self, sink: &mut TransportSink, msg: TransportMessage) -> RealtimeResult<()> {
        match timeout(WRITE_TIMEOUT, sink.send(msg)).await {
            Ok(result) => result,
            Err(_) => Err(RealtimeError::Transport("write timed out".to_string())),
        }
    }

    fn fail(&self, err: RealtimeError) {
        error!(session_id = %self.session_id, error = %err, "Session failed");
        self.handles.metrics.record_error();

        let kind = match err {
            RealtimeError::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            _ => ErrorKind::Transport,
        };
        self.handles
            .events
            .emit(EventPayload::error(kind, err.to_string()));
        self.handles.fatal.set(err);
        self.handles.state.transition(SessionState::Closed);
        self.handles.teardown.cancel();
        self.handles.events.shutdown();
    }
}

/// Forward inbound messages until the connection fails. Returns the failure reason.
async fn read_loop(
    mut stream: TransportStream,
    raw_tx: mpsc::UnboundedSender<TransportMessage>,
    pong_tx: mpsc::Sender<Bytes>,
    liveness: Arc<Liveness>,
    cancel: CancellationToken,
) -> String {
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return "connection cancelled".to_string(),
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(TransportMessage::Ping(data))) => {
                if pong_tx.try_send(data).is_err() {
                    trace!("Pong queue full, skipping reply");
                }
            }
            Some(Ok(TransportMessage::Pong(_))) => liveness.ack(),
            Some(Ok(TransportMessage::Close { code, reason })) => {
                return format!("closed by remote (code {code}): {reason}");
            }
            Some(Ok(msg)) => {
                if raw_tx.send(msg).is_err() {
                    return "dispatcher stopped".to_string();
                }
            }
            Some(Err(e)) => return e.to_string(),
            None => return "stream ended".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_slot_reports_once() {
        let slot = FatalSlot::default();
        assert!(slot.take_report().is_none());

        slot.set(RealtimeError::ReconnectExhausted {
            attempts: 3,
            last_error: "refused".to_string(),
        });
        slot.set(RealtimeError::Closed);

        assert!(matches!(
            slot.get(),
            Some(RealtimeError::ReconnectExhausted { attempts: 3, .. })
        ));
        assert!(slot.take_report().is_some());
        assert!(slot.take_report().is_none());
        assert!(slot.get().is_some());
    }

    #[tokio::test]
    async fn test_read_loop_routes_control_frames() {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let (pong_tx, mut pong_rx) = mpsc::channel(4);
        let liveness = Liveness::new();

        let messages = vec![
            Ok(TransportMessage::Ping(Bytes::from_static(b"p"))),
            Ok(TransportMessage::Pong(Bytes::new())),
            Ok(TransportMessage::Text("{}".to_string())),
            Ok(TransportMessage::Close {
                code: 1011,
                reason: "server error".to_string(),
            }),
        ];
        let stream: TransportStream = Box::pin(futures::stream::iter(messages));

        let reason = read_loop(
            stream,
            raw_tx,
            pong_tx,
            liveness.clone(),
            CancellationToken::new(),
        )
        .await;

        assert!(reason.contains("1011"));
        assert_eq!(pong_rx.recv().await.unwrap(), Bytes::from_static(b"p"));
        assert_eq!(liveness.acks(), 1);
        assert_eq!(
            raw_rx.recv().await.unwrap(),
            TransportMessage::Text("{}".to_string())
        );
    }

    #[tokio::test]
    async fn test_read_loop_reports_stream_end() {
        let (raw_tx, _raw_rx) = mpsc::unbounded_channel();
        let (pong_tx, _pong_rx) = mpsc::channel(4);
        let stream: TransportStream = Box::pin(futures::stream::empty());
        let reason = read_loop(stream, raw_tx, pong_tx, Liveness::new(), CancellationToken::new()).await;
        assert_eq!(reason, "stream ended");
    }
}
