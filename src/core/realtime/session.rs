//! Session manager: the public face of one realtime voice session.
//!
//! A [`SessionManager`] wires the connection supervisor, event dispatcher,
//! function call broker and the two jitter buffers together and exposes a small
//! surface: [`start`](SessionManager::start), [`send`](SessionManager::send),
//! [`receive`](SessionManager::receive) and [`close`](SessionManager::close).
//!
//! Handles are cheap to clone; all clones drive the same session.

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OnceCell, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::base::{AudioFormat, BufferConfig, RealtimeConfig, RealtimeError, RealtimeResult, SessionState};
use super::broker::{FunctionCallBroker, tool_definitions};
use super::buffer::{AudioFrame, AudioFrameBuffer, Direction, Playout, PushOutcome};
use super::context::ConversationContext;
use super::dispatcher::{DispatchTargets, EventDispatcher};
use super::events::{AudioDelta, ErrorKind, EventPayload, EventSink, InboundEvent};
use super::metrics::{MetricsSnapshot, SessionMetrics};
use super::openai::{ClientEvent, SessionConfig};
use super::state::StateCell;
use super::supervisor::{ConnectionSupervisor, FatalSlot, SupervisorHandles};
use super::transport::{Transport, WebSocketTransport};
use crate::core::workouts::WorkoutStore;

/// Capacity of the writer queue shared by callers and the dispatcher.
const OUTBOUND_QUEUE: usize = 256;

/// Caller input for [`SessionManager::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Microphone audio in the session's input format
    Audio(AudioFrame),
    /// A typed user message; the model is asked to respond
    Text(String),
}

/// Identity and health of a session.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub context_turns: usize,
    pub metrics: MetricsSnapshot,
}

struct Tasks {
    supervisor: tokio::task::JoinHandle<()>,
}

struct SessionCore {
    id: String,
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
    events: Arc<EventSink>,
    event_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<InboundEvent>>>,
    context: Arc<ConversationContext>,
    metrics: Arc<SessionMetrics>,
    broker: Arc<FunctionCallBroker>,
    ingress: Arc<AudioFrameBuffer>,
    egress: Arc<AudioFrameBuffer>,
    fatal: Arc<FatalSlot>,
    outbound_tx: mpsc::Sender<ClientEvent>,
    outbound_rx: parking_lot::Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    tasks: AsyncMutex<Option<Tasks>>,
    tracker: TaskTracker,
    /// Graceful close request
    shutdown: CancellationToken,
    /// Hard stop for every session task
    teardown: CancellationToken,
    closed: OnceCell<()>,
    ingress_seq: AtomicU64,
    /// Set while the input buffer is dropping frames
    ingress_overrun: AtomicBool,
    started_at: Instant,
}

/// Handle to one realtime session.
#[derive(Clone)]
pub struct SessionManager {
    core: Arc<SessionCore>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionManager {
    /// Build a session over any transport. Nothing connects until [`start`](Self::start).
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn WorkoutStore>,
    ) -> RealtimeResult<Self> {
        config.validate()?;

        let id = Uuid::new_v4().to_string();
        let (sink, event_rx) = EventSink::new();
        let events = Arc::new(sink);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let ingress_config = BufferConfig {
            low_water_ms: 0,
            max_silence_frames: 0,
            ..config.buffer.clone()
        };

        let core = SessionCore {
            state: Arc::new(StateCell::new(id.clone(), events.clone())),
            event_rx: Arc::new(AsyncMutex::new(event_rx)),
            context: Arc::new(ConversationContext::new()),
            metrics: Arc::new(SessionMetrics::new()),
            broker: Arc::new(FunctionCallBroker::new(store, config.dedup_cache_capacity)),
            ingress: Arc::new(AudioFrameBuffer::new(
                Direction::Ingress,
                &ingress_config,
                &config.audio_format,
            )),
            egress: Arc::new(AudioFrameBuffer::new(
                Direction::Egress,
                &config.buffer,
                &config.audio_format,
            )),
            fatal: Arc::new(FatalSlot::default()),
            outbound_tx,
            outbound_rx: parking_lot::Mutex::new(Some(outbound_rx)),
            tasks: AsyncMutex::new(None),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            teardown: CancellationToken::new(),
            closed: OnceCell::new(),
            ingress_seq: AtomicU64::new(0),
            ingress_overrun: AtomicBool::new(false),
            started_at: Instant::now(),
            events,
            transport,
            config,
            id,
        };

        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Build a session against the OpenAI Realtime API.
    pub fn openai(config: RealtimeConfig, store: Arc<dyn WorkoutStore>) -> RealtimeResult<Self> {
        let transport = Arc::new(WebSocketTransport::from_config(&config)?);
        Self::new(config, transport, store)
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn state(&self) -> SessionState {
        self.core.state.get()
    }

    /// Watch channel of state changes.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.core.state.subscribe()
    }

    pub fn audio_format(&self) -> &AudioFormat {
        &self.core.config.audio_format
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.core.config
    }

    /// The error that ended the session, if it failed.
    pub fn fatal_error(&self) -> Option<RealtimeError> {
        self.core.fatal.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let core = &self.core;
        let broker = core.broker.stats();
        let ingress = core.ingress.stats();
        let egress = core.egress.stats();

        MetricsSnapshot {
            function_replays: broker.replayed,
            avg_function_latency_ms: broker.avg_latency_ms,
            ingress_dropped: ingress.dropped,
            egress_dropped: egress.dropped,
            ingress_rejected: ingress.rejected,
            egress_rejected: egress.rejected,
            uptime_ms: core.started_at.elapsed().as_millis() as u64,
            ..core.metrics.snapshot()
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.core.id.clone(),
            state: self.state(),
            context_turns: self.core.context.len(),
            metrics: self.metrics(),
        }
    }

    /// Connect and configure the remote session.
    ///
    /// Returns once the session is `Connected`, or with the error that closed it.
    /// Only valid on a freshly created session.
    pub async fn start(&self) -> RealtimeResult<()> {
        let core = &self.core;
        if !core.state.transition(SessionState::Connecting) {
            return Err(RealtimeError::InvalidState {
                expected: "CREATED",
                actual: core.state.get(),
            });
        }

        let Some(outbound_rx) = core.outbound_rx.lock().take() else {
            return Err(RealtimeError::InvalidState {
                expected: "CREATED",
                actual: core.state.get(),
            });
        };

        info!(
            session_id = %core.id,
            model = %core.config.model,
            endpoint = %core.transport.endpoint(),
            "Starting realtime session"
        );

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let dispatcher = EventDispatcher::new(DispatchTargets {
            events: core.events.clone(),
            egress: core.egress.clone(),
            broker: core.broker.clone(),
            context: core.context.clone(),
            metrics: core.metrics.clone(),
            outbound: core.outbound_tx.clone(),
            closed: core.teardown.clone(),
        });
        core.tracker
            .spawn(dispatcher.run(raw_rx, core.teardown.clone()));
        core.tracker.spawn(ingress_pump(core.clone_parts()));
        core.tracker.spawn(egress_playout(
            core.egress.clone(),
            core.events.clone(),
            core.config.audio_format.clone(),
            core.config.buffer.silence_frame_ms,
            core.teardown.clone(),
        ));

        let session_update = ClientEvent::SessionUpdate {
            session: SessionConfig::from_config(&core.config, tool_definitions()),
        };
        let supervisor = ConnectionSupervisor::new(
            core.id.clone(),
            core.transport.clone(),
            core.config.reconnect.clone(),
            core.config.heartbeat.clone(),
            session_update,
            SupervisorHandles {
                context: core.context.clone(),
                events: core.events.clone(),
                metrics: core.metrics.clone(),
                state: core.state.clone(),
                fatal: core.fatal.clone(),
                raw_tx,
                tracker: core.tracker.clone(),
                shutdown: core.shutdown.clone(),
                teardown: core.teardown.clone(),
            },
        );
        let handle = core.tracker.spawn(supervisor.run(outbound_rx));
        *core.tasks.lock().await = Some(Tasks { supervisor: handle });

        let mut state_rx = core.state.subscribe();
        let settled = state_rx
            .wait_for(|s| matches!(s, SessionState::Connected | SessionState::Closed))
            .await
            .map(|s| *s);

        match settled {
            Ok(SessionState::Connected) => Ok(()),
            _ => Err(core.fatal.get().unwrap_or(RealtimeError::Closed)),
        }
    }

    /// Send caller input.
    ///
    /// Waits while the session is reconnecting. Fails once the session is closed,
    /// with the error that closed it when there is one.
    pub async fn send(&self, input: SessionInput) -> RealtimeResult<()> {
        self.ready_for_input().await?;
        let core = &self.core;

        match input {
            SessionInput::Audio(frame) => match core.ingress.push(frame) {
                PushOutcome::Accepted => {
                    core.ingress_overrun.store(false, Ordering::Relaxed);
                    Ok(())
                }
                PushOutcome::DroppedOldest => {
                    // One report per overrun episode.
                    if !core.ingress_overrun.swap(true, Ordering::Relaxed) {
                        warn!(session_id = %core.id, "Input buffer full, dropping oldest frames");
                        core.metrics.record_error();
                        core.events.emit(EventPayload::error(
                            ErrorKind::BufferOverrun,
                            format!(
                                "ingress buffer full, {} frame(s) dropped so far",
                                core.ingress.dropped()
                            ),
                        ));
                    }
                    Ok(())
                }
                PushOutcome::Rejected => Err(RealtimeError::Protocol(
                    "audio frame out of sequence".to_string(),
                )),
                PushOutcome::Closed => Err(RealtimeError::Closed),
            },
            SessionInput::Text(text) => {
                if text.trim().is_empty() {
                    return Err(RealtimeError::InvalidInput(
                        "text input must not be empty".to_string(),
                    ));
                }
                self.enqueue(ClientEvent::user_text(&text)).await?;
                self.enqueue(ClientEvent::ResponseCreate).await
            }
        }
    }

    /// Send microphone audio, numbering frames automatically.
    pub async fn send_audio(&self, data: impl Into<Bytes>) -> RealtimeResult<()> {
        let seq = self.core.ingress_seq.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::new(Direction::Ingress, seq, data);
        self.send(SessionInput::Audio(frame)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> RealtimeResult<()> {
        self.send(SessionInput::Text(text.into())).await
    }

    /// Stream of inbound events.
    ///
    /// Ends after the session closes and every queued event has been delivered.
    /// If the session failed, the stream yields that error once before ending.
    /// Concurrent streams share one queue: each event is delivered once.
    pub fn receive(&self) -> impl Stream<Item = RealtimeResult<InboundEvent>> + Send + 'static {
        let event_rx = self.core.event_rx.clone();
        let fatal = self.core.fatal.clone();

        async_stream::stream! {
            loop {
                let next = event_rx.lock().await.recv().await;
                match next {
                    Some(event) => yield Ok(event),
                    None => break,
                }
            }
            if let Some(err) = fatal.take_report() {
                yield Err(err);
            }
        }
    }

    /// Close the session. Idempotent; concurrent calls all wait for the same close.
    ///
    /// Buffered input is flushed to the remote model and buffered output is
    /// delivered as a final audio event before the event stream ends.
    pub async fn close(&self) {
        let core = self.core.clone();
        self.core
            .closed
            .get_or_init(|| async move { core.close().await })
            .await;
    }

    async fn ready_for_input(&self) -> RealtimeResult<()> {
        let core = &self.core;
        let mut state_rx = core.state.subscribe();
        let state = state_rx
            .wait_for(|s| *s != SessionState::Reconnecting)
            .await
            .map(|s| *s)
            .unwrap_or(SessionState::Closed);

        match state {
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(core.fatal.get().unwrap_or(RealtimeError::Closed)),
            actual => Err(RealtimeError::InvalidState {
                expected: "CONNECTED",
                actual,
            }),
        }
    }

    async fn enqueue(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.core
            .outbound_tx
            .send(event)
            .await
            .map_err(|_| RealtimeError::Closed)
    }
}

impl SessionCore {
    fn clone_parts(&self) -> IngressParts {
        IngressParts {
            ingress: self.ingress.clone(),
            state: self.state.clone(),
            outbound: self.outbound_tx.clone(),
            cancel: self.teardown.clone(),
        }
    }

    async fn close(&self) {
        info!(session_id = %self.id, state = %self.state.get(), "Closing realtime session");

        // Flush buffered input while the connection is still up.
        let remaining = self.ingress.drain();
        self.ingress.close();
        if !remaining.is_empty() && self.state.get() == SessionState::Connected {
            debug!(session_id = %self.id, bytes = remaining.len(), "Flushing buffered input audio");
            if self
                .outbound_tx
                .send(ClientEvent::audio_append(&remaining))
                .await
                .is_err()
            {
                debug!(session_id = %self.id, "Writer gone, dropping buffered input");
            }
        }

        self.shutdown.cancel();
        if let Some(tasks) = self.tasks.lock().await.take()
            && let Err(e) = tasks.supervisor.await
        {
            warn!(session_id = %self.id, error = %e, "Supervisor task failed");
        }

        // Deliver whatever output is still buffered.
        let leftover = self.egress.drain();
        self.egress.close();
        if !leftover.is_empty() {
            self.events.emit(EventPayload::AudioDelta(AudioDelta {
                data: leftover,
                silence: false,
            }));
        }

        self.teardown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        self.state.transition(SessionState::Closed);
        self.events.shutdown();
        info!(session_id = %self.id, "Realtime session closed");
    }
}

struct IngressParts {
    ingress: Arc<AudioFrameBuffer>,
    state: Arc<StateCell>,
    outbound: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
}

/// Batch buffered microphone audio into `input_audio_buffer.append` events.
async fn ingress_pump(parts: IngressParts) {
    let IngressParts {
        ingress,
        state,
        outbound,
        cancel,
    } = parts;
    let mut state_rx = state.subscribe();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ingress.wait_ready() => {}
        }
        if ingress.is_closed() {
            break;
        }

        // Hold audio while the connection is being restored.
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            s = state_rx.wait_for(|s| matches!(s, SessionState::Connected | SessionState::Closed)) => {
                matches!(s.map(|s| *s), Ok(SessionState::Connected))
            }
        };
        if !connected {
            break;
        }

        let mut batch = Vec::new();
        while let Playout::Frame(frame) = ingress.pop() {
            batch.extend_from_slice(&frame.data);
        }
        if batch.is_empty() {
            continue;
        }

        if outbound.send(ClientEvent::audio_append(&batch)).await.is_err() {
            break;
        }
    }
    debug!("Ingress pump stopped");
}

/// Release egress audio to the caller at playback pace.
async fn egress_playout(
    egress: Arc<AudioFrameBuffer>,
    events: Arc<EventSink>,
    format: AudioFormat,
    silence_frame_ms: u64,
    cancel: CancellationToken,
) {
    let silence_pace = std::time::Duration::from_millis(silence_frame_ms.max(1));

    loop {
        match egress.pop() {
            Playout::Frame(frame) => {
                events.emit(EventPayload::AudioDelta(AudioDelta {
                    data: frame.data,
                    silence: false,
                }));
            }
            Playout::Silence(data) => {
                events.emit(EventPayload::AudioDelta(AudioDelta {
                    data,
                    silence: true,
                }));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(silence_pace) => {}
                }
            }
            Playout::Empty => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = egress.wait_ready() => {}
                }
                if egress.is_closed() {
                    break;
                }
            }
        }
    }
    debug!(pending_ms = format.duration_of(egress.stats().buffered_bytes).as_millis() as u64, "Egress playout stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workouts::InMemoryWorkoutStore;

    fn session() -> SessionManager {
        let config = RealtimeConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        SessionManager::openai(config, Arc::new(InMemoryWorkoutStore::new())).unwrap()
    }

    #[test]
    fn test_new_session_is_created() {
        let s = session();
        assert_eq!(s.state(), SessionState::Created);
        assert_eq!(s.id().len(), 36);
        assert_eq!(s.audio_format().sample_rate, 24000);
        assert!(s.fatal_error().is_none());
    }

    #[test]
    fn test_openai_requires_api_key() {
        let result = SessionManager::openai(
            RealtimeConfig::default(),
            Arc::new(InMemoryWorkoutStore::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_before_start_is_invalid() {
        let s = session();
        let err = s.send_text("hello").await.unwrap_err();
        assert!(matches!(
            err,
            RealtimeError::InvalidState {
                actual: SessionState::Created,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_close_without_start_ends_stream() {
        use futures::StreamExt;

        let s = session();
        s.close().await;
        s.close().await;
        assert_eq!(s.state(), SessionState::Closed);

        let events: Vec<_> = s.receive().collect().await;
        // Only the transition to CLOSED.
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
        assert!(matches!(s.start().await, Err(RealtimeError::InvalidState { .. })));
    }
}
