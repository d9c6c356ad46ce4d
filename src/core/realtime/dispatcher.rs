//! Inbound message demultiplexing.
//!
//! The [`EventDispatcher`] is the single consumer of raw transport messages for
//! a session. It decodes them in arrival order and routes each one: text to the
//! event queue, audio into the egress buffer, function calls to the broker.
//! Decoding failures are reported as protocol errors and never stop the session.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::broker::FunctionCallBroker;
use super::buffer::{AudioFrame, AudioFrameBuffer, Direction, PushOutcome};
use super::context::ConversationContext;
use super::events::{
    ErrorKind, EventPayload, EventSink, FunctionCallRequest, ResponseText, SessionUpdate,
    Transcript, TranscriptRole,
};
use super::metrics::SessionMetrics;
use super::openai::{ClientEvent, ServerEvent};
use super::transport::TransportMessage;

/// Session collaborators the dispatcher routes into.
#[derive(Clone)]
pub struct DispatchTargets {
    pub events: Arc<EventSink>,
    pub egress: Arc<AudioFrameBuffer>,
    pub broker: Arc<FunctionCallBroker>,
    pub context: Arc<ConversationContext>,
    pub metrics: Arc<SessionMetrics>,
    /// Writer queue, used for function results
    pub outbound: mpsc::Sender<ClientEvent>,
    /// Cancelled when the session closes; late broker results are dropped
    pub closed: CancellationToken,
}

pub struct EventDispatcher {
    targets: DispatchTargets,
    /// Function names by call id, from `response.output_item.added`
    call_names: HashMap<String, String>,
    egress_seq: u64,
    overrun: bool,
}

impl EventDispatcher {
    pub fn new(targets: DispatchTargets) -> Self {
        Self {
            targets,
            call_names: HashMap::new(),
            egress_seq: 0,
            overrun: false,
        }
    }

    /// Consume messages until the channel closes or `cancel` fires.
    pub async fn run(
        mut self,
        mut raw_rx: mpsc::UnboundedReceiver<TransportMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = raw_rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
            }
        }
        debug!("Event dispatcher stopped");
    }

    pub fn handle_message(&mut self, msg: TransportMessage) {
        self.targets.metrics.record_received();
        match msg {
            TransportMessage::Text(text) => match ServerEvent::decode(&text) {
                Ok(event) => self.handle_server_event(event),
                Err(e) => {
                    warn!(error = %e, "Undecodable server message");
                    self.report(ErrorKind::Protocol, e.to_string());
                }
            },
            TransportMessage::Binary(data) => self.push_audio(data),
            other => trace!(?other, "Ignoring control message"),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Error { error } => {
                warn!(error_type = %error.error_type, message = %error.message, "Remote error");
                let message = if error.error_type.is_empty() {
                    error.message
                } else {
                    format!("{}: {}", error.error_type, error.message)
                };
                self.report(ErrorKind::Remote, message);
            }
            ServerEvent::SessionCreated { session } => {
                debug!(remote_session = ?session.id, model = ?session.model, "Remote session created");
            }
            ServerEvent::SessionUpdated { .. } => {
                self.emit(EventPayload::SessionUpdated(SessionUpdate::ConfigAcknowledged));
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                self.targets.context.push(TranscriptRole::User, &transcript);
                self.emit_transcript(TranscriptRole::User, transcript, true, item_id);
            }
            ServerEvent::TranscriptionFailed { error, .. } => {
                self.report(
                    ErrorKind::Remote,
                    format!("input transcription failed: {}", error.message),
                );
            }
            ServerEvent::AudioTranscriptDelta { item_id, delta, .. } => {
                self.emit_transcript(TranscriptRole::Assistant, delta, false, item_id);
            }
            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript,
                ..
            } => {
                self.targets
                    .context
                    .push(TranscriptRole::Assistant, &transcript);
                self.emit_transcript(TranscriptRole::Assistant, transcript, true, item_id);
            }
            ServerEvent::TextDelta {
                response_id, delta, ..
            } => {
                self.emit(EventPayload::ResponseText(ResponseText {
                    text: delta,
                    is_final: false,
                    response_id: non_empty(response_id),
                }));
            }
            ServerEvent::TextDone {
                response_id, text, ..
            } => {
                self.targets.context.push(TranscriptRole::Assistant, &text);
                self.emit(EventPayload::ResponseText(ResponseText {
                    text,
                    is_final: true,
                    response_id: non_empty(response_id),
                }));
            }
            ServerEvent::AudioDelta { delta, .. } => match ServerEvent::decode_audio_delta(&delta) {
                Ok(audio) => self.push_audio(Bytes::from(audio)),
                Err(e) => self.report(ErrorKind::Protocol, e.to_string()),
            },
            ServerEvent::AudioDone { .. } => self.targets.egress.mark_end(),
            ServerEvent::OutputItemAdded { item, .. } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id, item.name)
                {
                    trace!(call_id = %call_id, function = %name, "Function call announced");
                    self.call_names.insert(call_id, name);
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                response_id,
                item_id,
                call_id,
                name,
                arguments,
            } => {
                let tracked = self.call_names.remove(&call_id);
                let name = name.or(tracked).unwrap_or_default();
                self.dispatch_call(FunctionCallRequest {
                    call_id,
                    name,
                    arguments: parse_arguments(arguments),
                    item_id: non_empty(item_id),
                    response_id: non_empty(response_id),
                });
            }
            ServerEvent::ResponseDone { response } => {
                if response.status.as_deref() == Some("failed") {
                    warn!(response_id = ?response.id, "Response failed");
                }
            }
            ServerEvent::Unknown => {
                self.report(ErrorKind::Protocol, "unknown server event".to_string());
            }
            other => trace!(?other, "Ignoring server event"),
        }
    }

    fn emit(&self, payload: EventPayload) {
        self.targets.events.emit(payload);
    }

    fn report(&self, kind: ErrorKind, message: String) {
        self.targets.metrics.record_error();
        self.emit(EventPayload::error(kind, message));
    }

    fn emit_transcript(&self, role: TranscriptRole, text: String, is_final: bool, item_id: String) {
        self.emit(EventPayload::TranscriptDelta(Transcript {
            role,
            text,
            is_final,
            item_id: non_empty(item_id),
        }));
    }

    fn push_audio(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let frame = AudioFrame::new(Direction::Egress, self.egress_seq, data);
        self.egress_seq += 1;

        match self.targets.egress.push(frame) {
            PushOutcome::DroppedOldest => {
                // One report per overrun episode.
                if !self.overrun {
                    self.overrun = true;
                    self.report(
                        ErrorKind::BufferOverrun,
                        format!(
                            "egress buffer full, {} frame(s) dropped so far",
                            self.targets.egress.dropped()
                        ),
                    );
                }
            }
            PushOutcome::Accepted => self.overrun = false,
            PushOutcome::Rejected | PushOutcome::Closed => {}
        }
    }

    fn dispatch_call(&self, request: FunctionCallRequest) {
        debug!(call_id = %request.call_id, function = %request.name, "Function call requested");
        self.targets.metrics.record_function_call();
        self.emit(EventPayload::FunctionCallRequest(request.clone()));

        // Calls run beside the audio path and may finish out of order.
        let targets = self.targets.clone();
        tokio::spawn(async move {
            let execution = targets.broker.execute(&request).await;
            if targets.closed.is_cancelled() {
                debug!(call_id = %request.call_id, "Session closed, discarding function result");
                return;
            }

            let result = execution.result;
            let output = ClientEvent::function_output(&result.call_id, &result.output);
            targets
                .events
                .emit(EventPayload::FunctionCallResult(result));

            for event in [output, ClientEvent::ResponseCreate] {
                if targets.outbound.send(event).await.is_err() {
                    debug!(call_id = %request.call_id, "Writer gone, function result not delivered");
                    return;
                }
            }
        });
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Arguments arrive as a JSON string; unparseable input is passed through as a
/// string so the broker reports it as invalid.
fn parse_arguments(raw: String) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}
