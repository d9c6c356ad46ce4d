//! Realtime WebSocket handler
//!
//! Each client connection gets its own realtime session. Client audio is fed
//! into the session; session events are translated into JSON messages and
//! binary audio frames for the client.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::realtime::{RealtimeError, SessionManager, SessionState};
use crate::state::AppState;

use super::messages::{StreamIncomingMessage, StreamMessageRoute, StreamOutgoingMessage};

/// Channel buffer size for messages headed to the client
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Close the stream after this long without client traffic
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the idle timeout is checked
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Realtime streaming handler
///
/// Upgrades the HTTP connection to a WebSocket carrying PCM16 audio both ways.
pub async fn realtime_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Realtime stream upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let _guard = app_state.track_session();
    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<StreamMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, StreamMessageRoute::Close);

            let result = match route {
                StreamMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                StreamMessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                StreamMessageRoute::Close => sender.send(Message::Close(None)).await,
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if should_close {
                break;
            }
        }
    });

    let session = match app_state.new_session() {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to create realtime session");
            send_error_and_close(&message_tx, "session_error", e.to_string()).await;
            let _ = sender_task.await;
            return;
        }
    };
    let session_id = session.id().to_string();
    info!(session_id = %session_id, "Realtime stream established");

    // Forward session events to the client until the session's event stream ends.
    let forward_tx = message_tx.clone();
    let forward_session = session.clone();
    let forwarder = tokio::spawn(async move {
        let events = forward_session.receive();
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            let route = match event {
                Ok(event) => StreamMessageRoute::from_event(forward_session.id(), event),
                Err(e) => StreamMessageRoute::Outgoing(StreamOutgoingMessage::error(
                    "session_failed",
                    e.to_string(),
                )),
            };
            if forward_tx.send(route).await.is_err() {
                break;
            }
        }
    });

    if let Err(e) = session.start().await {
        error!(session_id = %session_id, error = %e, "Realtime session failed to start");
        session.close().await;
        let _ = forwarder.await;
        send_error_and_close(&message_tx, "connection_failed", e.to_string()).await;
        let _ = sender_task.await;
        return;
    }

    let reason = client_loop(&mut receiver, &session, &message_tx).await;
    info!(session_id = %session_id, reason, "Realtime stream ending");

    // Close the session first so buffered output reaches the client.
    session.close().await;
    let _ = forwarder.await;
    let _ = message_tx
        .send(StreamMessageRoute::Outgoing(StreamOutgoingMessage::Closing {
            reason: reason.to_string(),
        }))
        .await;
    let _ = message_tx.send(StreamMessageRoute::Close).await;
    drop(message_tx);
    let _ = sender_task.await;

    info!(session_id = %session_id, "Realtime stream terminated");
}

/// Read client frames until the client stops, disconnects or idles out.
async fn client_loop(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    session: &SessionManager,
    message_tx: &mpsc::Sender<StreamMessageRoute>,
) -> &'static str {
    let mut last_activity = std::time::Instant::now();
    let mut state_rx = session.state_changes();

    loop {
        select! {
            msg = receiver.next() => {
                last_activity = std::time::Instant::now();
                match msg {
                    Some(Ok(msg)) => {
                        if let Some(reason) = process_client_message(msg, session, message_tx).await {
                            return reason;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Realtime WebSocket error: {}", e);
                        return "websocket_error";
                    }
                    None => return "client_disconnected",
                }
            }
            _ = async {
                let _ = state_rx.wait_for(|s| *s == SessionState::Closed).await;
            } => return "session_closed",
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        "Realtime stream idle for {}s, closing",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx
                        .send(StreamMessageRoute::Outgoing(StreamOutgoingMessage::error(
                            "idle_timeout",
                            "Connection closed due to inactivity",
                        )))
                        .await;
                    return "idle_timeout";
                }
            }
        }
    }
}

/// Handle one client frame. Returns a reason when the stream should end.
async fn process_client_message(
    msg: Message,
    session: &SessionManager,
    message_tx: &mpsc::Sender<StreamMessageRoute>,
) -> Option<&'static str> {
    match msg {
        Message::Binary(data) => {
            debug!("Received binary audio: {} bytes", data.len());
            if let Err(e) = session.send_audio(data).await {
                return report_send_error(e, "audio_error", message_tx).await;
            }
            None
        }
        Message::Text(text) => {
            let incoming: StreamIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    let _ = message_tx
                        .send(StreamMessageRoute::Outgoing(StreamOutgoingMessage::error(
                            "parse_error",
                            format!("Invalid message format: {e}"),
                        )))
                        .await;
                    return None;
                }
            };

            if let Err(e) = incoming.validate() {
                let _ = message_tx
                    .send(StreamMessageRoute::Outgoing(StreamOutgoingMessage::error(
                        "validation_error",
                        e.to_string(),
                    )))
                    .await;
                return None;
            }

            match incoming {
                StreamIncomingMessage::TextInput { text } => {
                    if let Err(e) = session.send_text(text).await {
                        return report_send_error(e, "text_error", message_tx).await;
                    }
                    None
                }
                StreamIncomingMessage::Stop => Some("client_stop"),
            }
        }
        Message::Ping(_) | Message::Pong(_) => None,
        Message::Close(_) => Some("client_closed"),
    }
}

async fn report_send_error(
    err: RealtimeError,
    code: &str,
    message_tx: &mpsc::Sender<StreamMessageRoute>,
) -> Option<&'static str> {
    warn!(error = %err, "Failed to forward client input");
    let fatal = matches!(
        err,
        RealtimeError::Closed | RealtimeError::ReconnectExhausted { .. }
    );
    let _ = message_tx
        .send(StreamMessageRoute::Outgoing(StreamOutgoingMessage::error(
            code,
            err.to_string(),
        )))
        .await;
    fatal.then_some("session_closed")
}

async fn send_error_and_close(
    message_tx: &mpsc::Sender<StreamMessageRoute>,
    code: &str,
    message: String,
) {
    let _ = message_tx
        .send(StreamMessageRoute::Outgoing(StreamOutgoingMessage::error(
            code, message,
        )))
        .await;
    let _ = message_tx.send(StreamMessageRoute::Close).await;
}
