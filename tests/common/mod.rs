//! In-memory realtime transport for session tests.
//!
//! Each `connect` consumes the next scripted plan (accepting when the script is
//! empty) and hands the server side of an accepted connection to the test.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use arnold_gateway::core::realtime::{
    EventPayload, InboundEvent, RealtimeConfig, RealtimeError, RealtimeResult, SessionManager,
    Transport, TransportChannel, TransportMessage,
};
use arnold_gateway::core::workouts::WorkoutStore;

/// How the mock answers one connection attempt.
#[derive(Debug, Clone)]
pub enum Plan {
    Accept,
    Refuse(String),
    RejectAuth,
    /// Never finish the handshake
    Hang,
}

/// Server side of an accepted connection.
pub struct ServerConn {
    to_client: fmpsc::UnboundedSender<RealtimeResult<TransportMessage>>,
    from_client: mpsc::UnboundedReceiver<TransportMessage>,
}

impl ServerConn {
    /// Send a JSON server event.
    pub fn send_event(&self, event: Value) {
        let _ = self
            .to_client
            .unbounded_send(Ok(TransportMessage::Text(event.to_string())));
    }

    pub fn send_raw(&self, msg: TransportMessage) {
        let _ = self.to_client.unbounded_send(Ok(msg));
    }

    /// Fail the connection as a network reset would.
    pub fn reset(&self) {
        let _ = self
            .to_client
            .unbounded_send(Err(RealtimeError::Transport("connection reset".to_string())));
    }

    /// Next text message written by the session, parsed as JSON.
    pub async fn next_text(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(120), self.from_client.recv())
                .await
                .expect("timed out waiting for client message")
                .expect("client side closed");
            if let TransportMessage::Text(text) = msg {
                return serde_json::from_str(&text).expect("client sent invalid JSON");
            }
        }
    }

    /// Next text message of the given protocol type.
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let value = self.next_text().await;
            if value["type"] == kind {
                return value;
            }
        }
    }

    /// Next message of any kind, or None once the session dropped its sink.
    pub async fn next_message(&mut self) -> Option<TransportMessage> {
        self.from_client.recv().await
    }
}

pub struct MockTransport {
    script: Mutex<VecDeque<Plan>>,
    auto_pong: AtomicBool,
    attempts: AtomicUsize,
    accepted_tx: mpsc::UnboundedSender<ServerConn>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerConn>) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            auto_pong: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            accepted_tx,
        });
        (transport, accepted_rx)
    }

    /// Queue plans for the next connection attempts.
    pub fn script(&self, plans: impl IntoIterator<Item = Plan>) {
        self.script.lock().extend(plans);
    }

    /// Answer pings with pongs (on by default).
    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> RealtimeResult<TransportChannel> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let plan = self.script.lock().pop_front().unwrap_or(Plan::Accept);
        match plan {
            Plan::Accept => {}
            Plan::Refuse(reason) => return Err(RealtimeError::Transport(reason)),
            Plan::RejectAuth => {
                return Err(RealtimeError::AuthenticationFailed(
                    "handshake rejected: 401 Unauthorized".to_string(),
                ));
            }
            Plan::Hang => return futures::future::pending().await,
        }

        let (to_client, client_stream) = fmpsc::unbounded::<RealtimeResult<TransportMessage>>();
        let (client_sink, mut written) = fmpsc::unbounded::<TransportMessage>();
        let (observed_tx, observed_rx) = mpsc::unbounded_channel();

        // Relay what the session writes to the test, answering pings on the way.
        let pong_tx = to_client.clone();
        let auto_pong = self.auto_pong.load(Ordering::Relaxed);
        tokio::spawn(async move {
            while let Some(msg) = written.next().await {
                if let TransportMessage::Ping(data) = &msg
                    && auto_pong
                {
                    let _ = pong_tx.unbounded_send(Ok(TransportMessage::Pong(data.clone())));
                }
                if observed_tx.send(msg).is_err() {
                    break;
                }
            }
        });

        let _ = self.accepted_tx.send(ServerConn {
            to_client,
            from_client: observed_rx,
        });

        let sink = client_sink.sink_map_err(|e| RealtimeError::Transport(e.to_string()));
        Ok(TransportChannel {
            sink: Box::pin(sink),
            stream: Box::pin(client_stream),
        })
    }

    fn endpoint(&self) -> String {
        "mock://realtime".to_string()
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = RealtimeResult<InboundEvent>> + Send>>;

/// Session over the mock transport with a ready-to-use config.
pub fn session_with(
    transport: Arc<MockTransport>,
    store: Arc<dyn WorkoutStore>,
    config: RealtimeConfig,
) -> (SessionManager, EventStream) {
    let session = SessionManager::new(config, transport, store).expect("valid config");
    let events: EventStream = Box::pin(session.receive());
    (session, events)
}

pub fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        api_key: "sk-test".to_string(),
        ..Default::default()
    }
}

pub async fn next_connection(accepted: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    tokio::time::timeout(Duration::from_secs(120), accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Skip events until one matches.
pub async fn wait_for_event<F>(events: &mut EventStream, mut matches: F) -> InboundEvent
where
    F: FnMut(&EventPayload) -> bool,
{
    loop {
        let next = tokio::time::timeout(Duration::from_secs(300), events.next())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended");
        let event = next.expect("session failed");
        if matches(&event.payload) {
            return event;
        }
    }
}

/// Collect every remaining event, including a terminal error.
pub async fn drain_events(events: &mut EventStream) -> Vec<RealtimeResult<InboundEvent>> {
    let mut out = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(300), events.next())
        .await
        .expect("timed out draining events")
    {
        out.push(event);
    }
    out
}
