//! Liveness probing of the remote connection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arnold_gateway::core::realtime::{
    ErrorKind, EventPayload, SessionState, SessionUpdate, TransportMessage,
};
use arnold_gateway::core::workouts::InMemoryWorkoutStore;
use common::{MockTransport, next_connection, session_with, test_config, wait_for_event};

#[tokio::test(start_paused = true)]
async fn test_silent_connection_is_replaced() {
    let (transport, mut accepted) = MockTransport::new();
    transport.set_auto_pong(false);
    let (session, mut events) = session_with(
        transport.clone(),
        Arc::new(InMemoryWorkoutStore::new()),
        test_config(),
    );
    session.start().await.unwrap();
    let connected_at = tokio::time::Instant::now();
    let _first = next_connection(&mut accepted).await;

    let error = wait_for_event(&mut events, |p| matches!(p, EventPayload::Error(_))).await;
    match error.payload {
        EventPayload::Error(err) => {
            assert_eq!(err.kind, ErrorKind::Transport);
            assert!(err.message.contains("heartbeat timeout"));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(connected_at.elapsed() >= Duration::from_secs(60));

    wait_for_event(&mut events, |p| {
        *p == EventPayload::SessionUpdated(SessionUpdate::StateChanged {
            state: SessionState::Reconnecting,
        })
    })
    .await;
    wait_for_event(&mut events, |p| {
        matches!(p, EventPayload::SessionUpdated(SessionUpdate::Reconnected { .. }))
    })
    .await;
    next_connection(&mut accepted).await;
    assert_eq!(transport.attempts(), 2);

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_answered_probes_keep_connection() {
    let (transport, mut accepted) = MockTransport::new();
    let (session, _events) = session_with(
        transport.clone(),
        Arc::new(InMemoryWorkoutStore::new()),
        test_config(),
    );
    session.start().await.unwrap();
    let mut conn = next_connection(&mut accepted).await;

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(transport.attempts(), 1);

    session.close().await;

    let mut pings = 0;
    while let Some(msg) = conn.next_message().await {
        if matches!(msg, TransportMessage::Ping(_)) {
            pings += 1;
        }
    }
    // One probe every 30s
    assert!(pings >= 9, "expected periodic probes, saw {pings}");
}

#[tokio::test(start_paused = true)]
async fn test_remote_ping_is_answered() {
    let (transport, mut accepted) = MockTransport::new();
    let (session, _events) = session_with(
        transport,
        Arc::new(InMemoryWorkoutStore::new()),
        test_config(),
    );
    session.start().await.unwrap();
    let mut conn = next_connection(&mut accepted).await;

    conn.send_raw(TransportMessage::Ping(bytes::Bytes::from_static(b"hi")));
    loop {
        match conn.next_message().await {
            Some(TransportMessage::Pong(data)) => {
                assert_eq!(data.as_ref(), b"hi");
                break;
            }
            Some(_) => continue,
            None => panic!("connection closed before pong"),
        }
    }

    session.close().await;
}
