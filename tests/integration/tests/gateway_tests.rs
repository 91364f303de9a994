//! Gateway integration tests
//!
//! Drive a client against the scripted gateway: handshake, dispatch, heartbeat,
//! resume and fatal close codes.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use chat_cache::{MemorySessionStore, SessionStore, ShardSession};
use chat_client::ClientError;
use chat_common::ErrorCategory;
use chat_gateway::protocol::{Status, UpdatePresence};
use chat_gateway::{OpCode, ShardEvent, ShardState};
use integration_tests::*;
use serde_json::json;
use tokio::time::Instant;

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_and_dispatch() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.expect("client should start");
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    assert!(socket.uri.contains("v=10"));
    assert!(socket.uri.contains("encoding=json"));
    assert!(!socket.uri.contains("compress"));

    socket.hello(45_000).await.unwrap();
    let identify = socket.recv_op(OpCode::Identify).await.unwrap();
    assert_eq!(identify.d["token"], TEST_TOKEN);
    assert_eq!(identify.d["shard"], json!([0, 1]));
    assert_eq!(identify.d["large_threshold"], 50);

    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();
    let event = next_event(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        ShardEvent::Ready {
            shard_id: 0,
            session_id: "session-1".to_string()
        }
    );

    socket.send(&message_create(2, "hello")).await.unwrap();
    let event = next_event(&mut events, |e| {
        matches!(e, ShardEvent::Dispatch { event, .. } if event == "MESSAGE_CREATE")
    })
    .await
    .unwrap();
    match event {
        ShardEvent::Dispatch { sequence, data, .. } => {
            assert_eq!(sequence, Some(2));
            assert_eq!(data["content"], "hello");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(client.gateway().status(0), Some(ShardState::Ready));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ping_between_dispatches_sends_nothing_extra() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();
    next_event(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    socket.send(&message_create(2, "first")).await.unwrap();
    socket.ping().await.unwrap();
    socket.ping().await.unwrap();
    socket.send(&message_create(3, "second")).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut events, |e| !matches!(e, ShardEvent::HeartbeatAck { .. }))
            .await
            .unwrap();
        match event {
            ShardEvent::Dispatch { sequence, .. } => {
                seen.push(sequence);
                if sequence == Some(3) {
                    break;
                }
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(seen, [Some(2), Some(3)]);

    let (closed, shutdown) = tokio::join!(socket.recv_close(), client.shutdown());
    shutdown.unwrap();
    let (code, frames) = closed.unwrap();
    assert_eq!(code, Some(1000));
    assert!(frames
        .iter()
        .all(|f| f.op != OpCode::Identify && f.op != OpCode::Resume));
}

#[tokio::test]
async fn test_send_quota_paces_commands_without_blocking_reads() {
    const COMMANDS: usize = 130;

    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();
    next_event(&mut events, |e| matches!(e, ShardEvent::Ready { .. }))
        .await
        .unwrap();

    let handle = client.gateway().shard(0).unwrap().clone();
    let start = Instant::now();
    let sender = tokio::spawn(async move {
        for _ in 0..COMMANDS {
            handle
                .send(UpdatePresence::new(Status::Idle).into())
                .await
                .unwrap();
        }
    });

    // 120 frames per minute: IDENTIFY plus 119 presence updates fit the burst,
    // the rest go out one every 500 ms
    for _ in 0..110 {
        socket.recv_op(OpCode::PresenceUpdate).await.unwrap();
    }

    let sent_at = Instant::now();
    socket.send(&message_create(2, "while paced")).await.unwrap();
    next_event(&mut events, |e| {
        matches!(e, ShardEvent::Dispatch { sequence: Some(2), .. })
    })
    .await
    .unwrap();
    assert!(
        sent_at.elapsed() < Duration::from_secs(2),
        "dispatch delayed {:?} behind paced sends",
        sent_at.elapsed()
    );

    for _ in 110..COMMANDS {
        socket.recv_op(OpCode::PresenceUpdate).await.unwrap();
    }
    assert!(
        start.elapsed() >= Duration::from_secs(4),
        "{COMMANDS} commands sent in {:?}",
        start.elapsed()
    );

    sender.await.unwrap();
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_commands_wait_for_ready() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let client = start_client(&rest).await.unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    client
        .broadcast(UpdatePresence::new(Status::Dnd).into())
        .await
        .unwrap();

    socket.hello(45_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();

    let presence = socket.recv_op(OpCode::PresenceUpdate).await.unwrap();
    assert_eq!(presence.d["status"], "dnd");

    client.shutdown().await.unwrap();
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_heartbeat_ack_reports_latency() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(200).await.unwrap();

    let heartbeat = socket.recv_op(OpCode::Heartbeat).await.unwrap();
    assert!(heartbeat.d.is_null());
    socket
        .send(&chat_gateway::GatewayFrame::heartbeat_ack())
        .await
        .unwrap();

    let event = next_event(&mut events, |e| matches!(e, ShardEvent::HeartbeatAck { .. }))
        .await
        .unwrap();
    assert_eq!(event.shard_id(), 0);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_ack_reconnects_once() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(200).await.unwrap();
    socket.recv_op(OpCode::Heartbeat).await.unwrap();

    // Never acknowledge: the next tick must close instead of beating again
    let (code, frames) = socket.recv_close().await.unwrap();
    assert_eq!(code, Some(4200));
    assert!(frames.iter().all(|f| f.op != OpCode::Heartbeat));

    next_event(&mut events, |e| matches!(e, ShardEvent::Reconnecting { .. }))
        .await
        .unwrap();
    let mut second = gateway.next_connection().await.unwrap();
    second.hello(45_000).await.unwrap();
    second.recv_op(OpCode::Identify).await.unwrap();

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_ack_after_ready_resumes_with_sequence() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(1_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();
    socket.send(&message_create(2, "before zombie")).await.unwrap();
    next_event(&mut events, |e| {
        matches!(e, ShardEvent::Dispatch { sequence: Some(2), .. })
    })
    .await
    .unwrap();

    // Heartbeats from here on go unacknowledged
    let (code, _) = socket.recv_close().await.unwrap();
    assert_eq!(code, Some(4200));

    let event = next_event(&mut events, |e| matches!(e, ShardEvent::Reconnecting { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        ShardEvent::Reconnecting {
            shard_id: 0,
            resume: true
        }
    );

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    let resume = socket.recv_op(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["session_id"], "session-1");
    assert_eq!(resume.d["seq"], 2);

    client.shutdown().await.unwrap();
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_after_disconnect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();
    socket.send(&message_create(2, "before")).await.unwrap();
    next_event(&mut events, |e| {
        matches!(e, ShardEvent::Dispatch { sequence: Some(2), .. })
    })
    .await
    .unwrap();

    socket.close(4000).await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, ShardEvent::Reconnecting { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        ShardEvent::Reconnecting {
            shard_id: 0,
            resume: true
        }
    );

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    let resume = socket.recv_op(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["session_id"], "session-1");
    assert_eq!(resume.d["seq"], 2);
    assert_eq!(resume.d["token"], TEST_TOKEN);

    socket.send(&message_create(3, "missed")).await.unwrap();
    socket.send(&resumed(4)).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, ShardEvent::Resumed { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        ShardEvent::Resumed {
            shard_id: 0,
            replayed: 1
        }
    );

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stored_session_resumed_by_new_client() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();

    let store = Arc::new(MemorySessionStore::new());
    store
        .set(
            &ShardSession::new(0, 1)
                .with_session("stored-session", Some(gateway.url.clone()))
                .with_sequence(7),
        )
        .await
        .unwrap();

    let mut client = client_builder(&rest)
        .unwrap()
        .session_store(store.clone())
        .start()
        .await
        .unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    let resume = socket.recv_op(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["session_id"], "stored-session");
    assert_eq!(resume.d["seq"], 7);

    socket.send(&resumed(8)).await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, ShardEvent::Resumed { .. }))
        .await
        .unwrap();
    assert_eq!(
        event,
        ShardEvent::Resumed {
            shard_id: 0,
            replayed: 0
        }
    );

    // A deliberate shutdown ends the session, so nothing is left to resume
    client.shutdown().await.unwrap();
    assert!(store.get(0).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_session_identifies_again() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let client = start_client(&rest).await.unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket
        .send(&ready(1, "session-1", &gateway.url, [0, 1]))
        .await
        .unwrap();
    socket
        .send(&chat_gateway::GatewayFrame::invalid_session(false))
        .await
        .unwrap();

    let (code, _) = socket.recv_close().await.unwrap();
    assert_eq!(code, Some(1000));

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    let identify = socket.recv_op(OpCode::Identify).await.unwrap();
    assert_eq!(identify.d["shard"], json!([0, 1]));

    client.shutdown().await.unwrap();
}

// ============================================================================
// Fatal close codes
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_stops_client() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 1, 10).await.unwrap();
    let mut client = start_client(&rest).await.unwrap();
    let mut events = client.take_events().unwrap();

    let mut socket = gateway.next_connection().await.unwrap();
    socket.hello(45_000).await.unwrap();
    socket.recv_op(OpCode::Identify).await.unwrap();
    socket.close(4004).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, ShardEvent::Fatal { .. }))
        .await
        .unwrap();
    match event {
        ShardEvent::Fatal { code, category, .. } => {
            assert_eq!(code, Some(4004));
            assert_eq!(category, ErrorCategory::Authentication);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let err = client.join().await.unwrap_err();
    assert!(matches!(err, ClientError::Gateway(_)));
    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(client.gateway().is_shutdown());
}

#[tokio::test]
async fn test_session_start_limit_fails_fast() {
    let gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(&gateway.url, 4, 2).await.unwrap();

    let err = start_client(&rest).await.unwrap_err();
    let err = err.downcast::<ClientError>().unwrap();
    assert_eq!(err.category(), ErrorCategory::Capacity);
}
