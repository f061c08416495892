use super::*;
use crate::test_support::{next_side, FakeConnector, ServerSide};
use crate::transport::TransportSession;
use shared::{
    domain::{MessageKind, MessageStatus},
    error::ErrorCode,
};

fn confirmed(id: &str) -> MessagePayload {
    MessagePayload {
        id: id.into(),
        sender_id: "alice".into(),
        text: "hello".to_string(),
        timestamp: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        status: MessageStatus::Sent,
        kind: MessageKind::Text,
        file_url: None,
        file_name: None,
        file_size: None,
    }
}

async fn connected_pair() -> (Arc<Correlator>, ServerSide) {
    let (connector, mut side_rx) = FakeConnector::new();
    let transport = TransportSession::new(connector);
    transport.connect("alice".into()).await.expect("connect");
    let mut side = next_side(&mut side_rx).await;
    side.next_event().await;
    (Arc::new(Correlator::new(transport)), side)
}

fn spawn_send(
    correlator: &Arc<Correlator>,
    token: &CorrelationToken,
) -> tokio::task::JoinHandle<Result<MessagePayload, SendError>> {
    let correlator = Arc::clone(correlator);
    let token = token.clone();
    tokio::spawn(async move {
        correlator
            .send_text("alice".into(), "bob@example.com".into(), "hello".to_string(), token)
            .await
    })
}

#[test]
fn generated_tokens_are_unique() {
    assert_ne!(generate_token(), generate_token());
}

#[tokio::test]
async fn confirmation_resolves_the_pending_send() {
    let (correlator, mut side) = connected_pair().await;
    let token = generate_token();
    let send = spawn_send(&correlator, &token);

    match side.next_event().await {
        ClientEvent::SendMessage {
            correlation_token,
            body,
            ..
        } => {
            assert_eq!(correlation_token, token);
            assert_eq!(body, "hello");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(correlator.resolve_sent(&token, confirmed("m1")).await);
    let message = send.await.expect("task").expect("send");
    assert_eq!(message.id, "m1".into());
    assert_eq!(correlator.pending_count().await, 0);
}

#[tokio::test]
async fn rejection_surfaces_the_server_reason() {
    let (correlator, mut side) = connected_pair().await;
    let token = generate_token();
    let send = spawn_send(&correlator, &token);
    side.next_event().await;

    let error = WireError::new(ErrorCode::Validation, "receiver not found");
    assert!(correlator.resolve_error(&token, error).await);

    match send.await.expect("task") {
        Err(SendError::Rejected(reason)) => assert!(reason.contains("receiver not found")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(correlator.pending_count().await, 0);
    // A late confirmation for the same token no longer matches anything.
    assert!(!correlator.resolve_sent(&token, confirmed("m1")).await);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_send_times_out() {
    let (correlator, mut side) = connected_pair().await;
    let token = generate_token();
    let send = spawn_send(&correlator, &token);
    // Observed by the server, never acknowledged.
    side.next_event().await;

    let outcome = send.await.expect("task");
    assert!(matches!(outcome, Err(SendError::Timeout)));
    assert_eq!(correlator.pending_count().await, 0);
}

#[tokio::test]
async fn send_without_transport_fails_fast() {
    let (connector, _side_rx) = FakeConnector::new();
    let transport = TransportSession::new(connector);
    let correlator = Correlator::new(transport);

    let outcome = correlator
        .send_text(
            "alice".into(),
            "bob@example.com".into(),
            "hello".to_string(),
            generate_token(),
        )
        .await;
    assert!(matches!(outcome, Err(SendError::NotConnected)));
    assert_eq!(correlator.pending_count().await, 0);
}
