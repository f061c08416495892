use super::*;
use crate::test_support::{next_side, FakeConnector};

#[tokio::test]
async fn connect_announces_identity_before_anything_else() {
    let (connector, mut side_rx) = FakeConnector::new();
    let session = TransportSession::new(connector);
    session.connect("alice".into()).await.expect("connect");

    let mut side = next_side(&mut side_rx).await;
    assert_eq!(
        side.next_event().await,
        ClientEvent::Join {
            user_id: "alice".into()
        }
    );
    assert!(session.is_connected());
}

#[tokio::test]
async fn inbound_events_fan_out_to_subscribers() {
    let (connector, mut side_rx) = FakeConnector::new();
    let session = TransportSession::new(connector);
    session.connect("alice".into()).await.expect("connect");
    let mut side = next_side(&mut side_rx).await;
    side.next_event().await;

    let mut events = session.subscribe();
    side.push
        .send(ServerEvent::MessagesRead {
            chat_partner_id: "bob".into(),
        })
        .await
        .expect("push");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed");
    assert_eq!(
        event,
        ServerEvent::MessagesRead {
            chat_partner_id: "bob".into()
        }
    );
}

#[tokio::test]
async fn send_without_a_connection_fails() {
    let (connector, _side_rx) = FakeConnector::new();
    let session = TransportSession::new(connector);
    let result = session
        .send(ClientEvent::MessageDeliveredAck {
            message_id: "m1".into(),
        })
        .await;
    assert!(matches!(result, Err(TransportError::NotConnected)));
}

#[tokio::test]
async fn failed_dial_leaves_the_session_disconnected() {
    let (connector, _side_rx) = FakeConnector::new();
    connector.refuse_next_dials(1).await;
    let session = TransportSession::new(connector);

    let result = session.connect("alice".into()).await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_rejoins_before_resuming() {
    let (connector, mut side_rx) = FakeConnector::new();
    let session = TransportSession::new(connector);
    session.connect("alice".into()).await.expect("connect");
    let mut side = next_side(&mut side_rx).await;
    side.next_event().await;

    let mut state = session.watch_state();
    drop(side);
    state
        .wait_for(|s| *s == ConnectionState::Reconnecting)
        .await
        .expect("state watch");

    let mut side = next_side(&mut side_rx).await;
    assert_eq!(
        side.next_event().await,
        ClientEvent::Join {
            user_id: "alice".into()
        }
    );
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .expect("state watch");
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_bounded_attempts() {
    let (connector, mut side_rx) = FakeConnector::new();
    let session = TransportSession::new(Arc::clone(&connector) as Arc<dyn Connector>);
    session.connect("alice".into()).await.expect("connect");
    let mut side = next_side(&mut side_rx).await;
    side.next_event().await;

    connector.refuse_next_dials(RECONNECT_ATTEMPTS).await;
    let mut state = session.watch_state();
    drop(side);

    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .expect("state watch");
    assert!(matches!(
        session
            .send(ClientEvent::MarkMessagesAsRead {
                chat_partner_id: "bob".into()
            })
            .await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn teardown_is_not_blocked_by_a_full_outbound_buffer() {
    let (connector, mut side_rx) = FakeConnector::new();
    let session = TransportSession::new(connector);
    session.connect("alice".into()).await.expect("connect");
    let mut side = next_side(&mut side_rx).await;
    side.next_event().await;

    // The server side never drains; enough sends to park on a full buffer.
    for _ in 0..70 {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let _ = session
                .send(ClientEvent::MarkMessagesAsRead {
                    chat_partner_id: "bob".into(),
                })
                .await;
        });
    }
    tokio::task::yield_now().await;

    tokio::time::timeout(Duration::from_secs(2), session.disconnect())
        .await
        .expect("teardown must not wait on the outbound buffer");
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent_and_final() {
    let (connector, mut side_rx) = FakeConnector::new();
    let session = TransportSession::new(connector);
    session.connect("alice".into()).await.expect("connect");
    let mut side = next_side(&mut side_rx).await;
    side.next_event().await;

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Closed);

    // A dead link after teardown must not trigger a redial.
    drop(side);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(side_rx.try_recv().is_err());
    assert!(matches!(
        session
            .send(ClientEvent::MessageDeliveredAck {
                message_id: "m1".into()
            })
            .await,
        Err(TransportError::NotConnected)
    ));
}
