use std::time::Duration;

use super::*;
use crate::test_support::{eventually, FakeConnector, WAIT};
use shared::domain::ConversationKey;

fn alice() -> ParticipantId {
    ParticipantId::new("alice").expect("participant")
}

fn frame_to_alice(content: &str) -> ChatFrame {
    let key = ConversationKey::parse("bob", "alice").expect("key");
    ChatFrame::outbound(&key, content)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<LiveEvent>) -> LiveEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("event in time")
        .expect("event stream open")
}

#[tokio::test]
async fn goes_online_and_delivers_frames_in_transport_order() {
    let (connector, remote) = FakeConnector::accepting();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);
    assert_eq!(channel.state(), ConnectionState::Connecting);

    assert!(matches!(next_event(&mut events).await, LiveEvent::Online));
    assert_eq!(channel.state(), ConnectionState::Online);

    remote.push_text(r#"{"senderId":"bob","receiverId":"alice","content":"one"}"#);
    remote.push_text(r#"{"sender":"bob","receiverId":"alice","content":"two"}"#);

    for expected in ["one", "two"] {
        match next_event(&mut events).await {
            LiveEvent::Inbound(message) => {
                assert_eq!(message.content(), expected);
                assert_eq!(message.provenance(), Provenance::Live);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn malformed_frames_are_counted_and_skipped() {
    let (connector, remote) = FakeConnector::accepting();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);
    assert!(matches!(next_event(&mut events).await, LiveEvent::Online));

    remote.push_text("not json");
    remote.push_text(r#"{"content":"missing sender"}"#);
    remote.push_text(r#"{"senderId":"bob","receiverId":"alice","content":"   "}"#);
    remote.push_text(r#"{"senderId":"bob","receiverId":"alice","content":"valid"}"#);

    match next_event(&mut events).await {
        LiveEvent::Inbound(message) => assert_eq!(message.content(), "valid"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(channel.discarded_frames(), 3);
    assert_eq!(channel.state(), ConnectionState::Online);
}

#[test]
fn undecodable_frames_are_reported_as_malformed() {
    for text in [
        "not json",
        r#"{"content":"missing sender"}"#,
        r#"{"senderId":"bob","receiverId":"alice","content":"   "}"#,
    ] {
        assert!(
            matches!(decode_frame(text), Err(SyncError::MalformedFrame(_))),
            "frame: {text}"
        );
    }
    let message = decode_frame(r#"{"sender":"bob","receiverId":"alice","content":"ok"}"#)
        .expect("valid frame");
    assert_eq!(message.provenance(), Provenance::Live);
}

#[tokio::test]
async fn send_is_a_no_op_until_online() {
    let (connector, mut remote, gate) = FakeConnector::gated();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);

    assert!(!channel.send(&frame_to_alice("too early")));

    gate.send(()).expect("release connect");
    assert!(matches!(next_event(&mut events).await, LiveEvent::Online));

    assert!(channel.send(&frame_to_alice("hi")));
    let sent = remote.next_outbound().await.expect("outbound frame");
    let decoded: ChatFrame = serde_json::from_str(&sent).expect("frame json");
    assert_eq!(decoded, frame_to_alice("hi"));
}

#[tokio::test]
async fn refused_connection_goes_straight_to_disconnected() {
    let connector = FakeConnector::refusing("connection refused");
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);

    match next_event(&mut events).await {
        LiveEvent::Disconnected(DisconnectCause::Error(SyncError::Connection(reason))) => {
            assert!(reason.contains("connection refused"), "reason: {reason}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(!channel.send(&frame_to_alice("hi")));
}

#[tokio::test]
async fn remote_close_and_transport_errors_disconnect() {
    let (connector, remote) = FakeConnector::accepting();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);
    assert!(matches!(next_event(&mut events).await, LiveEvent::Online));

    remote
        .inbound
        .send(TransportEvent::Closed)
        .expect("driver alive");
    assert!(matches!(
        next_event(&mut events).await,
        LiveEvent::Disconnected(DisconnectCause::Closed)
    ));
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    let (connector, remote) = FakeConnector::accepting();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let _channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);
    assert!(matches!(next_event(&mut events).await, LiveEvent::Online));
    remote
        .inbound
        .send(TransportEvent::Error("reset by peer".into()))
        .expect("driver alive");
    match next_event(&mut events).await {
        LiveEvent::Disconnected(DisconnectCause::Error(SyncError::Connection(reason))) => {
            assert_eq!(reason, "reset by peer");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn close_is_idempotent_and_releases_the_transport() {
    let (connector, mut remote) = FakeConnector::accepting();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(Arc::new(connector), alice(), events_tx);
    assert!(matches!(next_event(&mut events).await, LiveEvent::Online));

    channel.close();
    channel.close();
    assert!(channel.is_closed());
    assert!(!channel.send(&frame_to_alice("after close")));

    assert_eq!(remote.next_outbound().await, None);
    let late = r#"{"senderId":"bob","receiverId":"alice","content":"late"}"#;
    let _ = remote.inbound.send(TransportEvent::Text(late.into()));
    assert!(
        tokio::time::timeout(Duration::from_millis(50), events.recv())
            .await
            .map_or(true, |event| event.is_none()),
        "no events may be delivered after close"
    );
}

#[tokio::test]
async fn close_while_connecting_suppresses_all_events() {
    let (connector, _remote, gate) = FakeConnector::gated();
    let connector = Arc::new(connector);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let channel = LiveChannel::open(connector.clone(), alice(), events_tx);

    tokio::time::timeout(WAIT, connector.connect_started.notified())
        .await
        .expect("connect attempted");
    channel.close();
    let _ = gate.send(());

    assert!(eventually(|| connector.connect_count() == 1).await);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), events.recv())
            .await
            .map_or(true, |event| event.is_none()),
        "no state transitions after close"
    );
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(!channel.send(&frame_to_alice("hi")));
}
