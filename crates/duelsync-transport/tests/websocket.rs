//! Integration tests for the WebSocket listener and the peer-side channel.

use std::sync::Arc;
use std::time::Duration;

use duelsync_protocol::{PROTOCOL_VERSION, PlayerId, RelayFrame};
use duelsync_transport::{
    Channel, ChannelEvent, Connection, Listener, TransportError, WebSocketChannel,
    WebSocketListener,
};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

fn encode(frame: &RelayFrame) -> Vec<u8> {
    serde_json::to_vec(frame).expect("encode")
}

fn decode(data: &[u8]) -> RelayFrame {
    serde_json::from_slice(data).expect("decode")
}

/// A one-connection stand-in for the relay: confirms subscriptions (or
/// rejects a wrong version) and echoes every publish back as a delivery.
async fn start_echo_relay() -> String {
    let mut listener = WebSocketListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    tokio::spawn(async move {
        let conn = Arc::new(listener.accept().await.expect("accept"));
        while let Ok(Some(data)) = conn.recv().await {
            let reply = match decode(&data) {
                RelayFrame::Subscribe { version, channel, .. } if version == PROTOCOL_VERSION => {
                    RelayFrame::Subscribed {
                        channel,
                        peers: vec![PlayerId(99)],
                    }
                }
                RelayFrame::Subscribe { .. } => RelayFrame::Error {
                    code: 400,
                    message: "version mismatch".into(),
                },
                RelayFrame::Publish { channel, data } => RelayFrame::Deliver { channel, data },
                RelayFrame::Heartbeat { client_time } => RelayFrame::HeartbeatAck {
                    client_time,
                    server_time: 0,
                },
                _ => continue,
            };
            if conn.send(&encode(&reply)).await.is_err() {
                break;
            }
        }
    });

    format!("ws://{addr}")
}

// =========================================================================
// Listener / Connection
// =========================================================================

#[tokio::test]
async fn test_listener_accept_send_and_recv_roundtrip() {
    let mut listener = WebSocketListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");

    let client = tokio::spawn(async move {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("connect");
        ws.send(Message::Binary(b"ping".to_vec().into()))
            .await
            .expect("send");
        let reply = ws.next().await.expect("frame").expect("ok");
        reply.into_data().to_vec()
    });

    let conn = listener.accept().await.expect("accept");
    let got = conn.recv().await.expect("recv").expect("some");
    assert_eq!(got, b"ping");
    conn.send(b"pong").await.expect("send");

    assert_eq!(client.await.expect("join"), b"pong");
}

#[tokio::test]
async fn test_connection_recv_after_client_close_returns_none() {
    let mut listener = WebSocketListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("connect");
        ws.close(None).await.expect("close");
    });

    let conn = listener.accept().await.expect("accept");
    assert!(conn.recv().await.expect("recv").is_none());
}

// =========================================================================
// WebSocketChannel
// =========================================================================

#[tokio::test]
async fn test_channel_subscribe_reports_present_peers() {
    let url = start_echo_relay().await;
    let mut channel = WebSocketChannel::new(url, PlayerId(1));

    channel.connect("duel/ABC234").await.expect("connect");
    let mut sub = channel.subscribe("duel/ABC234").await.expect("subscribe");

    assert_eq!(sub.recv().await, ChannelEvent::PeerJoined(PlayerId(99)));
}

#[tokio::test]
async fn test_channel_publish_is_delivered_through_relay() {
    let url = start_echo_relay().await;
    let mut channel = WebSocketChannel::new(url, PlayerId(1));
    channel.connect("duel/ABC234").await.expect("connect");
    let mut sub = channel.subscribe("duel/ABC234").await.expect("subscribe");
    let _ = sub.recv().await; // PeerJoined

    channel.publish("duel/ABC234", b"hello").await.expect("publish");

    let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("delivery");
    assert_eq!(event, ChannelEvent::Message(b"hello".to_vec()));
}

#[tokio::test]
async fn test_channel_publish_before_connect_returns_not_connected() {
    let mut channel = WebSocketChannel::new("ws://127.0.0.1:1", PlayerId(1));
    let result = channel.publish("duel/ABC234", b"x").await;
    assert!(matches!(result, Err(TransportError::NotConnected)));
}

#[tokio::test]
async fn test_channel_connect_to_nothing_returns_connect_failed() {
    // Bind and immediately drop to find a port nobody listens on.
    let addr = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let mut channel = WebSocketChannel::new(format!("ws://{addr}"), PlayerId(1));
    let result = channel.connect("duel/ABC234").await;
    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
}

#[tokio::test]
async fn test_channel_disconnect_closes_subscription() {
    let url = start_echo_relay().await;
    let mut channel = WebSocketChannel::new(url, PlayerId(1));
    channel.connect("duel/ABC234").await.expect("connect");
    let mut sub = channel.subscribe("duel/ABC234").await.expect("subscribe");
    let _ = sub.recv().await;

    channel.disconnect().await.expect("disconnect");

    assert!(matches!(sub.recv().await, ChannelEvent::Closed(_)));
    assert!(matches!(
        channel.publish("duel/ABC234", b"x").await,
        Err(TransportError::NotConnected)
    ));
}
