//! WebSocket transport using `tokio-tungstenite`.
//!
//! - [`WebSocketListener`] / [`WebSocketConnection`]: the relay's side.
//! - [`WebSocketChannel`]: a peer's side, speaking [`RelayFrame`]s.
//!
//! Both split the socket into sink and stream halves behind separate locks,
//! so a task can be parked in `recv` while another task sends.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use duelsync_protocol::{Codec, JsonCodec, PROTOCOL_VERSION, PlayerId, RelayFrame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    Channel, ChannelEvent, Connection, ConnectionId, Listener, Subscription, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type ServerStream = WebSocketStream<TcpStream>;
type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ClientSink = SplitSink<ClientStream, Message>;

fn broken_pipe(e: impl std::error::Error + Send + Sync + 'static) -> TransportError {
    TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
}

// ===========================================================================
// Relay side
// ===========================================================================

/// A WebSocket listener that accepts peers.
pub struct WebSocketListener {
    listener: TcpListener,
}

impl WebSocketListener {
    /// Binds to the given address. Use port 0 for an ephemeral port.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket listener bound");
        Ok(Self { listener })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for WebSocketListener {
    type Connection = WebSocketConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            addr,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// One accepted WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    addr: SocketAddr,
    sink: Mutex<SplitSink<ServerStream, Message>>,
    stream: Mutex<SplitStream<ServerStream>>,
}

impl WebSocketConnection {
    /// The remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(broken_pipe)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(broken_pipe)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

// ===========================================================================
// Peer side
// ===========================================================================

/// Where the reader task sends what it reads.
#[derive(Default)]
struct Routes {
    subscriptions: HashMap<String, mpsc::UnboundedSender<ChannelEvent>>,
    pending: HashMap<String, oneshot::Sender<Result<(), TransportError>>>,
}

impl Routes {
    fn forward(&self, channel: &str, event: ChannelEvent) {
        match self.subscriptions.get(channel) {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => tracing::trace!(channel, "frame for unknown channel"),
        }
    }

    fn close_all(&mut self, reason: &str) {
        for (_, tx) in self.subscriptions.drain() {
            let _ = tx.send(ChannelEvent::Closed(reason.to_string()));
        }
        // Dropping the pending senders fails any in-progress subscribe.
        self.pending.clear();
    }
}

/// A live connection to the relay.
struct ClientLink {
    sink: Arc<Mutex<ClientSink>>,
    routes: Arc<Mutex<Routes>>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl ClientLink {
    fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for ClientLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.heartbeat.abort();
    }
}

/// A peer's [`Channel`] to the relay over WebSocket.
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), duelsync_transport::TransportError> {
/// use duelsync_protocol::PlayerId;
/// use duelsync_transport::{Channel, WebSocketChannel};
///
/// let mut channel = WebSocketChannel::new("ws://127.0.0.1:9000", PlayerId(1));
/// channel.connect("duel/ABC234").await?;
/// let mut sub = channel.subscribe("duel/ABC234").await?;
/// channel.publish("duel/ABC234", b"hello").await?;
/// let _event = sub.recv().await;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketChannel {
    url: String,
    peer: PlayerId,
    heartbeat_interval: Duration,
    subscribe_timeout: Duration,
    codec: JsonCodec,
    link: Option<ClientLink>,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>, peer: PlayerId) -> Self {
        Self {
            url: url.into(),
            peer,
            heartbeat_interval: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(5),
            codec: JsonCodec,
            link: None,
        }
    }

    /// How often to send `Heartbeat` frames. Must be well under the
    /// relay's idle timeout.
    pub fn heartbeat_interval(mut self, every: Duration) -> Self {
        self.heartbeat_interval = every.max(Duration::from_millis(100));
        self
    }

    /// How long to wait for `Subscribed` before giving up.
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    fn live_link(&self) -> Result<&ClientLink, TransportError> {
        self.link
            .as_ref()
            .filter(|link| link.is_alive())
            .ok_or(TransportError::NotConnected)
    }

    async fn send_frame(&self, frame: &RelayFrame) -> Result<(), TransportError> {
        let link = self.live_link()?;
        let bytes = self.codec.encode(frame)?;
        link.sink
            .lock()
            .await
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(broken_pipe)
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.live_link().is_ok() {
            return Ok(());
        }

        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (sink, stream) = ws.split();

        let sink = Arc::new(Mutex::new(sink));
        let routes = Arc::new(Mutex::new(Routes::default()));
        let reader = tokio::spawn(read_frames(stream, Arc::clone(&routes), self.codec));
        let heartbeat = tokio::spawn(send_heartbeats(
            Arc::clone(&sink),
            self.heartbeat_interval,
            self.codec,
        ));

        self.link = Some(ClientLink {
            sink,
            routes,
            reader,
            heartbeat,
        });
        tracing::debug!(peer = %self.peer, url = %self.url, "connected to relay");
        Ok(())
    }

    async fn open_subscription(&mut self, channel: &str) -> Result<Subscription, TransportError> {
        let routes = Arc::clone(&self.live_link()?.routes);
        let (tx, sub) = Subscription::new(channel);
        let (confirm_tx, confirm_rx) = oneshot::channel();
        {
            let mut routes = routes.lock().await;
            routes.subscriptions.insert(channel.to_string(), tx);
            routes.pending.insert(channel.to_string(), confirm_tx);
        }

        let frame = RelayFrame::Subscribe {
            version: PROTOCOL_VERSION,
            channel: channel.to_string(),
            peer: self.peer,
        };
        let outcome = match self.send_frame(&frame).await {
            Ok(()) => match tokio::time::timeout(self.subscribe_timeout, confirm_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(TransportError::ConnectionClosed(
                    "link dropped while subscribing".into(),
                )),
                Err(_) => Err(TransportError::ConnectionClosed("subscribe timed out".into())),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let mut routes = routes.lock().await;
            routes.subscriptions.remove(channel);
            routes.pending.remove(channel);
            return Err(e);
        }
        Ok(sub)
    }

    async fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.sink.lock().await.close().await;
        link.routes.lock().await.close_all("disconnected");
        tracing::debug!(peer = %self.peer, "disconnected from relay");
    }
}

impl Channel for WebSocketChannel {
    fn connect(&mut self, _channel: &str) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.open()
    }

    fn subscribe(
        &mut self,
        channel: &str,
    ) -> impl Future<Output = Result<Subscription, TransportError>> + Send {
        self.open_subscription(channel)
    }

    fn publish(
        &mut self,
        channel: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let frame = RelayFrame::Publish {
            channel: channel.to_string(),
            data: data.to_vec(),
        };
        async move { self.send_frame(&frame).await }
    }

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            self.close().await;
            Ok(())
        }
    }
}

/// Reader task: decodes relay frames and routes them to subscriptions.
/// Closes every subscription when the socket ends.
async fn read_frames(
    mut stream: SplitStream<ClientStream>,
    routes: Arc<Mutex<Routes>>,
    codec: JsonCodec,
) {
    let reason = loop {
        let data = match stream.next().await {
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Close(_))) | None => break "closed by relay".to_string(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break e.to_string(),
        };

        let frame: RelayFrame = match codec.decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable relay frame");
                continue;
            }
        };

        let mut routes = routes.lock().await;
        match frame {
            RelayFrame::Deliver { channel, data } => {
                routes.forward(&channel, ChannelEvent::Message(data));
            }
            RelayFrame::PeerJoined { channel, peer } => {
                routes.forward(&channel, ChannelEvent::PeerJoined(peer));
            }
            RelayFrame::PeerLeft { channel, peer } => {
                routes.forward(&channel, ChannelEvent::PeerLeft(peer));
            }
            RelayFrame::Subscribed { channel, peers } => {
                for peer in peers {
                    routes.forward(&channel, ChannelEvent::PeerJoined(peer));
                }
                if let Some(confirm) = routes.pending.remove(&channel) {
                    let _ = confirm.send(Ok(()));
                }
            }
            RelayFrame::Error { code, message } => {
                if routes.pending.is_empty() {
                    tracing::warn!(code, %message, "relay reported an error");
                }
                for (_, confirm) in routes.pending.drain() {
                    let _ = confirm.send(Err(TransportError::Rejected {
                        code,
                        message: message.clone(),
                    }));
                }
            }
            RelayFrame::HeartbeatAck { client_time, server_time } => {
                tracing::trace!(client_time, server_time, "heartbeat ack");
            }
            other => {
                tracing::debug!(?other, "unexpected frame from relay");
            }
        }
    };

    tracing::debug!(%reason, "relay link ended");
    routes.lock().await.close_all(&reason);
}

/// Heartbeat task: keeps the relay's idle timer from firing.
async fn send_heartbeats(sink: Arc<Mutex<ClientSink>>, every: Duration, codec: JsonCodec) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await; // the first tick completes immediately

    loop {
        ticker.tick().await;
        let frame = RelayFrame::Heartbeat {
            client_time: start.elapsed().as_millis() as u64,
        };
        let Ok(bytes) = codec.encode(&frame) else {
            break;
        };
        if sink
            .lock()
            .await
            .send(Message::Binary(bytes.into()))
            .await
            .is_err()
        {
            break;
        }
    }
}
