//! Peer actor: an isolated Tokio task that owns one player's side of a
//! match.
//!
//! The task owns the [`SyncManager`], the [`Channel`], and the channel
//! subscription. Local submissions (through a [`PeerHandle`]), channel
//! events, and timers are all serialized through one `select!` loop, so
//! the game state has exactly one writer and never changes mid-apply.

use std::sync::Arc;
use std::time::Instant;

use duelsync_protocol::{Action, GameState, PlayerId};
use duelsync_room::RoomManager;
use duelsync_session::{ConnectionSession, LinkState};
use duelsync_sync::{
    LinkDirective, Receipt, RulesEngine, SyncConfig, SyncError, SyncEvent, SyncManager, Ticket,
};
use duelsync_transport::{Channel, ChannelEvent, Subscription, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::DuelsyncError;

/// The actor's clock. Goes through tokio so paused-time tests move it.
fn clock() -> Instant {
    tokio::time::Instant::now().into_std()
}

// ---------------------------------------------------------------------------
// PeerConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Peer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub sync: SyncConfig,
    /// Events buffered per subscriber before the slowest one starts
    /// missing them.
    pub event_capacity: usize,
    /// Handle requests queued before `submit` waits.
    pub command_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            event_capacity: 256,
            command_capacity: 64,
        }
    }
}

impl PeerConfig {
    /// Validates the sync settings and keeps both capacities at or above 1.
    pub fn validated(mut self) -> Self {
        self.sync = self.sync.validated();
        self.event_capacity = self.event_capacity.max(1);
        self.command_capacity = self.command_capacity.max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Entry point for starting a peer.
///
/// # Example
///
/// ```rust,ignore
/// use duelsync::prelude::*;
///
/// let hub = MemoryHub::new();
/// let mut room = RoomManager::new(PlayerId(1), RoomConfig::default());
/// room.join_room("ABC234")?;
///
/// let peer = Peer::builder()
///     .players(&[PlayerId(1), PlayerId(2)])
///     .spawn::<MyGame, _>(hub.channel(PlayerId(1)), room)?;
/// let receipt = peer.submit(Action::Pass).await?;
/// ```
pub struct Peer;

impl Peer {
    pub fn builder() -> PeerBuilder {
        PeerBuilder::new()
    }
}

/// Builder for configuring and spawning a [`Peer`].
#[derive(Debug, Clone, Default)]
pub struct PeerBuilder {
    players: Vec<PlayerId>,
    config: PeerConfig,
}

impl PeerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both players of the match. Required to build the initial board.
    pub fn players(mut self, players: &[PlayerId]) -> Self {
        self.players = players.to_vec();
        self
    }

    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sync_config(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    /// Spawns the peer task onto the current Tokio runtime and returns a
    /// handle to it. The task starts connecting right away.
    ///
    /// # Errors
    /// [`DuelsyncError::Room`] if `room` has not been created or joined.
    ///
    /// # Panics
    /// Outside a Tokio runtime.
    pub fn spawn<R, C>(self, channel: C, room: RoomManager) -> Result<PeerHandle<R>, DuelsyncError>
    where
        R: RulesEngine,
        C: Channel,
    {
        let config = self.config.validated();
        let mut players = self.players;
        if !players.contains(&room.local()) {
            players.push(room.local());
        }

        let manager = SyncManager::<R>::new(&players, room, config.sync, clock())?;
        let local = manager.local();
        let channel_id = manager.channel().to_string();

        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        let actor = PeerActor {
            manager,
            channel,
            subscription: None,
            commands: command_rx,
            events: event_tx.clone(),
        };
        tokio::spawn(actor.run());

        Ok(PeerHandle {
            local,
            channel: channel_id.into(),
            sender: command_tx,
            events: event_tx,
        })
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Requests a [`PeerHandle`] sends to the peer task.
enum PeerCommand<R: RulesEngine> {
    Submit {
        action: Action,
        reply: oneshot::Sender<Result<Receipt, SyncError>>,
    },
    State {
        reply: oneshot::Sender<Arc<GameState<R::Board>>>,
    },
    Session {
        reply: oneshot::Sender<ConnectionSession>,
    },
    Link {
        reply: oneshot::Sender<LinkState>,
    },
    CancelDrafts {
        reply: oneshot::Sender<Vec<Ticket>>,
    },
    /// Say goodbye, disconnect, and stop.
    Leave {
        reply: oneshot::Sender<Result<(), DuelsyncError>>,
    },
}

/// Handle to a running peer task.
///
/// Cheap to clone. The task stops after [`leave`](Self::leave) or once
/// every handle is dropped.
pub struct PeerHandle<R: RulesEngine> {
    local: PlayerId,
    channel: Arc<str>,
    sender: mpsc::Sender<PeerCommand<R>>,
    events: broadcast::Sender<SyncEvent<R::Board>>,
}

impl<R: RulesEngine> Clone for PeerHandle<R> {
    fn clone(&self) -> Self {
        Self {
            local: self.local,
            channel: Arc::clone(&self.channel),
            sender: self.sender.clone(),
            events: self.events.clone(),
        }
    }
}

impl<R: RulesEngine> std::fmt::Debug for PeerHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("local", &self.local)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<R: RulesEngine> PeerHandle<R> {
    pub fn local(&self) -> PlayerId {
        self.local
    }

    /// The room channel this peer syncs over.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Submits a local action.
    ///
    /// While connected it is applied and broadcast before this returns
    /// ([`Receipt::Applied`]). Otherwise it is queued and replayed after
    /// resync ([`Receipt::Queued`]); the outcome arrives later as a
    /// [`SyncEvent::Accepted`] or [`SyncEvent::Refused`] with the same
    /// ticket.
    ///
    /// `Applied` means applied locally, not delivered. The other peer's
    /// acknowledgement arrives as [`SyncEvent::Delivered`]; a command that
    /// exhausts the send policy is reported as [`SyncEvent::Refused`] with
    /// [`SyncError::DeliveryFailed`] and keeps being resent.
    pub async fn submit(&self, action: Action) -> Result<Receipt, DuelsyncError> {
        let receipt = self
            .request(|reply| PeerCommand::Submit { action, reply })
            .await??;
        Ok(receipt)
    }

    /// [`submit`](Self::submit) for callers holding a string-typed action
    /// (`"move"`, `"pass"`, ...) and a JSON payload.
    pub async fn submit_raw(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Receipt, DuelsyncError> {
        let action = Action::from_parts(kind, payload)?;
        self.submit(action).await
    }

    /// Subscribes to state changes, connection status, and command
    /// outcomes, in the order they happened. Events published before this
    /// call are not replayed.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent<R::Board>> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> Result<Arc<GameState<R::Board>>, DuelsyncError> {
        self.request(|reply| PeerCommand::State { reply }).await
    }

    pub async fn session(&self) -> Result<ConnectionSession, DuelsyncError> {
        self.request(|reply| PeerCommand::Session { reply }).await
    }

    pub async fn link_state(&self) -> Result<LinkState, DuelsyncError> {
        self.request(|reply| PeerCommand::Link { reply }).await
    }

    /// Drops every queued draft. Returns their tickets.
    pub async fn cancel_drafts(&self) -> Result<Vec<Ticket>, DuelsyncError> {
        self.request(|reply| PeerCommand::CancelDrafts { reply }).await
    }

    /// Announces departure, disconnects, and stops the peer task. If the
    /// room cannot be left the error is returned and the peer keeps
    /// running.
    pub async fn leave(&self) -> Result<(), DuelsyncError> {
        self.request(|reply| PeerCommand::Leave { reply }).await?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PeerCommand<R>,
    ) -> Result<T, DuelsyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| DuelsyncError::PeerStopped)?;
        reply_rx.await.map_err(|_| DuelsyncError::PeerStopped)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum Flow {
    Continue,
    Stop,
}

/// The internal peer state. Runs inside a Tokio task.
struct PeerActor<C: Channel, R: RulesEngine> {
    manager: SyncManager<R>,
    channel: C,
    subscription: Option<Subscription>,
    commands: mpsc::Receiver<PeerCommand<R>>,
    events: broadcast::Sender<SyncEvent<R::Board>>,
}

impl<C: Channel, R: RulesEngine> PeerActor<C, R> {
    async fn run(mut self) {
        let player = self.manager.local();
        tracing::info!(%player, channel = self.manager.channel(), "peer started");

        loop {
            self.drive().await;
            let deadline = self.manager.next_deadline();

            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => Flow::Stop,
                },
                event = next_event(&mut self.subscription) => {
                    self.handle_channel_event(event);
                    Flow::Continue
                }
                () = sleep_until(deadline) => Flow::Continue,
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        self.subscription = None;
        if let Err(e) = self.channel.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed");
        }
        tracing::info!(%player, "peer stopped");
    }

    /// Runs due timers, carries out a connect if one is asked for, and
    /// publishes what the manager queued.
    async fn drive(&mut self) {
        if let Some(LinkDirective::Connect { attempt }) = self.manager.poll(clock()) {
            self.connect(attempt).await;
        }
        self.flush().await;
    }

    async fn connect(&mut self, attempt: u32) {
        let channel = self.manager.channel().to_string();
        tracing::debug!(attempt, %channel, "connecting");

        let result = match self.channel.connect(&channel).await {
            Ok(()) => self.channel.subscribe(&channel).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.manager.connect_succeeded(clock());
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "connect attempt failed");
                self.manager.connect_failed(clock());
            }
        }
    }

    async fn flush(&mut self) {
        let channel = self.manager.channel().to_string();
        for frame in self.manager.take_outgoing() {
            match self.channel.publish(&channel, &frame.bytes).await {
                Ok(()) => self.manager.publish_succeeded(frame.command_seq),
                Err(TransportError::NotConnected | TransportError::ConnectionClosed(_)) => {
                    // Whatever is left gets republished on resync.
                    self.link_lost("publish found no link");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, kind = frame.label, "publish failed");
                    self.manager.publish_failed(frame.command_seq, clock());
                }
            }
        }
        self.forward_events();
    }

    async fn handle_command(&mut self, command: PeerCommand<R>) -> Flow {
        match command {
            PeerCommand::Submit { action, reply } => {
                let result = self.manager.submit(action, clock());
                let _ = reply.send(result);
            }
            PeerCommand::State { reply } => {
                let _ = reply.send(Arc::clone(self.manager.state()));
            }
            PeerCommand::Session { reply } => {
                let _ = reply.send(self.manager.session().clone());
            }
            PeerCommand::Link { reply } => {
                let _ = reply.send(self.manager.link_state());
            }
            PeerCommand::CancelDrafts { reply } => {
                let _ = reply.send(self.manager.cancel_drafts());
            }
            PeerCommand::Leave { reply } => {
                let result = self.manager.leave().map_err(DuelsyncError::from);
                let left = result.is_ok();
                if left {
                    self.flush().await;
                }
                let _ = reply.send(result);
                if left {
                    return Flow::Stop;
                }
            }
        }
        Flow::Continue
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        let now = clock();
        match event {
            ChannelEvent::Message(data) => self.manager.handle_bytes(&data, now),
            ChannelEvent::PeerJoined(peer) => self.manager.peer_joined(peer, now),
            ChannelEvent::PeerLeft(peer) => self.manager.peer_left(peer),
            ChannelEvent::Closed(reason) => self.link_lost(&reason),
        }
    }

    fn link_lost(&mut self, reason: &str) {
        if self.subscription.take().is_some() {
            tracing::warn!(player = %self.manager.local(), reason, "channel lost");
        }
        self.manager.on_channel_lost(clock());
    }

    fn forward_events(&mut self) {
        for event in self.manager.drain_events() {
            // No subscribers is fine; events are not buffered for later.
            let _ = self.events.send(event);
        }
    }
}

/// The next event on `subscription`, or never if there is none.
async fn next_event(subscription: &mut Option<Subscription>) -> ChannelEvent {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
