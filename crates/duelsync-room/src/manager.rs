//! Room manager: this peer's room membership and who else is there.

use std::collections::BTreeSet;

use duelsync_protocol::PlayerId;

use crate::{RoomCode, RoomConfig, RoomError, RoomState};

/// Tracks which room this peer is in and who else is present.
///
/// One per peer. There is no shared registry: two peers that typed the
/// same code end up on the same channel, and that is all "being in the
/// same room" means.
#[derive(Debug)]
pub struct RoomManager {
    config: RoomConfig,
    local: PlayerId,
    code: Option<RoomCode>,
    state: RoomState,
    /// Other players currently on the channel. `BTreeSet` so `remote()`
    /// is stable.
    peers: BTreeSet<PlayerId>,
}

impl RoomManager {
    pub fn new(local: PlayerId, config: RoomConfig) -> Self {
        Self {
            config: config.validated(),
            local,
            code: None,
            state: RoomState::Idle,
            peers: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn local(&self) -> PlayerId {
        self.local
    }

    pub fn code(&self) -> Option<&RoomCode> {
        self.code.as_ref()
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// The opponent, once present.
    pub fn remote(&self) -> Option<PlayerId> {
        self.peers.iter().next().copied()
    }

    /// Everyone in the room, local player included, in id order.
    pub fn players(&self) -> Vec<PlayerId> {
        let mut all: BTreeSet<PlayerId> = self.peers.clone();
        all.insert(self.local);
        all.into_iter().collect()
    }

    // -- Lifecycle -------------------------------------------------------

    /// Creates a fresh room with a random code and enters it.
    ///
    /// # Errors
    /// [`RoomError::AlreadyInRoom`] if this peer has not left its current
    /// room.
    pub fn create_room(&mut self) -> Result<RoomCode, RoomError> {
        self.ensure_free()?;
        let code = RoomCode::generate(self.config.code_length);
        self.enter(code.clone());
        tracing::info!(player = %self.local, %code, "room created");
        Ok(code)
    }

    /// Enters the room named by `code` (any case, dashes allowed).
    ///
    /// # Errors
    /// - [`RoomError::InvalidCode`] if the code does not parse.
    /// - [`RoomError::AlreadyInRoom`] if this peer is in a room already.
    pub fn join_room(&mut self, code: &str) -> Result<RoomCode, RoomError> {
        let code = RoomCode::parse(code)?;
        self.ensure_free()?;
        self.enter(code.clone());
        tracing::info!(player = %self.local, %code, "room joined");
        Ok(code)
    }

    /// Leaves the current room.
    ///
    /// # Errors
    /// [`RoomError::NotInRoom`] if there is nothing to leave.
    pub fn leave_room(&mut self) -> Result<RoomCode, RoomError> {
        if !self.state.is_in_room() {
            return Err(RoomError::NotInRoom(self.local));
        }
        let code = self.code.take().ok_or(RoomError::NotInRoom(self.local))?;
        self.peers.clear();
        self.state = RoomState::Closed;
        tracing::info!(player = %self.local, %code, "room left");
        Ok(code)
    }

    /// The publish/subscribe channel for the current room, e.g.
    /// `duel/K7M2QX`.
    ///
    /// # Errors
    /// [`RoomError::NotInRoom`] outside a room.
    pub fn channel_id(&self) -> Result<String, RoomError> {
        match (&self.code, self.state.is_in_room()) {
            (Some(code), true) => Ok(format!("{}/{}", self.config.channel_prefix, code)),
            _ => Err(RoomError::NotInRoom(self.local)),
        }
    }

    // -- Presence --------------------------------------------------------

    /// Another player showed up on the channel. Returns `true` if they
    /// were not already known.
    ///
    /// Presence about the local player is ignored.
    ///
    /// # Errors
    /// - [`RoomError::NotInRoom`] outside a room.
    /// - [`RoomError::RoomFull`] if the room already holds `max_players`.
    pub fn peer_joined(&mut self, peer: PlayerId) -> Result<bool, RoomError> {
        let code = match (&self.code, self.state.is_in_room()) {
            (Some(code), true) => code.clone(),
            _ => return Err(RoomError::NotInRoom(self.local)),
        };
        if peer == self.local || self.peers.contains(&peer) {
            return Ok(false);
        }
        if self.peers.len() + 1 >= self.config.max_players {
            tracing::warn!(%peer, %code, "extra player on a full room channel");
            return Err(RoomError::RoomFull(code));
        }

        self.peers.insert(peer);
        if self.peers.len() + 1 == self.config.max_players {
            self.state = RoomState::Paired;
        }
        tracing::info!(player = %self.local, %peer, state = %self.state, "peer joined");
        Ok(true)
    }

    /// A player left the channel. Returns `true` if they were known.
    pub fn peer_left(&mut self, peer: PlayerId) -> bool {
        if !self.peers.remove(&peer) {
            return false;
        }
        if self.state == RoomState::Paired {
            self.state = RoomState::Waiting;
        }
        tracing::info!(player = %self.local, %peer, "peer left");
        true
    }

    fn ensure_free(&self) -> Result<(), RoomError> {
        match (&self.code, self.state.is_in_room()) {
            (Some(code), true) => Err(RoomError::AlreadyInRoom(self.local, code.clone())),
            _ => Ok(()),
        }
    }

    fn enter(&mut self, code: RoomCode) {
        self.code = Some(code);
        self.peers.clear();
        self.state = RoomState::Waiting;
    }
}
