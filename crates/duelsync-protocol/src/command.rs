//! Player actions and the immutable command that carries them.
//!
//! A [`GameCommand`] is the portable unit of synchronization: everything one
//! peer needs to reproduce another peer's action. It has no behavior of its
//! own; validation and application live in the sync layer's executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CommandId, PlayerId, ProtocolError};

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A board coordinate. The rules engine decides what the board looks like;
/// the protocol only needs a portable address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Square {
    pub col: u8,
    pub row: u8,
}

impl Square {
    pub fn new(col: u8, row: u8) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// The closed set of things a player can do.
///
/// `#[serde(tag = "type", content = "payload")]` produces adjacently tagged
/// JSON, so a move travels as
/// `{"type": "move", "payload": {"from": {...}, "to": {...}}}` and a pass as
/// `{"type": "pass"}`. Adding a new kind of action is a compile-time change:
/// every `match` on `Action` must handle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Action {
    /// Move whatever stands on `from` to `to`.
    Move { from: Square, to: Square },

    /// Give up the current turn without acting.
    Pass,

    /// Forfeit the match. Accepted at any turn.
    Concede,

    /// Development aid: adjust a player's resources by `delta`.
    /// Accepted at any turn.
    DebugAdjust { target: PlayerId, delta: i64 },
}

impl Action {
    /// The tag of this action, without its payload.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Move { .. } => ActionKind::Move,
            Self::Pass => ActionKind::Pass,
            Self::Concede => ActionKind::Concede,
            Self::DebugAdjust { .. } => ActionKind::DebugAdjust,
        }
    }

    /// Builds an action from a string type and a JSON payload, the shape
    /// produced by UI input handlers and the AI engine.
    ///
    /// A `null` payload is treated as "no payload", which is what the
    /// payload-less kinds (`pass`, `concede`) expect.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidCommand`] if `kind` is not a recognized type
    /// or the payload does not match it.
    #[cfg(feature = "json")]
    pub fn from_parts(kind: &str, payload: serde_json::Value) -> Result<Self, ProtocolError> {
        let parsed: ActionKind = kind.parse()?;

        let mut object = serde_json::Map::new();
        object.insert("type".into(), serde_json::Value::from(parsed.as_str()));
        if !payload.is_null() {
            object.insert("payload".into(), payload);
        }

        serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
            ProtocolError::InvalidCommand {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Payload-free tag of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Pass,
    Concede,
    DebugAdjust,
}

impl ActionKind {
    /// The wire name, as it appears in the `"type"` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Pass => "pass",
            Self::Concede => "concede",
            Self::DebugAdjust => "debug_adjust",
        }
    }

    /// Any-time actions are exempt from the "must target the current turn"
    /// rule. Conceding or debugging never waits for your turn.
    pub fn is_any_time(self) -> bool {
        matches!(self, Self::Concede | Self::DebugAdjust)
    }
}

impl FromStr for ActionKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move" => Ok(Self::Move),
            "pass" | "skip" => Ok(Self::Pass),
            "concede" => Ok(Self::Concede),
            "debug_adjust" => Ok(Self::DebugAdjust),
            other => Err(ProtocolError::InvalidCommand {
                kind: other.to_string(),
                reason: "unknown action type".into(),
            }),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GameCommand
// ---------------------------------------------------------------------------

/// One player action, tagged for synchronization.
///
/// Fields are private: once built, a command can only be read. Identical
/// inputs always build an identical command, which is what lets a replay
/// after reconnection be recognized as a duplicate by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCommand {
    id: CommandId,
    turn_index: u64,
    action: Action,
    /// Milliseconds since the Unix epoch on the issuer's clock. Advisory
    /// only; nothing orders by it.
    client_timestamp: u64,
}

impl GameCommand {
    /// Builds a command. `seq` must be the issuer's next sequence number;
    /// the sync layer's `CommandSender` is the one place that hands them out.
    pub fn new(
        issuer: PlayerId,
        seq: u64,
        turn_index: u64,
        action: Action,
        client_timestamp: u64,
    ) -> Self {
        Self {
            id: CommandId::new(issuer, seq),
            turn_index,
            action,
            client_timestamp,
        }
    }

    /// Builds a command from a string action type and a JSON payload.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidCommand`] if the type is not recognized.
    #[cfg(feature = "json")]
    pub fn from_parts(
        issuer: PlayerId,
        seq: u64,
        turn_index: u64,
        kind: &str,
        payload: serde_json::Value,
        client_timestamp: u64,
    ) -> Result<Self, ProtocolError> {
        let action = Action::from_parts(kind, payload)?;
        Ok(Self::new(issuer, seq, turn_index, action, client_timestamp))
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn issuer(&self) -> PlayerId {
        self.id.issuer
    }

    pub fn seq(&self) -> u64 {
        self.id.seq
    }

    /// The turn this command claims to act on.
    pub fn turn_index(&self) -> u64 {
        self.turn_index
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    pub fn client_timestamp(&self) -> u64 {
        self.client_timestamp
    }

    /// See [`ActionKind::is_any_time`].
    pub fn is_any_time(&self) -> bool {
        self.kind().is_any_time()
    }
}
