//! Shareable room codes.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::RoomError;

/// Characters a room code may contain.
///
/// Uppercase letters and digits minus the ones people confuse when reading
/// a code aloud or off a screen: `0/O`, `1/I/L`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Shortest and longest codes accepted by [`RoomCode::parse`].
const MIN_LEN: usize = 4;
const MAX_LEN: usize = 12;

/// A validated room code, always stored uppercase.
///
/// `#[serde(try_from = "String")]` runs the same validation on decode, so
/// an invalid code can never be constructed from the wire either.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Generates a random code of `len` characters.
    ///
    /// `len` is clamped into the accepted range.
    pub fn generate(len: usize) -> Self {
        let len = len.clamp(MIN_LEN, MAX_LEN);
        let mut rng = rand::rng();
        let code = (0..len)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Validates and normalizes user input: surrounding whitespace and
    /// inner dashes/spaces are dropped, letters are uppercased.
    ///
    /// # Errors
    /// [`RoomError::InvalidCode`] if the result is too short, too long, or
    /// contains a character outside [`ALPHABET`].
    pub fn parse(input: &str) -> Result<Self, RoomError> {
        let normalized: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let invalid = |reason: String| RoomError::InvalidCode {
            code: input.to_string(),
            reason,
        };

        if !(MIN_LEN..=MAX_LEN).contains(&normalized.len()) {
            return Err(invalid(format!(
                "must be {MIN_LEN}-{MAX_LEN} characters, got {}",
                normalized.len()
            )));
        }
        if let Some(bad) = normalized.bytes().find(|b| !ALPHABET.contains(b)) {
            return Err(invalid(format!("character {:?} not allowed", bad as char)));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}
