use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Number of cards dealt onto every board.
pub const CARD_SET_SIZE: usize = 24;

/// Cookie carrying the per-browser identity token.
pub const SESSION_COOKIE: &str = "SessionCookie";

/// Query parameter naming the room ("sala").
pub const ROOM_PARAM: &str = "sala";

/// Query parameter that turns a request into a leave request when set to `yes`.
pub const DELETE_PARAM: &str = "delete";

/// Path of the live relay connection.
pub const STATUS_PATH: &str = "/status";

// ---- Identity ----
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity token is empty")]
    Empty,
    #[error("identity token is not a uuid: {0}")]
    Malformed(String),
}

/// Opaque token naming one browser across requests and reconnections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Uuid);

impl Identity {
    pub fn generate() -> Self {
        Identity(Uuid::new_v4())
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }
        Uuid::parse_str(s)
            .map(Identity)
            .map_err(|e| IdentityError::Malformed(e.to_string()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---- Card set ----
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CardSetError {
    #[error("a card set holds exactly 24 cards, got {0}")]
    WrongSize(usize),
    #[error("card {0:?} appears more than once")]
    Duplicate(String),
}

/// The shared, shuffled board of a room: exactly [`CARD_SET_SIZE`] distinct card names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CardSet(Vec<String>);

impl CardSet {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn contains(&self, card: &str) -> bool {
        self.0.iter().any(|c| c == card)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for CardSet {
    type Error = CardSetError;

    fn try_from(cards: Vec<String>) -> Result<Self, Self::Error> {
        if cards.len() != CARD_SET_SIZE {
            return Err(CardSetError::WrongSize(cards.len()));
        }
        let mut seen = HashSet::with_capacity(cards.len());
        for card in &cards {
            if !seen.insert(card.as_str()) {
                return Err(CardSetError::Duplicate(card.clone()));
            }
        }
        Ok(CardSet(cards))
    }
}

impl From<CardSet> for Vec<String> {
    fn from(set: CardSet) -> Self {
        set.0
    }
}

// ---- Join ----
/// Personal view of a room handed to one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// The card this player has to guess the opponent is holding.
    pub your_card: String,
    pub images: CardSet,
}

// ---- Relay payloads ----
#[derive(Debug, Error)]
#[error("relay payload is not valid base64: {0}")]
pub struct PayloadError(#[from] base64::DecodeError);

/// Text form of a relay payload as it travels in a websocket text frame.
pub fn encode_payload(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

pub fn decode_payload(text: &str) -> Result<Vec<u8>, PayloadError> {
    Ok(STANDARD.decode(text.trim())?)
}
