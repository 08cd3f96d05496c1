//! Shared data model and wire protocol for the competitive session engine.
//!
//! Everything in this crate crosses the WebSocket boundary, so types here
//! carry only what clients are allowed to see. Correct answers never appear
//! in any of these structures; the server-side content types hold them and
//! project down to [`ContentItemView`] before anything is sent out.

pub mod protocol;

use serde::{Deserialize, Serialize};

/// Number of questions fetched for a quick-match quiz session.
pub const QUIZ_QUESTION_COUNT: usize = 10;
/// Number of words fetched for a quick-match typing race.
pub const RACE_WORD_COUNT: usize = 10;
/// Wall-clock budget for a quiz session, in seconds.
pub const QUIZ_TIME_LIMIT_SECS: u64 = 300;
/// Wall-clock budget for a typing race, in seconds.
pub const RACE_TIME_LIMIT_SECS: u64 = 300;
/// Countdown between a room's ready-check passing and play starting.
pub const READY_COUNTDOWN_SECS: u64 = 3;
/// How long the gateway waits for the authentication frame before
/// dropping a fresh connection.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
/// A hosted room cannot start with fewer participants than this.
pub const MIN_ROOM_PLAYERS: usize = 2;

/// A verified user bound to one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// The two quick-match game types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameMode {
    Quiz,
    TypingRace,
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameMode::Quiz => write!(f, "quiz"),
            GameMode::TypingRace => write!(f, "typing-race"),
        }
    }
}

/// Difficulty requested at queue time. Feeds the finishing-XP bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Random,
    Medium,
    Hard,
}

impl Difficulty {
    /// Flat XP bonus awarded on top of the finishing formula.
    pub fn xp_bonus(self) -> u32 {
        match self {
            Difficulty::Random => 0,
            Difficulty::Medium => 20,
            Difficulty::Hard => 50,
        }
    }
}

/// Why a participant dropped out of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepartureReason {
    Left,
    Disconnected,
}

/// Session lifecycle. Transitions are monotonic; `Abandoned` is terminal
/// and reachable from any non-finished state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Waiting,
    Starting,
    InProgress,
    Finished,
    Abandoned,
}

/// Client-facing projection of one quiz question or race word.
///
/// The stored correct answer is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItemView {
    pub id: String,
    pub prompt: String,
    /// Multiple-choice options. Empty for typing-race words, where the
    /// prompt itself is the target to type.
    pub options: Vec<String>,
    pub category: Option<String>,
}

/// One row of a settled session's final standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub identity: Identity,
    pub score: u32,
    pub correct_count: u32,
    pub xp: u32,
    /// Milliseconds from session start to this participant finishing.
    pub finished_at_ms: Option<u64>,
    pub is_winner: bool,
}

/// A participant as shown in room lobbies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub identity: Identity,
    pub is_ready: bool,
}

/// Public view of a hosted room, as returned by room listing and join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub session_id: String,
    pub join_code: String,
    pub name: String,
    pub level: String,
    pub capacity: usize,
    pub participant_count: usize,
    pub status: SessionStatus,
}
