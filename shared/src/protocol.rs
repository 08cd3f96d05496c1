//! Real-time message catalog exchanged over a WebSocket connection.
//!
//! Messages are JSON text frames, tagged by a `type` field whose value is
//! the camelCase message name (`joinChallenge`, `waitingForOpponent`, ...).
//! [`ClientMessage`] travels client to server, [`ServerMessage`] the other
//! way. Every state-changing client message produces exactly one of: a
//! direct reply, a session-scoped broadcast, or a queue-scoped broadcast.

use serde::{Deserialize, Serialize};

use crate::{
    ContentItemView, DepartureReason, Difficulty, GameMode, Identity, ParticipantInfo,
    RoomSummary, StandingEntry,
};

/// Messages a client sends to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake frame. Must be the first frame on a fresh connection.
    Connect { token: String },

    /// Enter the quick-match queue for a game mode.
    JoinChallenge {
        game_mode: GameMode,
        #[serde(default)]
        difficulty: Difficulty,
        #[serde(default)]
        content_filter: Option<String>,
    },
    /// Voluntarily exit the queue or the live quick-match session.
    LeaveChallenge,

    /// Answer one quiz question in a quick-match session.
    QuizAnswer {
        session_id: String,
        item_id: String,
        answer: String,
    },
    /// Submit one typed word in a typing race.
    SubmitTypedWord {
        session_id: String,
        item_id: String,
        typed_word: String,
    },

    /// Create a hosted room; the caller becomes host and first participant.
    CreateRoom {
        name: String,
        level: String,
        capacity: usize,
        content_size: usize,
    },
    /// Join a room by its short join code.
    JoinRoom { join_code: String },
    /// Leave whatever room the caller is currently in.
    LeaveRoom,
    /// List rooms that are open for joining, optionally filtered by level.
    ListRooms {
        #[serde(default)]
        level: Option<String>,
    },
    /// Signal ready inside a waiting room.
    SetReady,
    /// Answer one question in an in-progress room.
    RoomAnswer {
        session_id: String,
        item_id: String,
        option_index: usize,
        elapsed_ms: u64,
    },
}

/// Messages the engine sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake confirmation carrying the bound identity.
    Connected { identity: Identity },

    /// Queue acknowledgement, also re-broadcast to waiting tickets
    /// whenever the depth of their queue changes.
    WaitingForOpponent { queue_depth: usize },

    /// A paired quiz session is live.
    QuizStart {
        session_id: String,
        participants: Vec<Identity>,
        content: Vec<ContentItemView>,
        time_limit_secs: u64,
    },
    /// A paired typing race is live.
    RaceStart {
        session_id: String,
        participants: Vec<Identity>,
        content: Vec<ContentItemView>,
        time_limit_secs: u64,
    },

    /// Live progress notification (typing race only).
    PlayerProgressUpdate {
        user_id: String,
        progress_count: u32,
    },
    /// One participant has answered every item; their XP is already final.
    PlayerFinished {
        user_id: String,
        score: u32,
        xp: u32,
        elapsed_secs: u64,
    },
    /// Quiz settled: final standings and the winner.
    QuizResult {
        standings: Vec<StandingEntry>,
        winner: Option<Identity>,
    },
    /// Race settled: final standings and the winner.
    RaceResult {
        standings: Vec<StandingEntry>,
        winner: Option<Identity>,
    },
    /// The other side left or dropped; the recipient wins by default.
    OpponentLeft {
        reason: DepartureReason,
        winner_xp: u32,
    },

    /// Direct reply to a successful room creation.
    RoomCreated { room: RoomSummary },
    /// Room membership or readiness changed.
    RoomUpdate {
        room: RoomSummary,
        participants: Vec<ParticipantInfo>,
    },
    /// Direct reply to a room listing request.
    RoomList { rooms: Vec<RoomSummary> },
    /// Ready check passed; play begins after the countdown.
    RoomStarting { countdown_secs: u64 },
    /// Countdown elapsed and content is attached; the room is live.
    RoomStarted {
        session_id: String,
        content: Vec<ContentItemView>,
        time_limit_secs: u64,
    },
    /// Direct reply to one scored room answer.
    RoomAnswerResult {
        item_id: String,
        correct: bool,
        points: u32,
        score: u32,
    },
    /// Room settled: standings by accumulated score.
    RoomFinished { standings: Vec<StandingEntry> },

    /// Validation or authorization failure, sent only to the originator.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tag_names() {
        let msg = ClientMessage::JoinChallenge {
            game_mode: GameMode::Quiz,
            difficulty: Difficulty::Medium,
            content_filter: None,
        };
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"joinChallenge\""));
        assert!(json.contains("\"gameMode\":\"quiz\""));
        assert!(json.contains("\"difficulty\":\"medium\""));
    }

    #[test]
    fn test_join_challenge_defaults() {
        let json = r#"{"type":"joinChallenge","gameMode":"typing-race"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        match msg {
            ClientMessage::JoinChallenge {
                game_mode,
                difficulty,
                content_filter,
            } => {
                assert_eq!(game_mode, GameMode::TypingRace);
                assert_eq!(difficulty, Difficulty::Random);
                assert_eq!(content_filter, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_connect_roundtrip() {
        let msg = ClientMessage::Connect {
            token: "u1:Ada".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(back, msg);
    }

    #[test]
    fn test_quiz_answer_field_names() {
        let json = r#"{
            "type": "quizAnswer",
            "sessionId": "s-1",
            "itemId": "q-3",
            "answer": "der"
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        match msg {
            ClientMessage::QuizAnswer {
                session_id,
                item_id,
                answer,
            } => {
                assert_eq!(session_id, "s-1");
                assert_eq!(item_id, "q-3");
                assert_eq!(answer, "der");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_tag_names() {
        let msg = ServerMessage::WaitingForOpponent { queue_depth: 3 };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"waitingForOpponent\""));
        assert!(json.contains("\"queueDepth\":3"));

        let msg = ServerMessage::OpponentLeft {
            reason: DepartureReason::Disconnected,
            winner_xp: 50,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"opponentLeft\""));
        assert!(json.contains("\"reason\":\"disconnected\""));
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let json = r#"{"type":"formatHardDrive"}"#;
        let parsed: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_quiz_start_contains_no_answers() {
        let msg = ServerMessage::QuizStart {
            session_id: "s-1".to_string(),
            participants: vec![Identity::new("u1", "Ada"), Identity::new("u2", "Ben")],
            content: vec![ContentItemView {
                id: "q1".to_string(),
                prompt: "pick one".to_string(),
                options: vec!["a".to_string(), "b".to_string()],
                category: None,
            }],
            time_limit_secs: 300,
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"answer\""));
        assert!(json.contains("\"timeLimitSecs\":300"));
    }
}
