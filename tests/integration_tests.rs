//! Integration tests for the session engine and its WebSocket gateway.
//!
//! These tests run a real server (engine loop plus gateway on a loopback
//! port) and drive it with real WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use shared::protocol::{ClientMessage, ServerMessage};
use shared::{Difficulty, GameMode, QUIZ_QUESTION_COUNT, RACE_WORD_COUNT};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use server::auth::LocalVerifier;
use server::content::SampleContentProvider;
use server::engine::{Engine, EngineConfig};
use server::network::Gateway;
use server::persistence::LogSink;

const RECV_BUDGET: Duration = Duration::from_secs(5);

/// Starts a full server on a loopback port and returns its ws:// URL.
async fn start_server() -> String {
    let config = EngineConfig {
        ready_countdown: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let (engine, engine_tx) = Engine::new(
        config,
        Arc::new(SampleContentProvider::new()),
        Arc::new(LogSink),
    );
    tokio::spawn(engine.run());

    let gateway = Gateway::bind("127.0.0.1:0", Arc::new(LocalVerifier), engine_tx)
        .await
        .expect("bind gateway");
    let addr = gateway.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = gateway.run().await;
    });

    format!("ws://{}", addr)
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Opens a socket without running the handshake.
    async fn open(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("connect");
        Self { ws }
    }

    /// Opens a socket and completes the token handshake.
    async fn connect(url: &str, token: &str) -> Self {
        let mut client = Self::open(url).await;
        client
            .send(&ClientMessage::Connect {
                token: token.to_string(),
            })
            .await;
        match client.recv().await {
            ServerMessage::Connected { .. } => client,
            other => panic!("handshake failed: {:?}", other),
        }
    }

    async fn send(&mut self, message: &ClientMessage) {
        let json = serde_json::to_string(message).expect("serialize");
        self.ws.send(Message::text(json)).await.expect("send frame");
    }

    /// Receives the next server message, skipping non-text frames.
    async fn recv(&mut self) -> ServerMessage {
        loop {
            let frame = timeout(RECV_BUDGET, self.ws.next())
                .await
                .expect("receive timed out")
                .expect("socket closed")
                .expect("read error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("parse server message");
            }
        }
    }

    /// Receives until a message satisfies the predicate, discarding others.
    async fn recv_until<F>(&mut self, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let message = self.recv().await;
            if pred(&message) {
                return message;
            }
        }
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn valid_token_binds_identity() {
        let url = start_server().await;
        let mut client = TestClient::open(&url).await;

        client
            .send(&ClientMessage::Connect {
                token: "u1:Ada".to_string(),
            })
            .await;

        match client.recv().await {
            ServerMessage::Connected { identity } => {
                assert_eq!(identity.user_id, "u1");
                assert_eq!(identity.display_name, "Ada");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_token_is_refused_and_closed() {
        let url = start_server().await;
        let mut client = TestClient::open(&url).await;

        client
            .send(&ClientMessage::Connect {
                token: "no-separator".to_string(),
            })
            .await;

        match client.recv().await {
            ServerMessage::Error { message } => {
                assert!(message.contains("authentication"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        // The server closes the socket after the refusal.
        let next = timeout(RECV_BUDGET, client.ws.next()).await.expect("close");
        match next {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {}
            Some(Ok(other)) => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_connect_first_frame_is_refused() {
        let url = start_server().await;
        let mut client = TestClient::open(&url).await;

        client.send(&ClientMessage::LeaveChallenge).await;

        match client.recv().await {
            ServerMessage::Error { message } => {
                assert!(message.contains("connect"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}

/// QUICK MATCH TESTS
mod quick_match_tests {
    use super::*;

    #[tokio::test]
    async fn first_joiner_waits_second_pairs() {
        let url = start_server().await;
        let mut ada = TestClient::connect(&url, "u1:Ada").await;
        let mut ben = TestClient::connect(&url, "u2:Ben").await;

        ada.send(&ClientMessage::JoinChallenge {
            game_mode: GameMode::Quiz,
            difficulty: Difficulty::Random,
            content_filter: None,
        })
        .await;
        match ada.recv().await {
            ServerMessage::WaitingForOpponent { queue_depth } => assert_eq!(queue_depth, 1),
            other => panic!("unexpected reply: {:?}", other),
        }

        ben.send(&ClientMessage::JoinChallenge {
            game_mode: GameMode::Quiz,
            difficulty: Difficulty::Random,
            content_filter: None,
        })
        .await;

        // Both sides get the same session with the full content set and
        // no answers leaked.
        let ada_start = ada
            .recv_until(|m| matches!(m, ServerMessage::QuizStart { .. }))
            .await;
        let ben_start = ben
            .recv_until(|m| matches!(m, ServerMessage::QuizStart { .. }))
            .await;
        match (&ada_start, &ben_start) {
            (
                ServerMessage::QuizStart {
                    session_id: a,
                    content,
                    participants,
                    ..
                },
                ServerMessage::QuizStart { session_id: b, .. },
            ) => {
                assert_eq!(a, b);
                assert_eq!(content.len(), QUIZ_QUESTION_COUNT);
                assert_eq!(participants.len(), 2);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn race_plays_to_completion_over_sockets() {
        let url = start_server().await;
        let mut ada = TestClient::connect(&url, "u1:Ada").await;
        let mut ben = TestClient::connect(&url, "u2:Ben").await;

        for client in [&mut ada, &mut ben] {
            client
                .send(&ClientMessage::JoinChallenge {
                    game_mode: GameMode::TypingRace,
                    difficulty: Difficulty::Random,
                    content_filter: None,
                })
                .await;
        }

        let start = ada
            .recv_until(|m| matches!(m, ServerMessage::RaceStart { .. }))
            .await;
        let (session_id, items) = match start {
            ServerMessage::RaceStart {
                session_id,
                content,
                ..
            } => (session_id, content),
            other => panic!("unexpected message: {:?}", other),
        };
        assert_eq!(items.len(), RACE_WORD_COUNT);
        ben.recv_until(|m| matches!(m, ServerMessage::RaceStart { .. }))
            .await;

        // Race word prompts are the words themselves, so typing the
        // prompt is always correct.
        for client in [&mut ada, &mut ben] {
            for item in &items {
                client
                    .send(&ClientMessage::SubmitTypedWord {
                        session_id: session_id.clone(),
                        item_id: item.id.clone(),
                        typed_word: item.prompt.clone(),
                    })
                    .await;
            }
        }

        let result = ada
            .recv_until(|m| matches!(m, ServerMessage::RaceResult { .. }))
            .await;
        match result {
            ServerMessage::RaceResult { standings, winner } => {
                assert_eq!(standings.len(), 2);
                assert!(winner.is_some());
                for entry in &standings {
                    assert_eq!(entry.correct_count, RACE_WORD_COUNT as u32);
                    // 10*15 + 75 accuracy + speed bonus.
                    assert!(entry.xp >= 225);
                }
            }
            other => panic!("unexpected message: {:?}", other),
        }
        ben.recv_until(|m| matches!(m, ServerMessage::RaceResult { .. }))
            .await;
    }

    #[tokio::test]
    async fn dropped_connection_pays_the_survivor() {
        let url = start_server().await;
        let mut ada = TestClient::connect(&url, "u1:Ada").await;
        let mut ben = TestClient::connect(&url, "u2:Ben").await;

        for client in [&mut ada, &mut ben] {
            client
                .send(&ClientMessage::JoinChallenge {
                    game_mode: GameMode::Quiz,
                    difficulty: Difficulty::Random,
                    content_filter: None,
                })
                .await;
        }
        ada.recv_until(|m| matches!(m, ServerMessage::QuizStart { .. }))
            .await;
        ben.recv_until(|m| matches!(m, ServerMessage::QuizStart { .. }))
            .await;

        // Ben's socket dies mid-session.
        drop(ben);

        let left = ada
            .recv_until(|m| matches!(m, ServerMessage::OpponentLeft { .. }))
            .await;
        match left {
            ServerMessage::OpponentLeft { winner_xp, .. } => {
                assert_eq!(winner_xp, 50);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

/// HOSTED ROOM TESTS
mod room_tests {
    use super::*;

    #[tokio::test]
    async fn room_lifecycle_over_sockets() {
        let url = start_server().await;
        let mut host = TestClient::connect(&url, "u1:Ada").await;
        let mut guest = TestClient::connect(&url, "u2:Ben").await;

        host.send(&ClientMessage::CreateRoom {
            name: "evening quiz".to_string(),
            level: "beginner".to_string(),
            capacity: 4,
            content_size: 3,
        })
        .await;
        let join_code = match host.recv().await {
            ServerMessage::RoomCreated { room } => {
                assert_eq!(room.participant_count, 1);
                room.join_code
            }
            other => panic!("unexpected message: {:?}", other),
        };

        guest
            .send(&ClientMessage::JoinRoom {
                join_code: join_code.clone(),
            })
            .await;
        match guest.recv().await {
            ServerMessage::RoomUpdate { participants, .. } => {
                assert_eq!(participants.len(), 2);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        host.send(&ClientMessage::SetReady).await;
        guest.send(&ClientMessage::SetReady).await;

        host.recv_until(|m| matches!(m, ServerMessage::RoomStarting { .. }))
            .await;
        let started = host
            .recv_until(|m| matches!(m, ServerMessage::RoomStarted { .. }))
            .await;
        let (session_id, items) = match started {
            ServerMessage::RoomStarted {
                session_id,
                content,
                ..
            } => (session_id, content),
            other => panic!("unexpected message: {:?}", other),
        };
        assert_eq!(items.len(), 3);
        guest
            .recv_until(|m| matches!(m, ServerMessage::RoomStarted { .. }))
            .await;

        // Answer the first question; the reply is direct and carries the
        // accumulated score.
        host.send(&ClientMessage::RoomAnswer {
            session_id: session_id.clone(),
            item_id: items[0].id.clone(),
            option_index: 0,
            elapsed_ms: 300,
        })
        .await;
        match host
            .recv_until(|m| matches!(m, ServerMessage::RoomAnswerResult { .. }))
            .await
        {
            ServerMessage::RoomAnswerResult { correct, score, .. } => {
                if correct {
                    // 100 base + (1000 - 300) speed component.
                    assert_eq!(score, 800);
                } else {
                    assert_eq!(score, 0);
                }
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_join_code_is_an_error() {
        let url = start_server().await;
        let mut client = TestClient::connect(&url, "u1:Ada").await;

        client
            .send(&ClientMessage::JoinRoom {
                join_code: "ZZZZZZ".to_string(),
            })
            .await;

        match client.recv().await {
            ServerMessage::Error { message } => assert_eq!(message, "room not found"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn room_listing_shows_waiting_rooms() {
        let url = start_server().await;
        let mut host = TestClient::connect(&url, "u1:Ada").await;
        let mut browser = TestClient::connect(&url, "u2:Ben").await;

        host.send(&ClientMessage::CreateRoom {
            name: "open room".to_string(),
            level: "advanced".to_string(),
            capacity: 3,
            content_size: 5,
        })
        .await;
        host.recv_until(|m| matches!(m, ServerMessage::RoomCreated { .. }))
            .await;

        browser
            .send(&ClientMessage::ListRooms {
                level: Some("advanced".to_string()),
            })
            .await;
        match browser.recv().await {
            ServerMessage::RoomList { rooms } => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].name, "open room");
                assert_eq!(rooms[0].level, "advanced");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
