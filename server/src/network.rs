//! WebSocket gateway: accepts connections, runs the token handshake and
//! shuttles frames between sockets and the engine loop.
//!
//! Each connection gets two tasks: a reader that turns inbound text frames
//! into [`EngineCommand`]s attributed to the bound identity, and a writer
//! that drains the connection's outbox onto the socket. The gateway never
//! touches queue or session state; everything flows through the engine
//! channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::protocol::{ClientMessage, ServerMessage};
use shared::{Identity, HANDSHAKE_TIMEOUT_SECS};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::auth::IdentityVerifier;
use crate::engine::{EngineCommand, Outbox};
use crate::session::Answer;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// Stamps every connection so the engine can tell a superseded socket's
// close from the live binding's.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Gateway {
    listener: TcpListener,
    verifier: Arc<dyn IdentityVerifier>,
    engine_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl Gateway {
    pub async fn bind(
        addr: &str,
        verifier: Arc<dyn IdentityVerifier>,
        engine_tx: mpsc::UnboundedSender<EngineCommand>,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("gateway listening on {}", addr);
        Ok(Self {
            listener,
            verifier,
            engine_tx,
        })
    }

    /// Address actually bound, useful when the port was 0.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the listener errors out.
    pub async fn run(self) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("tcp connection from {}", peer);
            let verifier = Arc::clone(&self.verifier);
            let engine_tx = self.engine_tx.clone();
            tokio::spawn(async move {
                handle_connection(stream, verifier, engine_tx).await;
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    verifier: Arc<dyn IdentityVerifier>,
    engine_tx: mpsc::UnboundedSender<EngineCommand>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket upgrade failed: {}", e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    // Handshake: the first frame must be a `connect` carrying a valid
    // token, within the timeout. Anything else closes the socket.
    let identity = match handshake(&mut sink, &mut source, verifier.as_ref()).await {
        Some(identity) => identity,
        None => {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    let user_id = identity.user_id.clone();
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);

    if sink
        .send(server_frame(&ServerMessage::Connected {
            identity: identity.clone(),
        }))
        .await
        .is_err()
    {
        return;
    }

    let (outbox, mut outbox_rx): (Outbox, mpsc::UnboundedReceiver<ServerMessage>) =
        mpsc::unbounded_channel();
    if engine_tx
        .send(EngineCommand::ClientConnected {
            identity,
            conn_id,
            outbox,
        })
        .is_err()
    {
        return;
    }

    // Writer task: drains the outbox onto the socket until the engine
    // drops the sender or the socket dies.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            if sink.send(server_frame(&message)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Reader loop: every valid frame becomes one engine command.
    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("read error for {}: {}", user_id, e);
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => {
                    if let Some(command) = command_for(&user_id, message) {
                        if engine_tx.send(command).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    debug!("unparseable frame from {}: {}", user_id, e);
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the protocol layer on the next flush.
            _ => {}
        }
    }

    let _ = engine_tx.send(EngineCommand::ClientDisconnected {
        user_id: user_id.clone(),
        conn_id,
    });
    writer.abort();
    info!("connection for {} closed", user_id);
}

/// Runs the token handshake on a fresh socket. Returns the verified
/// identity, or None after sending the refusal frame.
async fn handshake(
    sink: &mut WsSink,
    source: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
    verifier: &dyn IdentityVerifier,
) -> Option<Identity> {
    let budget = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
    let first = match timeout(budget, source.next()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(_) => return None,
        Err(_) => {
            debug!("handshake timed out");
            return None;
        }
    };

    let token = match &first {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Connect { token }) => token,
            _ => {
                refuse(sink, "first frame must be a connect message").await;
                return None;
            }
        },
        _ => {
            refuse(sink, "first frame must be a connect message").await;
            return None;
        }
    };

    match verifier.verify(&token).await {
        Ok(identity) => Some(identity),
        Err(err) => {
            warn!("handshake refused: {}", err);
            refuse(sink, &err.to_string()).await;
            None
        }
    }
}

async fn refuse(sink: &mut WsSink, message: &str) {
    let _ = sink
        .send(server_frame(&ServerMessage::Error {
            message: message.to_string(),
        }))
        .await;
}

fn server_frame(message: &ServerMessage) -> Message {
    // ServerMessage serialization cannot fail: no maps with non-string
    // keys, no custom Serialize impls.
    Message::text(serde_json::to_string(message).unwrap_or_default())
}

/// Maps one inbound message to its engine command. A repeated `connect`
/// on a bound connection is dropped; the handshake already happened.
fn command_for(user_id: &str, message: ClientMessage) -> Option<EngineCommand> {
    let user_id = user_id.to_string();
    match message {
        ClientMessage::Connect { .. } => None,
        ClientMessage::JoinChallenge {
            game_mode,
            difficulty,
            content_filter,
        } => Some(EngineCommand::JoinChallenge {
            user_id,
            mode: game_mode,
            difficulty,
            content_filter,
        }),
        ClientMessage::LeaveChallenge => Some(EngineCommand::LeaveChallenge { user_id }),
        ClientMessage::QuizAnswer {
            session_id,
            item_id,
            answer,
        } => Some(EngineCommand::SubmitAnswer {
            user_id,
            session_id,
            item_id,
            answer: Answer::Text(answer),
        }),
        ClientMessage::SubmitTypedWord {
            session_id,
            item_id,
            typed_word,
        } => Some(EngineCommand::SubmitAnswer {
            user_id,
            session_id,
            item_id,
            answer: Answer::Text(typed_word),
        }),
        ClientMessage::CreateRoom {
            name,
            level,
            capacity,
            content_size,
        } => Some(EngineCommand::CreateRoom {
            user_id,
            name,
            level,
            capacity,
            content_size,
        }),
        ClientMessage::JoinRoom { join_code } => {
            Some(EngineCommand::JoinRoom { user_id, join_code })
        }
        ClientMessage::LeaveRoom => Some(EngineCommand::LeaveRoom { user_id }),
        ClientMessage::ListRooms { level } => Some(EngineCommand::ListRooms { user_id, level }),
        ClientMessage::SetReady => Some(EngineCommand::SetReady { user_id }),
        ClientMessage::RoomAnswer {
            session_id,
            item_id,
            option_index,
            elapsed_ms,
        } => Some(EngineCommand::SubmitAnswer {
            user_id,
            session_id,
            item_id,
            answer: Answer::OptionIndex {
                index: option_index,
                elapsed_ms,
            },
        }),
    }
}
