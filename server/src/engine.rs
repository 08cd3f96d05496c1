//! Engine command loop: the single authority over the matchmaking queue
//! and the session registry.
//!
//! Every inbound frame, timer expiry and collaborator completion becomes
//! one [`EngineCommand`] on one channel, processed strictly sequentially.
//! Command handlers are synchronous; anything that would suspend (content
//! fetch, settlement write, countdowns, time limits) runs in a spawned
//! task that posts a completion command back into the channel, and the
//! completion handler re-validates preconditions against current state
//! before mutating, because the world may have moved during the wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use shared::protocol::ServerMessage;
use shared::{
    DepartureReason, Difficulty, GameMode, Identity, QUIZ_QUESTION_COUNT, QUIZ_TIME_LIMIT_SECS,
    RACE_TIME_LIMIT_SECS, RACE_WORD_COUNT, READY_COUNTDOWN_SECS,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::content::{ContentFilter, ContentItem, ContentProvider};
use crate::error::EngineError;
use crate::matchmaking::{EnqueueOutcome, MatchmakingQueue};
use crate::persistence::{SettlementParticipant, SettlementRecord, SettlementSink};
use crate::scoring;
use crate::session::{Answer, Session, SessionId, SessionRegistry};
use crate::util::now_ms;

/// Per-connection sender for outbound messages. The gateway's writer task
/// drains the other end onto the socket.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Engine tunables, surfaced on the CLI.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub quiz_question_count: usize,
    pub race_word_count: usize,
    pub quiz_time_limit: Duration,
    pub race_time_limit: Duration,
    pub ready_countdown: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quiz_question_count: QUIZ_QUESTION_COUNT,
            race_word_count: RACE_WORD_COUNT,
            quiz_time_limit: Duration::from_secs(QUIZ_TIME_LIMIT_SECS),
            race_time_limit: Duration::from_secs(RACE_TIME_LIMIT_SECS),
            ready_countdown: Duration::from_secs(READY_COUNTDOWN_SECS),
        }
    }
}

/// A pending content fetch and the state it belongs to.
#[derive(Debug, Clone)]
pub enum ContentRequest {
    QuickMatch {
        mode: GameMode,
        difficulty: Difficulty,
        first: Identity,
        second: Identity,
    },
    RoomStart {
        session_id: SessionId,
        generation: u64,
    },
}

/// One atomic unit of work against the shared registries.
#[derive(Debug)]
pub enum EngineCommand {
    ClientConnected {
        identity: Identity,
        conn_id: u64,
        outbox: Outbox,
    },
    ClientDisconnected {
        user_id: String,
        conn_id: u64,
    },
    JoinChallenge {
        user_id: String,
        mode: GameMode,
        difficulty: Difficulty,
        content_filter: Option<String>,
    },
    LeaveChallenge {
        user_id: String,
    },
    SubmitAnswer {
        user_id: String,
        session_id: String,
        item_id: String,
        answer: Answer,
    },
    CreateRoom {
        user_id: String,
        name: String,
        level: String,
        capacity: usize,
        content_size: usize,
    },
    JoinRoom {
        user_id: String,
        join_code: String,
    },
    LeaveRoom {
        user_id: String,
    },
    ListRooms {
        user_id: String,
        level: Option<String>,
    },
    SetReady {
        user_id: String,
    },
    ContentReady {
        request: ContentRequest,
        result: Result<Vec<ContentItem>, EngineError>,
    },
    CountdownElapsed {
        session_id: SessionId,
        generation: u64,
    },
    TimeLimitElapsed {
        session_id: SessionId,
        generation: u64,
    },
}

/// Where a departure applies: `leaveChallenge` only touches quick matches,
/// `leaveRoom` only rooms, a dropped connection touches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepartureScope {
    QuickMatch,
    Room,
    Any,
}

struct ConnectedClient {
    identity: Identity,
    conn_id: u64,
    outbox: Outbox,
}

pub struct Engine {
    config: EngineConfig,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
    tx: mpsc::UnboundedSender<EngineCommand>,
    connections: HashMap<String, ConnectedClient>,
    queue: MatchmakingQueue,
    registry: SessionRegistry,
    // Identities with a pairing content fetch in flight; the value records
    // whether they asked to leave while the fetch ran.
    pending_pairs: HashMap<String, bool>,
    content: Arc<dyn ContentProvider>,
    settlement: Arc<dyn SettlementSink>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        content: Arc<dyn ContentProvider>,
        settlement: Arc<dyn SettlementSink>,
    ) -> (Self, mpsc::UnboundedSender<EngineCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            rx,
            tx: tx.clone(),
            connections: HashMap::new(),
            queue: MatchmakingQueue::new(),
            registry: SessionRegistry::new(),
            pending_pairs: HashMap::new(),
            content,
            settlement,
        };
        (engine, tx)
    }

    /// Drains the command channel until every sender is gone.
    pub async fn run(mut self) {
        info!("engine loop started");
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        info!("engine loop stopped");
    }

    pub(crate) fn handle(&mut self, command: EngineCommand) {
        debug!("engine command: {:?}", command);
        match command {
            EngineCommand::ClientConnected {
                identity,
                conn_id,
                outbox,
            } => self.handle_connected(identity, conn_id, outbox),
            EngineCommand::ClientDisconnected { user_id, conn_id } => {
                self.handle_disconnected(&user_id, conn_id)
            }
            EngineCommand::JoinChallenge {
                user_id,
                mode,
                difficulty,
                content_filter,
            } => self.handle_join_challenge(&user_id, mode, difficulty, content_filter),
            EngineCommand::LeaveChallenge { user_id } => self.handle_leave_challenge(&user_id),
            EngineCommand::SubmitAnswer {
                user_id,
                session_id,
                item_id,
                answer,
            } => self.handle_submit(&user_id, &session_id, &item_id, answer),
            EngineCommand::CreateRoom {
                user_id,
                name,
                level,
                capacity,
                content_size,
            } => self.handle_create_room(&user_id, name, level, capacity, content_size),
            EngineCommand::JoinRoom { user_id, join_code } => {
                self.handle_join_room(&user_id, &join_code)
            }
            EngineCommand::LeaveRoom { user_id } => {
                self.handle_departure(&user_id, DepartureReason::Left, DepartureScope::Room)
            }
            EngineCommand::ListRooms { user_id, level } => {
                let rooms = self.registry.waiting_rooms(level.as_deref());
                self.send_to(&user_id, ServerMessage::RoomList { rooms });
            }
            EngineCommand::SetReady { user_id } => self.handle_set_ready(&user_id),
            EngineCommand::ContentReady { request, result } => {
                self.handle_content_ready(request, result)
            }
            EngineCommand::CountdownElapsed {
                session_id,
                generation,
            } => self.handle_countdown_elapsed(session_id, generation),
            EngineCommand::TimeLimitElapsed {
                session_id,
                generation,
            } => self.handle_time_limit(session_id, generation),
        }
    }

    // ----- connection lifecycle -----

    fn handle_connected(&mut self, identity: Identity, conn_id: u64, outbox: Outbox) {
        let user_id = identity.user_id.clone();
        if self.connections.contains_key(&user_id) {
            // A fresh handshake supersedes the previous binding; the old
            // socket's writer ends up with a closed channel.
            info!("rebinding {} to connection {}", user_id, conn_id);
        } else {
            info!("{} ({}) connected", identity.display_name, user_id);
        }
        self.connections.insert(
            user_id,
            ConnectedClient {
                identity,
                conn_id,
                outbox,
            },
        );
    }

    fn handle_disconnected(&mut self, user_id: &str, conn_id: u64) {
        // The close of a superseded socket arrives after the rebinding;
        // only the current connection's close counts as a departure.
        match self.connections.get(user_id) {
            Some(client) if client.conn_id == conn_id => {}
            _ => {
                debug!("stale disconnect for {} (connection {})", user_id, conn_id);
                return;
            }
        }
        self.connections.remove(user_id);
        info!("{} disconnected", user_id);

        // Queue first, then every active session.
        if let Some(ticket) = self.queue.remove(user_id) {
            self.broadcast_queue_depth(ticket.mode, None);
        }
        self.handle_departure(user_id, DepartureReason::Disconnected, DepartureScope::Any);
    }

    // ----- matchmaking -----

    fn handle_join_challenge(
        &mut self,
        user_id: &str,
        mode: GameMode,
        difficulty: Difficulty,
        content_filter: Option<String>,
    ) {
        let Some(identity) = self.identity_of(user_id) else {
            return;
        };

        if self.registry.contains_participant(user_id) {
            self.reply_error(user_id, &EngineError::state("already in an active session"));
            return;
        }

        let filter = ContentFilter {
            difficulty,
            category: content_filter,
        };

        match self.queue.enqueue(identity.clone(), mode, filter.clone()) {
            EnqueueOutcome::Waiting { depth } => {
                self.send_to(user_id, ServerMessage::WaitingForOpponent { queue_depth: depth });
                self.broadcast_queue_depth(mode, Some(user_id));
            }
            EnqueueOutcome::Paired(opponent) => {
                self.broadcast_queue_depth(mode, None);
                self.pending_pairs
                    .insert(opponent.identity.user_id.clone(), false);
                self.pending_pairs.insert(identity.user_id.clone(), false);
                self.spawn_content_fetch(
                    ContentRequest::QuickMatch {
                        mode,
                        difficulty,
                        first: opponent.identity,
                        second: identity,
                    },
                    mode,
                    filter,
                    self.count_for(mode),
                );
            }
        }
    }

    fn handle_leave_challenge(&mut self, user_id: &str) {
        if let Some(ticket) = self.queue.remove(user_id) {
            self.broadcast_queue_depth(ticket.mode, None);
            return;
        }
        // Mid-fetch the leaver has neither a ticket nor a session yet; the
        // flag is honored when the pairing's content fetch completes.
        if let Some(left) = self.pending_pairs.get_mut(user_id) {
            *left = true;
            return;
        }
        self.handle_departure(user_id, DepartureReason::Left, DepartureScope::QuickMatch);
    }

    fn handle_content_ready(
        &mut self,
        request: ContentRequest,
        result: Result<Vec<ContentItem>, EngineError>,
    ) {
        match request {
            ContentRequest::QuickMatch {
                mode,
                difficulty,
                first,
                second,
            } => self.finish_pairing(mode, difficulty, first, second, result),
            ContentRequest::RoomStart {
                session_id,
                generation,
            } => self.finish_room_start(session_id, generation, result),
        }
    }

    fn finish_pairing(
        &mut self,
        mode: GameMode,
        difficulty: Difficulty,
        first: Identity,
        second: Identity,
        result: Result<Vec<ContentItem>, EngineError>,
    ) {
        let first_left = self.pending_pairs.remove(&first.user_id).unwrap_or(false);
        let second_left = self.pending_pairs.remove(&second.user_id).unwrap_or(false);

        let content = match result {
            Ok(content) => content,
            Err(err) => {
                // Content failure aborts the pairing. Neither side is
                // re-queued; both are told to retry explicitly.
                warn!("content fetch failed for {} pairing: {}", mode, err);
                self.reply_error(&first.user_id, &err);
                self.reply_error(&second.user_id, &err);
                return;
            }
        };

        // The fetch suspended us; either side may have left, dropped, or
        // ended up in another session meanwhile.
        let first_gone = first_left
            || !self.connections.contains_key(&first.user_id)
            || self.registry.contains_participant(&first.user_id);
        let second_gone = second_left
            || !self.connections.contains_key(&second.user_id)
            || self.registry.contains_participant(&second.user_id);
        if first_gone || second_gone {
            if !first_gone {
                self.reply_error(
                    &first.user_id,
                    &EngineError::state("opponent is no longer available"),
                );
            }
            if !second_gone {
                self.reply_error(
                    &second.user_id,
                    &EngineError::state("opponent is no longer available"),
                );
            }
            return;
        }
        // This pairing supersedes any ticket either side re-filed during
        // the fetch.
        for side in [&first, &second] {
            if let Some(ticket) = self.queue.remove(&side.user_id) {
                self.broadcast_queue_depth(ticket.mode, None);
            }
        }

        let time_limit = self.limit_for(mode);
        let session = Session::quick_match(
            mode,
            difficulty,
            first.clone(),
            second.clone(),
            content,
            time_limit,
        );
        let views: Vec<_> = session.content.iter().map(|i| i.view()).collect();
        let participants = vec![first.clone(), second.clone()];
        let session_id = session.id;
        let generation = session.generation;
        self.registry.insert(session);

        let start = |engine: &Engine, to: &Identity| {
            let message = match mode {
                GameMode::Quiz => ServerMessage::QuizStart {
                    session_id: session_id.to_string(),
                    participants: participants.clone(),
                    content: views.clone(),
                    time_limit_secs: time_limit.as_secs(),
                },
                GameMode::TypingRace => ServerMessage::RaceStart {
                    session_id: session_id.to_string(),
                    participants: participants.clone(),
                    content: views.clone(),
                    time_limit_secs: time_limit.as_secs(),
                },
            };
            engine.send_to(&to.user_id, message);
        };
        start(self, &first);
        start(self, &second);

        self.arm_time_limit(session_id, generation, time_limit);
    }

    // ----- submissions -----

    fn handle_submit(&mut self, user_id: &str, session_id: &str, item_id: &str, answer: Answer) {
        let Ok(id) = Uuid::parse_str(session_id) else {
            self.reply_error(user_id, &EngineError::NotFound("session"));
            return;
        };
        let Some(session) = self.registry.get_mut(&id) else {
            self.reply_error(user_id, &EngineError::NotFound("session"));
            return;
        };

        let outcome = match session.record_answer(user_id, item_id, &answer) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.reply_error(user_id, &err);
                return;
            }
        };

        let Some(session) = self.registry.get(&id) else {
            return;
        };

        if session.is_room() {
            self.send_to(
                user_id,
                ServerMessage::RoomAnswerResult {
                    item_id: item_id.to_string(),
                    correct: outcome.correct,
                    points: outcome.points,
                    score: outcome.score,
                },
            );
        } else if session.game_mode() == GameMode::TypingRace {
            self.broadcast_session(
                session,
                ServerMessage::PlayerProgressUpdate {
                    user_id: user_id.to_string(),
                    progress_count: outcome.progress_count,
                },
            );
        }

        if outcome.finished && !session.is_room() {
            self.broadcast_session(
                session,
                ServerMessage::PlayerFinished {
                    user_id: user_id.to_string(),
                    score: outcome.score,
                    xp: outcome.xp.unwrap_or(0),
                    elapsed_secs: outcome.elapsed_secs,
                },
            );
        }

        if session.all_finished() {
            self.complete_session(id);
        }
    }

    /// `InProgress → Finished`: standings, result broadcast, settlement,
    /// removal from the registry.
    fn complete_session(&mut self, id: SessionId) {
        let Some(session) = self.registry.get_mut(&id) else {
            return;
        };
        let standings = match session.finish() {
            Ok(standings) => standings,
            Err(err) => {
                error!("session {} could not finish: {}", id, err);
                return;
            }
        };
        let winner = session.winner().map(|p| p.identity.clone());

        let message = if session.is_room() {
            ServerMessage::RoomFinished {
                standings: standings.clone(),
            }
        } else {
            match session.game_mode() {
                GameMode::Quiz => ServerMessage::QuizResult {
                    standings: standings.clone(),
                    winner: winner.clone(),
                },
                GameMode::TypingRace => ServerMessage::RaceResult {
                    standings: standings.clone(),
                    winner: winner.clone(),
                },
            }
        };

        let Some(session) = self.registry.remove(&id) else {
            return;
        };
        self.broadcast_session(&session, message);
        self.settle(&session);
        info!("session {} completed", id);
    }

    // ----- departures -----

    fn handle_departure(&mut self, user_id: &str, reason: DepartureReason, scope: DepartureScope) {
        let Some(id) = self.registry.id_by_participant(user_id) else {
            if scope == DepartureScope::Room {
                self.reply_error(user_id, &EngineError::NotFound("room"));
            }
            return;
        };
        let Some(session) = self.registry.get_mut(&id) else {
            return;
        };

        let in_scope = match scope {
            DepartureScope::Any => true,
            DepartureScope::Room => session.is_room(),
            DepartureScope::QuickMatch => !session.is_room(),
        };
        if !in_scope {
            self.reply_error(
                user_id,
                &EngineError::state("no matching session to leave"),
            );
            return;
        }

        if session.remove_participant(user_id).is_none() {
            return;
        }
        info!("{} left session {} ({:?})", user_id, id, reason);

        if session.participants.is_empty() {
            // Last one out: the session is abandoned and deleted.
            let _ = session.abandon();
            if let Some(session) = self.registry.remove(&id) {
                self.settle(&session);
            }
            return;
        }

        if session.is_room() {
            // Rooms play on without the leaver; a waiting room just shows
            // the new roster.
            let Some(summary) = session.room_summary() else {
                return;
            };
            let infos = session.participant_infos();
            let all_finished = session.all_finished();
            let in_progress = session.status == shared::SessionStatus::InProgress;
            let Some(session) = self.registry.get(&id) else {
                return;
            };
            self.broadcast_session(
                session,
                ServerMessage::RoomUpdate {
                    room: summary,
                    participants: infos,
                },
            );
            // The leaver may have been the only one still answering.
            if all_finished && in_progress {
                self.complete_session(id);
            }
            return;
        }

        // Quick match: the survivor wins by walkover.
        let mode = session.game_mode();
        let difficulty = session.difficulty;
        let winner_xp = scoring::departure_xp(mode, reason, difficulty);
        if let Some(survivor) = session.participants.first_mut() {
            survivor.is_winner = true;
            survivor.xp = winner_xp;
        }
        let _ = session.abandon();

        if let Some(session) = self.registry.remove(&id) {
            self.broadcast_session(&session, ServerMessage::OpponentLeft { reason, winner_xp });
            self.settle(&session);
        }
    }

    // ----- hosted rooms -----

    fn handle_create_room(
        &mut self,
        user_id: &str,
        name: String,
        level: String,
        capacity: usize,
        content_size: usize,
    ) {
        let Some(identity) = self.identity_of(user_id) else {
            return;
        };
        if self.registry.contains_participant(user_id) {
            self.reply_error(user_id, &EngineError::state("already in an active session"));
            return;
        }
        // A waiting ticket and a participant slot never coexist.
        if let Some(ticket) = self.queue.remove(user_id) {
            self.broadcast_queue_depth(ticket.mode, None);
        }

        let join_code = self.registry.unique_join_code();
        let room = match Session::hosted_room(
            identity,
            join_code,
            name,
            level,
            capacity,
            content_size,
            self.config.quiz_time_limit,
        ) {
            Ok(room) => room,
            Err(err) => {
                self.reply_error(user_id, &err);
                return;
            }
        };

        let Some(summary) = room.room_summary() else {
            return;
        };
        self.registry.insert(room);
        self.send_to(user_id, ServerMessage::RoomCreated { room: summary });
    }

    fn handle_join_room(&mut self, user_id: &str, join_code: &str) {
        let Some(identity) = self.identity_of(user_id) else {
            return;
        };
        if self.registry.contains_participant(user_id) {
            self.reply_error(user_id, &EngineError::state("already in an active session"));
            return;
        }
        let Some(id) = self.registry.id_by_code(join_code) else {
            self.reply_error(user_id, &EngineError::NotFound("room"));
            return;
        };

        let Some(session) = self.registry.get_mut(&id) else {
            return;
        };
        if let Err(err) = session.add_participant(identity) {
            self.reply_error(user_id, &err);
            return;
        }
        if let Some(ticket) = self.queue.remove(user_id) {
            self.broadcast_queue_depth(ticket.mode, None);
        }

        let Some(session) = self.registry.get(&id) else {
            return;
        };
        let Some(summary) = session.room_summary() else {
            return;
        };
        self.broadcast_session(
            session,
            ServerMessage::RoomUpdate {
                room: summary,
                participants: session.participant_infos(),
            },
        );
    }

    fn handle_set_ready(&mut self, user_id: &str) {
        let Some(id) = self.registry.id_by_participant(user_id) else {
            self.reply_error(user_id, &EngineError::NotFound("room"));
            return;
        };
        let Some(session) = self.registry.get_mut(&id) else {
            return;
        };
        if !session.is_room() {
            self.reply_error(user_id, &EngineError::state("not in a room"));
            return;
        }

        let gate_passed = match session.mark_ready(user_id) {
            Ok(passed) => passed,
            Err(err) => {
                self.reply_error(user_id, &err);
                return;
            }
        };

        if gate_passed {
            let generation = match session.begin_countdown() {
                Ok(generation) => generation,
                Err(err) => {
                    self.reply_error(user_id, &err);
                    return;
                }
            };
            let countdown = self.config.ready_countdown;
            let Some(session) = self.registry.get(&id) else {
                return;
            };
            self.broadcast_session(
                session,
                ServerMessage::RoomStarting {
                    countdown_secs: countdown.as_secs(),
                },
            );
            self.arm_countdown(id, generation, countdown);
        } else {
            let Some(summary) = session.room_summary() else {
                return;
            };
            let infos = session.participant_infos();
            let Some(session) = self.registry.get(&id) else {
                return;
            };
            self.broadcast_session(
                session,
                ServerMessage::RoomUpdate {
                    room: summary,
                    participants: infos,
                },
            );
        }
    }

    fn handle_countdown_elapsed(&mut self, session_id: SessionId, generation: u64) {
        let Some(session) = self.registry.get(&session_id) else {
            return; // room dissolved while the countdown ran
        };
        if session.generation != generation
            || session.status != shared::SessionStatus::Starting
        {
            debug!("stale countdown for {} ignored", session_id);
            return;
        }

        let content_size = match &session.kind {
            crate::session::SessionKind::HostedRoom { content_size, .. } => *content_size,
            crate::session::SessionKind::QuickMatch { .. } => return,
        };
        self.spawn_content_fetch(
            ContentRequest::RoomStart {
                session_id,
                generation,
            },
            GameMode::Quiz,
            ContentFilter::default(),
            content_size,
        );
    }

    fn finish_room_start(
        &mut self,
        session_id: SessionId,
        generation: u64,
        result: Result<Vec<ContentItem>, EngineError>,
    ) {
        let Some(session) = self.registry.get_mut(&session_id) else {
            return;
        };
        if session.generation != generation
            || session.status != shared::SessionStatus::Starting
        {
            debug!("stale room start for {} ignored", session_id);
            return;
        }

        let content = match result {
            Ok(content) => content,
            Err(err) => {
                // Room start aborts: participants end up outside any
                // session rather than silently re-gathered.
                warn!("content fetch failed for room {}: {}", session_id, err);
                if let Some(session) = self.registry.remove(&session_id) {
                    for participant in &session.participants {
                        self.reply_error(&participant.identity.user_id, &err);
                    }
                }
                return;
            }
        };

        if let Err(err) = session.start(content) {
            error!("room {} failed to start: {}", session_id, err);
            return;
        }
        let views: Vec<_> = session.content.iter().map(|i| i.view()).collect();
        let time_limit = session.time_limit;
        let new_generation = session.generation;

        let Some(session) = self.registry.get(&session_id) else {
            return;
        };
        self.broadcast_session(
            session,
            ServerMessage::RoomStarted {
                session_id: session_id.to_string(),
                content: views,
                time_limit_secs: time_limit.as_secs(),
            },
        );
        self.arm_time_limit(session_id, new_generation, time_limit);
    }

    fn handle_time_limit(&mut self, session_id: SessionId, generation: u64) {
        let Some(session) = self.registry.get_mut(&session_id) else {
            return; // settled before the budget ran out
        };
        if session.generation != generation
            || session.status != shared::SessionStatus::InProgress
        {
            return;
        }
        info!("session {} hit its time budget", session_id);
        session.expire();
        self.complete_session(session_id);
    }

    // ----- suspension points -----

    fn spawn_content_fetch(
        &self,
        request: ContentRequest,
        mode: GameMode,
        filter: ContentFilter,
        count: usize,
    ) {
        let provider = Arc::clone(&self.content);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = provider.fetch(mode, &filter, count).await;
            let _ = tx.send(EngineCommand::ContentReady { request, result });
        });
    }

    fn arm_countdown(&self, session_id: SessionId, generation: u64, after: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(EngineCommand::CountdownElapsed {
                session_id,
                generation,
            });
        });
    }

    fn arm_time_limit(&self, session_id: SessionId, generation: u64, after: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(EngineCommand::TimeLimitElapsed {
                session_id,
                generation,
            });
        });
    }

    /// Fire-and-forget settlement write. The in-memory result is already
    /// with the clients; a failed write only leaves a log line.
    fn settle(&self, session: &Session) {
        let record = SettlementRecord {
            session_id: session.id.to_string(),
            game: session.game_mode().to_string(),
            status: session.status,
            participants: session
                .participants
                .iter()
                .map(|p| SettlementParticipant {
                    identity: p.identity.clone(),
                    score: p.score,
                    correct_count: p.correct_count,
                    xp: p.xp,
                    is_winner: p.is_winner,
                })
                .collect(),
            started_at_ms: session.started_at_ms,
            ended_at_ms: now_ms(),
        };
        let sink = Arc::clone(&self.settlement);
        tokio::spawn(async move {
            if let Err(err) = sink.record(record).await {
                error!("settlement write failed: {}", err);
            }
        });
    }

    // ----- messaging -----

    fn identity_of(&self, user_id: &str) -> Option<Identity> {
        self.connections.get(user_id).map(|c| c.identity.clone())
    }

    fn send_to(&self, user_id: &str, message: ServerMessage) {
        if let Some(client) = self.connections.get(user_id) {
            // A closed outbox means the connection is tearing down; the
            // disconnect command will clean up shortly.
            let _ = client.outbox.send(message);
        }
    }

    fn reply_error(&self, user_id: &str, err: &EngineError) {
        warn!("rejected request from {}: {}", user_id, err);
        self.send_to(
            user_id,
            ServerMessage::Error {
                message: err.to_string(),
            },
        );
    }

    fn broadcast_session(&self, session: &Session, message: ServerMessage) {
        for participant in &session.participants {
            self.send_to(&participant.identity.user_id, message.clone());
        }
    }

    /// Queue-scoped broadcast of the current depth, so waiting clients
    /// show an accurate count.
    fn broadcast_queue_depth(&self, mode: GameMode, exclude: Option<&str>) {
        let depth = self.queue.depth(mode);
        for identity in self.queue.waiting_in(mode) {
            if Some(identity.user_id.as_str()) == exclude {
                continue;
            }
            self.send_to(
                &identity.user_id,
                ServerMessage::WaitingForOpponent { queue_depth: depth },
            );
        }
    }

    fn count_for(&self, mode: GameMode) -> usize {
        match mode {
            GameMode::Quiz => self.config.quiz_question_count,
            GameMode::TypingRace => self.config.race_word_count,
        }
    }

    fn limit_for(&self, mode: GameMode) -> Duration {
        match mode {
            GameMode::Quiz => self.config.quiz_time_limit,
            GameMode::TypingRace => self.config.race_time_limit,
        }
    }
}
