//! Session state machine and registry.
//!
//! One [`Session`] type covers both quick matches and hosted rooms,
//! parameterized by [`SessionKind`]; the two variants share participant
//! handling, submission validation and lifecycle so the pairwise and room
//! paths cannot drift apart. A session exclusively owns its participants'
//! in-game state; the engine loop is the only caller, one event at a time.
//!
//! Status transitions are monotonic: `Waiting → Starting → InProgress →
//! Finished`, with `Abandoned` terminal from any non-finished state.
//! Quick-match sessions are born `InProgress` because pairing plus the
//! content fetch plays the role of the waiting and starting phases.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::info;
use rand::Rng;
use shared::{
    Difficulty, GameMode, Identity, ParticipantInfo, RoomSummary, SessionStatus, StandingEntry,
    MIN_ROOM_PLAYERS,
};
use uuid::Uuid;

use crate::content::ContentItem;
use crate::error::EngineError;
use crate::scoring;
use crate::util::now_ms;

pub type SessionId = Uuid;

/// What flavor of session this is and the parameters that came with it.
#[derive(Debug, Clone)]
pub enum SessionKind {
    QuickMatch {
        mode: GameMode,
    },
    HostedRoom {
        join_code: String,
        name: String,
        level: String,
        capacity: usize,
        content_size: usize,
    },
}

/// One submitted answer, as the engine hands it to the session.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Quiz option text or a typed race word.
    Text(String),
    /// Hosted-room option index plus the client-reported think time.
    OptionIndex { index: usize, elapsed_ms: u64 },
}

/// What one validated submission did to the submitter's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub correct: bool,
    /// Score increment (room points, or 1 per correct quick-match item).
    pub points: u32,
    pub progress_count: u32,
    pub score: u32,
    /// The submitter has now answered every item.
    pub finished: bool,
    /// Final XP, computed the moment a quick-match participant finishes.
    pub xp: Option<u32>,
    pub elapsed_secs: u64,
}

/// In-session mutable state for one participant, owned by its session.
#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: Identity,
    pub score: u32,
    pub correct_count: u32,
    pub progress_count: u32,
    /// Submitted answers keyed by content-item id; append-only, which
    /// enforces one answer per item per participant.
    pub answers: HashMap<String, String>,
    pub finished: bool,
    /// Milliseconds from session start to finishing, for tie-breaks.
    pub finished_at_ms: Option<u64>,
    pub is_ready: bool,
    pub is_winner: bool,
    pub xp: u32,
}

impl Participant {
    fn new(identity: Identity) -> Self {
        Self {
            identity,
            score: 0,
            correct_count: 0,
            progress_count: 0,
            answers: HashMap::new(),
            finished: false,
            finished_at_ms: None,
            is_ready: false,
            is_winner: false,
            xp: 0,
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            identity: self.identity.clone(),
            is_ready: self.is_ready,
        }
    }

    pub fn standing(&self) -> StandingEntry {
        StandingEntry {
            identity: self.identity.clone(),
            score: self.score,
            correct_count: self.correct_count,
            xp: self.xp,
            finished_at_ms: self.finished_at_ms,
            is_winner: self.is_winner,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub difficulty: Difficulty,
    pub participants: Vec<Participant>,
    pub content: Vec<ContentItem>,
    pub time_limit: Duration,
    pub created_at_ms: u64,
    pub started: Option<Instant>,
    pub started_at_ms: Option<u64>,
    /// Bumped on each phase change; timer callbacks carry the generation
    /// they were armed with and are ignored if the session moved on.
    pub generation: u64,
}

impl Session {
    /// Creates a paired quick-match session, live immediately.
    pub fn quick_match(
        mode: GameMode,
        difficulty: Difficulty,
        first: Identity,
        second: Identity,
        content: Vec<ContentItem>,
        time_limit: Duration,
    ) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            kind: SessionKind::QuickMatch { mode },
            status: SessionStatus::InProgress,
            difficulty,
            participants: vec![Participant::new(first), Participant::new(second)],
            content,
            time_limit,
            created_at_ms: now_ms(),
            started: Some(Instant::now()),
            started_at_ms: Some(now_ms()),
            generation: 0,
        };
        info!(
            "quick match {} created ({}, {} items)",
            session.id,
            mode,
            session.content.len()
        );
        session
    }

    /// Creates a hosted room in `Waiting` with the host as the only
    /// participant. Content is attached later, when the countdown lands.
    pub fn hosted_room(
        host: Identity,
        join_code: String,
        name: String,
        level: String,
        capacity: usize,
        content_size: usize,
        time_limit: Duration,
    ) -> Result<Self, EngineError> {
        if capacity < MIN_ROOM_PLAYERS {
            return Err(EngineError::state(format!(
                "room capacity must be at least {}",
                MIN_ROOM_PLAYERS
            )));
        }
        if content_size == 0 {
            return Err(EngineError::state("room needs at least one question"));
        }

        let session = Self {
            id: Uuid::new_v4(),
            kind: SessionKind::HostedRoom {
                join_code,
                name,
                level,
                capacity,
                content_size,
            },
            status: SessionStatus::Waiting,
            difficulty: Difficulty::Random,
            participants: vec![Participant::new(host)],
            content: Vec::new(),
            time_limit,
            created_at_ms: now_ms(),
            started: None,
            started_at_ms: None,
            generation: 0,
        };
        info!("room {} created", session.id);
        Ok(session)
    }

    /// Game mode used for scoring. Hosted rooms play quiz content.
    pub fn game_mode(&self) -> GameMode {
        match &self.kind {
            SessionKind::QuickMatch { mode } => *mode,
            SessionKind::HostedRoom { .. } => GameMode::Quiz,
        }
    }

    pub fn is_room(&self) -> bool {
        matches!(self.kind, SessionKind::HostedRoom { .. })
    }

    pub fn join_code(&self) -> Option<&str> {
        match &self.kind {
            SessionKind::HostedRoom { join_code, .. } => Some(join_code),
            SessionKind::QuickMatch { .. } => None,
        }
    }

    pub fn capacity(&self) -> usize {
        match &self.kind {
            SessionKind::QuickMatch { .. } => 2,
            SessionKind::HostedRoom { capacity, .. } => *capacity,
        }
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.identity.user_id == user_id)
    }

    fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.identity.user_id == user_id)
    }

    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    fn allowed_transition(from: SessionStatus, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (from, to),
            (Waiting, Starting)
                | (Starting, InProgress)
                | (InProgress, Finished)
                | (Waiting, Abandoned)
                | (Starting, Abandoned)
                | (InProgress, Abandoned)
        )
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), EngineError> {
        if !Self::allowed_transition(self.status, to) {
            return Err(EngineError::state(format!(
                "cannot move session from {:?} to {:?}",
                self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    /// Adds a participant to a waiting room.
    pub fn add_participant(&mut self, identity: Identity) -> Result<(), EngineError> {
        if self.status != SessionStatus::Waiting {
            return Err(EngineError::state("room is no longer accepting players"));
        }
        if self.participants.len() >= self.capacity() {
            return Err(EngineError::Capacity);
        }
        if self.has_participant(&identity.user_id) {
            return Err(EngineError::state("already in this room"));
        }
        self.participants.push(Participant::new(identity));
        Ok(())
    }

    /// Removes a participant. Membership changes do not bump the
    /// generation: a countdown armed for the room keeps its validity and
    /// the remaining participants play on, while a room that empties is
    /// removed from the registry, which orphans its timers.
    pub fn remove_participant(&mut self, user_id: &str) -> Option<Participant> {
        let pos = self
            .participants
            .iter()
            .position(|p| p.identity.user_id == user_id)?;
        Some(self.participants.remove(pos))
    }

    /// Marks a participant ready. Returns true when the ready-check gate
    /// passes: every current participant ready and the minimum met.
    pub fn mark_ready(&mut self, user_id: &str) -> Result<bool, EngineError> {
        if self.status != SessionStatus::Waiting {
            return Err(EngineError::state("ready check is already over"));
        }
        let participant = self
            .participant_mut(user_id)
            .ok_or_else(|| EngineError::state("not a participant in this room"))?;
        participant.is_ready = true;

        Ok(self.participants.len() >= MIN_ROOM_PLAYERS
            && self.participants.iter().all(|p| p.is_ready))
    }

    /// `Waiting → Starting`. Returns the generation to stamp the countdown
    /// timer with.
    pub fn begin_countdown(&mut self) -> Result<u64, EngineError> {
        self.transition(SessionStatus::Starting)?;
        self.generation += 1;
        Ok(self.generation)
    }

    /// `Starting → InProgress` with content attached; `startedAt` recorded.
    pub fn start(&mut self, content: Vec<ContentItem>) -> Result<(), EngineError> {
        self.transition(SessionStatus::InProgress)?;
        self.content = content;
        self.started = Some(Instant::now());
        self.started_at_ms = Some(now_ms());
        self.generation += 1;
        Ok(())
    }

    /// Validates and applies one submission, per the invariant chain:
    /// session in progress, submitter present, item present, item not
    /// already answered by this submitter.
    pub fn record_answer(
        &mut self,
        user_id: &str,
        item_id: &str,
        answer: &Answer,
    ) -> Result<SubmissionOutcome, EngineError> {
        if self.status != SessionStatus::InProgress {
            return Err(EngineError::state("session is not in progress"));
        }
        if !self.has_participant(user_id) {
            return Err(EngineError::state("not a participant in this session"));
        }

        let item = self
            .content
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
            .ok_or(EngineError::NotFound("content item"))?;

        let total_items = self.content.len();
        let mode = self.game_mode();
        let is_room = self.is_room();
        let difficulty = self.difficulty;
        let elapsed = self.elapsed();

        let participant = self
            .participant_mut(user_id)
            .ok_or(EngineError::NotFound("session"))?;

        if participant.answers.contains_key(item_id) {
            return Err(EngineError::DuplicateSubmission);
        }

        let (correct, points, submitted_text) = match answer {
            Answer::Text(text) => {
                let correct = match mode {
                    GameMode::Quiz => scoring::quiz_answer_correct(text, &item.answer),
                    GameMode::TypingRace => scoring::race_word_correct(text, &item.answer),
                };
                (correct, u32::from(correct), text.clone())
            }
            Answer::OptionIndex { index, elapsed_ms } => {
                let correct = item.options.get(*index) == Some(&item.answer);
                let points = scoring::room_answer_points(correct, *elapsed_ms);
                let submitted = item
                    .options
                    .get(*index)
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", index));
                (correct, points, submitted)
            }
        };

        participant.answers.insert(item_id.to_string(), submitted_text);
        participant.progress_count += 1;
        if correct {
            participant.correct_count += 1;
        }
        participant.score += points;

        let finished = participant.answers.len() == total_items;
        let elapsed_secs = elapsed.as_secs();
        let mut xp = None;

        if finished {
            participant.finished = true;
            participant.finished_at_ms = Some(elapsed.as_millis() as u64);
            if !is_room {
                let earned = match mode {
                    GameMode::Quiz => scoring::quiz_final_xp(
                        participant.correct_count,
                        total_items as u32,
                        elapsed_secs,
                        difficulty,
                    ),
                    GameMode::TypingRace => scoring::race_final_xp(
                        participant.correct_count,
                        total_items as u32,
                        elapsed_secs,
                    ),
                };
                participant.xp = earned;
                xp = Some(earned);
            }
        }

        Ok(SubmissionOutcome {
            correct,
            points,
            progress_count: participant.progress_count,
            score: participant.score,
            finished,
            xp,
            elapsed_secs,
        })
    }

    /// Marks every unfinished participant finished at the time budget.
    /// Quick-match participants still earn the finishing formula on
    /// whatever they answered; room participants just stop scoring.
    pub fn expire(&mut self) {
        let total = self.content.len() as u32;
        let mode = self.game_mode();
        let is_room = self.is_room();
        let difficulty = self.difficulty;
        let elapsed = self.elapsed();
        let elapsed_secs = elapsed.as_secs();
        let elapsed_ms = elapsed.as_millis() as u64;

        for participant in self.participants.iter_mut().filter(|p| !p.finished) {
            participant.finished = true;
            participant.finished_at_ms = Some(elapsed_ms);
            if !is_room {
                participant.xp = match mode {
                    GameMode::Quiz => scoring::quiz_final_xp(
                        participant.correct_count,
                        total,
                        elapsed_secs,
                        difficulty,
                    ),
                    GameMode::TypingRace => {
                        scoring::race_final_xp(participant.correct_count, total, elapsed_secs)
                    }
                };
            }
        }
    }

    pub fn all_finished(&self) -> bool {
        !self.participants.is_empty() && self.participants.iter().all(|p| p.finished)
    }

    /// `InProgress → Finished`: orders standings, flags the winner.
    pub fn finish(&mut self) -> Result<Vec<StandingEntry>, EngineError> {
        self.transition(SessionStatus::Finished)?;
        self.rank_participants();
        Ok(self.standings())
    }

    /// Terminal close without a normal completion.
    pub fn abandon(&mut self) -> Result<(), EngineError> {
        self.transition(SessionStatus::Abandoned)
    }

    /// Sorts participants into final order and marks the winner.
    ///
    /// Quick matches order by score with the earlier finish timestamp as
    /// tie-break; rooms order by accumulated score with correct answers as
    /// tie-break.
    fn rank_participants(&mut self) {
        let is_room = self.is_room();
        self.participants.sort_by(|a, b| {
            b.score.cmp(&a.score).then_with(|| {
                if is_room {
                    b.correct_count.cmp(&a.correct_count)
                } else {
                    let a_ts = a.finished_at_ms.unwrap_or(u64::MAX);
                    let b_ts = b.finished_at_ms.unwrap_or(u64::MAX);
                    a_ts.cmp(&b_ts)
                }
            })
        });
        if let Some(first) = self.participants.first_mut() {
            first.is_winner = true;
        }
    }

    pub fn standings(&self) -> Vec<StandingEntry> {
        self.participants.iter().map(|p| p.standing()).collect()
    }

    pub fn winner(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_winner)
    }

    pub fn participant_infos(&self) -> Vec<ParticipantInfo> {
        self.participants.iter().map(|p| p.info()).collect()
    }

    pub fn room_summary(&self) -> Option<RoomSummary> {
        match &self.kind {
            SessionKind::HostedRoom {
                join_code,
                name,
                level,
                capacity,
                ..
            } => Some(RoomSummary {
                session_id: self.id.to_string(),
                join_code: join_code.clone(),
                name: name.clone(),
                level: level.clone(),
                capacity: *capacity,
                participant_count: self.participants.len(),
                status: self.status,
            }),
            SessionKind::QuickMatch { .. } => None,
        }
    }
}

/// Alphabet for join codes, with look-alike characters removed.
const JOIN_CODE_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LEN: usize = 6;

fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_CHARS[rng.gen_range(0..JOIN_CODE_CHARS.len())] as char)
        .collect()
}

/// Registry of live sessions, quick matches and rooms alike.
///
/// Owned exclusively by the engine loop; all access goes through these
/// operations. A session is inserted when pairing or room creation
/// succeeds and removed once settlement completes or it is abandoned.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) -> SessionId {
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn id_by_code(&self, join_code: &str) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.join_code() == Some(join_code))
            .map(|s| s.id)
    }

    /// The session an identity is currently playing in, if any. At most
    /// one exists; the engine checks this before pairing and room joins.
    pub fn id_by_participant(&self, user_id: &str) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.has_participant(user_id))
            .map(|s| s.id)
    }

    pub fn contains_participant(&self, user_id: &str) -> bool {
        self.id_by_participant(user_id).is_some()
    }

    /// Rooms open for joining, optionally filtered by level.
    pub fn waiting_rooms(&self, level: Option<&str>) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .sessions
            .values()
            .filter(|s| s.is_room() && s.status == SessionStatus::Waiting)
            .filter_map(|s| s.room_summary())
            .filter(|r| level.map_or(true, |lvl| r.level == lvl))
            .collect();
        rooms.sort_by(|a, b| a.join_code.cmp(&b.join_code));
        rooms
    }

    /// Generates a join code no live room is using.
    pub fn unique_join_code(&self) -> String {
        loop {
            let code = generate_join_code();
            if self.id_by_code(&code).is_none() {
                return code;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
