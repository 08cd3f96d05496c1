//! Scoring engine: pure functions over answers, timestamps and difficulty.
//!
//! Nothing here touches sessions or connections, which keeps every formula
//! deterministic and directly testable. The session state machine is the
//! only caller.

use shared::{DepartureReason, Difficulty, GameMode};

/// XP per correct quiz answer.
pub const QUIZ_XP_PER_CORRECT: u32 = 10;
/// Bonus for a perfect quiz (every answer correct).
pub const QUIZ_PERFECT_BONUS: u32 = 50;
/// Quiz time bonus starts here and loses one point per 10 elapsed seconds.
pub const QUIZ_TIME_BONUS_MAX: u32 = 30;

/// XP per correctly typed race word.
pub const RACE_XP_PER_WORD: u32 = 15;
/// Bonus for typing every word correctly.
pub const RACE_ACCURACY_BONUS: u32 = 75;
/// Race speed bonus starts here and loses one point per 5 elapsed seconds.
pub const RACE_SPEED_BONUS_MAX: u32 = 50;

/// Consolation XP for the survivor when the opponent leaves voluntarily.
pub const QUIZ_LEAVE_XP: u32 = 75;
/// Consolation XP for the survivor when the opponent's connection drops.
pub const QUIZ_DISCONNECT_XP: u32 = 50;
pub const RACE_LEAVE_XP: u32 = 100;
pub const RACE_DISCONNECT_XP: u32 = 75;

/// Base points for a correct hosted-room answer.
pub const ROOM_BASE_POINTS: u32 = 100;
/// Millisecond budget for the hosted-room speed component.
pub const ROOM_SPEED_WINDOW_MS: u64 = 1000;

/// Quiz correctness: case-sensitive exact match against the stored option.
pub fn quiz_answer_correct(submitted: &str, stored: &str) -> bool {
    submitted == stored
}

/// Race correctness: trimmed, case-insensitive match against the target.
pub fn race_word_correct(typed: &str, target: &str) -> bool {
    typed.trim().to_lowercase() == target.trim().to_lowercase()
}

/// Finishing XP for a quiz participant.
pub fn quiz_final_xp(correct: u32, total: u32, elapsed_secs: u64, difficulty: Difficulty) -> u32 {
    let mut xp = correct * QUIZ_XP_PER_CORRECT;
    if total > 0 && correct == total {
        xp += QUIZ_PERFECT_BONUS;
    }
    xp += QUIZ_TIME_BONUS_MAX.saturating_sub((elapsed_secs / 10) as u32);
    xp + difficulty.xp_bonus()
}

/// Finishing XP for a typing-race participant.
pub fn race_final_xp(correct: u32, total: u32, elapsed_secs: u64) -> u32 {
    let mut xp = correct * RACE_XP_PER_WORD;
    if total > 0 && correct == total {
        xp += RACE_ACCURACY_BONUS;
    }
    xp + RACE_SPEED_BONUS_MAX.saturating_sub((elapsed_secs / 5) as u32)
}

/// Consolation XP for the remaining participant after a departure.
///
/// The quiz mode pays more for a voluntary leave than a disconnect while
/// the race mode does the same with higher values; the asymmetry between
/// modes is preserved as observed in the source system.
pub fn departure_xp(mode: GameMode, reason: DepartureReason, difficulty: Difficulty) -> u32 {
    let flat = match (mode, reason) {
        (GameMode::Quiz, DepartureReason::Left) => QUIZ_LEAVE_XP,
        (GameMode::Quiz, DepartureReason::Disconnected) => QUIZ_DISCONNECT_XP,
        (GameMode::TypingRace, DepartureReason::Left) => RACE_LEAVE_XP,
        (GameMode::TypingRace, DepartureReason::Disconnected) => RACE_DISCONNECT_XP,
    };
    flat + difficulty.xp_bonus()
}

/// Score increment for one hosted-room answer: base points plus a speed
/// component that decays to zero over one second. Wrong answers score 0.
pub fn room_answer_points(correct: bool, elapsed_ms: u64) -> u32 {
    if !correct {
        return 0;
    }
    ROOM_BASE_POINTS + ROOM_SPEED_WINDOW_MS.saturating_sub(elapsed_ms) as u32
}
