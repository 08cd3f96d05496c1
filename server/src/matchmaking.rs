//! Matchmaking queue: FIFO pairing of quick-match tickets.
//!
//! The queue holds one [`WaitingTicket`] per identity at most. Pairing is
//! strictly first-available: the oldest ticket in the same game mode from a
//! different identity wins, with no skill or difficulty fitting. The engine
//! loop is the only caller, so no internal locking is needed.

use std::time::Instant;

use log::info;
use shared::{GameMode, Identity};

use crate::content::ContentFilter;

/// A queued intent to be matched, scoped to one identity and one mode.
#[derive(Debug, Clone)]
pub struct WaitingTicket {
    pub identity: Identity,
    pub mode: GameMode,
    pub filter: ContentFilter,
    pub joined_at: Instant,
}

/// Result of a join request.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// An eligible opponent was waiting; their ticket has been removed.
    Paired(WaitingTicket),
    /// No opponent yet; a ticket was inserted. Carries the new depth of
    /// this mode's queue for the `waitingForOpponent` acknowledgement.
    Waiting { depth: usize },
}

/// FIFO waiting list across all game modes, ordered by insertion.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    tickets: Vec<WaitingTicket>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a join request for `identity` in `mode`.
    ///
    /// Any pre-existing ticket for this identity, in any mode, is removed
    /// first so that re-joining is idempotent. Self-pairing is excluded by
    /// construction: the opponent scan skips the joining identity.
    pub fn enqueue(
        &mut self,
        identity: Identity,
        mode: GameMode,
        filter: ContentFilter,
    ) -> EnqueueOutcome {
        self.remove(&identity.user_id);

        let opponent_pos = self
            .tickets
            .iter()
            .position(|t| t.mode == mode && t.identity.user_id != identity.user_id);

        match opponent_pos {
            Some(pos) => {
                let opponent = self.tickets.remove(pos);
                info!(
                    "paired {} with {} in {}",
                    identity.user_id, opponent.identity.user_id, mode
                );
                EnqueueOutcome::Paired(opponent)
            }
            None => {
                self.tickets.push(WaitingTicket {
                    identity,
                    mode,
                    filter,
                    joined_at: Instant::now(),
                });
                EnqueueOutcome::Waiting {
                    depth: self.depth(mode),
                }
            }
        }
    }

    /// Removes this identity's ticket, if any. Used for voluntary leave
    /// and for disconnects.
    pub fn remove(&mut self, user_id: &str) -> Option<WaitingTicket> {
        let pos = self
            .tickets
            .iter()
            .position(|t| t.identity.user_id == user_id)?;
        Some(self.tickets.remove(pos))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.tickets.iter().any(|t| t.identity.user_id == user_id)
    }

    /// Number of tickets waiting in one mode.
    pub fn depth(&self, mode: GameMode) -> usize {
        self.tickets.iter().filter(|t| t.mode == mode).count()
    }

    /// Identities currently waiting in one mode, oldest first. Used for
    /// the queue-scoped depth broadcast.
    pub fn waiting_in(&self, mode: GameMode) -> Vec<&Identity> {
        self.tickets
            .iter()
            .filter(|t| t.mode == mode)
            .map(|t| &t.identity)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}
