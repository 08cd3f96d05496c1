//! Settlement sink: the durable XP ledger and history store.
//!
//! Invoked once per session at the terminal transition, fire-and-forget.
//! The in-memory result has already been broadcast by the time this runs,
//! so a failed write is logged and swallowed, never retried synchronously
//! and never rolled back.

use async_trait::async_trait;
use log::info;
use serde::Serialize;
use shared::{Identity, SessionStatus};

use crate::error::EngineError;

/// Final per-participant numbers submitted to the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementParticipant {
    pub identity: Identity,
    pub score: u32,
    pub correct_count: u32,
    pub xp: u32,
    pub is_winner: bool,
}

/// Everything the ledger needs to record one settled session.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementRecord {
    pub session_id: String,
    pub game: String,
    pub status: SessionStatus,
    pub participants: Vec<SettlementParticipant>,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: u64,
}

#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn record(&self, record: SettlementRecord) -> Result<(), EngineError>;
}

/// Default sink: writes the record to the log. Stands in for the external
/// store in standalone runs and tests.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl SettlementSink for LogSink {
    async fn record(&self, record: SettlementRecord) -> Result<(), EngineError> {
        let json = serde_json::to_string(&record)
            .map_err(|e| EngineError::Collaborator(e.to_string()))?;
        info!("settlement: {}", json);
        Ok(())
    }
}
