//! Engine error taxonomy.
//!
//! Display strings double as the client-facing `error` message, so they
//! stay short and carry no internal detail. Authentication failures
//! terminate the handshake; everything else becomes a direct reply to the
//! originating connection and is never broadcast.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bad or missing identity token at handshake. The connection is refused.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Session, room, or content item does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The participant already answered this content item.
    #[error("item already answered")]
    DuplicateSubmission,

    /// The room is at its declared capacity.
    #[error("room is full")]
    Capacity,

    /// The action is invalid for the current session status.
    #[error("{0}")]
    State(String),

    /// An external collaborator (content bank, settlement store) failed.
    #[error("external service error: {0}")]
    Collaborator(String),
}

impl EngineError {
    pub fn state(msg: impl Into<String>) -> Self {
        EngineError::State(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_short_and_opaque() {
        let errors = vec![
            EngineError::Authentication("missing token".to_string()),
            EngineError::NotFound("session"),
            EngineError::DuplicateSubmission,
            EngineError::Capacity,
            EngineError::state("room already started"),
            EngineError::Collaborator("content fetch failed".to_string()),
        ];

        for err in errors {
            let msg = err.to_string();
            assert!(!msg.is_empty());
            assert!(msg.len() < 128);
            // No internal paths or type names leak through Display.
            assert!(!msg.contains("::"));
        }
    }

    #[test]
    fn test_not_found_names_the_subject() {
        assert_eq!(EngineError::NotFound("session").to_string(), "session not found");
        assert_eq!(
            EngineError::NotFound("content item").to_string(),
            "content item not found"
        );
    }
}
