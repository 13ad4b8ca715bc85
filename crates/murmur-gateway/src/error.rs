use murmur_types::models::{ConversationId, UserId};
use thiserror::Error;

/// Why the Connection Gate turned a connection away.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication token not provided")]
    MissingToken,
    #[error("authentication token expired")]
    Expired,
    #[error("authentication token invalid")]
    InvalidToken,
}

/// Failures while relaying an event. Never leaves the connection loop:
/// the dispatcher logs it and answers the sender with an `error` event.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("user {0} cannot start a conversation with themselves")]
    SelfConversation(UserId),

    #[error("store call failed (conversation {conversation_id:?}): {cause:#}")]
    Persistence {
        conversation_id: Option<ConversationId>,
        cause: anyhow::Error,
    },

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RelayError {
    pub(crate) fn persistence(conversation_id: Option<ConversationId>, cause: anyhow::Error) -> Self {
        Self::Persistence {
            conversation_id,
            cause,
        }
    }
}
