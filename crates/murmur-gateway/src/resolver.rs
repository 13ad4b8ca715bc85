use std::sync::Arc;

use anyhow::anyhow;
use tracing::debug;

use murmur_db::{Database, is_unique_violation};
use murmur_types::models::{ConversationId, UserId};

use crate::error::RelayError;
use crate::with_db;

/// Finds, or creates exactly once, the conversation between two users.
#[derive(Clone)]
pub struct ConversationResolver {
    db: Arc<Database>,
}

impl ConversationResolver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The pair is unordered: `find_or_create(a, b) == find_or_create(b, a)`.
    pub async fn find_or_create(&self, user_a: UserId, user_b: UserId) -> Result<ConversationId, RelayError> {
        if user_a == user_b {
            return Err(RelayError::SelfConversation(user_a));
        }

        if let Some(id) = self.find_between(user_a, user_b).await? {
            return Ok(id);
        }

        self.create_or_adopt(user_a, user_b).await
    }

    pub async fn find_between(&self, user_a: UserId, user_b: UserId) -> Result<Option<ConversationId>, RelayError> {
        let found = with_db(&self.db, None, move |db| db.find_conversation_between(user_a, user_b)).await?;
        Ok(found.map(|row| row.id))
    }

    /// A unique violation means a concurrent sender created the pair's
    /// conversation between our lookup and our insert; adopt theirs.
    async fn create_or_adopt(&self, user_a: UserId, user_b: UserId) -> Result<ConversationId, RelayError> {
        match with_db(&self.db, None, move |db| db.insert_conversation(user_a, user_b)).await {
            Ok(row) => {
                debug!("created conversation {} for users {} and {}", row.id, user_a, user_b);
                Ok(row.id)
            }
            Err(RelayError::Persistence { cause, .. }) if is_unique_violation(&cause) => {
                debug!(
                    "conversation for users {} and {} created concurrently, re-reading",
                    user_a, user_b
                );
                self.find_between(user_a, user_b).await?.ok_or_else(|| {
                    RelayError::persistence(
                        None,
                        anyhow!("conversation for users {} and {} missing after conflict", user_a, user_b),
                    )
                })
            }
            Err(e) => Err(e),
        }
    }
}
