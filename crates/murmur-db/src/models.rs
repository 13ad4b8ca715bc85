//! Database row types. These map directly to SQLite rows and are kept apart
//! from the murmur-types wire models; the `TryFrom` impls do the parsing.

use anyhow::{Result, anyhow};
use murmur_types::api::UserSummary;
use murmur_types::models::{Conversation, Message, User};

use crate::parse_timestamp;

#[derive(Debug)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ConversationRow {
    pub id: i64,
    pub created_at: String,
}

/// A conversation as seen by one participant, with the other participant filled in.
#[derive(Debug)]
pub struct ConversationPeerRow {
    pub id: i64,
    pub created_at: String,
    pub peer_id: i64,
    pub peer_username: String,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    pub content_type: String,
    pub content: String,
    pub created_at: String,
}

impl UserRow {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            username: self.username.clone(),
        }
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            username: row.username,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: row.id,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let content_type = row
            .content_type
            .parse()
            .map_err(|e: String| anyhow!("message {}: {}", row.id, e))?;

        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            sender_username: row.sender_username,
            content_type,
            content: row.content,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}
