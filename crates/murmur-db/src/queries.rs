use crate::models::{ConversationPeerRow, ConversationRow, MessageRow, UserRow};
use crate::{Database, format_timestamp};
use anyhow::{Result, anyhow};
use chrono::Utc;
use murmur_types::models::ContentType;
use rusqlite::{Connection, OptionalExtension, Row};

/// Upper bound on `search_users_by_prefix` results.
pub const SEARCH_LIMIT: u32 = 10;

impl Database {
    // -- Users --

    pub fn insert_user(&self, username: &str, password_hash: &str) -> Result<UserRow> {
        self.with_conn(|conn| {
            let created_at = format_timestamp(Utc::now());
            conn.execute(
                "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
                (username, password_hash, &created_at),
            )?;
            Ok(UserRow {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                created_at,
            })
        })
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, created_at FROM users WHERE username = ?1",
                [username],
                user_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn find_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, created_at FROM users WHERE id = ?1",
                [id],
                user_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Case-insensitive substring match on username, never returning the caller.
    pub fn search_users_by_prefix(&self, query: &str, exclude_user_id: i64) -> Result<Vec<UserRow>> {
        let pattern = format!("%{}%", escape_like(query));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password_hash, created_at FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' AND id != ?2
                 ORDER BY username
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude_user_id, SEARCH_LIMIT], user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    /// Creates the conversation between `user_a` and `user_b` together with
    /// both participant rows, all in one transaction.
    ///
    /// Fails with a unique violation (see [`crate::is_unique_violation`]) if
    /// the pair already has a conversation.
    pub fn insert_conversation(&self, user_a: i64, user_b: i64) -> Result<ConversationRow> {
        if user_a == user_b {
            return Err(anyhow!("conversation needs two distinct users, got {} twice", user_a));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = format_timestamp(Utc::now());

            tx.execute(
                "INSERT INTO conversations (pair_key, created_at) VALUES (?1, ?2)",
                (pair_key(user_a, user_b), &created_at),
            )?;
            let id = tx.last_insert_rowid();
            insert_participants(&tx, id, &[user_a, user_b])?;

            // Dropping `tx` on any `?` above rolls everything back
            tx.commit()?;
            Ok(ConversationRow { id, created_at })
        })
    }

    pub fn find_conversation_between(&self, user_a: i64, user_b: i64) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id, c.created_at FROM conversations c
                 JOIN conversation_participants cp1 ON cp1.conversation_id = c.id
                 JOIN conversation_participants cp2 ON cp2.conversation_id = c.id
                 WHERE cp1.user_id = ?1 AND cp2.user_id = ?2 AND cp1.user_id != cp2.user_id
                 ORDER BY c.id
                 LIMIT 1",
                [user_a, user_b],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn is_participant(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| query_is_participant(conn, conversation_id, user_id))
    }

    /// Every conversation `user_id` takes part in, newest first.
    pub fn find_conversations_for_user(&self, user_id: i64) -> Result<Vec<ConversationPeerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.created_at, u.id, u.username FROM conversations c
                 JOIN conversation_participants me ON me.conversation_id = c.id
                 JOIN conversation_participants peer ON peer.conversation_id = c.id
                 JOIN users u ON u.id = peer.user_id
                 WHERE me.user_id = ?1 AND peer.user_id != ?1
                 ORDER BY c.created_at DESC, c.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationPeerRow {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        peer_id: row.get(2)?,
                        peer_username: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Persists a message and returns it with its server-assigned id and timestamp.
    pub fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        content_type: ContentType,
        content: &str,
    ) -> Result<MessageRow> {
        // Stamped under the connection lock so timestamps follow id order
        self.with_conn(|conn| {
            let created_at = format_timestamp(Utc::now());
            insert_message_at(conn, conversation_id, sender_id, content_type, content, &created_at)
        })
    }

    /// One page of history. The newest `limit` messages after skipping
    /// `offset` from the newest end, returned oldest first.
    pub fn find_messages_by_conversation(
        &self,
        conversation_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content_type, m.content, m.created_at
                 FROM messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let mut rows = stmt
                .query_map(rusqlite::params![conversation_id, limit, offset], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }
}

/// Canonical key for an unordered pair of users.
pub fn pair_key(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b { (user_a, user_b) } else { (user_b, user_a) };
    format!("{}:{}", low, high)
}

fn insert_participants(conn: &Connection, conversation_id: i64, user_ids: &[i64]) -> Result<()> {
    let mut stmt =
        conn.prepare("INSERT INTO conversation_participants (user_id, conversation_id) VALUES (?1, ?2)")?;
    for user_id in user_ids {
        stmt.execute([*user_id, conversation_id])?;
    }
    Ok(())
}

fn query_is_participant(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2)",
        [conversation_id, user_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub(crate) fn insert_message_at(
    conn: &Connection,
    conversation_id: i64,
    sender_id: i64,
    content_type: ContentType,
    content: &str,
    created_at: &str,
) -> Result<MessageRow> {
    if !query_is_participant(conn, conversation_id, sender_id)? {
        return Err(anyhow!(
            "user {} is not a participant of conversation {}",
            sender_id,
            conversation_id
        ));
    }

    conn.execute(
        "INSERT INTO messages (conversation_id, sender_id, content_type, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![conversation_id, sender_id, content_type.as_str(), content, created_at],
    )?;
    let id = conn.last_insert_rowid();

    let row = conn.query_row(
        "SELECT m.id, m.conversation_id, m.sender_id, u.username, m.content_type, m.content, m.created_at
         FROM messages m
         JOIN users u ON m.sender_id = u.id
         WHERE m.id = ?1",
        [id],
        message_row,
    )?;
    Ok(row)
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        content_type: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
