pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod presence;
pub mod resolver;

use std::sync::Arc;

use murmur_db::Database;
use murmur_types::models::ConversationId;

use crate::error::RelayError;

/// Runs a blocking store call off the async runtime. The call runs to
/// completion even if the awaiting future is dropped. Store failures come
/// back as `RelayError::Persistence` tagged with `conversation_id`.
pub(crate) async fn with_db<F, T>(
    db: &Arc<Database>,
    conversation_id: Option<ConversationId>,
    f: F,
) -> Result<T, RelayError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await?
        .map_err(|e| RelayError::persistence(conversation_id, e))
}
