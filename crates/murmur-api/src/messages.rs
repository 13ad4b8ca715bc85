use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};

use murmur_gateway::gate::Identity;
use murmur_types::models::{ConversationId, Message};

use crate::auth::AppState;

/// Hard cap on one history page.
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// How many messages to skip back from the newest one.
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /api/chat/{conversation_id}/messages: one page of history, oldest first.
/// Only the two participants may read it.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<MessageQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    // Run all blocking DB queries off the async runtime
    let db = state.db.clone();
    let user_id = identity.user_id;
    let limit = query.limit.min(MAX_PAGE);
    let offset = query.offset;

    let rows = tokio::task::spawn_blocking(move || {
        let allowed = db
            .is_participant(conversation_id, user_id)
            .map_err(|e| { error!("DB is_participant error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;
        if !allowed {
            return Err(StatusCode::FORBIDDEN);
        }

        db.find_messages_by_conversation(conversation_id, limit, offset)
            .map_err(|e| {
                error!("DB find_messages_by_conversation({}) error: {}", conversation_id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    let messages: Vec<Message> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id;
            Message::try_from(row)
                .map_err(|e| warn!("Skipping corrupt message {}: {}", id, e))
                .ok()
        })
        .collect();

    Ok(Json(messages))
}
