use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, warn};

use murmur_db::parse_timestamp;
use murmur_gateway::gate::Identity;
use murmur_types::api::{ConversationSummary, UserSummary};

use crate::auth::AppState;

/// GET /api/chat/conversations: the caller's conversations, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = identity.user_id;
    let rows = tokio::task::spawn_blocking(move || db.find_conversations_for_user(user_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("DB find_conversations_for_user error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let conversations: Vec<ConversationSummary> = rows
        .into_iter()
        .filter_map(|row| {
            let created_at = parse_timestamp(&row.created_at)
                .map_err(|e| warn!("Skipping conversation {}: {}", row.id, e))
                .ok()?;
            Some(ConversationSummary {
                id: row.id,
                created_at,
                peer: UserSummary {
                    id: row.peer_id,
                    username: row.peer_username,
                },
            })
        })
        .collect();

    Ok(Json(conversations))
}
