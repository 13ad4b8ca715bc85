use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use murmur_gateway::gate::Identity;
use murmur_types::api::UserSummary;

use crate::auth::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// GET /api/users/search?q=: up to 10 other users whose name contains `q`.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, StatusCode> {
    let q = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.search_users_by_prefix(&q, identity.user_id))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("DB search_users_by_prefix error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let users: Vec<UserSummary> = rows.iter().map(|row| row.summary()).collect();
    Ok(Json(users))
}
