pub mod auth;
pub mod conversations;
pub mod messages;
pub mod middleware;
pub mod uploads;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::auth::AppState;

/// REST routes: public auth endpoints plus the bearer-protected ones.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/users/search", get(users::search_users))
        .route("/api/chat/conversations", get(conversations::list_conversations))
        .route("/api/chat/{conversation_id}/messages", get(messages::get_messages))
        .route(
            "/api/upload",
            post(uploads::upload_file).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
