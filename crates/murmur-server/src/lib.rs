pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use murmur_api::auth::{AppState, AppStateInner};
use murmur_api::uploads::UPLOADS_ROUTE;
use murmur_db::Database;
use murmur_gateway::connection;
use murmur_gateway::dispatcher::Dispatcher;
use murmur_gateway::gate;

use crate::config::Config;

#[derive(Clone)]
pub struct ServerState {
    pub app: AppState,
    pub dispatcher: Dispatcher,
}

impl ServerState {
    /// Wires the shared state. The dispatcher (and its Presence Table)
    /// lives exactly as long as this value and its clones.
    pub fn new(config: &Config, db: Database) -> Self {
        let db = Arc::new(db);
        let dispatcher = Dispatcher::new(db.clone());
        let app = Arc::new(AppStateInner {
            db,
            jwt_secret: config.jwt_secret.clone(),
            token_ttl: config.token_ttl(),
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
        });
        Self { app, dispatcher }
    }
}

pub fn build_router(state: ServerState) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .route("/", get(|| async { "murmur relay is running." }))
        .merge(murmur_api::router(state.app.clone()))
        .merge(ws_route)
        .nest_service(UPLOADS_ROUTE, ServeDir::new(&state.app.upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// GET /gateway: the Connection Gate. A bad or missing token is answered
/// with 401 before the upgrade, so nothing reaches the relay.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = gate::bearer_token(&headers, query.token.as_deref());
    let identity = match gate::authenticate(token, &state.app.jwt_secret) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("gateway connection rejected: {}", e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, identity))
}
