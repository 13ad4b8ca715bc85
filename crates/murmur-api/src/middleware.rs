use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::debug;

use murmur_gateway::gate::authenticate;

use crate::auth::AppState;

/// Extract and validate the JWT from the Authorization header. On success
/// the decoded `Identity` is available to handlers as an `Extension`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let bearer = req.headers().typed_get::<Authorization<Bearer>>();
    let token = bearer.as_ref().map(|auth| auth.token());

    let identity = authenticate(token, &state.jwt_secret).map_err(|e| {
        debug!("REST request rejected: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
