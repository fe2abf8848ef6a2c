//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use plantai_core::domain::AuthSession;
use std::sync::Arc;
use tracing::{debug, error};

use crate::web::state::AppState;

/// Name of the cookie holding the access token.
pub const SESSION_COOKIE: &str = "session";

/// Reads the access token from the `session` cookie or an `Authorization: Bearer` header.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|c| {
                c.trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
            })
        });

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Middleware that resolves the access token to a live session.
///
/// Tokens unknown to the registry are checked with the auth provider and, if
/// valid, get a freshly bootstrapped session (session restore). On success the
/// `Arc<Session>` is inserted into the request extensions.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract the token
    let token = extract_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Known session, revalidated with the provider when stale
    let session = match state.sessions.lookup(&token).await {
        Some((session, false)) => session,
        Some((session, true)) => match state.auth.get_user(&token).await {
            Ok(_) => {
                state.sessions.mark_verified(&token).await;
                session
            }
            Err(e) => {
                debug!("Stored session token no longer valid: {}", e);
                state.sessions.remove(&token).await;
                return Err(StatusCode::UNAUTHORIZED);
            }
        },
        // 3. Unknown token: restore a session from the provider
        None => {
            let user = state.auth.get_user(&token).await.map_err(|e| {
                error!("Failed to validate access token: {}", e);
                StatusCode::UNAUTHORIZED
            })?;
            state
                .sessions
                .establish(
                    &state.engine,
                    AuthSession {
                        access_token: token,
                        user,
                    },
                )
                .await
        }
    };

    // 4. Hand the session to the handler
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
