//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use plantai_core::account;
use plantai_core::domain::AuthSession;
use plantai_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::web::middleware::{extract_token, SESSION_COOKIE};
use crate::web::protocol::{EntitlementView, ErrorBody, UserView};
use crate::web::state::{AppState, SESSION_TTL};

/// Lifetime of the session cookie, matching the provider's token lifetime.
const COOKIE_MAX_AGE_SECS: u64 = SESSION_TTL.as_secs();

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserView,
    pub entitlement: EntitlementView,
    /// Also set as the `session` cookie; returned for non-browser clients.
    pub access_token: String,
}

type AuthError = (StatusCode, Json<ErrorBody>);

fn auth_error(err: PortError) -> AuthError {
    let status = match &err {
        PortError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PortError::Rejected(_) | PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::EmailNotConfirmed => StatusCode::FORBIDDEN,
        PortError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => {
            error!("Auth provider failure: {}", err);
            StatusCode::BAD_GATEWAY
        }
    };
    (
        status,
        Json(ErrorBody {
            error: account::auth_failure_message(&err),
        }),
    )
}

fn session_cookie(token: &str, max_age: u64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, token, max_age
    )
}

/// Registers the session and builds the response carrying its cookie.
async fn start_session(
    state: &AppState,
    status: StatusCode,
    auth_session: AuthSession,
) -> Response {
    let token = auth_session.access_token.clone();
    let session = state.sessions.establish(&state.engine, auth_session).await;
    let entitlement = session
        .entitlement()
        .unwrap_or_else(|| state.engine.anonymous());

    let response = AuthResponse {
        user: UserView::from(session.user()),
        entitlement: EntitlementView::from(&entitlement),
        access_token: token.clone(),
    };
    (
        status,
        [(header::SET_COOKIE, session_cookie(&token, COOKIE_MAX_AGE_SECS))],
        Json(response),
    )
        .into_response()
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new account and sign in
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Account created and session started", body = AuthResponse),
        (status = 400, description = "Invalid email or password", body = ErrorBody),
        (status = 401, description = "Rejected by the auth provider", body = ErrorBody),
        (status = 403, description = "Email confirmation is still required", body = ErrorBody),
        (status = 502, description = "Auth provider unavailable", body = ErrorBody)
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let auth_session = account::register(state.auth.as_ref(), &req.email, &req.password)
        .await
        .map_err(auth_error)?;
    Ok(start_session(&state, StatusCode::CREATED, auth_session).await)
}

/// POST /auth/login - Login with an existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Invalid email or password", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Email confirmation is still required", body = ErrorBody),
        (status = 502, description = "Auth provider unavailable", body = ErrorBody)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let auth_session = account::login(state.auth.as_ref(), &req.email, &req.password)
        .await
        .map_err(auth_error)?;
    Ok(start_session(&state, StatusCode::OK, auth_session).await)
}

/// POST /auth/logout - End the session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Logout successful"),
        (status = 401, description = "No active session", body = ErrorBody)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AuthError> {
    // 1. Extract the token
    let token = extract_token(&headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "No session found".to_string(),
            }),
        )
    })?;

    // 2. End the local session; subscribers see it immediately
    state.sessions.remove(&token).await;

    // 3. Revoke with the provider, best-effort
    if let Err(e) = state.auth.sign_out(&token).await {
        warn!("Provider sign-out failed, local session already ended: {}", e);
    }

    // 4. Clear cookie
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, session_cookie("", 0))],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failures_map_to_statuses() {
        assert_eq!(auth_error(PortError::InvalidInput("x".into())).0, StatusCode::BAD_REQUEST);
        assert_eq!(auth_error(PortError::Rejected("x".into())).0, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error(PortError::EmailNotConfirmed).0, StatusCode::FORBIDDEN);
        assert_eq!(auth_error(PortError::Unexpected("x".into())).0, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn email_not_confirmed_carries_the_guidance() {
        let (_, Json(body)) = auth_error(PortError::EmailNotConfirmed);
        assert_eq!(body.error, account::EMAIL_NOT_CONFIRMED_GUIDANCE);
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let cookie = session_cookie("", 0);
        assert!(cookie.starts_with("session=;"));
        assert!(cookie.ends_with("Max-Age=0"));
    }
}
