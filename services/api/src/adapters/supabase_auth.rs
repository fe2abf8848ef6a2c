//! services/api/src/adapters/supabase_auth.rs
//!
//! This module contains the adapter for the hosted authentication provider.
//! It implements the `AuthService` port against the Supabase Auth (GoTrue) REST API.

use async_trait::async_trait;
use plantai_core::domain::{AuthSession, AuthUser, UserId};
use plantai_core::ports::{AuthService, PortError, PortResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct GoTrueUser {
    id: String,
    email: Option<String>,
    user_metadata: Option<UserMetadata>,
}

#[derive(Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
}

impl GoTrueUser {
    fn to_domain(self) -> AuthUser {
        AuthUser {
            id: UserId::new(self.id),
            email: self.email,
            full_name: self.user_metadata.and_then(|m| m.full_name),
        }
    }
}

/// Sign-in responses carry a token; sign-up with confirmation pending
/// returns only the user fields, flattened.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    user: Option<GoTrueUser>,
}

/// GoTrue has used several error shapes over time.
#[derive(Deserialize, Default)]
struct GoTrueError {
    error: Option<String>,
    error_description: Option<String>,
    error_code: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl GoTrueError {
    fn text(&self) -> Option<&str> {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.message.as_deref())
            .or(self.error.as_deref())
    }
}

/// Maps a failed auth call onto the port taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> PortError {
    let parsed: GoTrueError = serde_json::from_str(body).unwrap_or_default();
    let text = parsed.text().unwrap_or_default().to_string();

    if parsed.error_code.as_deref() == Some("email_not_confirmed")
        || text.contains("Email not confirmed")
    {
        return PortError::EmailNotConfirmed;
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if text.is_empty() => PortError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited(text),
        s if s.is_client_error() => PortError::Rejected(text),
        s => PortError::Unexpected(format!("Auth API returned {}: {}", s, body)),
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AuthService` using Supabase Auth.
#[derive(Clone)]
pub struct SupabaseAuthAdapter {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuthAdapter {
    /// Creates a new `SupabaseAuthAdapter` for the project at `base_url`.
    pub fn new(base_url: String, anon_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url,
            anon_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> PortResult<String> {
        let response = request
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if status.is_success() {
            Ok(body)
        } else {
            warn!("Auth API call failed with {}", status);
            Err(classify_failure(status, &body))
        }
    }

    fn parse<T: for<'de> Deserialize<'de>>(body: &str) -> PortResult<T> {
        serde_json::from_str(body)
            .map_err(|e| PortError::Unexpected(format!("Malformed auth response: {}", e)))
    }
}

/// Turns a token response into a session, or `None` when no token was issued.
fn session_from(body: &str) -> PortResult<Option<AuthSession>> {
    let token: TokenResponse = SupabaseAuthAdapter::parse(body)?;
    match (token.access_token, token.user) {
        (Some(access_token), Some(user)) => Ok(Some(AuthSession {
            access_token,
            user: user.to_domain(),
        })),
        _ => Ok(None),
    }
}

//=========================================================================================
// `AuthService` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthService for SupabaseAuthAdapter {
    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Option<AuthSession>> {
        let body = self
            .send(
                self.client
                    .post(self.url("signup"))
                    .json(&Credentials { email, password }),
            )
            .await?;
        let session = session_from(&body)?;
        if session.is_none() {
            debug!("Sign-up for {} is awaiting email confirmation", email);
        }
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthSession> {
        let body = self
            .send(
                self.client
                    .post(self.url("token?grant_type=password"))
                    .json(&Credentials { email, password }),
            )
            .await?;
        session_from(&body)?
            .ok_or_else(|| PortError::Unexpected("Sign-in response had no session".to_string()))
    }

    async fn sign_out(&self, access_token: &str) -> PortResult<()> {
        self.send(self.client.post(self.url("logout")).bearer_auth(access_token))
            .await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> PortResult<AuthUser> {
        let body = self
            .send(self.client.get(self.url("user")).bearer_auth(access_token))
            .await
            .map_err(|e| match e {
                PortError::Rejected(_) => PortError::Unauthorized,
                other => other,
            })?;
        let user: GoTrueUser = Self::parse(&body)?;
        Ok(user.to_domain())
    }
}
