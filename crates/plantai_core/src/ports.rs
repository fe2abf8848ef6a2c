//! crates/plantai_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the hosted database, auth provider and inference API.

use async_trait::async_trait;
use crate::domain::{AnalysisRecord, AuthSession, AuthUser, NormalizedImage, Profile, UserId};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// Adapters classify vendor errors into these variants; the core only ever
/// branches on the variant, never on vendor codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The table or view does not exist (SQLSTATE 42P01).
    #[error("Relation does not exist: {0}")]
    MissingRelation(String),
    /// Unique constraint violated (SQLSTATE 23505).
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Rejected by an access policy (SQLSTATE 42501).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Foreign key violated (SQLSTATE 23503).
    #[error("Missing referenced row: {0}")]
    MissingReference(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("The service returned an empty response")]
    EmptyResponse,
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Email not confirmed")]
    EmailNotConfirmed,
    /// A provider refusal whose message is meant to be shown as-is.
    #[error("{0}")]
    Rejected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The hosted `profiles` and `analyses` tables.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when no row exists for the user.
    async fn get_profile(&self, user_id: &UserId) -> PortResult<Option<Profile>>;

    async fn create_profile(&self, profile: &Profile) -> PortResult<()>;

    async fn set_premium(&self, user_id: &UserId, is_premium: bool) -> PortResult<()>;

    /// All analyses for a user, newest first.
    async fn list_analyses(&self, user_id: &UserId) -> PortResult<Vec<AnalysisRecord>>;

    async fn save_analysis(&self, user_id: &UserId, record: &AnalysisRecord) -> PortResult<()>;
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Sends the image with the fixed diagnostic prompt and returns the model's text.
    async fn diagnose(&self, image: &NormalizedImage) -> PortResult<String>;
}

/// Re-encodes an arbitrary raster image into the canonical inference format.
/// Implementations keep CPU-heavy decoding off the async worker threads.
#[async_trait]
pub trait ImageNormalizer: Send + Sync {
    async fn normalize(&self, raw: &[u8]) -> PortResult<NormalizedImage>;
}

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Creates an account. Returns `None` when the provider requires email
    /// confirmation before issuing a session.
    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Option<AuthSession>>;

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> PortResult<()>;

    /// Resolves an access token back to its user.
    async fn get_user(&self, access_token: &str) -> PortResult<AuthUser>;
}
