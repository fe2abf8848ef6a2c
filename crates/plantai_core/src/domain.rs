//! crates/plantai_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format; the
//! `Serialize` derives exist only so the web layer can echo them back.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Number of analyses a free account may run.
pub const MAX_FREE_CREDITS: u32 = 3;

/// Price displayed by the upgrade prompt.
pub const PREMIUM_PRICE: &str = "R$ 39,90";

/// Image reference used for stored analyses that never had one.
pub const PLACEHOLDER_IMAGE_URL: &str = "https://via.placeholder.com/300?text=No+Image";

const DEFAULT_DISPLAY_NAME: &str = "Amante de Plantas";

//=========================================================================================
// Identity
//=========================================================================================

/// Opaque identifier issued by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Represents an authenticated user - used throughout app
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl AuthUser {
    /// Name used to greet the user: full name, else the email local part.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        match self.email.as_deref().and_then(|e| e.split('@').next()) {
            Some(local) if !local.is_empty() => local.to_string(),
            _ => DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

// A signed-in session as issued by the auth provider.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

//=========================================================================================
// Stored Records
//=========================================================================================

/// The stored premium/free status for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    pub email: Option<String>,
    pub is_premium: bool,
}

impl Profile {
    /// The profile a new account starts with.
    pub fn free(id: UserId, email: Option<String>) -> Self {
        Self {
            id,
            email,
            is_premium: false,
        }
    }
}

/// A single completed plant diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRecord {
    pub id: String,
    /// A URL or an embedded `data:` URL.
    pub image_url: String,
    /// The diagnostic text exactly as the model returned it.
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

/// An image re-encoded to the single format sent for inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl NormalizedImage {
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            bytes,
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// The `data:` URL stored as the analysis image reference.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

//=========================================================================================
// Entitlement State
//=========================================================================================

/// How many analyses the user may still request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credits {
    Unlimited,
    Remaining(u32),
}

impl Credits {
    pub fn is_exhausted(self) -> bool {
        matches!(self, Credits::Remaining(0))
    }

    /// The remaining count, or `None` when unlimited.
    pub fn as_count(self) -> Option<u32> {
        match self {
            Credits::Unlimited => None,
            Credits::Remaining(n) => Some(n),
        }
    }
}

/// What the current session is allowed to do.
///
/// The remaining credit count is never stored: it is derived from the length
/// of `analyses` every time it is asked for, so local optimism and the
/// store's history cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementState {
    pub is_premium: bool,
    /// Most recent first.
    pub analyses: Vec<AnalysisRecord>,
    pub free_quota: u32,
}

impl EntitlementState {
    /// Free tier, full quota, empty history.
    pub fn anonymous(free_quota: u32) -> Self {
        Self {
            is_premium: false,
            analyses: Vec::new(),
            free_quota,
        }
    }

    pub fn credits_remaining(&self) -> Credits {
        if self.is_premium {
            return Credits::Unlimited;
        }
        let used = u32::try_from(self.analyses.len()).unwrap_or(u32::MAX);
        Credits::Remaining(self.free_quota.saturating_sub(used))
    }

    pub fn can_analyze(&self) -> bool {
        !self.credits_remaining().is_exhausted()
    }

    /// Prepends `record` to the history.
    pub fn with_record(mut self, record: AnalysisRecord) -> Self {
        self.analyses.insert(0, record);
        self
    }

    pub fn with_premium(mut self) -> Self {
        self.is_premium = true;
        self
    }
}

impl Default for EntitlementState {
    fn default() -> Self {
        Self::anonymous(MAX_FREE_CREDITS)
    }
}
