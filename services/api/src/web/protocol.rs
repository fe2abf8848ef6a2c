//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged with the browser client: REST bodies and
//! the WebSocket messages that mirror session changes.

use chrono::{DateTime, Utc};
use plantai_core::domain::{AnalysisRecord, AuthUser, EntitlementState};
use plantai_core::entitlement::{PersistenceWarning, SaveFailure};
use plantai_core::report::{self, Block, AI_DISCLAIMER};
use plantai_core::session::SessionPhase;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

//=========================================================================================
// REST Payloads
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct EntitlementView {
    pub is_premium: bool,
    /// `null` when unlimited.
    pub credits_remaining: Option<u32>,
    pub max_free_credits: u32,
    pub can_analyze: bool,
    pub analyses_count: usize,
}

impl From<&EntitlementState> for EntitlementView {
    fn from(state: &EntitlementState) -> Self {
        Self {
            is_premium: state.is_premium,
            credits_remaining: state.credits_remaining().as_count(),
            max_free_credits: state.free_quota,
            can_analyze: state.can_analyze(),
            analyses_count: state.analyses.len(),
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct UserView {
    pub id: String,
    pub email: Option<String>,
    pub display_name: String,
}

impl From<&AuthUser> for UserView {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            display_name: user.display_name(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user: UserView,
    pub entitlement: EntitlementView,
    #[schema(value_type = String)]
    pub premium_price: &'static str,
}

/// A stored or freshly produced diagnosis, with display formatting applied.
#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct AnalysisView {
    pub id: String,
    pub image_url: String,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Vec<Object>)]
    pub blocks: Vec<Block>,
    pub html: String,
    #[schema(value_type = String)]
    pub disclaimer: &'static str,
}

impl From<&AnalysisRecord> for AnalysisView {
    fn from(record: &AnalysisRecord) -> Self {
        let blocks = report::render_blocks(&record.raw_text);
        let html = report::to_html(&blocks);
        Self {
            id: record.id.clone(),
            image_url: record.image_url.clone(),
            raw_text: record.raw_text.clone(),
            created_at: record.created_at,
            blocks,
            html,
            disclaimer: AI_DISCLAIMER,
        }
    }
}

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct WarningView {
    #[schema(value_type = String)]
    pub reason: SaveFailure,
    #[schema(value_type = String)]
    pub message: &'static str,
    #[schema(value_type = String)]
    pub detail: &'static str,
}

impl From<&PersistenceWarning> for WarningView {
    fn from(warning: &PersistenceWarning) -> Self {
        Self {
            reason: warning.reason,
            message: warning.message,
            detail: warning.detail(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AnalyzeResponse {
    pub analysis: AnalysisView,
    pub entitlement: EntitlementView,
    /// Present when the analysis could not be saved to history.
    pub warning: Option<WarningView>,
}

/// Returned with `402 Payment Required` when the free credits are used up.
#[derive(Serialize, ToSchema)]
pub struct UpgradePrompt {
    #[schema(value_type = String)]
    pub message: &'static str,
    #[schema(value_type = String)]
    pub price: &'static str,
}

impl UpgradePrompt {
    pub fn new(price: &'static str) -> Self {
        Self {
            message: "Seus créditos gratuitos acabaram. Assine o Premium para análises ilimitadas.",
            price,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

//=========================================================================================
// WebSocket Messages
//=========================================================================================

/// Messages a client can send over the session socket.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Re-reads the entitlement from the store.
    Reload,
}

/// Messages the server pushes whenever the session changes.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Loading,
    Entitlement { entitlement: EntitlementView },
    /// The session was logged out; the socket closes after this.
    SessionEnded,
    Error { message: String },
}

impl From<&SessionPhase> for ServerMessage {
    fn from(phase: &SessionPhase) -> Self {
        match phase {
            SessionPhase::Unauthenticated => ServerMessage::SessionEnded,
            SessionPhase::Loading { .. } => ServerMessage::Loading,
            SessionPhase::Ready { entitlement, .. } => ServerMessage::Entitlement {
                entitlement: entitlement.into(),
            },
        }
    }
}
