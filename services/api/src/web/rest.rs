//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::auth::{AuthResponse, CredentialsRequest};
use crate::web::protocol::{
    AnalysisView, AnalyzeResponse, EntitlementView, ErrorBody, MeResponse, UpgradePrompt, UserView,
    WarningView,
};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use plantai_core::analysis::{self, AnalysisError, AnalyzeOutcome};
use plantai_core::domain::PREMIUM_PRICE;
use plantai_core::session::{Session, SessionError};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        me_handler,
        list_analyses_handler,
        create_analysis_handler,
        upgrade_handler,
    ),
    components(
        schemas(
            CredentialsRequest,
            AuthResponse,
            MeResponse,
            UserView,
            EntitlementView,
            AnalysisView,
            AnalyzeResponse,
            WarningView,
            UpgradePrompt,
            ErrorBody
        )
    ),
    tags(
        (name = "PlantAI API", description = "Plant diagnosis from photos, with free credits and a premium plan.")
    )
)]
pub struct ApiDoc;

type ApiFailure = (StatusCode, Json<ErrorBody>);

fn failure(status: StatusCode, message: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn not_ready(e: SessionError) -> ApiFailure {
    warn!("Request arrived before the session was ready: {}", e);
    failure(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// The signed-in user with their current plan and credits.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current user and entitlement", body = MeResponse),
        (status = 401, description = "Not signed in"),
        (status = 503, description = "Session still loading", body = ErrorBody)
    )
)]
pub async fn me_handler(
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<MeResponse>, ApiFailure> {
    let entitlement = session.entitlement().ok_or(SessionError::NotReady).map_err(not_ready)?;
    Ok(Json(MeResponse {
        user: UserView::from(session.user()),
        entitlement: EntitlementView::from(&entitlement),
        premium_price: PREMIUM_PRICE,
    }))
}

/// Analysis history, newest first.
#[utoipa::path(
    get,
    path = "/analyses",
    responses(
        (status = 200, description = "The user's analyses, newest first", body = [AnalysisView]),
        (status = 401, description = "Not signed in"),
        (status = 503, description = "Session still loading", body = ErrorBody)
    )
)]
pub async fn list_analyses_handler(
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<Vec<AnalysisView>>, ApiFailure> {
    let entitlement = session.entitlement().ok_or(SessionError::NotReady).map_err(not_ready)?;
    Ok(Json(entitlement.analyses.iter().map(AnalysisView::from).collect()))
}

/// Analyze a plant photo.
///
/// Accepts a multipart/form-data request; the `image` part (or the first part)
/// holds the photo in any common raster format.
#[utoipa::path(
    post,
    path = "/analyses",
    request_body(content_type = "multipart/form-data", description = "The plant photo to analyze."),
    responses(
        (status = 201, description = "Diagnosis produced", body = AnalyzeResponse),
        (status = 400, description = "No image in the request", body = ErrorBody),
        (status = 401, description = "Not signed in"),
        (status = 402, description = "Free credits exhausted", body = UpgradePrompt),
        (status = 422, description = "The image could not be used", body = ErrorBody),
        (status = 502, description = "The diagnosis model failed", body = ErrorBody),
        (status = 503, description = "Session still loading", body = ErrorBody)
    )
)]
pub async fn create_analysis_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
    mut multipart: Multipart,
) -> Result<Response, ApiFailure> {
    // 1. Read the photo
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| failure(e.status(), format!("Failed to read multipart data: {}", e)))?
    {
        let is_image_field = field.name() == Some("image");
        let data = field
            .bytes()
            .await
            .map_err(|e| failure(e.status(), format!("Failed to read image bytes: {}", e)))?;
        if is_image_field || image.is_none() {
            image = Some(data);
        }
        if is_image_field {
            break;
        }
    }
    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "Multipart form must include an image"))?;

    // 2. Run the workflow
    let outcome = analysis::analyze(
        &session,
        &app_state.engine,
        app_state.normalizer.as_ref(),
        app_state.inference.as_ref(),
        &image,
    )
    .await
    .map_err(|e| {
        let status = match &e {
            AnalysisError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
            e if e.is_image_problem() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_GATEWAY,
        };
        error!("Analysis failed for {}: {}", session.user().id, e);
        failure(status, e.user_message())
    })?;

    // 3. Shape the response
    match outcome {
        AnalyzeOutcome::UpgradeRequired { price } => {
            Ok((StatusCode::PAYMENT_REQUIRED, Json(UpgradePrompt::new(price))).into_response())
        }
        AnalyzeOutcome::Completed {
            record,
            entitlement,
            warning,
        } => {
            info!("Analysis {} completed for {}", record.id, session.user().id);
            let response = AnalyzeResponse {
                analysis: AnalysisView::from(&record),
                entitlement: EntitlementView::from(&entitlement),
                warning: warning.as_ref().map(WarningView::from),
            };
            Ok((StatusCode::CREATED, Json(response)).into_response())
        }
    }
}

/// Switch the account to the premium plan.
///
/// Payment is not processed; the plan is granted optimistically even when the
/// profile update cannot be stored.
#[utoipa::path(
    post,
    path = "/upgrade",
    responses(
        (status = 200, description = "Premium granted", body = EntitlementView),
        (status = 401, description = "Not signed in"),
        (status = 503, description = "Session still loading", body = ErrorBody)
    )
)]
pub async fn upgrade_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
) -> Result<Json<EntitlementView>, ApiFailure> {
    let entitlement = session.upgrade(&app_state.engine).await.map_err(not_ready)?;
    Ok(Json(EntitlementView::from(&entitlement)))
}
