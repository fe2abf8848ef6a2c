//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, GeminiAdapter, JpegNormalizer, SupabaseAuthAdapter},
    config::Config,
    error::ApiError,
    web::{self, rest::ApiDoc, state::REVALIDATE_AFTER, AppState, SessionRegistry},
};
use axum::Router;
use plantai_core::entitlement::EntitlementEngine;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let gemini_api_key = config
        .gemini_api_key
        .clone()
        .ok_or_else(|| ApiError::Internal("GEMINI_API_KEY is required".to_string()))?;
    let inference = Arc::new(GeminiAdapter::new(
        config.gemini_api_base.clone(),
        gemini_api_key,
        config.gemini_model.clone(),
    ));
    let auth = Arc::new(SupabaseAuthAdapter::new(
        config.supabase_url.clone(),
        config.supabase_anon_key.clone(),
    ));
    let normalizer = Arc::new(JpegNormalizer::new(config.jpeg_quality));

    // --- 4. Build the Shared AppState ---
    let sessions = SessionRegistry::default();
    sessions.spawn_sweeper(REVALIDATE_AFTER);
    let app_state = Arc::new(AppState {
        engine: EntitlementEngine::new(db_adapter, config.max_free_credits),
        auth,
        inference,
        normalizer,
        sessions,
        config: config.clone(),
    });

    // --- 5. Create the Web Router ---
    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(web::router(app_state)?)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
