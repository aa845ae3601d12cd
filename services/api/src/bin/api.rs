//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, DbRuleCatalog, SystemClock},
    config::Config,
    error::ApiError,
    web::{
        create_playthrough_handler, dashboard_handler, decrement_counter_handler, end_handler,
        identify_caller, increment_counter_handler, pause_handler, pick_rule_handler,
        privacy_handler, rest::ApiDoc, resume_handler, start_handler, state::AppState,
        state::PlaythroughLocks, toggle_rule_handler,
    },
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, patch, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
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
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        repo: db_adapter,
        catalog: Arc::new(DbRuleCatalog::new(db_pool)),
        clock: Arc::new(SystemClock),
        config: config.clone(),
        locks: PlaythroughLocks::new(),
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 4. Create the Web Router ---
    let api_router = Router::new()
        .route("/playthroughs", post(create_playthrough_handler))
        .route("/playthroughs/{id}/pick-rule", post(pick_rule_handler))
        .route("/playthroughs/{id}/start", put(start_handler))
        .route("/playthroughs/{id}/pause", put(pause_handler))
        .route("/playthroughs/{id}/resume", put(resume_handler))
        .route("/playthroughs/{id}/end", put(end_handler))
        .route(
            "/playthroughs/{id}/rules/{rule_id}/toggle",
            put(toggle_rule_handler),
        )
        .route("/playthrough/{id}/dashboard", get(dashboard_handler))
        .route(
            "/playthrough/counters/increment",
            post(increment_counter_handler),
        )
        .route(
            "/playthrough/counters/decrement",
            post(decrement_counter_handler),
        )
        .route("/playthrough/privacy", patch(privacy_handler))
        .layer(axum_middleware::from_fn(identify_caller))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
