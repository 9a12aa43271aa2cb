//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod approvals;
mod overrides;
mod simulations;

use crate::auth::auth_middleware;
use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware_stack = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Authenticated API
    let api = Router::new()
        // Approval ladder
        .route("/artifacts", post(approvals::create_artifact))
        .route("/artifacts/{id}", get(approvals::get_artifact))
        .route("/artifacts/{id}/actions", get(approvals::list_actions))
        .route("/artifacts/{id}/packaging/verify", post(approvals::verify_packaging))
        .route("/artifacts/{id}/packaging/claim", post(approvals::claim_packaging))
        .route("/artifacts/{id}/packaging/outcome", post(approvals::record_outcome))
        .route("/stages/{id}/decision", post(approvals::decide_stage))
        .route("/stages/{id}/delegate", post(approvals::delegate_stage))
        .route("/stages/{id}/reset", post(approvals::reset_stage))
        .route("/stages/{id}/comments", post(approvals::comment_stage))

        // Guardrail simulation and telemetry
        .route(
            "/executions/{id}/simulations",
            post(simulations::record_simulation).get(simulations::list_simulations),
        )
        .route("/artifacts/{id}/projection", get(simulations::project_artifact))
        .route("/executions/{id}/events", get(approvals::list_events))

        // Baselines and overrides
        .route("/baselines", post(overrides::publish_baseline))
        .route("/baselines/{id}", get(overrides::get_baseline))
        .route("/overrides/accept", post(overrides::accept_override))
        .route("/overrides/execute", post(overrides::execute_override))
        .route("/overrides/decline", post(overrides::decline_override))
        .route("/overrides/reverse", post(overrides::reverse_override))
        .route("/overrides/{recommendation_id}", get(overrides::override_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", api)

        // Apply middleware and state
        .layer(middleware_stack)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Governance gate is running.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
