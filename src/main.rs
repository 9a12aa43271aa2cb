//! LabGate Governance - approval and override decision layer
//!
//! Gates the release of lab narrative exports behind a sequenced approval
//! ladder and lets operators apply, and safely reverse, corrective overrides:
//! - Approval Ladder: role-based stages with SLAs, delegation and reset
//! - SLA Monitor: periodic overdue scan that re-runs the packaging gate
//! - Packaging Gate: read-only check before every packaging attempt
//! - Guardrail Simulation: advisory forecast of an override's impact
//! - Override Engine: idempotent execute, locked and rate-limited reverse

mod approval;
mod auth;
mod clock;
mod config;
mod db;
mod error;
mod events;
mod models;
mod overrides;
mod routes;
mod simulation;
mod state;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{LogFormat, Settings};
use crate::events::{EventLog, PgEventMirror};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize tracing subscriber for structured logging
    init_tracing(settings.log_format);

    info!("🚀 Starting LabGate Governance...");
    info!("📋 Configuration loaded successfully");

    let jwt_secret = settings.jwt_secret.clone().unwrap_or_else(|| {
        warn!("⚠️  JWT_SECRET not set, using default (INSECURE - set in production!)");
        "labgate-dev-secret-change-in-production".to_string()
    });

    let clock: SharedClock = Arc::new(SystemClock);

    // Durable event mirror is optional; the in-memory log is always on
    let mut events = EventLog::new(clock.clone());
    match &settings.database {
        Some(database) => match db::create_pool(database).await {
            Ok(pool) => {
                let mirror = PgEventMirror::new(pool);
                if let Err(e) = mirror.ensure_schema().await {
                    warn!("⚠️  Warning creating governance_events table: {}", e);
                }
                events = events.with_mirror(mirror);
                info!("✅ Governance events mirrored to PostgreSQL");
            }
            Err(e) => {
                error!("❌ Failed to initialize database pool: {}", e);
                return Err(e.into());
            }
        },
        None => info!("ℹ️  DATABASE_URL not set; governance events kept in memory only"),
    }

    let state = Arc::new(AppState::new(
        Arc::new(events),
        clock,
        settings.governance.clone(),
        jwt_secret,
    ));

    // SLA monitor runs on its own task, independent of request traffic
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = Arc::new(state.sla_monitor()).spawn(shutdown_rx);

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Approval Ladder ───");
    info!("   POST /api/artifacts                       - Register artifact + ladder");
    info!("   GET  /api/artifacts/{{id}}                  - Artifact and stages");
    info!("   POST /api/stages/{{id}}/decision            - Approve / reject");
    info!("   POST /api/stages/{{id}}/delegate            - Delegate current stage");
    info!("   POST /api/stages/{{id}}/reset               - Reset a stage");
    info!("   POST /api/artifacts/{{id}}/packaging/claim  - Gate-checked packaging claim");
    info!("");
    info!("   ─── Guardrails & Overrides ───");
    info!("   GET  /api/artifacts/{{id}}/projection       - Ladder as simulation input");
    info!("   POST /api/executions/{{id}}/simulations     - Record a guardrail simulation");
    info!("   GET  /api/executions/{{id}}/events          - Execution event log");
    info!("   POST /api/overrides/execute               - Execute an override");
    info!("   POST /api/overrides/reverse               - Reverse an override");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor.await {
        warn!("SLA monitor task ended abnormally: {}", e);
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,labgate_governance=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
