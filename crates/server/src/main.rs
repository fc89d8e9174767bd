//! Escrutinio server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    routing::get,
};
use escrutinio_api::{middleware::AppState, router as api_router};
use escrutinio_common::{AppResult, Config};
use escrutinio_core::{AggregationService, BallotLedgerService, VoterRegistryService};
use escrutinio_db::repositories::{BallotRecordRepository, VoterRepository};
use sea_orm::DatabaseConnection;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Liveness plus a round trip to the database.
async fn healthz(State(db): State<Arc<DatabaseConnection>>) -> AppResult<&'static str> {
    db.ping().await.map_err(escrutinio_db::db_error)?;
    Ok("ok")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "escrutinio=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting escrutinio server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = escrutinio_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    escrutinio_db::migrate(&db).await?;
    info!("Migrations completed");

    // Initialize repositories
    let db = Arc::new(db);
    let ballot_repo = BallotRecordRepository::new(Arc::clone(&db));
    let voter_repo = VoterRepository::new(Arc::clone(&db));

    // Initialize services
    let state = AppState {
        ledger_service: BallotLedgerService::new(ballot_repo.clone(), &config.ledger),
        registry_service: VoterRegistryService::new(voter_repo.clone()),
        aggregation_service: AggregationService::new(ballot_repo, voter_repo),
    };

    let body_limit = config.server.body_limit_bytes;
    let app = Router::new()
        .route("/healthz", get(healthz).with_state(Arc::clone(&db)))
        .nest("/api", api_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
