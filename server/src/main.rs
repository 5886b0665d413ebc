//! Ledgerbridge Server - trigger surface for points/ledger reconciliation.
//!
//! This server exposes HTTP endpoints to start a reconciliation run, inspect
//! the last result and probe the health of both external systems. A
//! background scheduler starts a run on a fixed interval.

mod auth;
mod clients;
mod config;
mod error;
mod routes;
mod scheduler;
mod store;
mod trigger;

use crate::clients::{HttpLedger, HttpMemberDirectory};
use crate::config::Config;
use crate::store::StateFile;
use crate::trigger::SyncService;
use axum::Router;
use ledgerbridge_engine::Orchestrator;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sync: Arc<SyncService>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ledgerbridge_server=debug,ledgerbridge_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Ledgerbridge Server on {}:{}", config.host, config.port);
    tracing::debug!(?config, "Loaded configuration");

    // Build API clients
    let members = HttpMemberDirectory::new(
        &config.member_api_url,
        config.member_api_token.as_deref(),
        config.call_timeout,
    )?;
    let ledger = HttpLedger::new(
        &config.ledger_api_url,
        config.ledger_api_token.as_deref(),
        config.call_timeout,
    )?;
    let orchestrator =
        Orchestrator::new(Arc::new(members), Arc::new(ledger), config.sync_config())?;

    // Refuse to start on a corrupt state file
    let store = StateFile::new(&config.state_path);
    let summary = store.load().await?.summary();
    tracing::info!(
        path = %store.path().display(),
        tracked_members = summary.tracked_members,
        pushed = summary.pushed_count,
        pulled = summary.pulled_count,
        pending = summary.pending_count,
        "Loaded sync state"
    );

    // Build application state
    let sync = Arc::new(SyncService::new(orchestrator, store));
    if let Some(interval) = config.schedule_interval {
        tracing::info!("Scheduling sync every {}s", interval.as_secs());
        scheduler::spawn(sync.clone(), interval);
    }
    let state = AppState {
        config: Arc::new(config.clone()),
        sync,
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
