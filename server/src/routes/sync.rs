//! Sync trigger route.

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use ledgerbridge_engine::{RunOptions, SyncReport};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/trigger", post(trigger_handler))
}

/// POST /trigger - Run one reconciliation now.
///
/// An empty body runs both directions for real.
async fn trigger_handler(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    body: Bytes,
) -> Result<Json<SyncReport>> {
    let options = parse_options(&body)?;
    tracing::info!(
        ?caller,
        direction = ?options.direction,
        dry_run = options.dry_run,
        "Sync triggered"
    );

    let report = state.sync.trigger(options).await?;
    Ok(Json(report))
}

fn parse_options(body: &[u8]) -> Result<RunOptions> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunOptions::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))
}
