use axum::{extract::State, http::StatusCode};
use tracing::info;

use crate::AdminState;

/// Handler for the /flush endpoint.
///
/// Forces a sweep of every tenant so all buffered chunks are scheduled for
/// persistence, without stopping the flush workers.
pub async fn flush_handler(State(state): State<AdminState>) -> StatusCode {
    info!("flush requested over the admin endpoint");
    state.ingester.sweep_tenants(true, true);

    StatusCode::NO_CONTENT
}
