mod checkout;
mod slips;
mod venues;

pub use checkout::*;
pub use slips::*;
pub use venues::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Manual bank-transfer slip submission
        .route("/slips", post(submit_slip))
        .route("/checkout", post(create_checkout))
        .route("/venues/{venue_id}/entitlements", get(list_venue_entitlements))
}
