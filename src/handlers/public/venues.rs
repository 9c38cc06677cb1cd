use axum::extract::State;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::models::Entitlement;

#[derive(Debug, Serialize)]
pub struct VenueEntitlementsResponse {
    pub venue_id: String,
    pub entitlements: Vec<Entitlement>,
}

/// Entitlements still running for a venue (`ends_at` in the future).
pub async fn list_venue_entitlements(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
) -> Result<Json<VenueEntitlementsResponse>> {
    let conn = state.db.get()?;
    let entitlements = queries::list_active_entitlements(&conn, &venue_id, queries::now())?;

    Ok(Json(VenueEntitlementsResponse {
        venue_id,
        entitlements,
    }))
}
