pub mod admin;
pub mod public;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// Every route the service exposes, state not yet attached.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(public::router())
        .merge(webhooks::router())
        .merge(admin::router(state))
}
