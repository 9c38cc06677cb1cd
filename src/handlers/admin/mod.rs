mod review;

pub use review::*;

use axum::{Router, middleware, routing::post};

use crate::db::AppState;
use crate::middleware::require_admin_key;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/orders/{order_id}/review", post(review_order))
        .route_layer(middleware::from_fn_with_state(state, require_admin_key))
}
