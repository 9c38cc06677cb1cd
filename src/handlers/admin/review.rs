use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::models::{OrderStatus, OrderSummary};
use crate::notify::{NotifyEvent, OrderNotification};
use crate::settlement::{self, ReviewDecision};

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub order: OrderSummary,
}

/// Reviewer approve/reject for an order parked in `pending_review` or `error`.
pub async fn review_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>> {
    let mut conn = state.db.get()?;
    let order = settlement::review_order(&mut conn, &order_id, request.decision)?;

    queries::merge_order_metadata(
        &conn,
        &order.id,
        "review",
        &json!({
            "decision": request.decision,
            "note": request.note,
            "at": queries::now(),
        }),
    )?;
    let order = queries::get_order_by_id(&conn, &order.id)?.unwrap_or(order);

    tracing::info!(
        "Review {:?} applied to order {}, now {}",
        request.decision,
        order.id,
        order.status
    );

    if order.status == OrderStatus::Paid {
        state
            .notifier
            .notify(OrderNotification::from_order(NotifyEvent::OrderPaid, &order));
    }

    Ok(Json(ReviewResponse {
        order: order.summary(),
    }))
}
