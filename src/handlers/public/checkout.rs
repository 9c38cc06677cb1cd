use axum::extract::State;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::models::{CreateOrder, PaymentMethod, minor_units};
use crate::payments::{CheckoutMode, CheckoutSessionRequest};

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub venue_id: String,
    pub sku: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub mode: CheckoutMode,
    /// Referring partner; earns commission once the checkout is paid.
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub visitor_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub checkout_url: String,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    if !state.stripe.can_create_checkout() {
        return Err(AppError::BadRequest(msg::STRIPE_NOT_CONFIGURED.into()));
    }

    let venue_id = request.venue_id.trim();
    let sku = request.sku.trim();
    if venue_id.is_empty() || sku.is_empty() {
        return Err(AppError::BadRequest("venue_id and sku are required".into()));
    }
    let amount_minor =
        minor_units(request.amount).ok_or_else(|| AppError::BadRequest(msg::INVALID_AMOUNT.into()))?;
    let partner_id = request
        .partner_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let order = {
        let conn = state.db.get()?;
        queries::create_order(
            &conn,
            &CreateOrder {
                venue_id: venue_id.to_string(),
                sku: sku.to_string(),
                amount_minor,
                currency: request.currency.clone().unwrap_or_default(),
                payment_method: Some(PaymentMethod::Stripe),
                visitor_id: request.visitor_id.clone(),
                partner_id: partner_id.map(str::to_string),
                ..Default::default()
            },
        )?
    };

    let success_url = format!("{}/checkout/success?order_id={}", state.base_url, order.id);
    let cancel_url = format!("{}/checkout/cancel?order_id={}", state.base_url, order.id);

    let (session_id, checkout_url) = state
        .stripe
        .create_checkout_session(&CheckoutSessionRequest {
            order_id: &order.id,
            venue_id: &order.venue_id,
            sku: &order.sku,
            partner_id,
            amount_minor: order.amount_minor,
            currency: &order.currency,
            mode: request.mode,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;

    let conn = state.db.get()?;
    queries::set_order_provider_session(&conn, &order.id, &session_id)?;

    tracing::info!(
        "Checkout session {} opened for order {} ({} {})",
        session_id,
        order.id,
        order.sku,
        request.mode.as_str()
    );

    Ok(Json(CheckoutResponse {
        order_id: order.id,
        checkout_url,
    }))
}
