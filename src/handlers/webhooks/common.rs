//! Provider-agnostic webhook ledger and dispatcher.
//!
//! Providers verify and parse their own payloads into a [`ProviderEvent`];
//! everything after that (idempotency ledger, dispatch, commission) is shared.

use axum::{
    Json,
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::commission;
use crate::db::{AppState, queries};
use crate::entitlements;
use crate::error::Result;
use crate::models::{Order, OrderStatus, PaymentMethod, UpsertSubscription, CreateOrder};
use crate::notify::{NotifyEvent, OrderNotification};

/// Result type for webhook operations. 2xx tells the provider to stop
/// retrying; 5xx asks it to retry.
pub type WebhookResult = (StatusCode, &'static str);

/// Reason attached to orders paid through a provider checkout.
pub const REASON_CHECKOUT_COMPLETED: &str = "checkout_completed";
pub const REASON_CHARGE_REFUNDED: &str = "charge_refunded";

#[derive(Debug, Clone)]
pub struct CheckoutCompleted {
    pub session_id: String,
    /// Our order id, from metadata or `client_reference_id`.
    pub order_id: Option<String>,
    pub venue_id: Option<String>,
    pub sku: Option<String>,
    pub partner_id: Option<String>,
    pub payment_intent: Option<String>,
    pub subscription_id: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvoiceUpdate {
    pub subscription_id: String,
    pub venue_id: Option<String>,
    pub period_end: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionChange {
    pub subscription_id: String,
    pub status: String,
    pub venue_id: Option<String>,
    pub order_id: Option<String>,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ChargeRefund {
    pub charge_id: String,
    pub payment_intent: Option<String>,
    pub order_id: Option<String>,
}

/// A verified provider event, one variant per internal event type.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    CheckoutCompleted(CheckoutCompleted),
    InvoicePaymentSucceeded(InvoiceUpdate),
    InvoicePaymentFailed(InvoiceUpdate),
    SubscriptionUpdated(SubscriptionChange),
    SubscriptionDeleted(SubscriptionChange),
    ChargeRefunded(ChargeRefund),
    /// Recorded in the ledger, acknowledged, otherwise ignored.
    Ignored,
}

impl ProviderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted(_) => "checkout_completed",
            Self::InvoicePaymentSucceeded(_) => "invoice_payment_succeeded",
            Self::InvoicePaymentFailed(_) => "invoice_payment_failed",
            Self::SubscriptionUpdated(_) => "subscription_updated",
            Self::SubscriptionDeleted(_) => "subscription_deleted",
            Self::ChargeRefunded(_) => "charge_refunded",
            Self::Ignored => "ignored",
        }
    }
}

/// A parsed delivery: the provider's event id plus the typed event.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub event_id: String,
    pub event: ProviderEvent,
}

/// Trait for payment provider webhook handling.
///
/// Implementors provide signature checking and payload parsing; the ledger
/// and dispatch logic is shared.
pub trait WebhookProvider: Send + Sync {
    /// Provider name for logging and ledger rows (e.g., "stripe")
    fn provider_name(&self) -> &'static str;

    /// Extract signature from request headers.
    fn extract_signature(&self, headers: &HeaderMap) -> std::result::Result<String, WebhookResult>;

    /// Verify the signature over the raw body.
    fn verify_signature(
        &self,
        state: &AppState,
        body: &Bytes,
        signature: &str,
    ) -> std::result::Result<bool, WebhookResult>;

    /// Parse the webhook payload into a provider-agnostic event.
    fn parse_event(&self, body: &Bytes) -> std::result::Result<ParsedEvent, WebhookResult>;
}

/// Webhook response body: `{received: true}` on any 2xx.
pub fn webhook_response((status, message): WebhookResult) -> Response {
    let body = if status.is_success() {
        serde_json::json!({ "received": true, "result": message })
    } else {
        serde_json::json!({ "received": false, "error": message })
    };
    (status, Json(body)).into_response()
}

/// Verify, record, dispatch, mark processed.
///
/// Signature checks happen before the ledger is touched. A ledger collision
/// with `processed_at` set is a replay and does nothing; a collision with
/// `processed_at` NULL is a retry of a failed attempt and is re-dispatched.
/// Dispatch and the processed stamp share one transaction.
pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let signature = match provider.extract_signature(&headers) {
        Ok(s) => s,
        Err(e) => return e,
    };

    match provider.verify_signature(state, &body, &signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, "Invalid signature"),
        Err(e) => return e,
    }

    let parsed = match provider.parse_event(&body) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let payload = String::from_utf8_lossy(&body);
    match queries::try_record_webhook_event(
        &conn,
        provider.provider_name(),
        &parsed.event_id,
        parsed.event.event_type(),
        &payload,
    ) {
        Ok(true) => {}
        Ok(false) => match queries::get_webhook_event(&conn, &parsed.event_id) {
            Ok(Some(record)) if record.processed_at.is_some() => {
                tracing::info!(
                    "{} event {} already processed, ignoring replay",
                    provider.provider_name(),
                    parsed.event_id
                );
                return (StatusCode::OK, "Already processed");
            }
            Ok(_) => {
                tracing::info!(
                    "{} event {} seen but unprocessed, re-dispatching",
                    provider.provider_name(),
                    parsed.event_id
                );
            }
            Err(e) => {
                tracing::error!("Failed to read webhook ledger: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
            }
        },
        Err(e) => {
            tracing::error!("Failed to record webhook event: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    let notifications = match dispatch_and_mark(&mut conn, state.policy.commission_rate, &parsed) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(
                "{} event {} ({}) failed, leaving unprocessed for retry: {}",
                provider.provider_name(),
                parsed.event_id,
                parsed.event.event_type(),
                e
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed");
        }
    };

    for notification in notifications {
        state.notifier.notify(notification);
    }

    match parsed.event {
        ProviderEvent::Ignored => (StatusCode::OK, "Event ignored"),
        _ => (StatusCode::OK, "OK"),
    }
}

fn dispatch_and_mark(
    conn: &mut Connection,
    commission_rate: Decimal,
    parsed: &ParsedEvent,
) -> Result<Vec<OrderNotification>> {
    let tx = conn.transaction()?;
    let notifications = dispatch(&tx, commission_rate, &parsed.event)?;
    queries::mark_webhook_event_processed(&tx, &parsed.event_id)?;
    tx.commit()?;
    Ok(notifications)
}

/// Route an event to its handler. Every handler is keyed on stable external
/// ids so running it twice leaves the same state as running it once.
pub fn dispatch(
    conn: &Connection,
    commission_rate: Decimal,
    event: &ProviderEvent,
) -> Result<Vec<OrderNotification>> {
    match event {
        ProviderEvent::CheckoutCompleted(data) => process_checkout(conn, commission_rate, data),
        ProviderEvent::InvoicePaymentSucceeded(data) => {
            process_invoice(conn, data, "active").map(|_| Vec::new())
        }
        ProviderEvent::InvoicePaymentFailed(data) => {
            process_invoice(conn, data, "past_due").map(|_| Vec::new())
        }
        ProviderEvent::SubscriptionUpdated(data) => {
            process_subscription_change(conn, data, &data.status).map(|_| Vec::new())
        }
        ProviderEvent::SubscriptionDeleted(data) => {
            process_subscription_change(conn, data, "canceled").map(|_| Vec::new())
        }
        ProviderEvent::ChargeRefunded(data) => process_refund(conn, commission_rate, data),
        ProviderEvent::Ignored => Ok(Vec::new()),
    }
}

/// Find the order a checkout belongs to: by session id, then by our order
/// id, else create it from metadata.
fn resolve_checkout_order(conn: &Connection, data: &CheckoutCompleted) -> Result<Option<Order>> {
    if let Some(order) = queries::get_order_by_session(conn, &data.session_id)? {
        return Ok(Some(order));
    }
    if let Some(order_id) = data.order_id.as_deref()
        && let Some(order) = queries::get_order_by_id(conn, order_id)?
    {
        return Ok(Some(order));
    }

    let (Some(venue_id), Some(sku)) = (data.venue_id.as_deref(), data.sku.as_deref()) else {
        return Ok(None);
    };
    let order = queries::create_order(
        conn,
        &CreateOrder {
            venue_id: venue_id.to_string(),
            sku: sku.to_string(),
            amount_minor: data.amount_minor.unwrap_or(0),
            currency: data.currency.clone().unwrap_or_default(),
            payment_method: Some(PaymentMethod::Stripe),
            provider_session_id: Some(data.session_id.clone()),
            partner_id: data.partner_id.clone(),
            ..Default::default()
        },
    )?;
    tracing::info!(
        "Created order {} from checkout session {}",
        order.id,
        data.session_id
    );
    Ok(Some(order))
}

/// Checkout completed: order to `paid` with its entitlement, subscription
/// mirror for subscription checkouts, partner referral and accrual.
pub fn process_checkout(
    conn: &Connection,
    commission_rate: Decimal,
    data: &CheckoutCompleted,
) -> Result<Vec<OrderNotification>> {
    let Some(order) = resolve_checkout_order(conn, data)? else {
        tracing::warn!(
            "Checkout session {} has no order and no venue/sku metadata, ignoring",
            data.session_id
        );
        return Ok(Vec::new());
    };

    queries::attach_checkout_refs(
        conn,
        &order.id,
        &queries::CheckoutRefs {
            session_id: &data.session_id,
            payment_intent: data.payment_intent.as_deref(),
            subscription_id: data.subscription_id.as_deref(),
            amount_minor: data.amount_minor,
            currency: data.currency.as_deref(),
            partner_id: data.partner_id.as_deref(),
        },
    )?;
    let order = queries::get_order_by_id(conn, &order.id)?.unwrap_or(order);

    if let Some(subscription_id) = data.subscription_id.as_deref()
        && queries::get_subscription(conn, subscription_id)?.is_none()
    {
        queries::upsert_subscription(
            conn,
            &UpsertSubscription {
                provider_subscription_id: subscription_id.to_string(),
                venue_id: order.venue_id.clone(),
                order_id: Some(order.id.clone()),
                status: "active".to_string(),
                cancel_at_period_end: None,
                current_period_end: None,
            },
        )?;
        queries::set_order_subscription_status(conn, subscription_id, "active")?;
    }

    let mut notifications = Vec::new();
    match order.status {
        OrderStatus::Paid | OrderStatus::Refunded => {
            tracing::debug!("Order {} already settled, skipping grant", order.id);
        }
        status if status.can_transition_to(OrderStatus::Paid) => {
            entitlements::apply_entitlement(conn, &order.venue_id, &order.id, &order.sku)?;
            if queries::transition_order_status(
                conn,
                &order.id,
                OrderStatus::Paid,
                Some(REASON_CHECKOUT_COMPLETED),
            )? {
                tracing::info!("Order {} paid via checkout {}", order.id, data.session_id);
                if let Some(paid) = queries::get_order_by_id(conn, &order.id)? {
                    notifications.push(OrderNotification::from_order(NotifyEvent::OrderPaid, &paid));
                }
            }
        }
        status => {
            tracing::warn!(
                "Checkout {} completed for order {} in status {}, not granting",
                data.session_id,
                order.id,
                status
            );
        }
    }

    let partner_id = data.partner_id.as_deref().or(order.partner_id.as_deref());
    if let Some(partner_id) = partner_id {
        let current = queries::get_order_by_id(conn, &order.id)?.unwrap_or(order.clone());
        if current.status == OrderStatus::Paid {
            commission::record_accrual(conn, &current, partner_id, commission_rate)?;
        }
    }

    Ok(notifications)
}

/// Resolve which venue a subscription belongs to from whatever we know.
fn subscription_venue(
    conn: &Connection,
    subscription_id: &str,
    hinted: Option<&str>,
) -> Result<Option<(String, Option<String>)>> {
    if let Some(existing) = queries::get_subscription(conn, subscription_id)? {
        return Ok(Some((existing.venue_id, existing.order_id)));
    }
    let order = queries::get_order_by_subscription(conn, subscription_id)?;
    match (hinted, order) {
        (_, Some(order)) => Ok(Some((order.venue_id, Some(order.id)))),
        (Some(venue_id), None) => Ok(Some((venue_id.to_string(), None))),
        (None, None) => Ok(None),
    }
}

fn process_invoice(conn: &Connection, data: &InvoiceUpdate, status: &str) -> Result<()> {
    let Some((venue_id, order_id)) =
        subscription_venue(conn, &data.subscription_id, data.venue_id.as_deref())?
    else {
        tracing::warn!(
            "No venue known for subscription {}, ignoring invoice",
            data.subscription_id
        );
        return Ok(());
    };

    queries::upsert_subscription(
        conn,
        &UpsertSubscription {
            provider_subscription_id: data.subscription_id.clone(),
            venue_id,
            order_id,
            status: status.to_string(),
            cancel_at_period_end: None,
            current_period_end: data.period_end,
        },
    )?;
    queries::set_order_subscription_status(conn, &data.subscription_id, status)?;
    tracing::info!("Subscription {} now {}", data.subscription_id, status);
    Ok(())
}

fn process_subscription_change(conn: &Connection, data: &SubscriptionChange, status: &str) -> Result<()> {
    let Some((venue_id, known_order)) =
        subscription_venue(conn, &data.subscription_id, data.venue_id.as_deref())?
    else {
        tracing::warn!(
            "No venue known for subscription {}, ignoring change",
            data.subscription_id
        );
        return Ok(());
    };

    queries::upsert_subscription(
        conn,
        &UpsertSubscription {
            provider_subscription_id: data.subscription_id.clone(),
            venue_id,
            order_id: known_order.or_else(|| data.order_id.clone()),
            status: status.to_string(),
            cancel_at_period_end: Some(data.cancel_at_period_end),
            current_period_end: data.current_period_end,
        },
    )?;
    queries::set_order_subscription_status(conn, &data.subscription_id, status)?;
    tracing::info!("Subscription {} now {}", data.subscription_id, status);
    Ok(())
}

/// Refund: order to `refunded`, plus a clawback row if a partner was paid.
pub fn process_refund(
    conn: &Connection,
    commission_rate: Decimal,
    data: &ChargeRefund,
) -> Result<Vec<OrderNotification>> {
    let mut order = None;
    if let Some(payment_intent) = data.payment_intent.as_deref() {
        order = queries::get_order_by_payment_intent(conn, payment_intent)?;
    }
    if order.is_none()
        && let Some(order_id) = data.order_id.as_deref()
    {
        order = queries::get_order_by_id(conn, order_id)?;
    }
    let Some(order) = order else {
        tracing::warn!("No order found for refunded charge {}", data.charge_id);
        return Ok(Vec::new());
    };

    let mut notifications = Vec::new();
    if queries::transition_order_status(
        conn,
        &order.id,
        OrderStatus::Refunded,
        Some(REASON_CHARGE_REFUNDED),
    )? {
        tracing::info!("Order {} refunded (charge {})", order.id, data.charge_id);
        if let Some(refunded) = queries::get_order_by_id(conn, &order.id)? {
            notifications.push(OrderNotification::from_order(NotifyEvent::OrderRefunded, &refunded));
        }
    }

    let current = queries::get_order_by_id(conn, &order.id)?.unwrap_or(order);
    if current.status == OrderStatus::Refunded {
        commission::record_clawback(conn, &current, commission_rate)?;
    } else {
        tracing::warn!(
            "Refund for order {} in status {} left unapplied",
            current.id,
            current.status
        );
    }

    Ok(notifications)
}
