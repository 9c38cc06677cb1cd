use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};

use crate::db::AppState;
use crate::payments::{
    StripeCharge, StripeCheckoutSession, StripeInvoice, StripeSubscription, StripeWebhookEvent,
};

use super::common::{
    ChargeRefund, CheckoutCompleted, InvoiceUpdate, ParsedEvent, ProviderEvent,
    SubscriptionChange, WebhookProvider, WebhookResult, handle_webhook, webhook_response,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider;

impl WebhookProvider for StripeWebhookProvider {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn extract_signature(&self, headers: &HeaderMap) -> Result<String, WebhookResult> {
        headers
            .get("stripe-signature")
            .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
            .to_str()
            .map(|s| s.to_string())
            .map_err(|e| {
                tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature header")
            })
    }

    fn verify_signature(
        &self,
        state: &AppState,
        body: &Bytes,
        signature: &str,
    ) -> Result<bool, WebhookResult> {
        // Malformed headers are the sender's fault: 400, never a retryable 5xx.
        state
            .stripe
            .verify_webhook_signature(body, signature)
            .map_err(|e| {
                tracing::warn!("Stripe signature rejected: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid signature")
            })
    }

    fn parse_event(&self, body: &Bytes) -> Result<ParsedEvent, WebhookResult> {
        let event: StripeWebhookEvent = serde_json::from_slice(body).map_err(|e| {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid JSON")
        })?;

        let parsed = match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                parse_checkout_completed(&event)?
            }
            "invoice.payment_succeeded" | "invoice.paid" => {
                parse_invoice(&event)?.map_or(ProviderEvent::Ignored, ProviderEvent::InvoicePaymentSucceeded)
            }
            "invoice.payment_failed" => {
                parse_invoice(&event)?.map_or(ProviderEvent::Ignored, ProviderEvent::InvoicePaymentFailed)
            }
            "customer.subscription.updated" => {
                ProviderEvent::SubscriptionUpdated(parse_subscription(&event)?)
            }
            "customer.subscription.deleted" => {
                ProviderEvent::SubscriptionDeleted(parse_subscription(&event)?)
            }
            "charge.refunded" => parse_charge_refunded(&event)?,
            other => {
                tracing::debug!("Ignoring Stripe event type {}", other);
                ProviderEvent::Ignored
            }
        };

        Ok(ParsedEvent {
            event_id: event.id,
            event: parsed,
        })
    }
}

fn parse_checkout_completed(event: &StripeWebhookEvent) -> Result<ProviderEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    // Delayed payment methods complete the session before the money arrives;
    // those are settled by async_payment_succeeded instead.
    match session.payment_status.as_deref() {
        Some("paid") | Some("no_payment_required") | None => {}
        Some(other) => {
            tracing::info!(
                "Checkout session {} completed with payment_status {}, waiting",
                session.id,
                other
            );
            return Ok(ProviderEvent::Ignored);
        }
    }

    let order_id = session.metadata.order_id.or(session.client_reference_id);

    Ok(ProviderEvent::CheckoutCompleted(CheckoutCompleted {
        session_id: session.id,
        order_id,
        venue_id: session.metadata.venue_id,
        sku: session.metadata.sku,
        partner_id: session.metadata.partner_id,
        payment_intent: session.payment_intent,
        subscription_id: session.subscription,
        amount_minor: session.amount_total,
        currency: session.currency.map(|c| c.to_lowercase()),
    }))
}

fn parse_invoice(event: &StripeWebhookEvent) -> Result<Option<InvoiceUpdate>, WebhookResult> {
    let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse invoice: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid invoice")
    })?;

    // One-off invoices have no subscription to update.
    let Some(subscription_id) = invoice.subscription_id().map(str::to_string) else {
        tracing::debug!("Invoice {} has no subscription, ignoring", invoice.id);
        return Ok(None);
    };

    Ok(Some(InvoiceUpdate {
        subscription_id,
        venue_id: invoice.venue_id().map(str::to_string),
        period_end: invoice.period_end,
    }))
}

fn parse_subscription(event: &StripeWebhookEvent) -> Result<SubscriptionChange, WebhookResult> {
    let subscription: StripeSubscription = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse subscription: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid subscription")
        })?;

    Ok(SubscriptionChange {
        subscription_id: subscription.id,
        status: subscription.status,
        venue_id: subscription.metadata.venue_id,
        order_id: subscription.metadata.order_id,
        cancel_at_period_end: subscription.cancel_at_period_end,
        current_period_end: subscription.current_period_end,
    })
}

fn parse_charge_refunded(event: &StripeWebhookEvent) -> Result<ProviderEvent, WebhookResult> {
    let charge: StripeCharge = serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse charge: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid charge")
    })?;

    // Partial refunds leave the order paid.
    let fully_refunded = charge.refunded.unwrap_or_else(|| {
        matches!((charge.amount, charge.amount_refunded), (Some(a), Some(r)) if a > 0 && r >= a)
    });
    if !fully_refunded {
        tracing::info!(
            "Charge {} partially refunded ({:?} of {:?}), ignoring",
            charge.id,
            charge.amount_refunded,
            charge.amount
        );
        return Ok(ProviderEvent::Ignored);
    }

    Ok(ProviderEvent::ChargeRefunded(ChargeRefund {
        charge_id: charge.id,
        payment_intent: charge.payment_intent,
        order_id: charge.metadata.order_id,
    }))
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    webhook_response(handle_webhook(&StripeWebhookProvider, &state, headers, body).await)
}
