use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    /// API key for checkout creation. Webhook verification works without it.
    pub secret_key: Option<String>,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    #[default]
    Payment,
    Subscription,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
        }
    }
}

/// Everything needed to open a hosted checkout for one order.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest<'a> {
    pub order_id: &'a str,
    pub venue_id: &'a str,
    pub sku: &'a str,
    pub partner_id: Option<&'a str>,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub mode: CheckoutMode,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: Option<String>,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn can_create_checkout(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Create a hosted checkout session with inline price data.
    ///
    /// Order, venue, SKU and partner ids ride along as metadata on the
    /// session, and on the payment intent or subscription it spawns, so every
    /// later webhook can be traced back to the order.
    pub async fn create_checkout_session(&self, req: &CheckoutSessionRequest<'_>) -> Result<(String, String)> {
        let secret_key = self
            .secret_key
            .as_deref()
            .ok_or_else(|| AppError::BadRequest(msg::STRIPE_NOT_CONFIGURED.into()))?;

        let amount = req.amount_minor.to_string();
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), req.mode.as_str().into()),
            ("success_url".into(), req.success_url.into()),
            ("cancel_url".into(), req.cancel_url.into()),
            ("client_reference_id".into(), req.order_id.into()),
            ("line_items[0][quantity]".into(), "1".into()),
            ("line_items[0][price_data][currency]".into(), req.currency.to_lowercase()),
            ("line_items[0][price_data][unit_amount]".into(), amount),
            ("line_items[0][price_data][product_data][name]".into(), req.sku.into()),
        ];
        if req.mode == CheckoutMode::Subscription {
            form.push(("line_items[0][price_data][recurring][interval]".into(), "month".into()));
        }

        let carrier = match req.mode {
            CheckoutMode::Payment => "payment_intent_data",
            CheckoutMode::Subscription => "subscription_data",
        };
        let mut metadata = vec![
            ("order_id", req.order_id),
            ("venue_id", req.venue_id),
            ("sku", req.sku),
        ];
        if let Some(partner_id) = req.partner_id {
            metadata.push(("partner_id", partner_id));
        }
        for (key, value) in metadata {
            form.push((format!("metadata[{}]", key), value.to_string()));
            form.push((format!("{}[metadata][{}]", carrier, key), value.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(secret_key, None::<&str>)
            .timeout(STRIPE_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "Stripe API error: {}",
                error_text
            )));
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to parse Stripe response: {}", e)))?;

        Ok((session.id, session.url))
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future.
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        if self.webhook_secret.is_empty() {
            tracing::warn!("Stripe webhook rejected: no webhook secret configured");
            return Ok(false);
        }

        // Stripe signature format: t=timestamp,v1=signature[,v1=...]
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        let expected_bytes = expected.as_bytes();

        // Length is not secret (always 64 hex chars), only the content is.
        Ok(candidates.iter().any(|provided| {
            let provided = provided.as_bytes();
            provided.len() == expected_bytes.len() && bool::from(expected_bytes.ct_eq(provided))
        }))
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Ids we attach to every session, payment intent and subscription.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StripeMetadata {
    pub order_id: Option<String>,
    pub venue_id: Option<String>,
    pub sku: Option<String>,
    pub partner_id: Option<String>,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>,
    pub payment_status: Option<String>,
    pub payment_intent: Option<String>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

// ============ invoice.payment_succeeded / invoice.payment_failed ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    /// Pre-2025 API versions put the subscription id here.
    pub subscription: Option<String>,
    pub parent: Option<StripeInvoiceParent>,
    pub status: Option<String>,
    pub period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StripeInvoiceParent {
    pub subscription_details: Option<StripeSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionDetails {
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

impl StripeInvoice {
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| p.subscription_details.as_ref())
                .and_then(|d| d.subscription.as_deref())
        })
    }

    pub fn venue_id(&self) -> Option<&str> {
        self.parent
            .as_ref()
            .and_then(|p| p.subscription_details.as_ref())
            .and_then(|d| d.metadata.venue_id.as_deref())
    }
}

// ============ customer.subscription.* ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

// ============ charge.refunded ============

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount: Option<i64>,
    pub amount_refunded: Option<i64>,
    /// True once the whole charge has been refunded.
    pub refunded: Option<bool>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}
