//! Best-effort outbound notifications.
//!
//! When `NOTIFY_WEBHOOK_URL` is set, settlement events are posted there from
//! a background task. Delivery failures and panics are logged and dropped;
//! they never affect the order they describe.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::Order;

/// Quick retries (100ms, 200ms) so a flaky sink can't pile up tasks.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    SlipOrderSettled,
    OrderPaid,
    OrderRefunded,
}

/// Notification payload. Carries ids and amounts only: no buyer profile,
/// no OCR text.
#[derive(Debug, Clone, Serialize)]
pub struct OrderNotification {
    pub event: NotifyEvent,
    pub order_id: String,
    pub venue_id: String,
    pub sku: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
}

impl OrderNotification {
    pub fn from_order(event: NotifyEvent, order: &Order) -> Self {
        Self {
            event,
            order_id: order.id.clone(),
            venue_id: order.venue_id.clone(),
            sku: order.sku.clone(),
            status: order.status.as_str().to_string(),
            reason: order.status_reason.clone(),
            amount: order.amount(),
            currency: order.currency.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    url: Option<String>,
}

impl Notifier {
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self { client, url }
    }

    /// A notifier that drops everything.
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            url: None,
        }
    }

    /// Fire-and-forget. No-op when no URL is configured.
    pub fn notify(&self, notification: OrderNotification) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        let event = notification.event;

        tokio::spawn(
            AssertUnwindSafe(async move {
                send_notification(&client, &url, &notification).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!("Notify task panicked for {:?}: {}", event, panic_msg);
                }
            }),
        );
    }
}

async fn send_notification(client: &Client, url: &str, notification: &OrderNotification) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(notification)
            .timeout(NOTIFY_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                if attempt > 0 {
                    tracing::debug!("Notification succeeded after {} retries", attempt);
                }
                return;
            }
            Ok(resp) => {
                tracing::debug!("Notification sink returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Notification failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Notification {:?} for order {} dropped after {} attempts",
        notification.event,
        notification.order_id,
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
