use serde::{Deserialize, Serialize};

/// Local mirror of a provider subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub provider_subscription_id: String,
    pub venue_id: String,
    pub order_id: Option<String>,
    /// Provider-reported status ("active", "past_due", "canceled", ...).
    pub status: String,
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Upsert payload keyed by `provider_subscription_id`.
///
/// `None` fields leave the stored value untouched on update.
#[derive(Debug, Clone, Default)]
pub struct UpsertSubscription {
    pub provider_subscription_id: String,
    pub venue_id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub cancel_at_period_end: Option<bool>,
    pub current_period_end: Option<i64>,
}
