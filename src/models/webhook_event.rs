use serde::{Deserialize, Serialize};

/// Idempotency ledger row for a provider event.
///
/// Existence means "seen"; `processed_at == None` means a prior delivery was
/// accepted but its side effects never committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub provider_event_id: String,
    pub provider: String,
    pub event_type: String,
    pub payload: String,
    pub created_at: i64,
    pub processed_at: Option<i64>,
}
