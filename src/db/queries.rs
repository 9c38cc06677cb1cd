use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    COMMISSION_COLS, ENTITLEMENT_COLS, ORDER_COLS, PARTNER_REFERRAL_COLS, SUBSCRIPTION_COLS,
    WEBHOOK_EVENT_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn to_json_text(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

// ============ Orders ============

pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = gen_id();
    let now = now();
    let payment_method = input.payment_method.unwrap_or(PaymentMethod::BankTransfer);
    let metadata = input
        .metadata
        .clone()
        .unwrap_or_else(|| serde_json::json!({}));
    let buyer_profile = input.buyer_profile.as_ref().map(to_json_text).transpose()?;
    let currency = if input.currency.is_empty() {
        "thb".to_string()
    } else {
        input.currency.to_lowercase()
    };

    conn.execute(
        "INSERT INTO orders (id, venue_id, sku, amount_minor, currency, status, payment_method, slip_url, visitor_id, buyer_profile, metadata, provider_session_id, partner_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            &id,
            &input.venue_id,
            &input.sku,
            input.amount_minor,
            &currency,
            payment_method.as_str(),
            &input.slip_url,
            &input.visitor_id,
            &buyer_profile,
            to_json_text(&metadata)?,
            &input.provider_session_id,
            &input.partner_id,
            now,
        ],
    )?;

    Ok(Order {
        id,
        venue_id: input.venue_id.clone(),
        sku: input.sku.clone(),
        amount_minor: input.amount_minor,
        currency,
        status: OrderStatus::Pending,
        status_reason: None,
        payment_method,
        slip_url: input.slip_url.clone(),
        visitor_id: input.visitor_id.clone(),
        buyer_profile: input.buyer_profile.clone(),
        metadata,
        slip_image_hash: None,
        slip_text_hash: None,
        provider_session_id: input.provider_session_id.clone(),
        provider_payment_intent: None,
        provider_subscription_id: None,
        subscription_status: None,
        partner_id: input.partner_id.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_session(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE provider_session_id = ?1", ORDER_COLS),
        &[&session_id],
    )
}

pub fn get_order_by_payment_intent(conn: &Connection, payment_intent: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE provider_payment_intent = ?1 ORDER BY created_at ASC LIMIT 1",
            ORDER_COLS
        ),
        &[&payment_intent],
    )
}

/// The order that opened a subscription (earliest one carrying its id).
pub fn get_order_by_subscription(conn: &Connection, subscription_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE provider_subscription_id = ?1 ORDER BY created_at ASC LIMIT 1",
            ORDER_COLS
        ),
        &[&subscription_id],
    )
}

/// Status and reason only. Reads nothing else so it still answers when the
/// rest of the row cannot be decoded.
pub fn get_order_status(conn: &Connection, id: &str) -> Result<Option<(OrderStatus, Option<String>)>> {
    let row = conn
        .query_row(
            "SELECT status, status_reason FROM orders WHERE id = ?1",
            [id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;

    row.map(|(status, reason)| {
        status
            .parse::<OrderStatus>()
            .map(|status| (status, reason))
            .map_err(|_| AppError::Internal(format!("Unknown order status '{}'", status)))
    })
    .transpose()
}

/// Move an order to `next` if, and only if, its current status is a legal
/// predecessor. Returns false when the guard rejected the write (stale or
/// out-of-order caller); the row is then left untouched.
pub fn transition_order_status(
    conn: &Connection,
    order_id: &str,
    next: OrderStatus,
    reason: Option<&str>,
) -> Result<bool> {
    let predecessors = next.predecessors();
    if predecessors.is_empty() {
        return Ok(false);
    }
    let placeholders = (0..predecessors.len())
        .map(|i| format!("?{}", i + 5))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE orders SET status = ?1, status_reason = ?2, updated_at = ?3 WHERE id = ?4 AND status IN ({})",
        placeholders
    );

    let mut values: Vec<Value> = vec![
        next.as_str().to_string().into(),
        reason.map(str::to_string).into(),
        now().into(),
        order_id.to_string().into(),
    ];
    values.extend(predecessors.iter().map(|s| Value::from(s.as_str().to_string())));

    let affected = conn.execute(&sql, params_from_iter(values))?;
    Ok(affected > 0)
}

/// Store the slip verification outcome (hashes + metadata) on an order.
pub fn record_slip_evaluation(
    conn: &Connection,
    order_id: &str,
    image_hash: Option<&str>,
    text_hash: Option<&str>,
    metadata: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "UPDATE orders SET slip_image_hash = ?1, slip_text_hash = ?2, metadata = ?3, updated_at = ?4 WHERE id = ?5",
        params![image_hash, text_hash, to_json_text(metadata)?, now(), order_id],
    )?;
    Ok(())
}

/// Set one top-level key of an order's metadata, leaving the rest intact.
pub fn merge_order_metadata(
    conn: &Connection,
    order_id: &str,
    key: &str,
    value: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "UPDATE orders SET metadata = json_set(metadata, '$.' || ?1, json(?2)), updated_at = ?3 WHERE id = ?4",
        params![key, to_json_text(value)?, now(), order_id],
    )?;
    Ok(())
}

pub fn set_order_provider_session(conn: &Connection, order_id: &str, session_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE orders SET provider_session_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![session_id, now(), order_id],
    )?;
    Ok(())
}

/// Provider references learned at checkout completion.
#[derive(Debug, Default)]
pub struct CheckoutRefs<'a> {
    pub session_id: &'a str,
    pub payment_intent: Option<&'a str>,
    pub subscription_id: Option<&'a str>,
    pub amount_minor: Option<i64>,
    pub currency: Option<&'a str>,
    pub partner_id: Option<&'a str>,
}

/// Attach checkout references to an order. Existing values win over NULLs so
/// a re-dispatched event can never blank a field.
pub fn attach_checkout_refs(conn: &Connection, order_id: &str, refs: &CheckoutRefs<'_>) -> Result<()> {
    conn.execute(
        "UPDATE orders SET
            provider_session_id = COALESCE(provider_session_id, ?1),
            provider_payment_intent = COALESCE(?2, provider_payment_intent),
            provider_subscription_id = COALESCE(?3, provider_subscription_id),
            amount_minor = COALESCE(?4, amount_minor),
            currency = COALESCE(?5, currency),
            partner_id = COALESCE(partner_id, ?6),
            updated_at = ?7
         WHERE id = ?8",
        params![
            refs.session_id,
            refs.payment_intent,
            refs.subscription_id,
            refs.amount_minor,
            refs.currency.map(str::to_lowercase),
            refs.partner_id,
            now(),
            order_id,
        ],
    )?;
    Ok(())
}

/// Mirror a subscription status onto every order linked to it.
pub fn set_order_subscription_status(conn: &Connection, subscription_id: &str, status: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE orders SET subscription_status = ?1, updated_at = ?2 WHERE provider_subscription_id = ?3",
        params![status, now(), subscription_id],
    )?;
    Ok(affected)
}

// ============ Duplicate Guard ============

/// Find a prior order (other than `order_id`, created at or after `since`)
/// whose slip image hash or text hash matches. Returns the matching order id.
pub fn find_duplicate_slip(
    conn: &Connection,
    order_id: &str,
    image_hash: Option<&str>,
    text_hash: Option<&str>,
    since: i64,
) -> Result<Option<String>> {
    if image_hash.is_none() && text_hash.is_none() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT id FROM orders
         WHERE id != ?1
           AND created_at >= ?2
           AND ((?3 IS NOT NULL AND slip_image_hash = ?3) OR (?4 IS NOT NULL AND slip_text_hash = ?4))
         ORDER BY created_at ASC
         LIMIT 1",
    )?;
    let mut rows = stmt.query(params![order_id, since, image_hash, text_hash])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

// ============ Entitlements ============

/// Insert an entitlement unless one already exists for (order_id, feature).
/// Returns the stored row and whether this call created it.
pub fn insert_entitlement_if_absent(
    conn: &Connection,
    venue_id: &str,
    order_id: &str,
    feature: Feature,
    sku: &str,
    starts_at: i64,
    ends_at: i64,
) -> Result<(Entitlement, bool)> {
    let affected = conn.execute(
        "INSERT INTO entitlements (id, venue_id, order_id, feature, sku, starts_at, ends_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(order_id, feature) DO NOTHING",
        params![gen_id(), venue_id, order_id, feature.as_str(), sku, starts_at, ends_at, now()],
    )?;

    let entitlement: Option<Entitlement> = query_one(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE order_id = ?1 AND feature = ?2",
            ENTITLEMENT_COLS
        ),
        &[&order_id, &feature.as_str()],
    )?;
    let entitlement = entitlement
        .ok_or_else(|| AppError::Internal("Entitlement missing after insert".into()))?;
    Ok((entitlement, affected > 0))
}

pub fn list_entitlements_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Entitlement>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE order_id = ?1 ORDER BY created_at",
            ENTITLEMENT_COLS
        ),
        &[&order_id],
    )
}

pub fn list_active_entitlements(conn: &Connection, venue_id: &str, at: i64) -> Result<Vec<Entitlement>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM entitlements WHERE venue_id = ?1 AND starts_at <= ?2 AND ends_at > ?2 ORDER BY ends_at DESC",
            ENTITLEMENT_COLS
        ),
        &[&venue_id, &at],
    )
}

// ============ Subscriptions ============

pub fn upsert_subscription(conn: &Connection, input: &UpsertSubscription) -> Result<Subscription> {
    let now = now();
    conn.execute(
        "INSERT INTO subscriptions (provider_subscription_id, venue_id, order_id, status, cancel_at_period_end, current_period_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, COALESCE(?5, 0), ?6, ?7, ?7)
         ON CONFLICT(provider_subscription_id) DO UPDATE SET
            status = excluded.status,
            order_id = COALESCE(subscriptions.order_id, excluded.order_id),
            cancel_at_period_end = COALESCE(?5, subscriptions.cancel_at_period_end),
            current_period_end = COALESCE(?6, subscriptions.current_period_end),
            updated_at = excluded.updated_at",
        params![
            &input.provider_subscription_id,
            &input.venue_id,
            &input.order_id,
            &input.status,
            input.cancel_at_period_end,
            input.current_period_end,
            now,
        ],
    )?;

    get_subscription(conn, &input.provider_subscription_id)?
        .ok_or_else(|| AppError::Internal("Subscription missing after upsert".into()))
}

pub fn get_subscription(conn: &Connection, provider_subscription_id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE provider_subscription_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&provider_subscription_id],
    )
}

// ============ Partners & Commission ============

/// Record partner attribution for a venue. The first attributed order wins;
/// returns true if this call created the row.
pub fn upsert_partner_referral(
    conn: &Connection,
    partner_id: &str,
    venue_id: &str,
    order_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO partner_referrals (partner_id, venue_id, first_order_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(partner_id, venue_id) DO NOTHING",
        params![partner_id, venue_id, order_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn get_partner_referral(conn: &Connection, partner_id: &str, venue_id: &str) -> Result<Option<PartnerReferral>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM partner_referrals WHERE partner_id = ?1 AND venue_id = ?2",
            PARTNER_REFERRAL_COLS
        ),
        &[&partner_id, &venue_id],
    )
}

/// Append a ledger row. A second row for the same (order, partner, type) is
/// ignored, which makes re-dispatched events safe. Returns true if inserted.
pub fn append_commission_entry(conn: &Connection, input: &CreateCommissionEntry) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO commission_ledger (id, partner_id, order_id, venue_id, entry_type, amount_minor, currency, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)
         ON CONFLICT(order_id, partner_id, entry_type) DO NOTHING",
        params![
            gen_id(),
            &input.partner_id,
            &input.order_id,
            &input.venue_id,
            input.entry_type.as_str(),
            input.amount_minor,
            &input.currency,
            now(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn list_commission_for_order(conn: &Connection, order_id: &str) -> Result<Vec<CommissionLedgerEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM commission_ledger WHERE order_id = ?1 ORDER BY created_at, entry_type",
            COMMISSION_COLS
        ),
        &[&order_id],
    )
}

pub fn get_commission_accrual(conn: &Connection, order_id: &str) -> Result<Option<CommissionLedgerEntry>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM commission_ledger WHERE order_id = ?1 AND entry_type = 'accrual' LIMIT 1",
            COMMISSION_COLS
        ),
        &[&order_id],
    )
}

// ============ Webhook Event Ledger ============

/// Atomically record a provider event, returning true if this is a new event.
/// Returns false if a row with this id already exists.
pub fn try_record_webhook_event(
    conn: &Connection,
    provider: &str,
    provider_event_id: &str,
    event_type: &str,
    payload: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider_event_id, provider, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![provider_event_id, provider, event_type, payload, now()],
    )?;
    Ok(affected > 0)
}

pub fn get_webhook_event(conn: &Connection, provider_event_id: &str) -> Result<Option<WebhookEventRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM webhook_events WHERE provider_event_id = ?1",
            WEBHOOK_EVENT_COLS
        ),
        &[&provider_event_id],
    )
}

/// Stamp `processed_at`. Only the first stamp sticks.
pub fn mark_webhook_event_processed(conn: &Connection, provider_event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE webhook_events SET processed_at = ?1 WHERE provider_event_id = ?2 AND processed_at IS NULL",
        params![now(), provider_event_id],
    )?;
    Ok(affected > 0)
}
