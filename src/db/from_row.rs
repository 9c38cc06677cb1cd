//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Parse an optional JSON text column.
fn parse_json(row: &Row, col: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    match row.get::<_, Option<String>>(col)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const ORDER_COLS: &str = "id, venue_id, sku, amount_minor, currency, status, status_reason, payment_method, slip_url, visitor_id, buyer_profile, metadata, slip_image_hash, slip_text_hash, provider_session_id, provider_payment_intent, provider_subscription_id, subscription_status, partner_id, created_at, updated_at";

pub const ENTITLEMENT_COLS: &str = "id, venue_id, order_id, feature, sku, starts_at, ends_at, created_at";

pub const SUBSCRIPTION_COLS: &str = "provider_subscription_id, venue_id, order_id, status, cancel_at_period_end, current_period_end, created_at, updated_at";

pub const COMMISSION_COLS: &str = "id, partner_id, order_id, venue_id, entry_type, amount_minor, currency, status, created_at";

pub const WEBHOOK_EVENT_COLS: &str = "provider_event_id, provider, event_type, payload, created_at, processed_at";

pub const PARTNER_REFERRAL_COLS: &str = "partner_id, venue_id, first_order_id, created_at";

// ============ FromRow Implementations ============

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            venue_id: row.get(1)?,
            sku: row.get(2)?,
            amount_minor: row.get(3)?,
            currency: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            status_reason: row.get(6)?,
            payment_method: parse_enum(row, 7, "payment_method")?,
            slip_url: row.get(8)?,
            visitor_id: row.get(9)?,
            buyer_profile: parse_json(row, 10)?,
            metadata: parse_json(row, 11)?.unwrap_or_else(|| serde_json::json!({})),
            slip_image_hash: row.get(12)?,
            slip_text_hash: row.get(13)?,
            provider_session_id: row.get(14)?,
            provider_payment_intent: row.get(15)?,
            provider_subscription_id: row.get(16)?,
            subscription_status: row.get(17)?,
            partner_id: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }
}

impl FromRow for Entitlement {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Entitlement {
            id: row.get(0)?,
            venue_id: row.get(1)?,
            order_id: row.get(2)?,
            feature: parse_enum(row, 3, "feature")?,
            sku: row.get(4)?,
            starts_at: row.get(5)?,
            ends_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            provider_subscription_id: row.get(0)?,
            venue_id: row.get(1)?,
            order_id: row.get(2)?,
            status: row.get(3)?,
            cancel_at_period_end: row.get::<_, i32>(4)? != 0,
            current_period_end: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for CommissionLedgerEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CommissionLedgerEntry {
            id: row.get(0)?,
            partner_id: row.get(1)?,
            order_id: row.get(2)?,
            venue_id: row.get(3)?,
            entry_type: parse_enum(row, 4, "entry_type")?,
            amount_minor: row.get(5)?,
            currency: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for WebhookEventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEventRecord {
            provider_event_id: row.get(0)?,
            provider: row.get(1)?,
            event_type: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
            processed_at: row.get(5)?,
        })
    }
}

impl FromRow for PartnerReferral {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PartnerReferral {
            partner_id: row.get(0)?,
            venue_id: row.get(1)?,
            first_order_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}
