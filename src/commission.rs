//! Partner commission accruals and clawbacks.
//!
//! The ledger is append-only. A refund never touches the accrual row; it adds
//! a clawback of equal and opposite amount.

use rusqlite::Connection;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CommissionEntryType, CreateCommissionEntry, Order};

/// `rate × amount`, rounded half away from zero to whole minor units.
pub fn commission_amount(rate: Decimal, amount_minor: i64) -> Result<i64> {
    (rate * Decimal::from(amount_minor))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::Internal("Commission amount out of range".into()))
}

/// Record the partner referral and accrue commission for a paid order.
/// Returns true if a new accrual row was written.
pub fn record_accrual(conn: &Connection, order: &Order, partner_id: &str, rate: Decimal) -> Result<bool> {
    queries::upsert_partner_referral(conn, partner_id, &order.venue_id, &order.id)?;

    let amount_minor = commission_amount(rate, order.amount_minor)?;
    let created = queries::append_commission_entry(
        conn,
        &CreateCommissionEntry {
            partner_id: partner_id.to_string(),
            order_id: order.id.clone(),
            venue_id: order.venue_id.clone(),
            entry_type: CommissionEntryType::Accrual,
            amount_minor,
            currency: order.currency.clone(),
        },
    )?;

    if created {
        tracing::info!(
            "Accrued commission {} {} for partner {} on order {}",
            amount_minor,
            order.currency,
            partner_id,
            order.id
        );
    }
    Ok(created)
}

/// Claw back a refunded order's commission.
///
/// Mirrors the stored accrual when there is one; otherwise falls back to the
/// order's partner and the current rate. Orders without partner attribution
/// are skipped. Returns true if a new clawback row was written.
pub fn record_clawback(conn: &Connection, order: &Order, rate: Decimal) -> Result<bool> {
    let (partner_id, amount_minor) = match queries::get_commission_accrual(conn, &order.id)? {
        Some(accrual) => (accrual.partner_id, -accrual.amount_minor),
        None => match order.partner_id.as_deref() {
            Some(partner_id) => (partner_id.to_string(), -commission_amount(rate, order.amount_minor)?),
            None => return Ok(false),
        },
    };

    let created = queries::append_commission_entry(
        conn,
        &CreateCommissionEntry {
            partner_id: partner_id.clone(),
            order_id: order.id.clone(),
            venue_id: order.venue_id.clone(),
            entry_type: CommissionEntryType::Clawback,
            amount_minor,
            currency: order.currency.clone(),
        },
    )?;

    if created {
        tracing::info!(
            "Clawed back commission {} {} from partner {} on order {}",
            amount_minor,
            order.currency,
            partner_id,
            order.id
        );
    }
    Ok(created)
}
