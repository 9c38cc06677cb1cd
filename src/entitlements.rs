//! SKU to feature/window mapping and idempotent entitlement grants.

use chrono::{DateTime, Duration, Months, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{Entitlement, Feature};

/// How long a SKU's grant lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Days(i64),
    Months(u32),
}

pub fn feature_for_sku(sku: &str) -> Feature {
    let sku = sku.trim().to_lowercase();
    if sku.starts_with("glow") {
        Feature::Glow
    } else if sku.starts_with("boost") {
        Feature::Boost
    } else if sku.starts_with("giant") {
        Feature::Giant
    } else {
        Feature::Verified
    }
}

/// Duration tokens are checked longest-lived first; a SKU with no token gets
/// one day, except the base verified badge which gets a year.
pub fn validity_for_sku(sku: &str) -> Validity {
    let sku = sku.trim().to_lowercase();
    let has = |token: &str| sku.contains(token);

    if has("lifetime") {
        Validity::Months(99 * 12)
    } else if has("30d") || has("monthly") {
        Validity::Days(30)
    } else if has("7d") || has("weekly") {
        Validity::Days(7)
    } else if has("3d") {
        Validity::Days(3)
    } else if feature_for_sku(&sku) == Feature::Verified {
        Validity::Months(12)
    } else {
        Validity::Days(1)
    }
}

/// `(starts_at, ends_at)` in unix seconds for a grant starting at `start`.
pub fn entitlement_window(sku: &str, start: DateTime<Utc>) -> Result<(i64, i64)> {
    let end = match validity_for_sku(sku) {
        Validity::Days(days) => start.checked_add_signed(Duration::days(days)),
        Validity::Months(months) => start.checked_add_months(Months::new(months)),
    }
    .ok_or_else(|| AppError::Internal(format!("Entitlement window overflow for sku {}", sku)))?;

    Ok((start.timestamp(), end.timestamp()))
}

/// Grant the SKU's feature to the venue for this order.
///
/// A single insert keyed by (order_id, feature): re-running for the same
/// order returns the existing row instead of adding another.
pub fn apply_entitlement(
    conn: &Connection,
    venue_id: &str,
    order_id: &str,
    sku: &str,
) -> Result<Entitlement> {
    if venue_id.trim().is_empty() {
        return Err(AppError::BadRequest("Entitlement requires a venue".into()));
    }

    let feature = feature_for_sku(sku);
    let (starts_at, ends_at) = entitlement_window(sku, Utc::now())?;

    let (entitlement, created) = queries::insert_entitlement_if_absent(
        conn, venue_id, order_id, feature, sku, starts_at, ends_at,
    )?;

    if created {
        tracing::info!(
            "Granted {} to venue {} for order {} until {}",
            feature,
            venue_id,
            order_id,
            ends_at
        );
    } else {
        tracing::debug!("Entitlement for order {} already applied", order_id);
    }

    Ok(entitlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DAY: i64 = 86400;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_feature_prefixes() {
        assert_eq!(feature_for_sku("glow_7d"), Feature::Glow);
        assert_eq!(feature_for_sku("boost_3d"), Feature::Boost);
        assert_eq!(feature_for_sku("giant_monthly"), Feature::Giant);
        assert_eq!(feature_for_sku("verified"), Feature::Verified);
        assert_eq!(feature_for_sku("something_else"), Feature::Verified);
    }

    #[test]
    fn test_seven_day_window_is_exact() {
        let (s, e) = entitlement_window("glow_7d", start()).unwrap();
        assert_eq!(e - s, 7 * DAY);
        let (s, e) = entitlement_window("boost_weekly", start()).unwrap();
        assert_eq!(e - s, 7 * DAY);
    }

    #[test]
    fn test_monthly_is_thirty_days() {
        let (s, e) = entitlement_window("giant_monthly", start()).unwrap();
        assert_eq!(e - s, 30 * DAY);
        let (s, e) = entitlement_window("glow_30d", start()).unwrap();
        assert_eq!(e - s, 30 * DAY);
    }

    #[test]
    fn test_three_day_and_default() {
        let (s, e) = entitlement_window("boost_3d", start()).unwrap();
        assert_eq!(e - s, 3 * DAY);
        let (s, e) = entitlement_window("glow_trial", start()).unwrap();
        assert_eq!(e - s, DAY);
    }

    #[test]
    fn test_base_verified_is_one_year() {
        assert_eq!(validity_for_sku("verified"), Validity::Months(12));
        let (s, e) = entitlement_window("verified", start()).unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap().timestamp();
        assert_eq!(s, start().timestamp());
        assert_eq!(e, expected);
    }

    #[test]
    fn test_verified_with_duration_token_uses_token() {
        assert_eq!(validity_for_sku("verified_monthly"), Validity::Days(30));
    }

    #[test]
    fn test_lifetime_is_ninety_nine_years() {
        let (_, e) = entitlement_window("verified_lifetime", start()).unwrap();
        let expected = Utc.with_ymd_and_hms(2123, 1, 31, 10, 0, 0).unwrap().timestamp();
        assert_eq!(e, expected);
    }
}
