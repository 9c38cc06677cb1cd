//! Order lifecycle and entitlement tests
//!
//! The status guard lives in the UPDATE itself, so every transition here is
//! exercised against a real schema rather than the in-memory graph alone.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use venuepay::entitlements;
use venuepay::settlement::{self, Decision, REASON_ENTITLEMENT_ERROR, ReviewDecision};
use venuepay::slip::{VerdictReason, duplicate};

fn status_of(conn: &rusqlite::Connection, order_id: &str) -> OrderStatus {
    queries::get_order_by_id(conn, order_id)
        .expect("query failed")
        .expect("order should exist")
        .status
}

#[test]
fn test_new_order_starts_pending_with_defaults() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.currency, "thb");
    assert_eq!(order.payment_method, PaymentMethod::BankTransfer);
    assert!(order.status_reason.is_none());
    assert_eq!(order.metadata, serde_json::json!({}));
}

#[test]
fn test_guarded_transitions_follow_the_graph() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    assert!(queries::transition_order_status(&conn, &order.id, OrderStatus::PendingReview, Some("low_confidence")).unwrap());
    assert!(queries::transition_order_status(&conn, &order.id, OrderStatus::Paid, Some("review_approved")).unwrap());

    // Paid never goes back to review or rejected.
    assert!(!queries::transition_order_status(&conn, &order.id, OrderStatus::PendingReview, None).unwrap());
    assert!(!queries::transition_order_status(&conn, &order.id, OrderStatus::Rejected, None).unwrap());
    assert_eq!(status_of(&conn, &order.id), OrderStatus::Paid);

    assert!(queries::transition_order_status(&conn, &order.id, OrderStatus::Refunded, Some("charge_refunded")).unwrap());
    let refunded = queries::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.status_reason.as_deref(), Some("charge_refunded"));
}

#[test]
fn test_refund_requires_paid_order() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    assert!(!queries::transition_order_status(&conn, &order.id, OrderStatus::Refunded, None).unwrap());
    assert_eq!(status_of(&conn, &order.id), OrderStatus::Pending);
}

#[test]
fn test_nothing_transitions_back_to_pending() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    assert!(!queries::transition_order_status(&conn, &order.id, OrderStatus::Pending, None).unwrap());
}

#[test]
fn test_duplicate_lookup_ignores_the_order_itself() {
    let conn = setup_test_db();
    let first = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    let second = create_test_order(&conn, "venue_2", "glow_7d", 19900);
    let metadata = serde_json::json!({});
    queries::record_slip_evaluation(&conn, &first.id, Some("img_hash"), Some("txt_hash"), &metadata).unwrap();

    let own = queries::find_duplicate_slip(&conn, &first.id, Some("img_hash"), None, 0).unwrap();
    assert!(own.is_none());

    let by_text = queries::find_duplicate_slip(&conn, &second.id, None, Some("txt_hash"), 0).unwrap();
    assert_eq!(by_text, Some(first.id.clone()));

    let nothing = queries::find_duplicate_slip(&conn, &second.id, None, None, 0).unwrap();
    assert!(nothing.is_none());
}

fn backdate(conn: &rusqlite::Connection, order_id: &str, days: i64) {
    conn.execute(
        "UPDATE orders SET created_at = ?1 WHERE id = ?2",
        rusqlite::params![now() - days * ONE_DAY, order_id],
    )
    .unwrap();
}

#[test]
fn test_slip_reused_after_the_window_is_not_a_duplicate() {
    let conn = setup_test_db();
    let prior = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    let current = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    queries::record_slip_evaluation(&conn, &prior.id, Some("img_hash"), Some("txt_hash"), &serde_json::json!({})).unwrap();
    backdate(&conn, &prior.id, 91);

    let found = duplicate::find_duplicate(&conn, &current.id, Some("img_hash"), Some("txt_hash"), 90).unwrap();
    assert!(found.is_none());
}

#[test]
fn test_slip_reused_inside_the_window_is_a_duplicate() {
    let conn = setup_test_db();
    let prior = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    let current = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    queries::record_slip_evaluation(&conn, &prior.id, Some("img_hash"), None, &serde_json::json!({})).unwrap();
    backdate(&conn, &prior.id, 89);

    let found = duplicate::find_duplicate(&conn, &current.id, Some("img_hash"), None, 90).unwrap();
    assert_eq!(found.map(|m| m.order_id), Some(prior.id));
}

#[test]
fn test_status_lookup_survives_undecodable_columns() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    queries::transition_order_status(&conn, &order.id, OrderStatus::PendingReview, Some("low_confidence")).unwrap();
    conn.execute_batch("ALTER TABLE orders RENAME COLUMN slip_text_hash TO slip_text_digest")
        .unwrap();

    assert!(queries::get_order_by_id(&conn, &order.id).is_err());
    let (status, reason) = queries::get_order_status(&conn, &order.id).unwrap().unwrap();
    assert_eq!(status, OrderStatus::PendingReview);
    assert_eq!(reason.as_deref(), Some("low_confidence"));
    assert!(queries::get_order_status(&conn, "missing").unwrap().is_none());
}

#[test]
fn test_entitlement_insert_is_idempotent_per_order_and_feature() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "boost_3d", 9900);
    let start = now();

    let (first, created) = queries::insert_entitlement_if_absent(
        &conn, "venue_1", &order.id, Feature::Boost, "boost_3d", start, start + 3 * ONE_DAY,
    )
    .unwrap();
    assert!(created);

    let (second, created_again) = queries::insert_entitlement_if_absent(
        &conn, "venue_1", &order.id, Feature::Boost, "boost_3d", start + 10, start + 10 + 3 * ONE_DAY,
    )
    .unwrap();
    assert!(!created_again);
    assert_eq!(second.id, first.id);
    assert_eq!(second.ends_at, first.ends_at);

    assert_eq!(queries::list_entitlements_for_order(&conn, &order.id).unwrap().len(), 1);
}

#[test]
fn test_active_entitlements_exclude_expired_rows() {
    let conn = setup_test_db();
    let current = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    let expired = create_test_order(&conn, "venue_1", "boost_3d", 9900);
    let start = now();

    queries::insert_entitlement_if_absent(&conn, "venue_1", &current.id, Feature::Glow, "glow_7d", start, start + 7 * ONE_DAY).unwrap();
    queries::insert_entitlement_if_absent(&conn, "venue_1", &expired.id, Feature::Boost, "boost_3d", start - 10 * ONE_DAY, start - 7 * ONE_DAY).unwrap();

    let active = queries::list_active_entitlements(&conn, "venue_1", start).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].order_id, current.id);
    assert!(queries::list_active_entitlements(&conn, "venue_2", start).unwrap().is_empty());
}

#[test]
fn test_apply_entitlement_twice_keeps_one_row() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "verified_badge", 49900);

    let first = entitlements::apply_entitlement(&conn, "venue_1", &order.id, "verified_badge").unwrap();
    let second = entitlements::apply_entitlement(&conn, "venue_1", &order.id, "verified_badge").unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.feature, Feature::Verified);
    assert!(first.ends_at - first.starts_at >= 365 * ONE_DAY);
}

#[test]
fn test_settle_paid_grants_entitlement() {
    let mut conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    let settled = settlement::settle(
        &mut conn,
        &order,
        Decision {
            status: OrderStatus::Paid,
            reason: VerdictReason::Verified,
        },
    )
    .unwrap();

    assert_eq!(settled.status, OrderStatus::Paid);
    assert_eq!(settled.status_reason.as_deref(), Some("verified"));
    assert_eq!(queries::list_entitlements_for_order(&conn, &order.id).unwrap().len(), 1);
}

#[test]
fn test_settle_marks_error_when_grant_fails() {
    let mut conn = setup_test_db();
    let order = create_test_order(&conn, "", "glow_7d", 19900);

    let settled = settlement::settle(
        &mut conn,
        &order,
        Decision {
            status: OrderStatus::Paid,
            reason: VerdictReason::Verified,
        },
    )
    .unwrap();

    assert_eq!(settled.status, OrderStatus::Error);
    assert_eq!(settled.status_reason.as_deref(), Some(REASON_ENTITLEMENT_ERROR));
    assert!(queries::list_entitlements_for_order(&conn, &order.id).unwrap().is_empty());
}

#[test]
fn test_review_approve_and_reject() {
    let mut conn = setup_test_db();
    let approved = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    let rejected = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    for order in [&approved, &rejected] {
        queries::transition_order_status(&conn, &order.id, OrderStatus::PendingReview, Some("ocr_failed")).unwrap();
    }

    let paid = settlement::review_order(&mut conn, &approved.id, ReviewDecision::Approve).unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.status_reason.as_deref(), Some("review_approved"));
    assert_eq!(queries::list_entitlements_for_order(&conn, &approved.id).unwrap().len(), 1);

    let closed = settlement::review_order(&mut conn, &rejected.id, ReviewDecision::Reject).unwrap();
    assert_eq!(closed.status, OrderStatus::Rejected);
    assert!(queries::list_entitlements_for_order(&conn, &rejected.id).unwrap().is_empty());
}

#[test]
fn test_review_of_pending_order_is_a_conflict() {
    let mut conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    let err = settlement::review_order(&mut conn, &order.id, ReviewDecision::Approve).unwrap_err();
    assert!(matches!(err, venuepay::error::AppError::Conflict(_)));
    assert_eq!(status_of(&conn, &order.id), OrderStatus::Pending);
}

#[test]
fn test_review_can_recover_errored_order() {
    let mut conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);
    queries::transition_order_status(&conn, &order.id, OrderStatus::Error, Some(REASON_ENTITLEMENT_ERROR)).unwrap();

    let paid = settlement::review_order(&mut conn, &order.id, ReviewDecision::Approve).unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
}

#[test]
fn test_strict_policy_is_not_the_default() {
    assert!(!SettlementPolicy::default().manual_review_disabled);
    assert!(!SettlementPolicy::default().store_raw_ocr);
}
