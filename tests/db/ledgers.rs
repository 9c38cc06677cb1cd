//! Webhook event ledger and commission ledger tests

#[path = "../common/mod.rs"]
mod common;

use common::*;
use rust_decimal_macros::dec;
use venuepay::commission;

fn paid_partner_order(conn: &rusqlite::Connection, amount_minor: i64) -> Order {
    let order = queries::create_order(
        conn,
        &CreateOrder {
            venue_id: "venue_1".to_string(),
            sku: "giant_monthly".to_string(),
            amount_minor,
            payment_method: Some(PaymentMethod::Stripe),
            partner_id: Some("partner_1".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    queries::transition_order_status(conn, &order.id, OrderStatus::Paid, Some("checkout_completed")).unwrap();
    queries::get_order_by_id(conn, &order.id).unwrap().unwrap()
}

// ============ Webhook Event Ledger ============

#[test]
fn test_webhook_event_is_recorded_once() {
    let conn = setup_test_db();

    assert!(queries::try_record_webhook_event(&conn, "stripe", "evt_1", "checkout_completed", "{}").unwrap());
    assert!(!queries::try_record_webhook_event(&conn, "stripe", "evt_1", "checkout_completed", "{}").unwrap());

    let event = queries::get_webhook_event(&conn, "evt_1").unwrap().unwrap();
    assert_eq!(event.provider, "stripe");
    assert_eq!(event.event_type, "checkout_completed");
    assert!(event.processed_at.is_none());
}

#[test]
fn test_webhook_event_is_marked_processed_once() {
    let conn = setup_test_db();
    queries::try_record_webhook_event(&conn, "stripe", "evt_2", "charge_refunded", "{}").unwrap();

    assert!(queries::mark_webhook_event_processed(&conn, "evt_2").unwrap());
    let first_stamp = queries::get_webhook_event(&conn, "evt_2").unwrap().unwrap().processed_at;
    assert!(first_stamp.is_some());

    assert!(!queries::mark_webhook_event_processed(&conn, "evt_2").unwrap());
    let second_stamp = queries::get_webhook_event(&conn, "evt_2").unwrap().unwrap().processed_at;
    assert_eq!(first_stamp, second_stamp);
}

#[test]
fn test_marking_unknown_event_is_a_noop() {
    let conn = setup_test_db();
    assert!(!queries::mark_webhook_event_processed(&conn, "evt_missing").unwrap());
}

// ============ Commission Ledger ============

#[test]
fn test_commission_amount_rounds_half_away_from_zero() {
    assert_eq!(commission::commission_amount(dec!(0.2), 30000).unwrap(), 6000);
    assert_eq!(commission::commission_amount(dec!(0.2), 12345).unwrap(), 2469);
    assert_eq!(commission::commission_amount(dec!(0.25), 2).unwrap(), 1);
}

#[test]
fn test_accrual_then_clawback_nets_to_zero() {
    let conn = setup_test_db();
    let order = paid_partner_order(&conn, 30000);

    assert!(commission::record_accrual(&conn, &order, "partner_1", dec!(0.2)).unwrap());
    assert!(!commission::record_accrual(&conn, &order, "partner_1", dec!(0.2)).unwrap());

    // Rate changes between accrual and refund do not matter; the clawback
    // mirrors what was accrued.
    assert!(commission::record_clawback(&conn, &order, dec!(0.5)).unwrap());
    assert!(!commission::record_clawback(&conn, &order, dec!(0.5)).unwrap());

    let entries = queries::list_commission_for_order(&conn, &order.id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.iter().map(|e| e.amount_minor).sum::<i64>(), 0);

    let accrual = queries::get_commission_accrual(&conn, &order.id).unwrap().unwrap();
    assert_eq!(accrual.amount_minor, 6000);
    assert_eq!(accrual.entry_type, CommissionEntryType::Accrual);

    let referral = queries::get_partner_referral(&conn, "partner_1", "venue_1").unwrap();
    assert!(referral.is_some());
}

#[test]
fn test_clawback_without_partner_is_skipped() {
    let conn = setup_test_db();
    let order = create_test_order(&conn, "venue_1", "glow_7d", 19900);

    assert!(!commission::record_clawback(&conn, &order, dec!(0.2)).unwrap());
    assert!(queries::list_commission_for_order(&conn, &order.id).unwrap().is_empty());
}

#[test]
fn test_commission_ledger_rejects_updates() {
    let conn = setup_test_db();
    let order = paid_partner_order(&conn, 30000);
    commission::record_accrual(&conn, &order, "partner_1", dec!(0.2)).unwrap();

    let result = conn.execute(
        "UPDATE commission_ledger SET amount_minor = 0 WHERE order_id = ?1",
        [&order.id],
    );
    assert!(result.is_err(), "ledger rows must be immutable");

    let accrual = queries::get_commission_accrual(&conn, &order.id).unwrap().unwrap();
    assert_eq!(accrual.amount_minor, 6000);
}
