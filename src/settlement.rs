//! Order state machine for slip settlement and reviewer decisions.
//!
//! Every status write goes through [`queries::transition_order_status`], which
//! only succeeds from a legal predecessor. An order reaches `paid` only in the
//! same transaction that applied its entitlement.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::SettlementPolicy;
use crate::db::queries;
use crate::entitlements;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{Order, OrderStatus};
use crate::slip::{SlipError, Verdict, VerdictReason, VerdictStatus, duplicate::DuplicateMatch};

pub const REASON_ENTITLEMENT_ERROR: &str = "entitlement_error";
pub const REASON_REVIEW_APPROVED: &str = "review_approved";
pub const REASON_REVIEW_REJECTED: &str = "review_rejected";
pub const REASON_PROCESSING_ERROR: &str = "processing_error";

/// What the pipeline learned about a slip.
#[derive(Debug)]
pub enum Assessment<'a> {
    Evaluated(&'a Verdict),
    Unavailable(&'a SlipError),
}

/// Target status before the entitlement step. `Paid` here means "verified,
/// grant the entitlement"; the grant can still turn it into `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub status: OrderStatus,
    pub reason: VerdictReason,
}

/// Result of the duplicate-slip lookup.
#[derive(Debug, Clone, Copy)]
pub enum DuplicateCheck<'a> {
    Clear,
    Found(&'a DuplicateMatch),
    /// The lookup itself failed, so reuse cannot be ruled out.
    Failed,
}

/// Merge the verdict, the duplicate check and policy into a target status.
///
/// A duplicate always wins. A failed duplicate lookup sends anything not
/// already rejected to review. Anything that would need a human becomes
/// `rejected` when manual review is disabled.
pub fn resolve_status(
    assessment: Assessment<'_>,
    duplicate: DuplicateCheck<'_>,
    policy: &SettlementPolicy,
) -> Decision {
    let review = |reason| Decision {
        status: if policy.manual_review_disabled {
            OrderStatus::Rejected
        } else {
            OrderStatus::PendingReview
        },
        reason,
    };

    if let DuplicateCheck::Found(_) = duplicate {
        return Decision {
            status: OrderStatus::Rejected,
            reason: VerdictReason::DuplicateSlip,
        };
    }

    let decision = match assessment {
        Assessment::Evaluated(verdict) => match verdict.status {
            VerdictStatus::Verified => Decision {
                status: OrderStatus::Paid,
                reason: verdict.reason,
            },
            VerdictStatus::Rejected => Decision {
                status: OrderStatus::Rejected,
                reason: verdict.reason,
            },
            VerdictStatus::PendingReview => review(verdict.reason),
        },
        Assessment::Unavailable(err) => match err {
            SlipError::PayloadTooLarge { .. } | SlipError::InvalidUrl(_) => Decision {
                status: OrderStatus::Rejected,
                reason: err.reason(),
            },
            SlipError::FetchFailed(_) | SlipError::OcrFailed(_) => review(err.reason()),
        },
    };

    match duplicate {
        DuplicateCheck::Failed if decision.status != OrderStatus::Rejected => {
            review(VerdictReason::DuplicateCheckFailed)
        }
        _ => decision,
    }
}

/// Fallback for an intake that failed after its order was created, so the
/// order never stays `pending`. A slip that would have been paid goes to
/// `error` for a reviewer; any other decision is applied as is. Only the
/// status columns are read back.
pub fn settle_after_failure(conn: &Connection, order: &Order, decision: Decision) -> Result<Order> {
    let (target, reason) = if decision.status == OrderStatus::Paid {
        (OrderStatus::Error, REASON_PROCESSING_ERROR)
    } else {
        (decision.status, decision.reason.as_str())
    };
    if !queries::transition_order_status(conn, &order.id, target, Some(reason))? {
        tracing::warn!("Order {} could not move to {} after a failed intake", order.id, target);
    }

    let (status, status_reason) =
        queries::get_order_status(conn, &order.id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    Ok(Order {
        status,
        status_reason,
        ..order.clone()
    })
}

/// Grant the order's entitlement and mark it paid, atomically.
///
/// Returns false when the order was no longer in a state that may become
/// paid; the transaction is then rolled back and nothing is granted.
pub fn grant_and_mark_paid(conn: &mut Connection, order: &Order, reason: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    entitlements::apply_entitlement(&tx, &order.venue_id, &order.id, &order.sku)?;
    if !queries::transition_order_status(&tx, &order.id, OrderStatus::Paid, Some(reason))? {
        return Ok(false);
    }
    tx.commit()?;
    Ok(true)
}

/// Commit a decision to the order and return the stored row.
pub fn settle(conn: &mut Connection, order: &Order, decision: Decision) -> Result<Order> {
    if decision.status == OrderStatus::Paid {
        finalize_paid(conn, order, decision.reason.as_str())?;
    } else if !queries::transition_order_status(
        conn,
        &order.id,
        decision.status,
        Some(decision.reason.as_str()),
    )? {
        tracing::warn!(
            "Order {} could not move to {} (concurrent update?)",
            order.id,
            decision.status
        );
    }

    queries::get_order_by_id(conn, &order.id)?
        .or_not_found(msg::ORDER_NOT_FOUND)
}

/// Paid on success, `error` if the grant failed.
fn finalize_paid(conn: &mut Connection, order: &Order, reason: &str) -> Result<()> {
    match grant_and_mark_paid(conn, order, reason) {
        Ok(true) => {
            tracing::info!("Order {} paid ({})", order.id, reason);
            Ok(())
        }
        Ok(false) => {
            tracing::warn!("Order {} was not payable from its current status", order.id);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Entitlement failed for order {}: {}", order.id, e);
            queries::transition_order_status(
                conn,
                &order.id,
                OrderStatus::Error,
                Some(REASON_ENTITLEMENT_ERROR),
            )?;
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Apply a reviewer's decision to an order awaiting review (or stuck in
/// `error`). Any other source state is a conflict.
pub fn review_order(conn: &mut Connection, order_id: &str, decision: ReviewDecision) -> Result<Order> {
    let order = queries::get_order_by_id(conn, order_id)?
        .or_not_found(msg::ORDER_NOT_FOUND)?;

    if !matches!(order.status, OrderStatus::PendingReview | OrderStatus::Error) {
        return Err(AppError::Conflict(msg::REVIEW_NOT_ALLOWED.into()));
    }

    match decision {
        ReviewDecision::Approve => finalize_paid(conn, &order, REASON_REVIEW_APPROVED)?,
        ReviewDecision::Reject => {
            if !queries::transition_order_status(
                conn,
                &order.id,
                OrderStatus::Rejected,
                Some(REASON_REVIEW_REJECTED),
            )? {
                return Err(AppError::Conflict(msg::REVIEW_NOT_ALLOWED.into()));
            }
        }
    }

    queries::get_order_by_id(conn, order_id)?
        .or_not_found(msg::ORDER_NOT_FOUND)
}
