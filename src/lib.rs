//! Venuepay - slip verification and payment settlement for venue upgrades
//!
//! Turns bank-transfer slips and payment-provider webhooks into exactly-once
//! entitlement grants, with the order state machine, duplicate-slip guard,
//! webhook idempotency ledger and partner commission ledger behind them.

pub mod commission;
pub mod config;
pub mod db;
pub mod entitlements;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod payments;
pub mod settlement;
pub mod slip;
