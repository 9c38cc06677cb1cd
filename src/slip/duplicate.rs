use chrono::Duration;
use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;

/// A prior order that already used this slip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateMatch {
    pub order_id: String,
}

/// Check the image and text hashes against orders from the last
/// `window_days`, excluding `order_id` itself.
///
/// This is a plain read, not tied to the caller's eventual status write, so
/// two simultaneous submissions of the same slip can both pass.
pub fn find_duplicate(
    conn: &Connection,
    order_id: &str,
    image_hash: Option<&str>,
    text_hash: Option<&str>,
    window_days: i64,
) -> Result<Option<DuplicateMatch>> {
    let since = (chrono::Utc::now() - Duration::days(window_days.max(0))).timestamp();
    let found = queries::find_duplicate_slip(conn, order_id, image_hash, text_hash, since)?;
    if let Some(ref prior) = found {
        tracing::info!("Order {} reuses slip from order {}", order_id, prior);
    }
    Ok(found.map(|order_id| DuplicateMatch { order_id }))
}
