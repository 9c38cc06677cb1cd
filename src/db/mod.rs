mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::{ReceiverConfig, SettlementPolicy};
use crate::notify::Notifier;
use crate::payments::StripeClient;
use crate::slip::{SlipEvaluator, SlipFetcher, TextExtractor};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for checkout redirects (e.g., https://pay.example.com)
    pub base_url: String,
    pub fetcher: SlipFetcher,
    pub ocr: Arc<dyn TextExtractor>,
    pub evaluator: Arc<dyn SlipEvaluator>,
    pub notifier: Notifier,
    pub stripe: StripeClient,
    /// Reviewer key for the admin endpoints. `None` disables them.
    pub admin_api_key: Option<String>,
    pub receiver: ReceiverConfig,
    pub policy: SettlementPolicy,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"));
    Pool::builder().max_size(10).build(manager)
}
