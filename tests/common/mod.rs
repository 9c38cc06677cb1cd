//! Test utilities and fixtures for Venuepay integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::Value;
use tower::ServiceExt;

// Re-export the main library crate
pub use venuepay::config::{ReceiverConfig, SettlementPolicy};
pub use venuepay::db::{AppState, init_db, queries};
pub use venuepay::handlers;
pub use venuepay::models::*;
pub use venuepay::notify::Notifier;
pub use venuepay::payments::{StripeClient, StripeConfig};
pub use venuepay::slip::{HeuristicEvaluator, OcrOutput, SlipError, SlipFetcher, TextExtractor};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const TEST_ADMIN_KEY: &str = "admin-test-key";
pub const TEST_RECEIVER_NAME: &str = "บจก. เวนิวเพย์";

/// Slip text the heuristic evaluator verifies for an expected amount of 199.00.
pub const VERIFIED_SLIP_TEXT: &str =
    "Transfer successful\nTo: บจก. เวนิวเพย์\nBank: KBANK\nAmount 199.00 THB";

pub const ONE_DAY: i64 = 86400;

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("Failed to enable foreign keys");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// OCR stand-in: returns fixed text, or fails like a dead OCR service.
pub struct FixedTextExtractor {
    text: Option<String>,
}

impl FixedTextExtractor {
    pub fn text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text.to_string()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { text: None })
    }
}

#[async_trait]
impl TextExtractor for FixedTextExtractor {
    async fn extract_text(&self, _image: &[u8]) -> Result<OcrOutput, SlipError> {
        match &self.text {
            Some(text) => Ok(OcrOutput {
                text: text.clone(),
                raw_annotations: Value::Null,
            }),
            None => Err(SlipError::OcrFailed("OCR service timed out".into())),
        }
    }
}

pub fn test_receiver() -> ReceiverConfig {
    ReceiverConfig {
        name: TEST_RECEIVER_NAME.to_string(),
        banks: vec!["kbank".to_string(), "kasikorn".to_string(), "กสิกร".to_string()],
        account: "123-4-56789-0".to_string(),
        account_tail_length: 4,
    }
}

/// Knobs for building a test `AppState`.
pub struct TestStateOptions {
    pub ocr: Arc<dyn TextExtractor>,
    pub policy: SettlementPolicy,
    pub slip_max_bytes: usize,
    pub admin_api_key: Option<String>,
}

impl Default for TestStateOptions {
    fn default() -> Self {
        Self {
            ocr: FixedTextExtractor::text(VERIFIED_SLIP_TEXT),
            policy: SettlementPolicy::default(),
            slip_max_bytes: 1024 * 1024,
            admin_api_key: Some(TEST_ADMIN_KEY.to_string()),
        }
    }
}

/// Create an AppState for testing with an in-memory database.
///
/// Each in-memory SQLite connection is its own database, so the pool holds
/// exactly one connection.
pub fn create_test_app_state_with(options: TestStateOptions) -> AppState {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        base_url: "http://localhost:3000".to_string(),
        fetcher: SlipFetcher::new(Duration::from_secs(5), options.slip_max_bytes).unwrap(),
        ocr: options.ocr,
        evaluator: Arc::new(HeuristicEvaluator),
        notifier: Notifier::disabled(),
        stripe: StripeClient::new(&StripeConfig {
            secret_key: None,
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
        }),
        admin_api_key: options.admin_api_key,
        receiver: test_receiver(),
        policy: options.policy,
    }
}

pub fn create_test_app_state() -> AppState {
    create_test_app_state_with(TestStateOptions::default())
}

/// Full router with state attached.
pub fn test_app(state: AppState) -> Router {
    handlers::router(state.clone()).with_state(state)
}

/// POST a JSON body and return the status plus the parsed response body.
pub async fn post_json(app: Router, uri: &str, body: &Value, headers: &[(&str, &str)]) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let response = app
        .oneshot(builder.body(Body::from(serde_json::to_vec(body).unwrap())).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

// ============ Object storage stand-in ============

type SlipFiles = Arc<HashMap<String, Vec<u8>>>;

async fn serve_slip(State(files): State<SlipFiles>, Path(name): Path<String>) -> Response {
    match files.get(&name) {
        Some(bytes) => (StatusCode::OK, [("content-type", "image/jpeg")], bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve `files` at `http://127.0.0.1:<port>/slips/<name>`. Returns the base URL.
pub async fn spawn_slip_server(files: Vec<(&str, Vec<u8>)>) -> String {
    let files: SlipFiles = Arc::new(
        files
            .into_iter()
            .map(|(name, bytes)| (name.to_string(), bytes))
            .collect(),
    );
    let app = Router::new()
        .route("/slips/{name}", get(serve_slip))
        .with_state(files);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============ Orders ============

pub fn create_test_order(conn: &Connection, venue_id: &str, sku: &str, amount_minor: i64) -> Order {
    queries::create_order(
        conn,
        &CreateOrder {
            venue_id: venue_id.to_string(),
            sku: sku.to_string(),
            amount_minor,
            ..Default::default()
        },
    )
    .expect("Failed to create test order")
}

// ============ Webhooks ============

pub fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// A valid `stripe-signature` header for `payload`, signed now.
pub fn stripe_signature_header(payload: &[u8]) -> String {
    let timestamp = now().to_string();
    let signature = compute_stripe_signature(payload, TEST_WEBHOOK_SECRET, &timestamp);
    format!("t={},v1={}", timestamp, signature)
}

/// Deliver a signed Stripe event to the webhook endpoint.
pub async fn deliver_stripe_event(state: &AppState, event: &Value) -> (StatusCode, Value) {
    let payload = serde_json::to_vec(event).unwrap();
    let header = stripe_signature_header(&payload);
    let response = test_app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/stripe")
                .header("content-type", "application/json")
                .header("stripe-signature", header)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

pub fn stripe_event(id: &str, event_type: &str, object: Value) -> Value {
    serde_json::json!({
        "id": id,
        "type": event_type,
        "data": { "object": object }
    })
}
