use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{AppError, Result};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_OCR_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";
const DEFAULT_OCR_SCOPE: &str = "https://www.googleapis.com/auth/cloud-vision";

/// Service credentials for the OCR provider.
///
/// Loaded from a service-account JSON file and handed to the OCR client
/// constructor; nothing reads these from process globals.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrCredentials {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ocr_scope")]
    pub scope: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

fn default_ocr_endpoint() -> String {
    DEFAULT_OCR_ENDPOINT.to_string()
}

fn default_ocr_scope() -> String {
    DEFAULT_OCR_SCOPE.to_string()
}

impl OcrCredentials {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Internal(format!("Failed to read OCR credentials: {}", e)))?;
        let mut creds: OcrCredentials = serde_json::from_str(&raw)?;
        if let Ok(endpoint) = env::var("OCR_ENDPOINT") {
            creds.endpoint = endpoint;
        }
        if let Ok(scope) = env::var("OCR_SCOPE") {
            creds.scope = scope;
        }
        Ok(creds)
    }
}

/// What a genuine slip for this deployment must show.
#[derive(Debug, Clone, Default)]
pub struct ReceiverConfig {
    pub name: String,
    /// Accepted spellings of the receiving bank (e.g. "kbank", "kasikorn", "กสิกร").
    pub banks: Vec<String>,
    pub account: String,
    /// How many trailing account digits must appear on the slip.
    pub account_tail_length: usize,
}

/// Settlement policy knobs for the slip pipeline.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    /// Strict-auto mode: anything that would need a human becomes `rejected`.
    pub manual_review_disabled: bool,
    /// Keep the raw OCR text in order metadata.
    pub store_raw_ocr: bool,
    pub duplicate_window_days: i64,
    pub commission_rate: Decimal,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            manual_review_disabled: false,
            store_raw_ocr: false,
            duplicate_window_days: 90,
            commission_rate: Decimal::new(2, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub webhook_secret: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub notify_webhook_url: Option<String>,
    pub admin_api_key: Option<String>,
    pub slip_max_bytes: usize,
    pub fetch_timeout_secs: u64,
    pub ocr_timeout_secs: u64,
    pub ocr_credentials: Option<OcrCredentials>,
    pub receiver: ReceiverConfig,
    pub policy: SettlementPolicy,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("VENUEPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_or("PORT", 3000);

        let base_url = env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let webhook_secret = env::var("WEBHOOK_SECRET").unwrap_or_else(|_| {
            tracing::warn!("WEBHOOK_SECRET is not set - all webhook deliveries will be rejected");
            String::new()
        });

        let ocr_credentials = match env_opt("OCR_CREDENTIALS_FILE") {
            Some(path) => match OcrCredentials::from_file(&path) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::error!("OCR disabled: {}", e);
                    None
                }
            },
            None => None,
        };

        let receiver = ReceiverConfig {
            name: env::var("RECEIVER_NAME").unwrap_or_default(),
            banks: env::var("RECEIVER_BANKS")
                .unwrap_or_default()
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect(),
            account: env::var("RECEIVER_ACCOUNT").unwrap_or_default(),
            account_tail_length: env_or("ACCOUNT_TAIL_LENGTH", 4),
        };

        let defaults = SettlementPolicy::default();
        let commission_rate = env_opt("COMMISSION_RATE")
            .and_then(|r| Decimal::from_str(r.trim()).ok())
            .unwrap_or(defaults.commission_rate);

        let policy = SettlementPolicy {
            manual_review_disabled: env_flag("MANUAL_REVIEW_DISABLED"),
            store_raw_ocr: env_flag("STORE_RAW_OCR"),
            duplicate_window_days: env_or("DUPLICATE_WINDOW_DAYS", defaults.duplicate_window_days),
            commission_rate,
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "venuepay.db".to_string()),
            base_url,
            dev_mode,
            webhook_secret,
            stripe_secret_key: env_opt("STRIPE_SECRET_KEY"),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
            admin_api_key: env_opt("ADMIN_API_KEY"),
            slip_max_bytes: env_or("SLIP_MAX_BYTES", 10 * 1024 * 1024),
            fetch_timeout_secs: env_or("FETCH_TIMEOUT_SECS", 10),
            ocr_timeout_secs: env_or("OCR_TIMEOUT_SECS", 15),
            ocr_credentials,
            receiver,
            policy,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
