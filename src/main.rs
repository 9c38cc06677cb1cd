use clap::Parser;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use venuepay::config::Config;
use venuepay::db::{AppState, create_pool, init_db};
use venuepay::handlers;
use venuepay::notify::Notifier;
use venuepay::payments::{StripeClient, StripeConfig};
use venuepay::slip::{HeuristicEvaluator, SlipFetcher, TextExtractor, UnavailableExtractor, VisionOcrClient};

/// JSON request bodies are small; slips travel by URL, never inline.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

#[derive(Parser, Debug)]
#[command(name = "venuepay")]
#[command(about = "Slip verification and payment settlement for venue entitlements")]
struct Cli {
    /// Create the database schema and exit
    #[arg(long)]
    init_only: bool,
}

fn build_ocr(config: &Config) -> Arc<dyn TextExtractor> {
    let Some(credentials) = config.ocr_credentials.clone() else {
        tracing::warn!("OCR_CREDENTIALS_FILE not set - every slip will go to review");
        return Arc::new(UnavailableExtractor);
    };

    match VisionOcrClient::new(credentials, Duration::from_secs(config.ocr_timeout_secs)) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("OCR client disabled: {}", e);
            Arc::new(UnavailableExtractor)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "venuepay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    if cli.init_only {
        tracing::info!("Schema initialized at {}", config.database_path);
        return;
    }

    let fetcher = SlipFetcher::new(
        Duration::from_secs(config.fetch_timeout_secs),
        config.slip_max_bytes,
    )
    .expect("Failed to create slip fetcher");

    let notify_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to create notifier client");

    if config.policy.manual_review_disabled {
        tracing::info!("Manual review disabled: unverifiable slips are rejected");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        fetcher,
        ocr: build_ocr(&config),
        evaluator: Arc::new(HeuristicEvaluator),
        notifier: Notifier::new(notify_client, config.notify_webhook_url.clone()),
        stripe: StripeClient::new(&StripeConfig {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.stripe_api_base.clone(),
        }),
        admin_api_key: config.admin_api_key.clone(),
        receiver: config.receiver.clone(),
        policy: config.policy.clone(),
    };

    let app = handlers::router(state.clone())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Venuepay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
