//! OCR adapter.
//!
//! Exchanges a signed service-account assertion for a bearer token, then
//! calls a text-detection endpoint. The token is cached for the life of the
//! client and refreshed shortly before it expires.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use jwt_simple::prelude::{Claims, RS256KeyPair, RSAKeyPairLike};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::SlipError;
use crate::config::OcrCredentials;
use crate::error::{AppError, Result};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; providers cap this at one hour.
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Refresh the cached token this long before the provider says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Extracted text plus whatever structured annotations the provider returned.
#[derive(Debug, Clone, Default)]
pub struct OcrOutput {
    pub text: String,
    pub raw_annotations: serde_json::Value,
}

/// Turns image bytes into text.
///
/// Finding no text is not an error (empty `text`); only transport or auth
/// failures are.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> std::result::Result<OcrOutput, SlipError>;
}

/// Stand-in used when no OCR credentials are configured.
pub struct UnavailableExtractor;

#[async_trait]
impl TextExtractor for UnavailableExtractor {
    async fn extract_text(&self, _image: &[u8]) -> std::result::Result<OcrOutput, SlipError> {
        Err(SlipError::OcrFailed("OCR is not configured".into()))
    }
}

#[derive(Serialize, Deserialize)]
struct ScopeClaim {
    scope: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<AnnotateError>,
}

#[derive(Serialize, Deserialize, Clone)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnnotateError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Text detection over a vision-style `images:annotate` endpoint.
pub struct VisionOcrClient {
    credentials: OcrCredentials,
    key_pair: RS256KeyPair,
    client: Client,
    token: RwLock<Option<CachedToken>>,
}

impl VisionOcrClient {
    pub fn new(credentials: OcrCredentials, timeout: Duration) -> Result<Self> {
        let key_pair = RS256KeyPair::from_pem(&credentials.private_key)
            .map_err(|e| AppError::Internal(format!("Invalid OCR private key: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            key_pair,
            client,
            token: RwLock::new(None),
        })
    }

    fn signed_assertion(&self) -> std::result::Result<String, SlipError> {
        let claims = Claims::with_custom_claims(
            ScopeClaim {
                scope: self.credentials.scope.clone(),
            },
            jwt_simple::prelude::Duration::from_secs(ASSERTION_LIFETIME_SECS),
        )
        .with_issuer(&self.credentials.client_email)
        .with_audience(&self.credentials.token_uri);

        self.key_pair
            .sign(claims)
            .map_err(|e| SlipError::OcrFailed(format!("Failed to sign assertion: {}", e)))
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|t| Instant::now() < t.refresh_at)
            .map(|t| t.access_token.clone())
    }

    fn invalidate_token(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    async fn access_token(&self) -> std::result::Result<String, SlipError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let assertion = self.signed_assertion()?;
        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SlipError::OcrFailed(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SlipError::OcrFailed(format!(
                "Token endpoint returned HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SlipError::OcrFailed(format!("Invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        tracing::debug!("Obtained OCR access token (valid {}s)", token.expires_in);

        Ok(token.access_token)
    }
}

#[async_trait]
impl TextExtractor for VisionOcrClient {
    async fn extract_text(&self, image: &[u8]) -> std::result::Result<OcrOutput, SlipError> {
        let token = self.access_token().await?;

        let body = serde_json::json!({
            "requests": [{
                "image": { "content": BASE64.encode(image) },
                "features": [{ "type": "TEXT_DETECTION" }],
            }]
        });

        let response = self
            .client
            .post(&self.credentials.endpoint)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SlipError::OcrFailed(format!("Annotate request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.invalidate_token();
        }
        if !status.is_success() {
            return Err(SlipError::OcrFailed(format!("Annotate endpoint returned HTTP {}", status)));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| SlipError::OcrFailed(format!("Invalid annotate response: {}", e)))?;

        let Some(result) = parsed.responses.into_iter().next() else {
            return Ok(OcrOutput::default());
        };

        if let Some(err) = result.error {
            return Err(SlipError::OcrFailed(format!(
                "Provider error {}: {}",
                err.code, err.message
            )));
        }

        let text = match result.full_text_annotation {
            Some(full) if !full.text.is_empty() => full.text,
            _ => result
                .text_annotations
                .first()
                .map(|a| a.description.clone())
                .unwrap_or_default(),
        };

        let raw_annotations = serde_json::to_value(&result.text_annotations)
            .unwrap_or(serde_json::Value::Null);

        tracing::debug!(
            "OCR returned {} chars across {} annotations",
            text.chars().count(),
            result.text_annotations.len()
        );

        Ok(OcrOutput {
            text,
            raw_annotations,
        })
    }
}
