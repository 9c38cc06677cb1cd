use std::time::Duration;

use reqwest::{Client, header::CONTENT_LENGTH};
use sha2::{Digest, Sha256};
use url::Url;

use super::SlipError;
use crate::error::{AppError, Result};

/// Downloaded slip bytes plus their content hash.
#[derive(Debug, Clone)]
pub struct FetchedSlip {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of the raw bytes.
    pub sha256: String,
}

/// Size-capped, timeout-bounded GET of a slip image.
#[derive(Debug, Clone)]
pub struct SlipFetcher {
    client: Client,
    max_bytes: usize,
}

impl SlipFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, max_bytes })
    }

    /// Only absolute http(s) URLs are accepted.
    pub fn parse_url(raw: &str) -> std::result::Result<Url, SlipError> {
        let url = Url::parse(raw.trim()).map_err(|e| SlipError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(SlipError::InvalidUrl(format!("unsupported scheme '{}'", other))),
        }
    }

    pub async fn fetch(&self, raw_url: &str) -> std::result::Result<FetchedSlip, SlipError> {
        let url = Self::parse_url(raw_url)?;

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SlipError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SlipError::FetchFailed(format!(
                "HTTP {} from object storage",
                response.status()
            )));
        }

        // Trust a declared length only to reject early; the streamed count is
        // what actually enforces the cap.
        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_bytes as u64) {
            return Err(SlipError::PayloadTooLarge {
                limit: self.max_bytes,
            });
        }

        let mut bytes = Vec::with_capacity(declared.unwrap_or(0).min(self.max_bytes as u64) as usize);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SlipError::FetchFailed(e.to_string()))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(SlipError::PayloadTooLarge {
                    limit: self.max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(SlipError::FetchFailed("empty response body".into()));
        }

        let sha256 = sha256_hex(&bytes);
        tracing::debug!("Fetched slip: {} bytes, sha256={}", bytes.len(), sha256);

        Ok(FetchedSlip { bytes, sha256 })
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
