//! Bank-transfer slip verification.
//!
//! The pipeline runs leaf-first: [`SlipFetcher`] pulls and hashes the image,
//! a [`TextExtractor`] turns it into text, a [`SlipEvaluator`] scores the text
//! against what this deployment expects, and [`duplicate::find_duplicate`]
//! checks both hashes against recent orders.

pub mod duplicate;
pub mod evaluate;
pub mod fetch;
pub mod ocr;

pub use evaluate::{
    Expectations, HeuristicEvaluator, ReceiverSignals, Signals, SlipEvaluator, Verdict,
    VerdictReason, VerdictStatus,
};
pub use fetch::{FetchedSlip, SlipFetcher};
pub use ocr::{OcrOutput, TextExtractor, UnavailableExtractor, VisionOcrClient};

use thiserror::Error;

/// Failures before a slip can be evaluated.
///
/// None of these are fatal to an intake request: they become the order's
/// status reason and steer it to review (or rejection).
#[derive(Error, Debug)]
pub enum SlipError {
    #[error("Invalid slip URL: {0}")]
    InvalidUrl(String),

    #[error("Slip exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Failed to fetch slip: {0}")]
    FetchFailed(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),
}

impl SlipError {
    pub fn reason(&self) -> VerdictReason {
        match self {
            SlipError::InvalidUrl(_) => VerdictReason::InvalidUrl,
            SlipError::PayloadTooLarge { .. } => VerdictReason::PayloadTooLarge,
            SlipError::FetchFailed(_) => VerdictReason::FetchFailed,
            SlipError::OcrFailed(_) => VerdictReason::OcrFailed,
        }
    }
}
