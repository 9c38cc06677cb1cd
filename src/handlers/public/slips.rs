use axum::extract::State;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{
    BuyerProfile, CreateOrder, Order, OrderSummary, PaymentMethod, RAW_OCR_METADATA_KEY,
    minor_units,
};
use crate::notify::{NotifyEvent, OrderNotification};
use crate::settlement::{self, Assessment, Decision, DuplicateCheck};
use crate::slip::{Expectations, SlipError, SlipFetcher, Verdict, duplicate};

/// Manual bank-transfer submission. Every field is optional at the serde
/// level so that missing ones come back as a field list instead of a parse
/// error.
#[derive(Debug, Default, Deserialize)]
pub struct SlipIntakeRequest {
    #[serde(default)]
    pub venue_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub slip_url: Option<String>,
    #[serde(default)]
    pub visitor_id: Option<String>,
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub consent_personal_data: Option<bool>,
    #[serde(default)]
    pub buyer_profile: Option<BuyerProfile>,
}

#[derive(Debug, Serialize)]
pub struct SlipIntakeResponse {
    pub success: bool,
    pub order: OrderSummary,
}

/// A request that passed validation.
struct SlipIntake {
    venue_id: String,
    sku: String,
    amount: Decimal,
    amount_minor: i64,
    slip_url: String,
    buyer_profile: BuyerProfile,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SlipIntakeRequest {
    /// Collect every problem at once, so the client can fix the form in one go.
    fn validate(&self) -> Result<SlipIntake> {
        let mut missing = Vec::new();

        let venue_id = non_blank(&self.venue_id);
        if venue_id.is_none() {
            missing.push("venue_id".to_string());
        }
        let sku = non_blank(&self.sku);
        if sku.is_none() {
            missing.push("sku".to_string());
        }
        let amount_minor = self.amount.and_then(minor_units);
        if amount_minor.is_none() {
            missing.push("amount".to_string());
        }
        let slip_url = non_blank(&self.slip_url);
        match slip_url.as_deref().map(SlipFetcher::parse_url) {
            Some(Ok(_)) => {}
            _ => missing.push("slip_url".to_string()),
        }
        if self.consent_personal_data != Some(true) {
            missing.push("consent_personal_data".to_string());
        }
        let buyer_profile = self.buyer_profile.clone().unwrap_or_default();
        missing.extend(buyer_profile.missing_fields());

        match (venue_id, sku, self.amount, amount_minor, slip_url) {
            (Some(venue_id), Some(sku), Some(amount), Some(amount_minor), Some(slip_url))
                if missing.is_empty() =>
            {
                Ok(SlipIntake {
                    venue_id,
                    sku,
                    amount,
                    amount_minor,
                    slip_url,
                    buyer_profile,
                })
            }
            _ => Err(AppError::Validation(missing)),
        }
    }
}

/// Fetch, read and score a slip. The image hash survives even when OCR
/// fails, so byte-identical resubmissions are still caught.
struct SlipAssessment {
    image_hash: Option<String>,
    outcome: std::result::Result<(Verdict, String), SlipError>,
}

async fn assess_slip(state: &AppState, slip_url: &str, expected: &Expectations) -> SlipAssessment {
    let fetched = match state.fetcher.fetch(slip_url).await {
        Ok(f) => f,
        Err(e) => {
            return SlipAssessment {
                image_hash: None,
                outcome: Err(e),
            };
        }
    };

    let image_hash = Some(fetched.sha256.clone());
    let outcome = match state.ocr.extract_text(&fetched.bytes).await {
        Ok(ocr) => {
            let mut verdict = state.evaluator.evaluate(&ocr.text, expected);
            verdict.image_hash = image_hash.clone();
            Ok((verdict, ocr.text))
        }
        Err(e) => Err(e),
    };

    SlipAssessment {
        image_hash,
        outcome,
    }
}

/// Everything stored on the order once its slip has been judged.
struct SlipEvaluation<'a> {
    client: Option<Value>,
    assessment: &'a SlipAssessment,
    text_hash: Option<&'a str>,
    duplicate: DuplicateCheck<'a>,
    decision: Decision,
    store_raw_ocr: bool,
}

impl SlipEvaluation<'_> {
    fn metadata(&self) -> Result<Value> {
        let mut metadata = Map::new();
        if let Some(client) = &self.client {
            metadata.insert("client".into(), client.clone());
        }
        match &self.assessment.outcome {
            Ok((verdict, text)) => {
                metadata.insert("verification".into(), serde_json::to_value(verdict)?);
                if self.store_raw_ocr {
                    metadata.insert(RAW_OCR_METADATA_KEY.into(), Value::String(text.clone()));
                }
            }
            Err(e) => {
                metadata.insert(
                    "verification".into(),
                    json!({ "status": "unavailable", "reason": e.reason(), "error": e.to_string() }),
                );
            }
        }
        metadata.insert("image_hash".into(), json!(self.assessment.image_hash));
        metadata.insert("text_hash".into(), json!(self.text_hash));
        match self.duplicate {
            DuplicateCheck::Found(prior) => {
                metadata.insert("duplicate_of".into(), json!(prior.order_id));
            }
            DuplicateCheck::Failed => {
                metadata.insert("duplicate_check".into(), json!("failed"));
            }
            DuplicateCheck::Clear => {}
        }
        metadata.insert(
            "decision".into(),
            json!({ "status": self.decision.status, "reason": self.decision.reason }),
        );
        Ok(Value::Object(metadata))
    }
}

fn record_and_settle(conn: &mut Connection, order: &Order, evaluation: &SlipEvaluation<'_>) -> Result<Order> {
    queries::record_slip_evaluation(
        conn,
        &order.id,
        evaluation.assessment.image_hash.as_deref(),
        evaluation.text_hash,
        &evaluation.metadata()?,
    )?;
    settlement::settle(conn, order, evaluation.decision)
}

pub async fn submit_slip(
    State(state): State<AppState>,
    Json(request): Json<SlipIntakeRequest>,
) -> Result<Json<SlipIntakeResponse>> {
    let intake = request.validate()?;

    let order = {
        let conn = state.db.get()?;
        queries::create_order(
            &conn,
            &CreateOrder {
                venue_id: intake.venue_id.clone(),
                sku: intake.sku.clone(),
                amount_minor: intake.amount_minor,
                currency: request.currency.clone().unwrap_or_default(),
                payment_method: Some(PaymentMethod::BankTransfer),
                slip_url: Some(intake.slip_url.clone()),
                visitor_id: request.visitor_id.clone(),
                buyer_profile: Some(serde_json::to_value(&intake.buyer_profile)?),
                metadata: request.metadata.clone().map(|client| json!({ "client": client })),
                partner_id: non_blank(&request.partner_id),
                ..Default::default()
            },
        )?
    };
    tracing::info!(
        "Slip order {} created for venue {} ({})",
        order.id,
        order.venue_id,
        order.sku
    );

    let expected = Expectations::new(intake.amount, &state.receiver);
    let assessment = assess_slip(&state, &intake.slip_url, &expected).await;

    let mut conn = state.db.get()?;

    let text_hash = match &assessment.outcome {
        Ok((verdict, _)) => verdict.text_hash.clone(),
        Err(_) => None,
    };
    let duplicate = duplicate::find_duplicate(
        &conn,
        &order.id,
        assessment.image_hash.as_deref(),
        text_hash.as_deref(),
        state.policy.duplicate_window_days,
    );
    let duplicate_check = match &duplicate {
        Ok(Some(prior)) => DuplicateCheck::Found(prior),
        Ok(None) => DuplicateCheck::Clear,
        Err(e) => {
            tracing::error!("Duplicate check failed for order {}: {}", order.id, e);
            DuplicateCheck::Failed
        }
    };

    let decision = match &assessment.outcome {
        Ok((verdict, _)) => settlement::resolve_status(
            Assessment::Evaluated(verdict),
            duplicate_check,
            &state.policy,
        ),
        Err(e) => {
            tracing::warn!("Slip for order {} could not be read: {}", order.id, e);
            settlement::resolve_status(Assessment::Unavailable(e), duplicate_check, &state.policy)
        }
    };

    let evaluation = SlipEvaluation {
        client: request.metadata,
        assessment: &assessment,
        text_hash: text_hash.as_deref(),
        duplicate: duplicate_check,
        decision,
        store_raw_ocr: state.policy.store_raw_ocr,
    };
    let settled = match record_and_settle(&mut conn, &order, &evaluation) {
        Ok(settled) => settled,
        Err(e) => {
            tracing::error!("Slip order {} failed to settle: {}", order.id, e);
            settlement::settle_after_failure(&conn, &order, decision)?
        }
    };
    tracing::info!(
        "Slip order {} settled as {} ({})",
        settled.id,
        settled.status,
        settled.status_reason.as_deref().unwrap_or("-")
    );

    state
        .notifier
        .notify(OrderNotification::from_order(NotifyEvent::SlipOrderSettled, &settled));

    Ok(Json(SlipIntakeResponse {
        success: true,
        order: settled.summary(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> SlipIntakeRequest {
        SlipIntakeRequest {
            venue_id: Some("venue_1".into()),
            sku: Some("glow_7d".into()),
            amount: Some(Decimal::new(19900, 2)),
            slip_url: Some("https://storage.example.com/slips/1.jpg".into()),
            consent_personal_data: Some(true),
            buyer_profile: Some(BuyerProfile {
                full_name: Some("Somchai Jaidee".into()),
                phone: Some("0812345678".into()),
                email: Some("somchai@example.com".into()),
                address_line1: Some("99 Silom Road".into()),
                country: Some("TH".into()),
                province: Some("Bangkok".into()),
                district: Some("Bang Rak".into()),
                postal_code: Some("10500".into()),
                address_line2: None,
            }),
            ..Default::default()
        }
    }

    fn missing_fields(request: &SlipIntakeRequest) -> Vec<String> {
        match request.validate() {
            Err(AppError::Validation(fields)) => fields,
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_complete_request_validates() {
        let intake = complete().validate().unwrap();
        assert_eq!(intake.amount_minor, 19900);
    }

    #[test]
    fn test_consent_must_be_true() {
        let mut request = complete();
        request.consent_personal_data = Some(false);
        assert_eq!(missing_fields(&request), vec!["consent_personal_data"]);
    }

    #[test]
    fn test_missing_profile_lists_every_field() {
        let mut request = complete();
        request.buyer_profile = None;
        let fields = missing_fields(&request);
        assert_eq!(fields.len(), 8);
        assert!(fields.contains(&"buyer_profile.postal_code".to_string()));
    }

    #[test]
    fn test_non_http_slip_url_is_rejected() {
        let mut request = complete();
        request.slip_url = Some("file:///etc/passwd".into());
        assert_eq!(missing_fields(&request), vec!["slip_url"]);
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let mut request = complete();
        request.amount = Some(Decimal::ZERO);
        assert_eq!(missing_fields(&request), vec!["amount"]);
    }
}
