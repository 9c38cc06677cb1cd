use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a purchase attempt.
///
/// ```text
/// pending ──┬─> pending_review ──┬─> paid ──> refunded
///           ├─> paid             ├─> rejected
///           ├─> rejected         └─> error
///           └─> error ──> paid | rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PendingReview,
    Paid,
    Rejected,
    Refunded,
    /// Verified but the entitlement could not be applied; needs manual remediation.
    Error,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingReview => "pending_review",
            Self::Paid => "paid",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Refunded)
    }

    /// States this one may move to.
    pub fn successors(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[PendingReview, Paid, Rejected, Error],
            PendingReview => &[Paid, Rejected, Error],
            Paid => &[Refunded],
            Error => &[Paid, Rejected],
            Rejected | Refunded => &[],
        }
    }

    /// States from which `self` is reachable in one step.
    pub fn predecessors(&self) -> Vec<OrderStatus> {
        ALL_STATUSES
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(*self))
            .collect()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.successors().contains(&next)
    }
}

const ALL_STATUSES: [OrderStatus; 6] = [
    OrderStatus::Pending,
    OrderStatus::PendingReview,
    OrderStatus::Paid,
    OrderStatus::Rejected,
    OrderStatus::Refunded,
    OrderStatus::Error,
];

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pending_review" => Ok(Self::PendingReview),
            "paid" => Ok(Self::Paid),
            "rejected" => Ok(Self::Rejected),
            "refunded" => Ok(Self::Refunded),
            "error" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Stripe,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankTransfer => "bank_transfer",
            Self::Stripe => "stripe",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(Self::BankTransfer),
            "stripe" => Ok(Self::Stripe),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub venue_id: String,
    pub sku: String,
    /// Amount in minor currency units (satang / cents).
    pub amount_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub status_reason: Option<String>,
    pub payment_method: PaymentMethod,
    pub slip_url: Option<String>,
    pub visitor_id: Option<String>,
    /// Buyer PII. Stored, never echoed back in API responses.
    pub buyer_profile: Option<serde_json::Value>,
    /// Verification result, hashes, client metadata.
    pub metadata: serde_json::Value,
    pub slip_image_hash: Option<String>,
    pub slip_text_hash: Option<String>,
    pub provider_session_id: Option<String>,
    pub provider_payment_intent: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub subscription_status: Option<String>,
    pub partner_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Convert a major-unit amount to minor units. `None` for amounts that are
/// not positive or do not fit.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    if amount <= Decimal::ZERO {
        return None;
    }
    (amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero) * Decimal::ONE_HUNDRED).to_i64()
}

/// Key under which raw OCR text is kept in `Order.metadata` when enabled.
pub const RAW_OCR_METADATA_KEY: &str = "raw_ocr_text";

impl Order {
    pub fn amount(&self) -> Decimal {
        Decimal::new(self.amount_minor, 2)
    }

    /// Response-safe projection: no buyer PII, no raw OCR text.
    pub fn summary(&self) -> OrderSummary {
        let mut metadata = self.metadata.clone();
        if let Some(obj) = metadata.as_object_mut() {
            obj.remove(RAW_OCR_METADATA_KEY);
        }
        OrderSummary {
            id: self.id.clone(),
            venue_id: self.venue_id.clone(),
            sku: self.sku.clone(),
            amount: self.amount(),
            currency: self.currency.clone(),
            status: self.status,
            reason: self.status_reason.clone(),
            payment_method: self.payment_method,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub id: String,
    pub venue_id: String,
    pub sku: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub payment_method: PaymentMethod,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to create a new order (always starts `pending`).
#[derive(Debug, Clone, Default)]
pub struct CreateOrder {
    pub venue_id: String,
    pub sku: String,
    pub amount_minor: i64,
    pub currency: String,
    pub payment_method: Option<PaymentMethod>,
    pub slip_url: Option<String>,
    pub visitor_id: Option<String>,
    pub buyer_profile: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub provider_session_id: Option<String>,
    pub partner_id: Option<String>,
}

/// Shipping/billing identity the buyer must supply with a slip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuyerProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address_line1: Option<String>,
    pub country: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
}

impl BuyerProfile {
    /// Field paths (prefixed with `buyer_profile.`) that are missing or blank.
    pub fn missing_fields(&self) -> Vec<String> {
        let required = [
            ("full_name", &self.full_name),
            ("phone", &self.phone),
            ("email", &self.email),
            ("address_line1", &self.address_line1),
            ("country", &self.country),
            ("province", &self.province),
            ("district", &self.district),
            ("postal_code", &self.postal_code),
        ];
        required
            .iter()
            .filter(|(_, v)| v.as_deref().map(str::trim).unwrap_or("").is_empty())
            .map(|(name, _)| format!("buyer_profile.{}", name))
            .collect()
    }
}
