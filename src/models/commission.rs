use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionEntryType {
    Accrual,
    Clawback,
}

impl CommissionEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accrual => "accrual",
            Self::Clawback => "clawback",
        }
    }
}

impl std::str::FromStr for CommissionEntryType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accrual" => Ok(Self::Accrual),
            "clawback" => Ok(Self::Clawback),
            _ => Err(()),
        }
    }
}

/// Append-only partner commission row. Corrections are new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionLedgerEntry {
    pub id: String,
    pub partner_id: String,
    pub order_id: String,
    pub venue_id: String,
    pub entry_type: CommissionEntryType,
    /// Minor units; negative for clawbacks.
    pub amount_minor: i64,
    pub currency: String,
    /// "pending" until paid out by finance.
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateCommissionEntry {
    pub partner_id: String,
    pub order_id: String,
    pub venue_id: String,
    pub entry_type: CommissionEntryType,
    pub amount_minor: i64,
    pub currency: String,
}

/// Which partner brought a venue in, recorded on first attributed checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerReferral {
    pub partner_id: String,
    pub venue_id: String,
    pub first_order_id: String,
    pub created_at: i64,
}
