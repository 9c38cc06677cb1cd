use serde::{Deserialize, Serialize};

/// Feature a SKU unlocks on a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Glow,
    Boost,
    Giant,
    Verified,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Glow => "glow",
            Self::Boost => "boost",
            Self::Giant => "giant",
            Self::Verified => "verified",
        }
    }
}

impl std::str::FromStr for Feature {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "glow" => Ok(Self::Glow),
            "boost" => Ok(Self::Boost),
            "giant" => Ok(Self::Giant),
            "verified" => Ok(Self::Verified),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded feature grant. One row per (order_id, feature).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub venue_id: String,
    pub order_id: String,
    pub feature: Feature,
    pub sku: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub created_at: i64,
}
