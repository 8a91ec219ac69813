use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row as read from the listing, before reconciliation.
///
/// `None` means "not resolved on this run" and never clears a stored value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedAsset {
    pub rank: Option<u32>,
    pub name: String,
    pub symbol: Option<String>,
    pub slug: Option<String>,
    pub icon: Option<String>,
    pub price: f64,
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
    pub volume_native: Option<String>,
    pub supply: Option<String>,
    pub change: Option<String>,
    pub graph: Option<String>,
}

impl ExtractedAsset {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            price,
            ..Default::default()
        }
    }
}

/// The persisted asset document, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    /// 0 until a rank has been seen.
    pub rank: u32,
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    pub slug: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub volume_native: Option<String>,
    #[serde(default)]
    pub supply: String,
    #[serde(default)]
    pub change: String,
    #[serde(default)]
    pub graph: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    pub fn has_rank(&self) -> bool {
        self.rank > 0
    }
}
