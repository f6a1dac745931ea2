use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Ebay,
    Facebook,
    Mercari,
    Poshmark,
}

impl Marketplace {
    pub const ALL: [Marketplace; 4] = [
        Marketplace::Ebay,
        Marketplace::Facebook,
        Marketplace::Mercari,
        Marketplace::Poshmark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Ebay => "ebay",
            Marketplace::Facebook => "facebook",
            Marketplace::Mercari => "mercari",
            Marketplace::Poshmark => "poshmark",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "ebay" => Some(Marketplace::Ebay),
            "facebook" | "fb" => Some(Marketplace::Facebook),
            "mercari" => Some(Marketplace::Mercari),
            "poshmark" => Some(Marketplace::Poshmark),
            _ => None,
        }
    }
}

impl std::fmt::Display for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Available,
    Listed,
    Sold,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default)]
    pub auto_delist_on_sale: bool,
    #[serde(default)]
    pub status: ItemStatus,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    NotListed,
    Active,
    Sold,
    Removed,
    Error,
}

/// One record per `(inventory_item_id, marketplace)`. `created_at` never
/// changes after insert; `updated_at` advances on every write.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceListing {
    pub id: Uuid,
    pub inventory_item_id: String,
    pub marketplace: Marketplace,
    pub marketplace_listing_id: Option<String>,
    pub marketplace_listing_url: Option<String>,
    pub status: ListingStatus,
    pub listed_at: Option<DateTime<Utc>>,
    pub delisted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchTarget {
    General,
    Marketplace,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub marketplace: Marketplace,
    pub field: String,
    pub patch_target: PatchTarget,
    pub suggested_value: Option<Value>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Recomputed on every validation pass; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreflightResult {
    pub ready: Vec<Marketplace>,
    pub fixes_needed: Vec<ValidationIssue>,
}

impl PreflightResult {
    pub fn is_clean(&self) -> bool {
        self.fixes_needed.is_empty()
    }
}

/// The marketplace-neutral payload handed to an adapter.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ListingPayload {
    pub sku: String,
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
    pub currency: String,
    pub condition: String,
    pub brand: String,
    pub category: String,
    pub images: Vec<String>,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marketplace_codes_round_trip() {
        for marketplace in Marketplace::ALL {
            assert_eq!(
                Marketplace::from_str(marketplace.as_str()),
                Some(marketplace)
            );
        }
        assert_eq!(Marketplace::from_str("  EBAY "), Some(Marketplace::Ebay));
        assert_eq!(Marketplace::from_str("etsy"), None);
    }

    #[test]
    fn inventory_item_defaults() {
        let item: InventoryItem =
            serde_json::from_str(r#"{"id":"i1","title":"Vintage denim jacket"}"#).expect("item");
        assert_eq!(item.quantity, 1);
        assert_eq!(item.status, ItemStatus::Available);
        assert!(!item.auto_delist_on_sale);
        assert!(item.images.is_empty());
    }
}
