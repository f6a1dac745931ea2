pub mod demo;
pub mod ebay;

use crate::credentials::Credential;
use crate::models::{ListingPayload, Marketplace};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Any adapter call may fail with this; the orchestrator treats it as
/// recoverable and local to that one marketplace.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("marketplace rejected the listing: {0}")]
    Rejected(String),
    #[error("listing `{0}` not found on marketplace")]
    UnknownListing(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingReceipt {
    pub listing_id: String,
    pub listing_url: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoldNotice {
    pub listing_id: String,
    pub sold_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

#[async_trait]
pub trait MarketplaceAdapter: Send + Sync {
    fn marketplace(&self) -> Marketplace;

    async fn list_item(
        &self,
        payload: &ListingPayload,
        credential: &Credential,
    ) -> Result<ListingReceipt, AdapterError>;

    async fn delist_item(
        &self,
        listing_id: &str,
        credential: &Credential,
    ) -> Result<(), AdapterError>;

    async fn sync_sold_items(
        &self,
        credential: &Credential,
    ) -> Result<Vec<SoldNotice>, AdapterError>;
}

pub type AdapterMap = HashMap<Marketplace, Arc<dyn MarketplaceAdapter>>;

/// The dispatch map plus concrete handles to the demo adapters, which the
/// demo endpoints use to seed sales and inspect listings.
pub struct AdapterSet {
    pub map: AdapterMap,
    pub demos: HashMap<Marketplace, Arc<demo::DemoAdapter>>,
}

/// eBay talks to the real API when `EBAY_ENABLE_NETWORK` is set; every other
/// marketplace (and eBay in offline builds) gets the demo adapter so the
/// whole service runs end-to-end without network access.
pub fn build_adapters() -> AdapterSet {
    let mut map: AdapterMap = HashMap::new();
    let mut demos = HashMap::new();
    for marketplace in Marketplace::ALL {
        let adapter = Arc::new(demo::DemoAdapter::new(marketplace));
        demos.insert(marketplace, adapter.clone());
        map.insert(marketplace, adapter as Arc<dyn MarketplaceAdapter>);
    }
    if parse_env_bool("EBAY_ENABLE_NETWORK") {
        map.insert(Marketplace::Ebay, Arc::new(ebay::EbayAdapter::new()));
        demos.remove(&Marketplace::Ebay);
    }
    AdapterSet { map, demos }
}

pub(crate) fn parse_env_bool(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
