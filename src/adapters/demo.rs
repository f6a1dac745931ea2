use super::{AdapterError, ListingReceipt, MarketplaceAdapter, SoldNotice};
use crate::credentials::Credential;
use crate::models::{ListingPayload, Marketplace};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Offline stand-in for a marketplace API. Listings live in an in-process
/// map; sales are seeded through `mark_sold` so sold-sync can be exercised
/// without network access.
pub struct DemoAdapter {
    marketplace: Marketplace,
    active: Arc<Mutex<HashMap<String, String>>>,
    sold: Arc<Mutex<Vec<SoldNotice>>>,
    rng: Arc<Mutex<SmallRng>>,
}

impl DemoAdapter {
    pub fn new(marketplace: Marketplace) -> Self {
        Self {
            marketplace,
            active: Arc::new(Mutex::new(HashMap::new())),
            sold: Arc::new(Mutex::new(Vec::new())),
            rng: Arc::new(Mutex::new(SmallRng::from_os_rng())),
        }
    }

    /// Queues a sale for the next `sync_sold_items` call.
    pub async fn mark_sold(&self, listing_id: &str) {
        let mut sold = self.sold.lock().await;
        sold.push(SoldNotice {
            listing_id: listing_id.to_string(),
            sold_at: Some(Utc::now()),
            raw: json!({ "source": "demo" }),
        });
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    async fn next_listing_id(&self) -> String {
        let mut rng = self.rng.lock().await;
        format!("{}-{:010}", self.marketplace, rng.random_range(0..10_000_000_000u64))
    }
}

#[async_trait]
impl MarketplaceAdapter for DemoAdapter {
    fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    async fn list_item(
        &self,
        payload: &ListingPayload,
        _credential: &Credential,
    ) -> Result<ListingReceipt, AdapterError> {
        if payload.title.trim().is_empty() {
            return Err(AdapterError::Rejected("empty title".to_string()));
        }
        let listing_id = self.next_listing_id().await;
        let mut active = self.active.lock().await;
        active.insert(listing_id.clone(), payload.sku.clone());
        Ok(ListingReceipt {
            listing_url: Some(format!(
                "https://{}.example.com/listing/{listing_id}",
                self.marketplace
            )),
            raw: json!({
                "sku": payload.sku,
                "price": payload.price,
                "currency": payload.currency,
                "demo": true,
            }),
            listing_id,
        })
    }

    async fn delist_item(
        &self,
        listing_id: &str,
        _credential: &Credential,
    ) -> Result<(), AdapterError> {
        let mut active = self.active.lock().await;
        if active.remove(listing_id).is_none() {
            return Err(AdapterError::UnknownListing(listing_id.to_string()));
        }
        Ok(())
    }

    async fn sync_sold_items(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<SoldNotice>, AdapterError> {
        let mut sold = self.sold.lock().await;
        let drained = sold.drain(..).collect::<Vec<_>>();
        let mut active = self.active.lock().await;
        for notice in &drained {
            active.remove(&notice.listing_id);
        }
        Ok(drained)
    }
}
