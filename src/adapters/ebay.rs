use super::{AdapterError, ListingReceipt, MarketplaceAdapter, SoldNotice};
use crate::credentials::Credential;
use crate::http::build_client;
use crate::models::{ListingPayload, Marketplace};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use urlencoding::encode;

static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

static ROOT: Lazy<String> = Lazy::new(|| {
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

static ITEM_ROOT: Lazy<String> = Lazy::new(|| {
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://www.ebay.com/itm".to_string()
    } else {
        "https://sandbox.ebay.com/itm".to_string()
    }
});

static MARKETPLACE_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_MARKETPLACE_ID").unwrap_or_else(|_| "EBAY_US".to_string()));

static CATEGORY_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_DEFAULT_CATEGORY_ID").unwrap_or_else(|_| "11450".to_string()));

static MERCHANT_LOCATION_KEY: Lazy<String> =
    Lazy::new(|| env::var("EBAY_MERCHANT_LOCATION_KEY").unwrap_or_default());

/// Sell-API adapter: inventory-item upsert, then create + publish an offer.
/// The offer id is the handle we hand back as the marketplace listing id;
/// the published item id only feeds the listing URL.
pub struct EbayAdapter {
    http: Client,
}

impl EbayAdapter {
    pub fn new() -> Self {
        Self {
            http: build_client(),
        }
    }

    async fn upsert_inventory_item(
        &self,
        payload: &ListingPayload,
        access_token: &str,
    ) -> Result<(), AdapterError> {
        let url = format!(
            "{}/sell/inventory/v1/inventory_item/{}",
            *ROOT,
            encode(&payload.sku)
        );
        let body = InventoryItemRequest {
            availability: InventoryAvailability {
                ship_to_location_availability: ShipToLocationAvailability {
                    quantity: payload.quantity,
                },
            },
            condition: condition_code(&payload.condition),
            product: InventoryProduct {
                title: payload.title.clone(),
                description: payload
                    .description
                    .clone()
                    .unwrap_or_else(|| payload.title.clone()),
                brand: Some(payload.brand.clone()),
                image_urls: payload.images.clone(),
            },
        };
        let response = self
            .http
            .put(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn create_offer(
        &self,
        payload: &ListingPayload,
        access_token: &str,
    ) -> Result<String, AdapterError> {
        let url = format!("{}/sell/inventory/v1/offer", *ROOT);
        let body = CreateOfferRequest {
            sku: payload.sku.clone(),
            marketplace_id: MARKETPLACE_ID.clone(),
            format: "FIXED_PRICE",
            category_id: CATEGORY_ID.clone(),
            listing_description: payload
                .description
                .clone()
                .unwrap_or_else(|| payload.title.clone()),
            pricing_summary: PricingSummary {
                price: Price {
                    value: format!("{:.2}", payload.price),
                    currency: payload.currency.clone(),
                },
            },
            available_quantity: payload.quantity,
            merchant_location_key: MERCHANT_LOCATION_KEY.clone(),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        if response.status() == 409 {
            return self.existing_offer_id(&payload.sku, access_token).await;
        }
        if !response.status().is_success() {
            return Err(AdapterError::Rejected(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let offer: OfferCreated = response
            .json()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        Ok(offer.offer_id)
    }

    async fn existing_offer_id(
        &self,
        sku: &str,
        access_token: &str,
    ) -> Result<String, AdapterError> {
        let url = format!("{}/sell/inventory/v1/offer", *ROOT);
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("sku", sku)])
            .send()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let search: OfferSearchResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        search
            .offers
            .unwrap_or_default()
            .into_iter()
            .find_map(|offer| offer.offer_id)
            .ok_or_else(|| AdapterError::Rejected("offer exists but was not returned".to_string()))
    }

    async fn publish_offer(
        &self,
        offer_id: &str,
        access_token: &str,
    ) -> Result<Option<String>, AdapterError> {
        let url = format!("{}/sell/inventory/v1/offer/{offer_id}/publish", *ROOT);
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Rejected(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let published: OfferPublished = response
            .json()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        Ok(published.listing_id)
    }
}

impl Default for EbayAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketplaceAdapter for EbayAdapter {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Ebay
    }

    async fn list_item(
        &self,
        payload: &ListingPayload,
        credential: &Credential,
    ) -> Result<ListingReceipt, AdapterError> {
        let token = credential.access_token.as_str();
        self.upsert_inventory_item(payload, token).await?;
        let offer_id = self.create_offer(payload, token).await?;
        let published_id = self.publish_offer(&offer_id, token).await?;
        let listing_url = published_id
            .as_ref()
            .map(|id| format!("{}/{id}", *ITEM_ROOT));
        Ok(ListingReceipt {
            listing_id: offer_id.clone(),
            listing_url,
            raw: json!({
                "offer_id": offer_id,
                "published_listing_id": published_id,
                "marketplace_id": *MARKETPLACE_ID,
            }),
        })
    }

    async fn delist_item(
        &self,
        listing_id: &str,
        credential: &Credential,
    ) -> Result<(), AdapterError> {
        let url = format!("{}/sell/inventory/v1/offer/{listing_id}/withdraw", *ROOT);
        let response = self
            .http
            .post(url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        if response.status() == 404 {
            return Err(AdapterError::UnknownListing(listing_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(AdapterError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn sync_sold_items(
        &self,
        credential: &Credential,
    ) -> Result<Vec<SoldNotice>, AdapterError> {
        let url = format!("{}/sell/fulfillment/v1/order", *ROOT);
        let response = self
            .http
            .get(url)
            .bearer_auth(&credential.access_token)
            .query(&[("filter", "orderfulfillmentstatus:{NOT_STARTED|IN_PROGRESS}")])
            .send()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let orders: OrderSearchResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::Request(err.to_string()))?;
        let mut notices = Vec::new();
        for order in orders.orders.unwrap_or_default() {
            let lines = order.line_items.unwrap_or_default();
            for line in lines {
                if let Some(listing_id) = line.offer_id.or(line.legacy_item_id) {
                    notices.push(SoldNotice {
                        listing_id,
                        sold_at: order.creation_date,
                        raw: json!({ "order_id": order.order_id.clone() }),
                    });
                }
            }
        }
        Ok(notices)
    }
}

fn condition_code(condition: &str) -> &'static str {
    match condition.to_lowercase().as_str() {
        c if c.contains("new") => "NEW",
        c if c.contains("like") => "USED_EXCELLENT",
        c if c.contains("fair") || c.contains("poor") => "USED_ACCEPTABLE",
        _ => "USED_GOOD",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryItemRequest {
    availability: InventoryAvailability,
    condition: &'static str,
    product: InventoryProduct,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryAvailability {
    ship_to_location_availability: ShipToLocationAvailability,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ShipToLocationAvailability {
    quantity: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryProduct {
    title: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    brand: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOfferRequest {
    sku: String,
    marketplace_id: String,
    format: &'static str,
    category_id: String,
    listing_description: String,
    pricing_summary: PricingSummary,
    available_quantity: i32,
    merchant_location_key: String,
}

#[derive(Debug, Serialize)]
struct PricingSummary {
    price: Price,
}

#[derive(Debug, Serialize)]
struct Price {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferCreated {
    offer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPublished {
    listing_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OfferSearchResponse {
    offers: Option<Vec<OfferSummary>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferSummary {
    offer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderSearchResponse {
    orders: Option<Vec<Order>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    order_id: Option<String>,
    creation_date: Option<chrono::DateTime<chrono::Utc>>,
    line_items: Option<Vec<OrderLineItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderLineItem {
    offer_id: Option<String>,
    legacy_item_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_codes_bucket_free_text() {
        assert_eq!(condition_code("New with tags"), "NEW");
        assert_eq!(condition_code("used_like_new"), "USED_EXCELLENT");
        assert_eq!(condition_code("used_fair"), "USED_ACCEPTABLE");
        assert_eq!(condition_code("used_good"), "USED_GOOD");
        assert_eq!(condition_code("anything else"), "USED_GOOD");
    }
}
