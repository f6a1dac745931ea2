use crate::http::build_client;
use crate::models::{ListingStatus, Marketplace, MarketplaceListing};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Request(String),
    #[error("invalid registry response: {0}")]
    Deserialize(String),
}

/// Fields merged over an existing record on upsert. `None` leaves the stored
/// value untouched.
#[derive(Debug, Clone, Default)]
pub struct ListingPatch {
    pub marketplace_listing_id: Option<String>,
    pub marketplace_listing_url: Option<String>,
    pub status: Option<ListingStatus>,
    pub listed_at: Option<DateTime<Utc>>,
    pub delisted_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

/// Persisted marketplace-listing records keyed by
/// `(inventory_item_id, marketplace)`. No transactional guarantees; callers
/// must not issue concurrent writes for the same key.
#[async_trait]
pub trait ListingRegistry: Send + Sync {
    async fn upsert(
        &self,
        inventory_item_id: &str,
        marketplace: Marketplace,
        patch: ListingPatch,
    ) -> Result<MarketplaceListing, RegistryError>;

    async fn for_item(
        &self,
        inventory_item_id: &str,
    ) -> Result<Vec<MarketplaceListing>, RegistryError>;

    async fn find_by_remote_id(
        &self,
        marketplace: Marketplace,
        marketplace_listing_id: &str,
    ) -> Result<Option<MarketplaceListing>, RegistryError>;

    async fn remove(
        &self,
        inventory_item_id: &str,
        marketplace: Marketplace,
    ) -> Result<(), RegistryError>;
}

fn apply_patch(record: &mut MarketplaceListing, patch: ListingPatch) {
    if let Some(remote_id) = patch.marketplace_listing_id {
        record.marketplace_listing_id = Some(remote_id);
    }
    if let Some(url) = patch.marketplace_listing_url {
        record.marketplace_listing_url = Some(url);
    }
    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(listed_at) = patch.listed_at {
        record.listed_at = Some(listed_at);
    }
    if let Some(delisted_at) = patch.delisted_at {
        record.delisted_at = Some(delisted_at);
    }
    if let Some(metadata) = patch.metadata {
        record.metadata = metadata;
    }
    record.updated_at = Utc::now();
}

fn fresh_record(
    inventory_item_id: &str,
    marketplace: Marketplace,
    patch: ListingPatch,
) -> MarketplaceListing {
    let now = Utc::now();
    let mut record = MarketplaceListing {
        id: Uuid::new_v4(),
        inventory_item_id: inventory_item_id.to_string(),
        marketplace,
        marketplace_listing_id: None,
        marketplace_listing_url: None,
        status: ListingStatus::NotListed,
        listed_at: None,
        delisted_at: None,
        created_at: now,
        updated_at: now,
        metadata: Value::Null,
    };
    apply_patch(&mut record, patch);
    record
}

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    records: Arc<Mutex<HashMap<(String, Marketplace), MarketplaceListing>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingRegistry for MemoryRegistry {
    async fn upsert(
        &self,
        inventory_item_id: &str,
        marketplace: Marketplace,
        patch: ListingPatch,
    ) -> Result<MarketplaceListing, RegistryError> {
        let mut guard = self.records.lock().await;
        let key = (inventory_item_id.to_string(), marketplace);
        let record = match guard.get_mut(&key) {
            Some(existing) => {
                apply_patch(existing, patch);
                existing.clone()
            }
            None => {
                let record = fresh_record(inventory_item_id, marketplace, patch);
                guard.insert(key, record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn for_item(
        &self,
        inventory_item_id: &str,
    ) -> Result<Vec<MarketplaceListing>, RegistryError> {
        let guard = self.records.lock().await;
        let mut records: Vec<MarketplaceListing> = guard
            .values()
            .filter(|record| record.inventory_item_id == inventory_item_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.marketplace);
        Ok(records)
    }

    async fn find_by_remote_id(
        &self,
        marketplace: Marketplace,
        marketplace_listing_id: &str,
    ) -> Result<Option<MarketplaceListing>, RegistryError> {
        let guard = self.records.lock().await;
        Ok(guard
            .values()
            .find(|record| {
                record.marketplace == marketplace
                    && record.marketplace_listing_id.as_deref() == Some(marketplace_listing_id)
            })
            .cloned())
    }

    async fn remove(
        &self,
        inventory_item_id: &str,
        marketplace: Marketplace,
    ) -> Result<(), RegistryError> {
        let mut guard = self.records.lock().await;
        guard.remove(&(inventory_item_id.to_string(), marketplace));
        Ok(())
    }
}

/// PostgREST-style row store. Upsert is read-merge-write so the composite-key
/// semantics match `MemoryRegistry` exactly.
#[derive(Debug, Clone)]
pub struct RestRegistry {
    base_url: String,
    service_key: String,
    http: Client,
}

impl RestRegistry {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("REGISTRY_URL").ok()?;
        let service_key = std::env::var("REGISTRY_SERVICE_KEY").ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn rows_url(&self) -> String {
        format!("{}/rest/v1/marketplace_listings", self.base_url)
    }

    async fn fetch(&self, query: &[(&str, String)]) -> Result<Vec<MarketplaceListing>, RegistryError> {
        let response = self
            .http
            .get(self.rows_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(query)
            .send()
            .await
            .map_err(|err| RegistryError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RegistryError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| RegistryError::Deserialize(err.to_string()))
    }

    async fn write(&self, record: &MarketplaceListing) -> Result<(), RegistryError> {
        let response = self
            .http
            .post(self.rows_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "resolution=merge-duplicates")
            .json(record)
            .send()
            .await
            .map_err(|err| RegistryError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RegistryError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ListingRegistry for RestRegistry {
    async fn upsert(
        &self,
        inventory_item_id: &str,
        marketplace: Marketplace,
        patch: ListingPatch,
    ) -> Result<MarketplaceListing, RegistryError> {
        let existing = self
            .fetch(&[
                (
                    "inventory_item_id",
                    format!("eq.{inventory_item_id}"),
                ),
                ("marketplace", format!("eq.{marketplace}")),
                ("limit", "1".to_string()),
            ])
            .await?
            .pop();
        let record = match existing {
            Some(mut record) => {
                apply_patch(&mut record, patch);
                record
            }
            None => fresh_record(inventory_item_id, marketplace, patch),
        };
        self.write(&record).await?;
        Ok(record)
    }

    async fn for_item(
        &self,
        inventory_item_id: &str,
    ) -> Result<Vec<MarketplaceListing>, RegistryError> {
        self.fetch(&[(
            "inventory_item_id",
            format!("eq.{inventory_item_id}"),
        )])
        .await
    }

    async fn find_by_remote_id(
        &self,
        marketplace: Marketplace,
        marketplace_listing_id: &str,
    ) -> Result<Option<MarketplaceListing>, RegistryError> {
        Ok(self
            .fetch(&[
                ("marketplace", format!("eq.{marketplace}")),
                (
                    "marketplace_listing_id",
                    format!("eq.{marketplace_listing_id}"),
                ),
                ("limit", "1".to_string()),
            ])
            .await?
            .pop())
    }

    async fn remove(
        &self,
        inventory_item_id: &str,
        marketplace: Marketplace,
    ) -> Result<(), RegistryError> {
        let response = self
            .http
            .delete(self.rows_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .query(&[
                (
                    "inventory_item_id",
                    format!("eq.{inventory_item_id}"),
                ),
                ("marketplace", format!("eq.{marketplace}")),
            ])
            .send()
            .await
            .map_err(|err| RegistryError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RegistryError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// `REGISTRY_URL` selects the REST backing; otherwise records live in-process.
pub fn registry_from_env() -> Arc<dyn ListingRegistry> {
    match RestRegistry::from_env() {
        Some(rest) => Arc::new(rest),
        None => Arc::new(MemoryRegistry::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_idempotent_per_composite_key() {
        let registry = MemoryRegistry::new();
        let first = registry
            .upsert(
                "i1",
                Marketplace::Ebay,
                ListingPatch {
                    marketplace_listing_id: Some("ebay-100".to_string()),
                    status: Some(ListingStatus::Active),
                    listed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .expect("first upsert");

        let second = registry
            .upsert(
                "i1",
                Marketplace::Ebay,
                ListingPatch {
                    status: Some(ListingStatus::Removed),
                    delisted_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .expect("second upsert");

        let records = registry.for_item("i1").await.expect("for_item");
        assert_eq!(records.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        // merge keeps fields the second write did not touch
        assert_eq!(second.marketplace_listing_id.as_deref(), Some("ebay-100"));
        assert_eq!(second.status, ListingStatus::Removed);
    }

    #[tokio::test]
    async fn for_item_is_scoped_to_the_item() {
        let registry = MemoryRegistry::new();
        registry
            .upsert("i1", Marketplace::Ebay, ListingPatch::default())
            .await
            .expect("upsert");
        registry
            .upsert("i2", Marketplace::Ebay, ListingPatch::default())
            .await
            .expect("upsert");
        let records = registry.for_item("i1").await.expect("for_item");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].inventory_item_id, "i1");
    }

    #[tokio::test]
    async fn find_by_remote_id_matches_marketplace_and_id() {
        let registry = MemoryRegistry::new();
        registry
            .upsert(
                "i1",
                Marketplace::Mercari,
                ListingPatch {
                    marketplace_listing_id: Some("m-42".to_string()),
                    status: Some(ListingStatus::Active),
                    ..Default::default()
                },
            )
            .await
            .expect("upsert");

        let hit = registry
            .find_by_remote_id(Marketplace::Mercari, "m-42")
            .await
            .expect("lookup");
        assert!(hit.is_some());
        let miss = registry
            .find_by_remote_id(Marketplace::Ebay, "m-42")
            .await
            .expect("lookup");
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn remove_deletes_only_the_matching_record() {
        let registry = MemoryRegistry::new();
        registry
            .upsert("i1", Marketplace::Ebay, ListingPatch::default())
            .await
            .expect("upsert");
        registry
            .upsert("i1", Marketplace::Poshmark, ListingPatch::default())
            .await
            .expect("upsert");
        registry
            .remove("i1", Marketplace::Ebay)
            .await
            .expect("remove");
        let records = registry.for_item("i1").await.expect("for_item");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].marketplace, Marketplace::Poshmark);
    }
}
