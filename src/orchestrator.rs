use crate::adapters::{AdapterError, AdapterMap};
use crate::credentials::{Credential, CredentialSet};
use crate::items::{ItemStore, ItemStoreError};
use crate::models::{
    InventoryItem, ItemStatus, ListingPayload, ListingStatus, Marketplace, MarketplaceListing,
};
use crate::registry::{ListingPatch, ListingRegistry, RegistryError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

/// The exact per-marketplace error recorded when a credential is missing or
/// expired. Clients match on this string.
pub const NOT_CONNECTED: &str = "Account not connected or token expired";

pub const DEFAULT_PRICE_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Account not connected or token expired")]
    NotConnected(Marketplace),
    #[error("no adapter registered for `{0}`")]
    NoAdapter(Marketplace),
    #[error("item is not listed on `{0}`")]
    NotListed(Marketplace),
    #[error(transparent)]
    Item(#[from] ItemStoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{marketplace}: {source}")]
    Adapter {
        marketplace: Marketplace,
        source: AdapterError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListOptions {
    #[serde(default = "default_multiplier")]
    pub price_multiplier: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub delay_between_items_ms: Option<u64>,
}

fn default_multiplier() -> f64 {
    DEFAULT_PRICE_MULTIPLIER
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            price_multiplier: DEFAULT_PRICE_MULTIPLIER,
            currency: default_currency(),
            delay_between_items_ms: None,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingOutcome {
    pub marketplace: Marketplace,
    pub listing_id: String,
    pub listing_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceFailure {
    pub marketplace: Marketplace,
    pub error: String,
}

/// Aggregate result of a multi-marketplace dispatch; one marketplace's
/// failure never prevents attempting the rest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CrosslistReport {
    pub success: Vec<ListingOutcome>,
    pub errors: Vec<MarketplaceFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DelistReport {
    pub success: Vec<Marketplace>,
    pub errors: Vec<MarketplaceFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemOutcome {
    pub item_id: String,
    #[serde(default)]
    pub listed: Vec<ListingOutcome>,
    #[serde(default)]
    pub delisted: Vec<Marketplace>,
    #[serde(default)]
    pub marketplace_errors: Vec<MarketplaceFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFailure {
    pub item_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkReport {
    pub total: usize,
    pub processed: usize,
    pub success: Vec<BulkItemOutcome>,
    pub errors: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub marketplace: Marketplace,
    pub inventory_item_id: String,
    pub listing_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncReport {
    pub sold: Vec<SyncOutcome>,
    pub errors: Vec<MarketplaceFailure>,
}

/// Core engine. Constructed by injection so tests can substitute scripted
/// adapters, registries, and item stores.
pub struct Orchestrator {
    adapters: AdapterMap,
    registry: Arc<dyn ListingRegistry>,
    items: Arc<dyn ItemStore>,
}

impl Orchestrator {
    pub fn new(
        adapters: AdapterMap,
        registry: Arc<dyn ListingRegistry>,
        items: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            adapters,
            registry,
            items,
        }
    }

    /// Single-marketplace list. On adapter failure the call errors and no
    /// registry record is written for the attempt.
    pub async fn list_on_marketplace(
        &self,
        item_id: &str,
        marketplace: Marketplace,
        credential: &Credential,
        options: &ListOptions,
    ) -> Result<ListingOutcome, OrchestratorError> {
        let adapter = self
            .adapters
            .get(&marketplace)
            .ok_or(OrchestratorError::NoAdapter(marketplace))?;
        let item = self.items.get(item_id).await?;
        let payload = build_payload(&item, options);

        let started = Instant::now();
        let receipt = adapter
            .list_item(&payload, credential)
            .await
            .map_err(|source| OrchestratorError::Adapter {
                marketplace,
                source,
            })?;
        crate::metrics::dispatch_elapsed(
            "list",
            marketplace.as_str(),
            started.elapsed().as_millis(),
        );

        self.registry
            .upsert(
                item_id,
                marketplace,
                ListingPatch {
                    marketplace_listing_id: Some(receipt.listing_id.clone()),
                    marketplace_listing_url: receipt.listing_url.clone(),
                    status: Some(ListingStatus::Active),
                    listed_at: Some(Utc::now()),
                    metadata: Some(receipt.raw.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.items.set_status(item_id, ItemStatus::Listed).await?;

        info!(
            target = "crosslist.orchestrator",
            item = item_id,
            marketplace = %marketplace,
            listing_id = %receipt.listing_id,
            "listed"
        );
        Ok(ListingOutcome {
            marketplace,
            listing_id: receipt.listing_id,
            listing_url: receipt.listing_url,
        })
    }

    /// Sequential multi-marketplace list. Always returns a report; a
    /// marketplace with a missing or expired credential records the
    /// `NOT_CONNECTED` error and the rest are still attempted.
    pub async fn crosslist(
        &self,
        item_id: &str,
        marketplaces: &[Marketplace],
        credentials: &CredentialSet,
        options: &ListOptions,
    ) -> CrosslistReport {
        let mut report = CrosslistReport::default();
        for &marketplace in marketplaces {
            let Some(credential) = credentials.active(marketplace) else {
                report.errors.push(MarketplaceFailure {
                    marketplace,
                    error: NOT_CONNECTED.to_string(),
                });
                continue;
            };
            match self
                .list_on_marketplace(item_id, marketplace, credential, options)
                .await
            {
                Ok(outcome) => report.success.push(outcome),
                Err(err) => {
                    warn!(
                        target = "crosslist.orchestrator",
                        item = item_id,
                        marketplace = %marketplace,
                        error = %err,
                        "list attempt failed"
                    );
                    report.errors.push(MarketplaceFailure {
                        marketplace,
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    pub async fn delist_from_marketplace(
        &self,
        item_id: &str,
        marketplace: Marketplace,
        credential: &Credential,
    ) -> Result<(), OrchestratorError> {
        let record = self
            .registry
            .for_item(item_id)
            .await?
            .into_iter()
            .find(|record| record.marketplace == marketplace)
            .ok_or(OrchestratorError::NotListed(marketplace))?;
        self.delist_record(&record, credential).await
    }

    async fn delist_record(
        &self,
        record: &MarketplaceListing,
        credential: &Credential,
    ) -> Result<(), OrchestratorError> {
        let marketplace = record.marketplace;
        let adapter = self
            .adapters
            .get(&marketplace)
            .ok_or(OrchestratorError::NoAdapter(marketplace))?;
        let listing_id = record
            .marketplace_listing_id
            .as_deref()
            .ok_or(OrchestratorError::NotListed(marketplace))?;

        let started = Instant::now();
        adapter
            .delist_item(listing_id, credential)
            .await
            .map_err(|source| OrchestratorError::Adapter {
                marketplace,
                source,
            })?;
        crate::metrics::dispatch_elapsed(
            "delist",
            marketplace.as_str(),
            started.elapsed().as_millis(),
        );

        self.registry
            .upsert(
                &record.inventory_item_id,
                marketplace,
                ListingPatch {
                    status: Some(ListingStatus::Removed),
                    delisted_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Attempts a delist for every currently-active listing of the item and
    /// aggregates per-marketplace outcomes. The item is marked `Available`
    /// afterward even when individual delists failed.
    pub async fn delist_everywhere(
        &self,
        item_id: &str,
        credentials: &CredentialSet,
    ) -> Result<DelistReport, OrchestratorError> {
        let records = self.registry.for_item(item_id).await?;
        let mut report = DelistReport::default();
        for record in records
            .iter()
            .filter(|record| record.status == ListingStatus::Active)
        {
            let marketplace = record.marketplace;
            let Some(credential) = credentials.active(marketplace) else {
                report.errors.push(MarketplaceFailure {
                    marketplace,
                    error: NOT_CONNECTED.to_string(),
                });
                continue;
            };
            match self.delist_record(record, credential).await {
                Ok(()) => report.success.push(marketplace),
                Err(err) => report.errors.push(MarketplaceFailure {
                    marketplace,
                    error: err.to_string(),
                }),
            }
        }
        self.items
            .set_status(item_id, ItemStatus::Available)
            .await?;
        Ok(report)
    }

    /// Delist-then-list. Not atomic: a failure in the list phase leaves the
    /// item delisted everywhere without being relisted.
    pub async fn relist_item(
        &self,
        item_id: &str,
        marketplaces: &[Marketplace],
        credentials: &CredentialSet,
        options: &ListOptions,
    ) -> Result<BulkItemOutcome, OrchestratorError> {
        let delisted = self.delist_everywhere(item_id, credentials).await?;
        let mut outcome = BulkItemOutcome {
            item_id: item_id.to_string(),
            listed: Vec::new(),
            delisted: delisted.success,
            marketplace_errors: delisted.errors,
        };
        for &marketplace in marketplaces {
            let credential = credentials
                .active(marketplace)
                .ok_or(OrchestratorError::NotConnected(marketplace))?;
            let listed = self
                .list_on_marketplace(item_id, marketplace, credential, options)
                .await?;
            outcome.listed.push(listed);
        }
        Ok(outcome)
    }

    pub async fn bulk_list_items(
        &self,
        item_ids: &[String],
        marketplaces: &[Marketplace],
        credentials: &CredentialSet,
        options: &ListOptions,
    ) -> BulkReport {
        let mut report = BulkReport {
            total: item_ids.len(),
            ..Default::default()
        };
        for (idx, item_id) in item_ids.iter().enumerate() {
            report.processed += 1;
            let attempt = async {
                let mut listed = Vec::new();
                for &marketplace in marketplaces {
                    let credential = credentials
                        .active(marketplace)
                        .ok_or(OrchestratorError::NotConnected(marketplace))?;
                    listed.push(
                        self.list_on_marketplace(item_id, marketplace, credential, options)
                            .await?,
                    );
                }
                Ok::<_, OrchestratorError>(listed)
            };
            match attempt.await {
                Ok(listed) => report.success.push(BulkItemOutcome {
                    item_id: item_id.clone(),
                    listed,
                    delisted: Vec::new(),
                    marketplace_errors: Vec::new(),
                }),
                Err(err) => report.errors.push(BulkFailure {
                    item_id: item_id.clone(),
                    error: err.to_string(),
                }),
            }
            self.pause_between_items(idx, item_ids.len(), options).await;
        }
        report
    }

    pub async fn bulk_delist_items(
        &self,
        item_ids: &[String],
        credentials: &CredentialSet,
        options: &ListOptions,
    ) -> BulkReport {
        let mut report = BulkReport {
            total: item_ids.len(),
            ..Default::default()
        };
        for (idx, item_id) in item_ids.iter().enumerate() {
            report.processed += 1;
            match self.delist_everywhere(item_id, credentials).await {
                Ok(delisted) => report.success.push(BulkItemOutcome {
                    item_id: item_id.clone(),
                    listed: Vec::new(),
                    delisted: delisted.success,
                    marketplace_errors: delisted.errors,
                }),
                Err(err) => report.errors.push(BulkFailure {
                    item_id: item_id.clone(),
                    error: err.to_string(),
                }),
            }
            self.pause_between_items(idx, item_ids.len(), options).await;
        }
        report
    }

    pub async fn bulk_relist_items(
        &self,
        item_ids: &[String],
        marketplaces: &[Marketplace],
        credentials: &CredentialSet,
        options: &ListOptions,
    ) -> BulkReport {
        let mut report = BulkReport {
            total: item_ids.len(),
            ..Default::default()
        };
        for (idx, item_id) in item_ids.iter().enumerate() {
            report.processed += 1;
            match self
                .relist_item(item_id, marketplaces, credentials, options)
                .await
            {
                Ok(outcome) => report.success.push(outcome),
                Err(err) => report.errors.push(BulkFailure {
                    item_id: item_id.clone(),
                    error: err.to_string(),
                }),
            }
            self.pause_between_items(idx, item_ids.len(), options).await;
        }
        report
    }

    /// For every marketplace with an active credential, pulls the sold feed
    /// and closes out matching listings. A sale on one marketplace cascades
    /// into delisting the item's sibling listings when the item opts in.
    pub async fn sync_sold_items(&self, credentials: &CredentialSet) -> SyncReport {
        let mut report = SyncReport::default();
        for marketplace in Marketplace::ALL {
            let Some(credential) = credentials.active(marketplace) else {
                continue;
            };
            let Some(adapter) = self.adapters.get(&marketplace) else {
                continue;
            };
            let notices = match adapter.sync_sold_items(credential).await {
                Ok(notices) => notices,
                Err(err) => {
                    report.errors.push(MarketplaceFailure {
                        marketplace,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            for notice in notices {
                match self
                    .close_out_sale(marketplace, &notice.listing_id, credentials)
                    .await
                {
                    Ok(Some(outcome)) => report.sold.push(outcome),
                    Ok(None) => {
                        warn!(
                            target = "crosslist.orchestrator",
                            marketplace = %marketplace,
                            listing_id = %notice.listing_id,
                            "sold listing has no registry record"
                        );
                    }
                    Err(err) => report.errors.push(MarketplaceFailure {
                        marketplace,
                        error: err.to_string(),
                    }),
                }
            }
        }
        report
    }

    /// Marks the listing and item sold. The auto-delist cascade runs before
    /// the final item-status write; `delist_everywhere` unconditionally flips
    /// the item to `Available`, so `Sold` must land last.
    async fn close_out_sale(
        &self,
        marketplace: Marketplace,
        listing_id: &str,
        credentials: &CredentialSet,
    ) -> Result<Option<SyncOutcome>, OrchestratorError> {
        let Some(record) = self
            .registry
            .find_by_remote_id(marketplace, listing_id)
            .await?
        else {
            return Ok(None);
        };
        let item_id = record.inventory_item_id.clone();
        self.registry
            .upsert(
                &item_id,
                marketplace,
                ListingPatch {
                    status: Some(ListingStatus::Sold),
                    ..Default::default()
                },
            )
            .await?;

        let item = self.items.get(&item_id).await?;
        if item.auto_delist_on_sale {
            let cascade = self.delist_everywhere(&item_id, credentials).await?;
            if !cascade.errors.is_empty() {
                warn!(
                    target = "crosslist.orchestrator",
                    item = %item_id,
                    failed = cascade.errors.len(),
                    "auto-delist cascade left listings behind"
                );
            }
        }
        self.items.set_status(&item_id, ItemStatus::Sold).await?;

        info!(
            target = "crosslist.orchestrator",
            item = %item_id,
            marketplace = %marketplace,
            listing_id = listing_id,
            "sold"
        );
        Ok(Some(SyncOutcome {
            marketplace,
            inventory_item_id: item_id,
            listing_id: listing_id.to_string(),
        }))
    }

    /// Drops every registry record for an item, for use when the inventory
    /// record itself is deleted. Marketplace state is left alone; delist
    /// first if the listings should come down too.
    pub async fn forget_item(&self, item_id: &str) -> Result<usize, OrchestratorError> {
        let records = self.registry.for_item(item_id).await?;
        let forgotten = records.len();
        for record in records {
            self.registry
                .remove(item_id, record.marketplace)
                .await?;
        }
        Ok(forgotten)
    }

    /// The only backpressure between bulk items is this optional fixed sleep.
    async fn pause_between_items(&self, idx: usize, total: usize, options: &ListOptions) {
        if idx + 1 < total
            && let Some(ms) = options.delay_between_items_ms
        {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn build_payload(item: &InventoryItem, options: &ListOptions) -> ListingPayload {
    let price = item.price.unwrap_or_else(|| {
        item.purchase_price.unwrap_or_default() * options.price_multiplier
    });
    ListingPayload {
        sku: item.id.clone(),
        title: item.title.clone(),
        description: item.description.clone(),
        price,
        currency: options.currency.clone(),
        condition: item
            .condition
            .clone()
            .unwrap_or_else(|| "used_good".to_string()),
        brand: item.brand.clone().unwrap_or_else(|| "Unbranded".to_string()),
        category: item.category.clone().unwrap_or_else(|| "other".to_string()),
        images: item.images.clone(),
        quantity: item.quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::demo::DemoAdapter;
    use crate::adapters::{ListingReceipt, MarketplaceAdapter, SoldNotice};
    use crate::credentials::active_credential;
    use crate::items::MemoryItemStore;
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    struct FlakyAdapter {
        marketplace: Marketplace,
        fail_skus: HashSet<String>,
    }

    #[async_trait]
    impl MarketplaceAdapter for FlakyAdapter {
        fn marketplace(&self) -> Marketplace {
            self.marketplace
        }

        async fn list_item(
            &self,
            payload: &ListingPayload,
            _credential: &Credential,
        ) -> Result<ListingReceipt, AdapterError> {
            if self.fail_skus.contains(&payload.sku) {
                return Err(AdapterError::Request("connection reset".to_string()));
            }
            Ok(ListingReceipt {
                listing_id: format!("{}-{}", self.marketplace, payload.sku),
                listing_url: None,
                raw: json!({}),
            })
        }

        async fn delist_item(
            &self,
            _listing_id: &str,
            _credential: &Credential,
        ) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn sync_sold_items(
            &self,
            _credential: &Credential,
        ) -> Result<Vec<SoldNotice>, AdapterError> {
            Ok(Vec::new())
        }
    }

    fn sample_item(id: &str) -> InventoryItem {
        InventoryItem {
            id: id.to_string(),
            title: format!("Item {id}"),
            description: None,
            purchase_price: Some(10.0),
            price: None,
            condition: Some("used_good".to_string()),
            brand: None,
            category: Some("tops".to_string()),
            images: vec![],
            quantity: 1,
            auto_delist_on_sale: false,
            status: ItemStatus::Available,
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        registry: Arc<MemoryRegistry>,
        items: Arc<MemoryItemStore>,
        demos: Vec<Arc<DemoAdapter>>,
        credentials: CredentialSet,
    }

    fn demo_harness(marketplaces: &[Marketplace]) -> Harness {
        let registry = Arc::new(MemoryRegistry::new());
        let items = Arc::new(MemoryItemStore::new());
        let mut adapters: AdapterMap = AdapterMap::new();
        let mut demos = Vec::new();
        let mut credentials = CredentialSet::new();
        for &marketplace in marketplaces {
            let demo = Arc::new(DemoAdapter::new(marketplace));
            demos.push(demo.clone());
            adapters.insert(marketplace, demo);
            credentials.insert(active_credential(marketplace));
        }
        Harness {
            orchestrator: Orchestrator::new(adapters, registry.clone(), items.clone()),
            registry,
            items,
            demos,
            credentials,
        }
    }

    #[tokio::test]
    async fn crosslist_skips_unconnected_marketplaces() {
        let harness = demo_harness(&[Marketplace::Ebay, Marketplace::Mercari]);
        harness.items.put(sample_item("i1")).await;

        // facebook has no credential at all
        let report = harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay, Marketplace::Facebook, Marketplace::Mercari],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;

        assert_eq!(report.success.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].marketplace, Marketplace::Facebook);
        assert_eq!(report.errors[0].error, NOT_CONNECTED);
    }

    #[tokio::test]
    async fn failed_list_attempt_writes_no_registry_record() {
        let registry = Arc::new(MemoryRegistry::new());
        let items = Arc::new(MemoryItemStore::new());
        items.put(sample_item("i1")).await;
        let mut adapters = AdapterMap::new();
        adapters.insert(
            Marketplace::Ebay,
            Arc::new(FlakyAdapter {
                marketplace: Marketplace::Ebay,
                fail_skus: HashSet::from(["i1".to_string()]),
            }) as Arc<dyn MarketplaceAdapter>,
        );
        let orchestrator = Orchestrator::new(adapters, registry.clone(), items.clone());

        let credential = active_credential(Marketplace::Ebay);
        let err = orchestrator
            .list_on_marketplace("i1", Marketplace::Ebay, &credential, &ListOptions::default())
            .await
            .expect_err("adapter failure");
        assert!(matches!(err, OrchestratorError::Adapter { .. }));
        assert!(registry.for_item("i1").await.expect("for_item").is_empty());
        let item = items.snapshot("i1").await.expect("item");
        assert_eq!(item.status, ItemStatus::Available);
    }

    #[tokio::test]
    async fn listing_defaults_price_from_purchase_price() {
        let harness = demo_harness(&[Marketplace::Ebay]);
        harness.items.put(sample_item("i1")).await;
        let outcome = harness
            .orchestrator
            .list_on_marketplace(
                "i1",
                Marketplace::Ebay,
                harness.credentials.active(Marketplace::Ebay).expect("cred"),
                &ListOptions::default(),
            )
            .await
            .expect("list");
        assert_eq!(outcome.marketplace, Marketplace::Ebay);

        let records = harness.registry.for_item("i1").await.expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ListingStatus::Active);
        assert!(records[0].listed_at.is_some());
        // purchase 10.0 × default multiplier 1.5
        assert_eq!(records[0].metadata["price"], json!(15.0));
        let item = harness.items.snapshot("i1").await.expect("item");
        assert_eq!(item.status, ItemStatus::Listed);
    }

    #[tokio::test]
    async fn bulk_list_isolates_failing_item() {
        let registry = Arc::new(MemoryRegistry::new());
        let items = Arc::new(MemoryItemStore::new());
        for id in ["i1", "i2", "i3"] {
            items.put(sample_item(id)).await;
        }
        let mut adapters = AdapterMap::new();
        adapters.insert(
            Marketplace::Ebay,
            Arc::new(FlakyAdapter {
                marketplace: Marketplace::Ebay,
                fail_skus: HashSet::from(["i2".to_string()]),
            }) as Arc<dyn MarketplaceAdapter>,
        );
        let orchestrator = Orchestrator::new(adapters, registry, items);
        let mut credentials = CredentialSet::new();
        credentials.insert(active_credential(Marketplace::Ebay));

        let report = orchestrator
            .bulk_list_items(
                &["i1".to_string(), "i2".to_string(), "i3".to_string()],
                &[Marketplace::Ebay],
                &credentials,
                &ListOptions::default(),
            )
            .await;

        assert_eq!(report.total, 3);
        assert_eq!(report.processed, 3);
        let listed: Vec<&str> = report
            .success
            .iter()
            .map(|outcome| outcome.item_id.as_str())
            .collect();
        assert_eq!(listed, vec!["i1", "i3"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].item_id, "i2");
    }

    #[tokio::test]
    async fn delist_everywhere_marks_item_available_despite_failures() {
        let harness = demo_harness(&[Marketplace::Ebay, Marketplace::Mercari]);
        let mut item = sample_item("i1");
        item.status = ItemStatus::Listed;
        harness.items.put(item).await;
        harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay, Marketplace::Mercari],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;

        // expire mercari's credential so its delist fails as "not connected"
        let mut credentials = CredentialSet::new();
        credentials.insert(active_credential(Marketplace::Ebay));
        let report = harness
            .orchestrator
            .delist_everywhere("i1", &credentials)
            .await
            .expect("delist_everywhere");

        assert_eq!(report.success, vec![Marketplace::Ebay]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].marketplace, Marketplace::Mercari);
        assert_eq!(report.errors[0].error, NOT_CONNECTED);
        // marked available regardless of the mercari failure
        let item = harness.items.snapshot("i1").await.expect("item");
        assert_eq!(item.status, ItemStatus::Available);
    }

    #[tokio::test]
    async fn delist_from_one_marketplace_leaves_siblings_active() {
        let harness = demo_harness(&[Marketplace::Ebay, Marketplace::Mercari]);
        harness.items.put(sample_item("i1")).await;
        harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay, Marketplace::Mercari],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;

        harness
            .orchestrator
            .delist_from_marketplace(
                "i1",
                Marketplace::Ebay,
                harness.credentials.active(Marketplace::Ebay).expect("cred"),
            )
            .await
            .expect("delist");

        let records = harness.registry.for_item("i1").await.expect("records");
        let ebay = records
            .iter()
            .find(|record| record.marketplace == Marketplace::Ebay)
            .expect("ebay record");
        assert_eq!(ebay.status, ListingStatus::Removed);
        assert!(ebay.delisted_at.is_some());
        let mercari = records
            .iter()
            .find(|record| record.marketplace == Marketplace::Mercari)
            .expect("mercari record");
        assert_eq!(mercari.status, ListingStatus::Active);

        // nothing recorded for poshmark, so delisting there is an error
        let err = harness
            .orchestrator
            .delist_from_marketplace(
                "i1",
                Marketplace::Poshmark,
                harness.credentials.active(Marketplace::Ebay).expect("cred"),
            )
            .await
            .expect_err("not listed");
        assert!(matches!(err, OrchestratorError::NotListed(_)));
    }

    #[tokio::test]
    async fn delist_everywhere_skips_non_active_records() {
        let harness = demo_harness(&[Marketplace::Ebay]);
        harness.items.put(sample_item("i1")).await;
        harness
            .registry
            .upsert(
                "i1",
                Marketplace::Ebay,
                ListingPatch {
                    marketplace_listing_id: Some("ebay-gone".to_string()),
                    status: Some(ListingStatus::Removed),
                    ..Default::default()
                },
            )
            .await
            .expect("seed record");

        let report = harness
            .orchestrator
            .delist_everywhere("i1", &harness.credentials)
            .await
            .expect("delist_everywhere");
        assert!(report.success.is_empty());
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn sold_sync_cascades_auto_delist() {
        let harness = demo_harness(&[Marketplace::Ebay, Marketplace::Mercari]);
        let mut item = sample_item("i1");
        item.auto_delist_on_sale = true;
        harness.items.put(item).await;

        let report = harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay, Marketplace::Mercari],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;
        assert_eq!(report.success.len(), 2);
        let mercari_listing = report
            .success
            .iter()
            .find(|outcome| outcome.marketplace == Marketplace::Mercari)
            .expect("mercari outcome");

        // mercari reports the sale; index 1 is the mercari demo adapter
        harness.demos[1].mark_sold(&mercari_listing.listing_id).await;
        let sync = harness.orchestrator.sync_sold_items(&harness.credentials).await;

        assert_eq!(sync.sold.len(), 1);
        assert_eq!(sync.sold[0].inventory_item_id, "i1");
        assert!(sync.errors.is_empty());

        let item = harness.items.snapshot("i1").await.expect("item");
        assert_eq!(item.status, ItemStatus::Sold);
        let records = harness.registry.for_item("i1").await.expect("records");
        let ebay = records
            .iter()
            .find(|record| record.marketplace == Marketplace::Ebay)
            .expect("ebay record");
        assert_eq!(ebay.status, ListingStatus::Removed);
        let mercari = records
            .iter()
            .find(|record| record.marketplace == Marketplace::Mercari)
            .expect("mercari record");
        assert_eq!(mercari.status, ListingStatus::Sold);
    }

    #[tokio::test]
    async fn sold_sync_without_auto_delist_leaves_siblings_active() {
        let harness = demo_harness(&[Marketplace::Ebay, Marketplace::Mercari]);
        harness.items.put(sample_item("i1")).await;
        let report = harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay, Marketplace::Mercari],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;
        let mercari_listing = report
            .success
            .iter()
            .find(|outcome| outcome.marketplace == Marketplace::Mercari)
            .expect("mercari outcome");
        harness.demos[1].mark_sold(&mercari_listing.listing_id).await;

        harness.orchestrator.sync_sold_items(&harness.credentials).await;

        let item = harness.items.snapshot("i1").await.expect("item");
        assert_eq!(item.status, ItemStatus::Sold);
        let records = harness.registry.for_item("i1").await.expect("records");
        let ebay = records
            .iter()
            .find(|record| record.marketplace == Marketplace::Ebay)
            .expect("ebay record");
        assert_eq!(ebay.status, ListingStatus::Active);
    }

    #[tokio::test]
    async fn relist_reuses_the_same_registry_record() {
        let harness = demo_harness(&[Marketplace::Ebay]);
        harness.items.put(sample_item("i1")).await;
        harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;
        let before = harness.registry.for_item("i1").await.expect("records");

        let outcome = harness
            .orchestrator
            .relist_item(
                "i1",
                &[Marketplace::Ebay],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await
            .expect("relist");
        assert_eq!(outcome.delisted, vec![Marketplace::Ebay]);
        assert_eq!(outcome.listed.len(), 1);

        let after = harness.registry.for_item("i1").await.expect("records");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[0].created_at, before[0].created_at);
        assert_eq!(after[0].status, ListingStatus::Active);
    }

    #[tokio::test]
    async fn forget_item_drops_all_registry_records() {
        let harness = demo_harness(&[Marketplace::Ebay, Marketplace::Mercari]);
        harness.items.put(sample_item("i1")).await;
        harness
            .orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay, Marketplace::Mercari],
                &harness.credentials,
                &ListOptions::default(),
            )
            .await;

        let forgotten = harness
            .orchestrator
            .forget_item("i1")
            .await
            .expect("forget");
        assert_eq!(forgotten, 2);
        assert!(harness.registry.for_item("i1").await.expect("for_item").is_empty());
    }

    #[tokio::test]
    async fn bulk_relist_failure_leaves_item_delisted() {
        let registry = Arc::new(MemoryRegistry::new());
        let items = Arc::new(MemoryItemStore::new());
        items.put(sample_item("i1")).await;
        let demo = Arc::new(DemoAdapter::new(Marketplace::Ebay));
        let mut adapters = AdapterMap::new();
        adapters.insert(Marketplace::Ebay, demo.clone() as Arc<dyn MarketplaceAdapter>);
        let orchestrator = Orchestrator::new(adapters, registry.clone(), items.clone());
        let mut credentials = CredentialSet::new();
        credentials.insert(active_credential(Marketplace::Ebay));

        orchestrator
            .crosslist(
                "i1",
                &[Marketplace::Ebay],
                &credentials,
                &ListOptions::default(),
            )
            .await;

        // swap in an adapter that fails the list phase after the delist phase
        let mut flaky_adapters = AdapterMap::new();
        flaky_adapters.insert(
            Marketplace::Ebay,
            Arc::new(FlakyAdapter {
                marketplace: Marketplace::Ebay,
                fail_skus: HashSet::from(["i1".to_string()]),
            }) as Arc<dyn MarketplaceAdapter>,
        );
        // keep the registry/items so the active record carries over
        let orchestrator = Orchestrator::new(flaky_adapters, registry.clone(), items.clone());
        let report = orchestrator
            .bulk_relist_items(
                &["i1".to_string()],
                &[Marketplace::Ebay],
                &credentials,
                &ListOptions::default(),
            )
            .await;

        assert_eq!(report.errors.len(), 1);
        let records = registry.for_item("i1").await.expect("records");
        // delist phase committed, list phase never did
        assert_eq!(records[0].status, ListingStatus::Removed);
    }
}
