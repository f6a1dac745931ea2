use crate::models::{InventoryItem, ItemStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ItemStoreError {
    #[error("inventory item `{0}` not found")]
    NotFound(String),
}

/// Inventory CRUD collaborator. The orchestrator only reads items and flips
/// their status as a side effect of listing, delisting, and selling.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<InventoryItem, ItemStoreError>;
    async fn set_status(&self, id: &str, status: ItemStatus) -> Result<(), ItemStoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryItemStore {
    items: Arc<Mutex<HashMap<String, InventoryItem>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, item: InventoryItem) {
        let mut guard = self.items.lock().await;
        guard.insert(item.id.clone(), item);
    }

    #[cfg(test)]
    pub async fn snapshot(&self, id: &str) -> Option<InventoryItem> {
        let guard = self.items.lock().await;
        guard.get(id).cloned()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get(&self, id: &str) -> Result<InventoryItem, ItemStoreError> {
        let guard = self.items.lock().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| ItemStoreError::NotFound(id.to_string()))
    }

    async fn set_status(&self, id: &str, status: ItemStatus) -> Result<(), ItemStoreError> {
        let mut guard = self.items.lock().await;
        let item = guard
            .get_mut(id)
            .ok_or_else(|| ItemStoreError::NotFound(id.to_string()))?;
        item.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(id: &str) -> InventoryItem {
        InventoryItem {
            id: id.to_string(),
            title: "Levi's 501 jeans".to_string(),
            description: None,
            purchase_price: Some(12.0),
            price: None,
            condition: Some("used_good".to_string()),
            brand: Some("Levi's".to_string()),
            category: Some("jeans".to_string()),
            images: vec!["https://img.example.com/501.jpg".to_string()],
            quantity: 1,
            auto_delist_on_sale: true,
            status: ItemStatus::Available,
        }
    }

    #[tokio::test]
    async fn get_and_flip_status() {
        let store = MemoryItemStore::new();
        store.put(sample_item("i1")).await;
        store
            .set_status("i1", ItemStatus::Listed)
            .await
            .expect("set_status");
        let item = store.get("i1").await.expect("get");
        assert_eq!(item.status, ItemStatus::Listed);
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let store = MemoryItemStore::new();
        let err = store.get("ghost").await.expect_err("should miss");
        assert!(matches!(err, ItemStoreError::NotFound(_)));
    }
}
