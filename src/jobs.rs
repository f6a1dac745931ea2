use crate::credentials::CredentialSet;
use crate::models::{ApiError, Marketplace};
use crate::orchestrator::{BulkReport, ListOptions, Orchestrator};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkOp {
    List,
    Delist,
    Relist,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    op: BulkOp,
    item_ids: Vec<String>,
    marketplaces: Vec<Marketplace>,
    options: ListOptions,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { report: BulkReport },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        credentials: Arc<CredentialSet>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }

                let report = match job.op {
                    BulkOp::List => {
                        orchestrator
                            .bulk_list_items(
                                &job.item_ids,
                                &job.marketplaces,
                                &credentials,
                                &job.options,
                            )
                            .await
                    }
                    BulkOp::Delist => {
                        orchestrator
                            .bulk_delist_items(&job.item_ids, &credentials, &job.options)
                            .await
                    }
                    BulkOp::Relist => {
                        orchestrator
                            .bulk_relist_items(
                                &job.item_ids,
                                &job.marketplaces,
                                &credentials,
                                &job.options,
                            )
                            .await
                    }
                };
                let mut guard = statuses_bg.lock().await;
                guard.insert(job.id, JobState::Completed { report });
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_bulk(
        &self,
        op: BulkOp,
        item_ids: Vec<String>,
        marketplaces: Vec<Marketplace>,
        options: ListOptions,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job {
            id,
            op,
            item_ids,
            marketplaces,
            options,
        };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterMap;
    use crate::adapters::demo::DemoAdapter;
    use crate::credentials::active_credential;
    use crate::items::MemoryItemStore;
    use crate::models::{InventoryItem, ItemStatus};
    use crate::registry::MemoryRegistry;

    #[tokio::test]
    async fn enqueued_bulk_list_completes_with_report() {
        let registry = Arc::new(MemoryRegistry::new());
        let items = Arc::new(MemoryItemStore::new());
        items
            .put(InventoryItem {
                id: "i1".to_string(),
                title: "Coach crossbody".to_string(),
                description: None,
                purchase_price: Some(30.0),
                price: None,
                condition: Some("used_good".to_string()),
                brand: None,
                category: Some("accessories".to_string()),
                images: vec![],
                quantity: 1,
                auto_delist_on_sale: false,
                status: ItemStatus::Available,
            })
            .await;
        let mut adapters = AdapterMap::new();
        adapters.insert(
            Marketplace::Ebay,
            Arc::new(DemoAdapter::new(Marketplace::Ebay)),
        );
        let orchestrator = Arc::new(Orchestrator::new(adapters, registry, items));
        let mut credentials = CredentialSet::new();
        credentials.insert(active_credential(Marketplace::Ebay));

        let (queue, _worker) = JobQueue::spawn(orchestrator, Arc::new(credentials));
        let id = queue
            .enqueue_bulk(
                BulkOp::List,
                vec!["i1".to_string()],
                vec![Marketplace::Ebay],
                ListOptions::default(),
            )
            .await
            .expect("enqueue");

        // single worker; poll until the job lands
        for _ in 0..50 {
            if let Some(info) = queue.get(id).await
                && let JobState::Completed { report } = info.state
            {
                assert_eq!(report.processed, 1);
                assert_eq!(report.success.len(), 1);
                return;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        }
        panic!("job never completed");
    }
}
