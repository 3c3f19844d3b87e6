//! In-memory collaborators for development, tests and the demo binary

use crate::error::ProcessingError;
use crate::integrations::{
    BoardEvent, EventBoard, Ledger, LedgerVendor, PostedPurchase, PurchaseRequest, ReceiptFile,
    ReceiptStorage, SubitemRequest,
};
use crate::Result;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

//
// ================= Ledger =================
//

#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: String,
    pub purchase_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

pub struct InMemoryLedger {
    vendors: Arc<RwLock<Vec<LedgerVendor>>>,
    purchases: Arc<RwLock<HashMap<String, PurchaseRequest>>>,
    attachments: Arc<RwLock<Vec<Attachment>>>,
    next_id: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            vendors: Arc::new(RwLock::new(Vec::new())),
            purchases: Arc::new(RwLock::new(HashMap::new())),
            attachments: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(100),
        }
    }

    fn allocate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    pub async fn insert_vendor(&self, vendor: LedgerVendor) {
        self.vendors.write().await.push(vendor);
    }

    pub async fn purchase(&self, purchase_id: &str) -> Option<PurchaseRequest> {
        self.purchases.read().await.get(purchase_id).cloned()
    }

    pub async fn purchase_count(&self) -> usize {
        self.purchases.read().await.len()
    }

    pub async fn attachments(&self) -> Vec<Attachment> {
        self.attachments.read().await.clone()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn find_vendor(&self, name: &str) -> Result<Option<LedgerVendor>> {
        let needle = name.trim().to_lowercase();
        let vendors = self.vendors.read().await;
        Ok(vendors
            .iter()
            .find(|v| v.name.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn create_vendor(&self, name: &str) -> Result<LedgerVendor> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProcessingError::LedgerError(
                "vendor name must not be empty".to_string(),
            ));
        }

        let vendor = LedgerVendor {
            id: self.allocate_id(),
            name: name.chars().take(100).collect(),
        };
        self.vendors.write().await.push(vendor.clone());
        Ok(vendor)
    }

    async fn create_purchase(&self, request: &PurchaseRequest) -> Result<PostedPurchase> {
        let known_vendor = self
            .vendors
            .read()
            .await
            .iter()
            .any(|v| v.id == request.vendor_id);
        if !known_vendor {
            return Err(ProcessingError::LedgerError(format!(
                "vendor {} does not exist",
                request.vendor_id
            )));
        }

        let id = self.allocate_id();
        self.purchases
            .write()
            .await
            .insert(id.clone(), request.clone());

        Ok(PostedPurchase {
            id,
            total: request.amount,
            txn_date: request.txn_date,
            payment_type: request.payment_type,
        })
    }

    async fn attach_file(
        &self,
        purchase_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        if !self.purchases.read().await.contains_key(purchase_id) {
            return Err(ProcessingError::LedgerError(format!(
                "purchase {} does not exist",
                purchase_id
            )));
        }

        let id = self.allocate_id();
        self.attachments.write().await.push(Attachment {
            id: id.clone(),
            purchase_id: purchase_id.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len(),
        });
        Ok(id)
    }
}

//
// ================= Event Board =================
//

#[derive(Debug, Clone)]
pub struct Subitem {
    pub id: String,
    pub parent_item_id: String,
    pub request: SubitemRequest,
}

pub struct InMemoryEventBoard {
    events: Arc<RwLock<Vec<BoardEvent>>>,
    revenue_items: Arc<RwLock<HashMap<String, String>>>,
    subitems: Arc<RwLock<Vec<Subitem>>>,
    next_id: AtomicU64,
}

impl InMemoryEventBoard {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            revenue_items: Arc::new(RwLock::new(HashMap::new())),
            subitems: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn insert_event(&self, event: BoardEvent) {
        self.events.write().await.push(event);
    }

    pub async fn insert_revenue_item(&self, event_id: &str, item_id: &str) {
        self.revenue_items
            .write()
            .await
            .insert(event_id.to_string(), item_id.to_string());
    }

    pub async fn subitems(&self) -> Vec<Subitem> {
        self.subitems.read().await.clone()
    }
}

impl Default for InMemoryEventBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventBoard for InMemoryEventBoard {
    async fn events_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<BoardEvent>> {
        let mut events: Vec<BoardEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.overlaps(start, end))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start_date);
        Ok(events)
    }

    async fn revenue_item_for_event(&self, event_id: &str) -> Result<Option<String>> {
        Ok(self.revenue_items.read().await.get(event_id).cloned())
    }

    async fn create_subitem(&self, parent_item_id: &str, request: &SubitemRequest) -> Result<String> {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subitems.write().await.push(Subitem {
            id: id.clone(),
            parent_item_id: parent_item_id.to_string(),
            request: request.clone(),
        });
        Ok(id)
    }
}

//
// ================= Receipt Storage =================
//

pub struct InMemoryReceiptStorage {
    files: Arc<RwLock<HashMap<String, ReceiptFile>>>,
}

impl InMemoryReceiptStorage {
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, receipt_ref: &str, content_type: &str, bytes: Vec<u8>) {
        self.files.write().await.insert(
            receipt_ref.to_string(),
            ReceiptFile {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }
}

impl Default for InMemoryReceiptStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ReceiptStorage for InMemoryReceiptStorage {
    async fn fetch(&self, receipt_ref: &str) -> Result<ReceiptFile> {
        self.files
            .read()
            .await
            .get(receipt_ref)
            .cloned()
            .ok_or_else(|| ProcessingError::StorageError(format!("no file at {}", receipt_ref)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentSource;

    #[tokio::test]
    async fn test_get_or_create_vendor_reuses_existing() {
        let ledger = InMemoryLedger::new();
        let (created, was_created) = ledger.get_or_create_vendor("Love's Travel Stop").await.unwrap();
        assert!(was_created);

        let (found, was_created) = ledger.get_or_create_vendor("love's").await.unwrap();
        assert!(!was_created);
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_purchase_requires_known_vendor() {
        let ledger = InMemoryLedger::new();
        let date = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let request = PurchaseRequest::new("404", 10.0, date, "87", PaymentSource::Amex);
        assert!(matches!(
            ledger.create_purchase(&request).await,
            Err(ProcessingError::LedgerError(_))
        ));
    }
}
