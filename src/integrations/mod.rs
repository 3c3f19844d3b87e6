//! External service collaborators
//!
//! The core only talks to the accounting ledger, the event board and the
//! receipt file store through these traits.

pub mod memory;
pub mod quickbooks;

pub use memory::{InMemoryEventBoard, InMemoryLedger, InMemoryReceiptStorage};
pub use quickbooks::QuickBooksLedger;

use crate::models::PaymentSource;
use crate::Result;
use chrono::{Duration, NaiveDate};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

//
// ================= Ledger =================
//

lazy_static! {
    /// Ledger class used for per-jurisdiction tracking
    static ref JURISDICTION_CLASS_IDS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("CA", "1000000004");
        m.insert("TX", "1000000006");
        m.insert("CO", "1000000007");
        m.insert("WA", "1000000008");
        m.insert("NJ", "1000000009");
        m.insert("FL", "1000000010");
        m.insert("MT", "1000000011");
        m.insert("NC", "1000000012");
        m
    };
}

pub fn class_id_for(jurisdiction_code: &str) -> Option<&'static str> {
    JURISDICTION_CLASS_IDS
        .get(jurisdiction_code.trim().to_uppercase().as_str())
        .copied()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentType {
    CreditCard,
    Check,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::CreditCard => "CreditCard",
            PaymentType::Check => "Check",
        }
    }
}

/// Payment account and payment type for the channel an expense settled on
pub fn payment_terms(source: PaymentSource) -> (&'static str, PaymentType) {
    match source {
        PaymentSource::Amex => ("99", PaymentType::CreditCard),
        PaymentSource::WellsFargo => ("49", PaymentType::Check),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerVendor {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub vendor_id: String,
    pub amount: f64,
    pub txn_date: NaiveDate,
    pub account_id: String,
    pub class_id: Option<String>,
    pub payment_account_id: String,
    pub payment_type: PaymentType,
    pub memo: Option<String>,
}

impl PurchaseRequest {
    pub fn new(
        vendor_id: impl Into<String>,
        amount: f64,
        txn_date: NaiveDate,
        account_id: impl Into<String>,
        source: PaymentSource,
    ) -> Self {
        let (payment_account_id, payment_type) = payment_terms(source);
        Self {
            vendor_id: vendor_id.into(),
            amount,
            txn_date,
            account_id: account_id.into(),
            class_id: None,
            payment_account_id: payment_account_id.to_string(),
            payment_type,
            memo: None,
        }
    }

    pub fn with_jurisdiction(mut self, code: Option<&str>) -> Self {
        self.class_id = code.and_then(class_id_for).map(str::to_string);
        self
    }

    /// Memo with the intake reference appended
    pub fn with_memo(mut self, memo: Option<&str>, external_ref: &str) -> Self {
        let mut full = memo.unwrap_or_default().trim().to_string();
        if !external_ref.is_empty() {
            if !full.is_empty() {
                full.push_str(" | ");
            }
            full.push_str(&format!("Ref: {}", external_ref));
        }
        self.memo = if full.is_empty() { None } else { Some(full) };
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedPurchase {
    pub id: String,
    pub total: f64,
    pub txn_date: NaiveDate,
    pub payment_type: PaymentType,
}

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn find_vendor(&self, name: &str) -> Result<Option<LedgerVendor>>;
    async fn create_vendor(&self, name: &str) -> Result<LedgerVendor>;
    async fn create_purchase(&self, request: &PurchaseRequest) -> Result<PostedPurchase>;

    /// Attach a file to a purchase, returning the attachment id
    async fn attach_file(
        &self,
        purchase_id: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String>;

    /// Returns the vendor and whether it had to be created
    async fn get_or_create_vendor(&self, name: &str) -> Result<(LedgerVendor, bool)> {
        if let Some(vendor) = self.find_vendor(name).await? {
            return Ok((vendor, false));
        }
        Ok((self.create_vendor(name).await?, true))
    }
}

//
// ================= Event Board =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardEvent {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub venue: Option<String>,
    /// Explicit jurisdiction column, when the board carries one
    pub jurisdiction: Option<String>,
}

impl BoardEvent {
    pub fn jurisdiction_code(&self) -> Option<String> {
        self.jurisdiction
            .as_deref()
            .and_then(crate::jurisdiction::normalize_code)
            .or_else(|| {
                self.venue
                    .as_deref()
                    .and_then(crate::jurisdiction::code_from_text)
            })
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && self.end_date >= start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubitemRequest {
    pub name: String,
    pub category: String,
    pub date: NaiveDate,
    pub amount: f64,
}

#[async_trait::async_trait]
pub trait EventBoard: Send + Sync {
    /// Events overlapping the inclusive range
    async fn events_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<BoardEvent>>;
    async fn revenue_item_for_event(&self, event_id: &str) -> Result<Option<String>>;
    async fn create_subitem(&self, parent_item_id: &str, request: &SubitemRequest) -> Result<String>;
}

/// Event covering `date` with a day buffer either side, preferring `jurisdiction`
pub async fn find_event(
    board: &dyn EventBoard,
    date: NaiveDate,
    buffer_days: i64,
    jurisdiction: Option<&str>,
) -> Result<Option<BoardEvent>> {
    let span = Duration::days(buffer_days.max(0));
    let events = board.events_between(date - span, date + span).await?;

    if let Some(code) = jurisdiction {
        if let Some(preferred) = events
            .iter()
            .find(|e| e.jurisdiction_code().as_deref() == Some(code))
        {
            return Ok(Some(preferred.clone()));
        }
    }

    Ok(events.into_iter().next())
}

//
// ================= Receipt Storage =================
//

#[derive(Debug, Clone)]
pub struct ReceiptFile {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait::async_trait]
pub trait ReceiptStorage: Send + Sync {
    async fn fetch(&self, receipt_ref: &str) -> Result<ReceiptFile>;
}

/// Align a filename's extension with the fetched content type
pub fn filename_for_content_type(filename: &str, content_type: &str) -> String {
    let content_type = content_type.to_lowercase();
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    };

    if content_type.contains("png") {
        if filename.ends_with(".png") {
            filename.to_string()
        } else {
            format!("{}.png", stem)
        }
    } else if content_type.contains("pdf") {
        if filename.ends_with(".pdf") {
            filename.to_string()
        } else {
            format!("{}.pdf", stem)
        }
    } else if filename.ends_with(".jpg") || filename.ends_with(".jpeg") {
        filename.to_string()
    } else {
        format!("{}.jpg", stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_filename_extension_follows_content_type() {
        assert_eq!(filename_for_content_type("receipt.jpg", "image/png"), "receipt.png");
        assert_eq!(filename_for_content_type("receipt.jpg", "application/pdf"), "receipt.pdf");
        assert_eq!(filename_for_content_type("scan", "image/jpeg"), "scan.jpg");
        assert_eq!(filename_for_content_type("photo.jpeg", "image/jpeg"), "photo.jpeg");
    }

    #[test]
    fn test_purchase_request_terms_and_memo() {
        let request = PurchaseRequest::new("56", 42.0, date(2025, 4, 2), "87", PaymentSource::WellsFargo)
            .with_jurisdiction(Some("tx"))
            .with_memo(Some("Fuel for trailer"), "EXP-1001");

        assert_eq!(request.payment_account_id, "49");
        assert_eq!(request.payment_type, PaymentType::Check);
        assert_eq!(request.class_id.as_deref(), Some("1000000006"));
        assert_eq!(request.memo.as_deref(), Some("Fuel for trailer | Ref: EXP-1001"));

        let request = PurchaseRequest::new("56", 42.0, date(2025, 4, 2), "87", PaymentSource::Amex)
            .with_jurisdiction(Some("ZZ"))
            .with_memo(None, "EXP-1002");
        assert!(request.class_id.is_none());
        assert_eq!(request.memo.as_deref(), Some("Ref: EXP-1002"));
    }

    #[tokio::test]
    async fn test_find_event_prefers_jurisdiction() {
        let board = InMemoryEventBoard::new();
        board
            .insert_event(BoardEvent {
                id: "ev-ca".to_string(),
                name: "Fontana Clinic".to_string(),
                start_date: date(2025, 6, 10),
                end_date: date(2025, 6, 11),
                venue: Some("Auto Club Speedway, Fontana, CA".to_string()),
                jurisdiction: None,
            })
            .await;
        board
            .insert_event(BoardEvent {
                id: "ev-tx".to_string(),
                name: "Austin Clinic".to_string(),
                start_date: date(2025, 6, 11),
                end_date: date(2025, 6, 12),
                venue: Some("Circuit of the Americas, Austin, TX".to_string()),
                jurisdiction: None,
            })
            .await;

        let preferred = find_event(&board, date(2025, 6, 12), 2, Some("TX")).await.unwrap();
        assert_eq!(preferred.unwrap().id, "ev-tx");

        let first = find_event(&board, date(2025, 6, 12), 2, None).await.unwrap();
        assert_eq!(first.unwrap().id, "ev-ca");

        let none = find_event(&board, date(2025, 8, 1), 2, None).await.unwrap();
        assert!(none.is_none());
    }
}
