//! Expense and bank transaction persistence
//!
//! The production database sits behind `ExpenseStore`. The in-memory store
//! backs tests, the demo binary and single-process deployments.

use crate::error::ProcessingError;
use crate::models::{
    BankTransaction, BankTransactionStatus, CategorizationRecord, Correction, Expense,
    ExpenseStatus, PaymentSource,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ledger account mapped to an expense category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerAccount {
    pub id: String,
    pub name: String,
}

/// Vendor-name rule used by the jurisdiction waterfall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRule {
    /// Case-insensitive pattern containing the vendor name
    pub vendor_pattern: String,
    pub default_jurisdiction: Option<String>,
    pub confidence: Option<u8>,
    pub note: Option<String>,
    pub active: bool,
}

/// Who paired a transaction with an expense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Agent,
    Human,
}

impl MatchedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedBy::Agent => "agent",
            MatchedBy::Human => "human",
        }
    }
}

/// Final state orphan triage gives a transaction nobody claimed
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanResolution {
    /// One of `Excluded`, `OrphanProcessed` or `PendingReview`
    pub status: BankTransactionStatus,
    pub category: Option<String>,
    pub jurisdiction: Option<String>,
    pub method: String,
    pub ledger_purchase_id: Option<String>,
}

/// Trait for expense/transaction persistence
#[async_trait::async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn get_expense(&self, expense_id: &str) -> Result<Option<Expense>>;
    async fn save_expense(&self, expense: &Expense) -> Result<()>;

    /// Expenses that have sat in `processing` since before `cutoff`
    async fn stuck_expenses(&self, cutoff: DateTime<Utc>) -> Result<Vec<Expense>>;

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<BankTransaction>>;

    /// Unmatched transactions for one source, inclusive date range, oldest first
    async fn unmatched_transactions(
        &self,
        source: PaymentSource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BankTransaction>>;

    /// Pair a transaction with an expense. Fails if it was already paired.
    async fn mark_transaction_matched(
        &self,
        transaction_id: &str,
        expense_id: &str,
        matched_by: MatchedBy,
        confidence: u8,
        ledger_purchase_id: Option<&str>,
    ) -> Result<()>;

    /// Unmatched transactions dated before `before`, any source, oldest first
    async fn orphan_transactions(&self, before: NaiveDate, limit: usize) -> Result<Vec<BankTransaction>>;

    /// Close out an unmatched transaction without an expense. Fails if it was already claimed.
    async fn resolve_orphan(&self, transaction_id: &str, resolution: &OrphanResolution) -> Result<()>;

    async fn account_for_category(&self, category_name: &str) -> Result<Option<LedgerAccount>>;
    async fn vendor_rule(&self, vendor_name: &str) -> Result<Option<VendorRule>>;

    async fn record_corrections(&self, expense_id: &str, corrections: &[Correction]) -> Result<()>;

    /// Most recent first
    async fn categorization_history(&self, limit: usize) -> Result<Vec<CategorizationRecord>>;
    async fn record_categorization(&self, record: &CategorizationRecord) -> Result<()>;
}

/// In-memory store for development and tests
pub struct InMemoryExpenseStore {
    expenses: Arc<RwLock<HashMap<String, Expense>>>,
    transactions: Arc<RwLock<HashMap<String, BankTransaction>>>,
    accounts: Arc<RwLock<HashMap<String, LedgerAccount>>>,
    vendor_rules: Arc<RwLock<Vec<VendorRule>>>,
    corrections: Arc<RwLock<HashMap<String, Vec<Correction>>>>,
    categorizations: Arc<RwLock<Vec<CategorizationRecord>>>,
}

impl InMemoryExpenseStore {
    pub fn new() -> Self {
        Self {
            expenses: Arc::new(RwLock::new(HashMap::new())),
            transactions: Arc::new(RwLock::new(HashMap::new())),
            accounts: Arc::new(RwLock::new(HashMap::new())),
            vendor_rules: Arc::new(RwLock::new(Vec::new())),
            corrections: Arc::new(RwLock::new(HashMap::new())),
            categorizations: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn insert_expense(&self, expense: Expense) {
        self.expenses.write().await.insert(expense.id.clone(), expense);
    }

    pub async fn insert_transaction(&self, transaction: BankTransaction) {
        self.transactions
            .write()
            .await
            .insert(transaction.id.clone(), transaction);
    }

    pub async fn insert_account(&self, category_name: &str, account: LedgerAccount) {
        self.accounts
            .write()
            .await
            .insert(category_name.to_string(), account);
    }

    pub async fn insert_vendor_rule(&self, rule: VendorRule) {
        self.vendor_rules.write().await.push(rule);
    }

    pub async fn corrections_for(&self, expense_id: &str) -> Vec<Correction> {
        self.corrections
            .read()
            .await
            .get(expense_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryExpenseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ExpenseStore for InMemoryExpenseStore {
    async fn get_expense(&self, expense_id: &str) -> Result<Option<Expense>> {
        Ok(self.expenses.read().await.get(expense_id).cloned())
    }

    async fn save_expense(&self, expense: &Expense) -> Result<()> {
        let mut updated = expense.clone();
        updated.updated_at = Utc::now();
        self.expenses.write().await.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn stuck_expenses(&self, cutoff: DateTime<Utc>) -> Result<Vec<Expense>> {
        let expenses = self.expenses.read().await;
        let mut stuck: Vec<Expense> = expenses
            .values()
            .filter(|e| e.status == ExpenseStatus::Processing && e.updated_at < cutoff)
            .cloned()
            .collect();
        stuck.sort_by_key(|e| e.updated_at);
        Ok(stuck)
    }

    async fn get_transaction(&self, transaction_id: &str) -> Result<Option<BankTransaction>> {
        Ok(self.transactions.read().await.get(transaction_id).cloned())
    }

    async fn unmatched_transactions(
        &self,
        source: PaymentSource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BankTransaction>> {
        let transactions = self.transactions.read().await;
        let mut found: Vec<BankTransaction> = transactions
            .values()
            .filter(|t| {
                t.source == source
                    && t.status == BankTransactionStatus::Unmatched
                    && t.transaction_date >= start
                    && t.transaction_date <= end
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(found)
    }

    async fn mark_transaction_matched(
        &self,
        transaction_id: &str,
        expense_id: &str,
        matched_by: MatchedBy,
        confidence: u8,
        ledger_purchase_id: Option<&str>,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| ProcessingError::TransactionNotFound(transaction_id.to_string()))?;

        if transaction.status != BankTransactionStatus::Unmatched {
            return Err(ProcessingError::InvariantViolation(format!(
                "transaction {} is already {:?} (expense {:?})",
                transaction_id, transaction.status, transaction.matched_expense_id
            )));
        }

        transaction.status = BankTransactionStatus::Matched;
        transaction.matched_expense_id = Some(expense_id.to_string());
        transaction.matched_by = Some(matched_by.as_str().to_string());
        transaction.match_confidence = Some(confidence);
        transaction.ledger_purchase_id = ledger_purchase_id.map(str::to_string);
        Ok(())
    }

    async fn orphan_transactions(&self, before: NaiveDate, limit: usize) -> Result<Vec<BankTransaction>> {
        let transactions = self.transactions.read().await;
        let mut found: Vec<BankTransaction> = transactions
            .values()
            .filter(|t| t.status == BankTransactionStatus::Unmatched && t.transaction_date < before)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.transaction_date
                .cmp(&b.transaction_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn resolve_orphan(&self, transaction_id: &str, resolution: &OrphanResolution) -> Result<()> {
        if matches!(
            resolution.status,
            BankTransactionStatus::Unmatched | BankTransactionStatus::Matched
        ) {
            return Err(ProcessingError::InvariantViolation(format!(
                "{:?} is not an orphan outcome",
                resolution.status
            )));
        }

        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| ProcessingError::TransactionNotFound(transaction_id.to_string()))?;

        if transaction.status != BankTransactionStatus::Unmatched {
            return Err(ProcessingError::InvariantViolation(format!(
                "transaction {} is already {:?} (expense {:?})",
                transaction_id, transaction.status, transaction.matched_expense_id
            )));
        }

        transaction.status = resolution.status;
        transaction.orphan_category = resolution.category.clone();
        transaction.orphan_jurisdiction = resolution.jurisdiction.clone();
        transaction.orphan_method = Some(resolution.method.clone());
        transaction.ledger_purchase_id = resolution.ledger_purchase_id.clone();
        if resolution.status != BankTransactionStatus::PendingReview {
            transaction.orphan_processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn account_for_category(&self, category_name: &str) -> Result<Option<LedgerAccount>> {
        Ok(self.accounts.read().await.get(category_name).cloned())
    }

    async fn vendor_rule(&self, vendor_name: &str) -> Result<Option<VendorRule>> {
        let needle = vendor_name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let rules = self.vendor_rules.read().await;
        Ok(rules
            .iter()
            .find(|r| r.active && r.vendor_pattern.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn record_corrections(&self, expense_id: &str, corrections: &[Correction]) -> Result<()> {
        if corrections.is_empty() {
            return Ok(());
        }
        let mut stored = self.corrections.write().await;
        stored
            .entry(expense_id.to_string())
            .or_insert_with(Vec::new)
            .extend_from_slice(corrections);
        Ok(())
    }

    async fn categorization_history(&self, limit: usize) -> Result<Vec<CategorizationRecord>> {
        let records = self.categorizations.read().await;
        let mut recent = records.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn record_categorization(&self, record: &CategorizationRecord) -> Result<()> {
        self.categorizations.write().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_unmatched_transactions_filters_source_status_and_range() {
        let store = InMemoryExpenseStore::new();
        store
            .insert_transaction(BankTransaction::new("a", date(2025, 5, 2), 10.0, "A", PaymentSource::Amex))
            .await;
        store
            .insert_transaction(BankTransaction::new("b", date(2025, 5, 9), 10.0, "B", PaymentSource::Amex))
            .await;
        store
            .insert_transaction(BankTransaction::new(
                "c",
                date(2025, 5, 3),
                10.0,
                "C",
                PaymentSource::WellsFargo,
            ))
            .await;

        let found = store
            .unmatched_transactions(PaymentSource::Amex, date(2025, 5, 1), date(2025, 5, 5))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_transaction_matches_exactly_once() {
        let store = InMemoryExpenseStore::new();
        store
            .insert_transaction(BankTransaction::new("t-1", date(2025, 5, 2), 10.0, "A", PaymentSource::Amex))
            .await;

        store
            .mark_transaction_matched("t-1", "e-1", MatchedBy::Agent, 95, Some("p-1"))
            .await
            .unwrap();

        let second = store
            .mark_transaction_matched("t-1", "e-2", MatchedBy::Human, 100, None)
            .await;
        assert!(matches!(second, Err(ProcessingError::InvariantViolation(_))));

        let txn = store.get_transaction("t-1").await.unwrap().unwrap();
        assert_eq!(txn.matched_expense_id.as_deref(), Some("e-1"));
        assert_eq!(txn.matched_by.as_deref(), Some("agent"));
    }

    #[tokio::test]
    async fn test_vendor_rule_lookup_is_case_insensitive_and_skips_inactive() {
        let store = InMemoryExpenseStore::new();
        store
            .insert_vendor_rule(VendorRule {
                vendor_pattern: "Buc-ee's Travel Center".to_string(),
                default_jurisdiction: Some("TX".to_string()),
                confidence: None,
                note: None,
                active: false,
            })
            .await;
        assert!(store.vendor_rule("buc-ee's").await.unwrap().is_none());

        store
            .insert_vendor_rule(VendorRule {
                vendor_pattern: "Buc-ee's Travel Center".to_string(),
                default_jurisdiction: Some("TX".to_string()),
                confidence: Some(85),
                note: None,
                active: true,
            })
            .await;
        let rule = store.vendor_rule("BUC-EE'S").await.unwrap().unwrap();
        assert_eq!(rule.confidence, Some(85));
    }

    #[tokio::test]
    async fn test_orphans_are_old_unmatched_and_capped() {
        let store = InMemoryExpenseStore::new();
        for (id, day) in [("late", 20), ("b", 3), ("a", 3), ("c", 9)] {
            store
                .insert_transaction(BankTransaction::new(id, date(2025, 5, day), 10.0, "X", PaymentSource::Amex))
                .await;
        }
        store
            .insert_transaction(BankTransaction::new("wf", date(2025, 5, 1), 10.0, "X", PaymentSource::WellsFargo))
            .await;
        store
            .mark_transaction_matched("c", "e-1", MatchedBy::Agent, 90, None)
            .await
            .unwrap();

        let found = store.orphan_transactions(date(2025, 5, 15), 3).await.unwrap();
        let ids: Vec<_> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["wf", "a", "b"]);
    }

    #[tokio::test]
    async fn test_orphan_resolution_happens_once() {
        let store = InMemoryExpenseStore::new();
        store
            .insert_transaction(BankTransaction::new("t-1", date(2025, 5, 2), 10.0, "A", PaymentSource::Amex))
            .await;
        let excluded = OrphanResolution {
            status: BankTransactionStatus::Excluded,
            category: Some("excluded".to_string()),
            jurisdiction: None,
            method: "ai_agent".to_string(),
            ledger_purchase_id: None,
        };

        store.resolve_orphan("t-1", &excluded).await.unwrap();
        let txn = store.get_transaction("t-1").await.unwrap().unwrap();
        assert_eq!(txn.status, BankTransactionStatus::Excluded);
        assert!(txn.orphan_processed_at.is_some());

        assert!(matches!(
            store.resolve_orphan("t-1", &excluded).await,
            Err(ProcessingError::InvariantViolation(_))
        ));
        assert!(matches!(
            store.mark_transaction_matched("t-1", "e-1", MatchedBy::Human, 100, None).await,
            Err(ProcessingError::InvariantViolation(_))
        ));
    }
}
