//! Core data models for expense processing

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Pending,
    Processing,
    Posted,
    Flagged,
    Error,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Amex,
    WellsFargo,
}

impl PaymentSource {
    /// Normalize the free-text "paid through" field. Unknown channels post as Amex.
    pub fn from_paid_through(paid_through: Option<&str>) -> Self {
        let lowered = paid_through.unwrap_or_default().to_lowercase();
        if lowered.contains("wells") {
            PaymentSource::WellsFargo
        } else {
            PaymentSource::Amex
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSource::Amex => "amex",
            PaymentSource::WellsFargo => "wells_fargo",
        }
    }
}

impl fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BankTransactionStatus {
    Unmatched,
    Matched,
    Excluded,
    OrphanProcessed,
    PendingReview,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingDecision {
    AutoPost,
    NeedsReview,
    Flagged,
    Duplicate,
    NoMatch,
    Corrected,
}

impl ProcessingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingDecision::AutoPost => "auto_post",
            ProcessingDecision::NeedsReview => "needs_review",
            ProcessingDecision::Flagged => "flagged",
            ProcessingDecision::Duplicate => "duplicate",
            ProcessingDecision::NoMatch => "no_match",
            ProcessingDecision::Corrected => "corrected",
        }
    }
}

impl fmt::Display for ProcessingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ================= Expense =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    /// Reference id assigned by the intake system
    pub external_id: String,
    pub expense_date: NaiveDate,
    pub amount: f64,
    pub vendor_name: Option<String>,
    pub category_name: Option<String>,
    pub description: Option<String>,
    pub jurisdiction_tag: Option<String>,
    pub paid_through: Option<String>,
    pub receipt_ref: Option<String>,
    pub receipt_content_type: Option<String>,
    pub status: ExpenseStatus,
    pub processing_attempts: u32,
    pub flag_reason: Option<String>,
    pub last_error: Option<String>,
    pub bank_transaction_id: Option<String>,
    pub match_confidence: Option<u8>,
    pub ledger_purchase_id: Option<String>,
    pub original_amount: Option<f64>,
    pub original_expense_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn new(id: impl Into<String>, expense_date: NaiveDate, amount: f64) -> Self {
        let id = id.into();
        Self {
            external_id: id.clone(),
            id,
            expense_date,
            amount,
            vendor_name: None,
            category_name: None,
            description: None,
            jurisdiction_tag: None,
            paid_through: None,
            receipt_ref: None,
            receipt_content_type: None,
            status: ExpenseStatus::Pending,
            processing_attempts: 0,
            flag_reason: None,
            last_error: None,
            bank_transaction_id: None,
            match_confidence: None,
            ledger_purchase_id: None,
            original_amount: None,
            original_expense_date: None,
            updated_at: Utc::now(),
        }
    }

    /// Cost-of-sales categories carry a "- COS" suffix
    pub fn is_cost_of_sales(&self) -> bool {
        self.category_name
            .as_deref()
            .map(|c| c.trim_end().ends_with("- COS"))
            .unwrap_or(false)
    }

    pub fn payment_source(&self) -> PaymentSource {
        PaymentSource::from_paid_through(self.paid_through.as_deref())
    }

    pub fn extracted_jurisdiction(&self) -> Option<String> {
        self.jurisdiction_tag
            .as_deref()
            .and_then(crate::jurisdiction::code_from_text)
    }

    pub fn has_receipt(&self) -> bool {
        self.receipt_ref
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

//
// ================= Bank Transaction =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: String,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub source: PaymentSource,
    pub extracted_vendor: Option<String>,
    pub status: BankTransactionStatus,
    pub matched_expense_id: Option<String>,
    pub matched_by: Option<String>,
    pub match_confidence: Option<u8>,
    pub ledger_purchase_id: Option<String>,
    /// Set when orphan triage resolved the transaction without an expense
    pub orphan_category: Option<String>,
    pub orphan_jurisdiction: Option<String>,
    pub orphan_method: Option<String>,
    pub orphan_processed_at: Option<DateTime<Utc>>,
}

impl BankTransaction {
    pub fn new(
        id: impl Into<String>,
        transaction_date: NaiveDate,
        amount: f64,
        description: impl Into<String>,
        source: PaymentSource,
    ) -> Self {
        Self {
            id: id.into(),
            transaction_date,
            description: description.into(),
            amount,
            source,
            extracted_vendor: None,
            status: BankTransactionStatus::Unmatched,
            matched_expense_id: None,
            matched_by: None,
            match_confidence: None,
            ledger_purchase_id: None,
            orphan_category: None,
            orphan_jurisdiction: None,
            orphan_method: None,
            orphan_processed_at: None,
        }
    }
}

/// Category and jurisdiction chosen for a vendor, fed back as model context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorizationRecord {
    pub vendor: String,
    pub description: Option<String>,
    pub category: String,
    pub jurisdiction: String,
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
}

//
// ================= Corrections =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionField {
    Amount,
    ExpenseDate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionSource {
    Receipt,
    BankTransaction,
    BankMatching,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Correction {
    pub field: CorrectionField,
    pub original_value: Value,
    pub corrected_value: Value,
    pub reason: String,
    pub confidence: u8,
    pub source: CorrectionSource,
}

impl Correction {
    pub fn new(
        field: CorrectionField,
        original_value: Value,
        corrected_value: Value,
        reason: impl Into<String>,
        confidence: u8,
        source: CorrectionSource,
    ) -> Self {
        Self {
            field,
            original_value,
            corrected_value,
            reason: reason.into(),
            confidence: confidence.min(100),
            source,
        }
    }
}

//
// ================= Tool Calls =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: Uuid,
    pub operation: String,
    pub input: Value,
    pub output: Value,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

//
// ================= Processing Result =================
//

/// Per-run aggregate. Corrections and tool calls are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub run_id: Uuid,
    pub expense_id: String,
    pub external_id: String,

    pub success: bool,
    pub decision: ProcessingDecision,
    pub confidence: u8,

    pub bank_transaction_id: Option<String>,
    pub match_confidence: Option<u8>,
    pub match_type: Option<String>,

    pub jurisdiction: Option<String>,
    pub jurisdiction_source: Option<String>,
    pub board_event_id: Option<String>,

    pub ledger_vendor_id: Option<String>,
    pub ledger_vendor_name: Option<String>,
    pub ledger_vendor_created: bool,
    pub ledger_purchase_id: Option<String>,
    pub ledger_attachment_id: Option<String>,
    pub board_subitem_id: Option<String>,

    pub receipt_validated: Option<bool>,
    pub receipt_confidence: Option<u8>,
    pub receipt_amount: Option<f64>,
    pub receipt_date: Option<String>,
    pub receipt_merchant: Option<String>,
    pub receipt_notes: Option<String>,

    corrections: Vec<Correction>,
    tool_calls: Vec<ToolCall>,

    pub flag_reason: Option<String>,
    pub error_message: Option<String>,
    pub reasoning: Option<String>,
    pub iteration_count: u32,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl ProcessingResult {
    pub fn new(expense_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            expense_id: expense_id.into(),
            external_id: external_id.into(),
            success: false,
            decision: ProcessingDecision::NeedsReview,
            confidence: 0,
            bank_transaction_id: None,
            match_confidence: None,
            match_type: None,
            jurisdiction: None,
            jurisdiction_source: None,
            board_event_id: None,
            ledger_vendor_id: None,
            ledger_vendor_name: None,
            ledger_vendor_created: false,
            ledger_purchase_id: None,
            ledger_attachment_id: None,
            board_subitem_id: None,
            receipt_validated: None,
            receipt_confidence: None,
            receipt_amount: None,
            receipt_date: None,
            receipt_merchant: None,
            receipt_notes: None,
            corrections: Vec::new(),
            tool_calls: Vec::new(),
            flag_reason: None,
            error_message: None,
            reasoning: None,
            iteration_count: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn for_expense(expense: &Expense) -> Self {
        Self::new(expense.id.clone(), expense.external_id.clone())
    }

    pub fn add_correction(&mut self, correction: Correction) {
        self.corrections.push(correction);
    }

    pub fn add_tool_call(&mut self, call: ToolCall) {
        self.tool_calls.push(call);
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn was_corrected(&self) -> bool {
        !self.corrections.is_empty()
    }

    pub fn failed_tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.tool_calls.iter().filter(|c| !c.success)
    }

    /// True when `operation` has completed successfully earlier in this run
    pub fn has_successful_call(&self, operation: &str) -> bool {
        self.tool_calls
            .iter()
            .any(|c| c.success && c.operation == operation)
    }

    /// Latest correction recorded for `field`
    pub fn correction_for(&self, field: CorrectionField) -> Option<&Correction> {
        self.corrections.iter().rev().find(|c| c.field == field)
    }

    /// Terminal unsuccessful state with a machine-readable reason
    pub fn flag(&mut self, decision: ProcessingDecision, reason: impl Into<String>) {
        self.success = false;
        self.decision = decision;
        self.flag_reason = Some(reason.into());
    }

    pub fn finish(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
        self.duration_ms = Some(elapsed);
    }

    /// One-line human readable outcome
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.success {
            match &self.ledger_purchase_id {
                Some(id) => parts.push(format!("Posted to ledger (purchase {})", id)),
                None => parts.push("Posted".to_string()),
            }
        } else {
            match &self.flag_reason {
                Some(reason) => parts.push(format!("{}: {}", self.decision, reason)),
                None => parts.push(self.decision.to_string()),
            }
        }

        if let Some(txn) = &self.bank_transaction_id {
            parts.push(format!(
                "bank txn {} ({}%)",
                txn,
                self.match_confidence.unwrap_or(0)
            ));
        }

        if let Some(code) = &self.jurisdiction {
            parts.push(format!(
                "jurisdiction {} via {}",
                code,
                self.jurisdiction_source.as_deref().unwrap_or("unknown")
            ));
        }

        if self.was_corrected() {
            parts.push(format!("{} correction(s)", self.corrections.len()));
        }

        if let Some(err) = &self.error_message {
            parts.push(format!("error: {}", err));
        }

        parts.join(" | ")
    }
}

//
// ================= Request / Response Payloads =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub expense_id: String,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HumanCorrections {
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedRequest {
    pub expense_id: String,
    pub bank_transaction_id: String,
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub corrections: Option<HumanCorrections>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub expense_id: String,
    pub success: bool,
    pub decision: ProcessingDecision,
    pub confidence: u8,
    pub ledger_reference_id: Option<String>,
    pub message: String,
}

impl ProcessResponse {
    pub fn from_result(result: &ProcessingResult) -> Self {
        Self {
            expense_id: result.expense_id.clone(),
            success: result.success,
            decision: result.decision,
            confidence: result.confidence,
            ledger_reference_id: result.ledger_purchase_id.clone(),
            message: result.summary(),
        }
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_payment_source_normalization() {
        assert_eq!(
            PaymentSource::from_paid_through(Some("Wells Fargo Debit")),
            PaymentSource::WellsFargo
        );
        assert_eq!(
            PaymentSource::from_paid_through(Some("AMEX Business")),
            PaymentSource::Amex
        );
        assert_eq!(PaymentSource::from_paid_through(None), PaymentSource::Amex);
    }

    #[test]
    fn test_cost_of_sales_flag() {
        let mut expense = Expense::new("e-1", date(2025, 6, 1), 12.0);
        assert!(!expense.is_cost_of_sales());

        expense.category_name = Some("Fuel - COS".to_string());
        assert!(expense.is_cost_of_sales());

        expense.category_name = Some("Meals".to_string());
        assert!(!expense.is_cost_of_sales());
    }

    #[test]
    fn test_result_append_only_accessors() {
        let mut result = ProcessingResult::new("e-1", "ext-1");
        assert!(!result.was_corrected());

        result.add_correction(Correction::new(
            CorrectionField::Amount,
            serde_json::json!(50.0),
            serde_json::json!(60.0),
            "tip",
            75,
            CorrectionSource::BankTransaction,
        ));
        result.add_correction(Correction::new(
            CorrectionField::Amount,
            serde_json::json!(60.0),
            serde_json::json!(61.0),
            "second pass",
            250,
            CorrectionSource::Human,
        ));

        assert!(result.was_corrected());
        assert_eq!(result.corrections().len(), 2);
        let latest = result.correction_for(CorrectionField::Amount).unwrap();
        assert_eq!(latest.reason, "second pass");
        assert_eq!(latest.confidence, 100);
        assert!(result.correction_for(CorrectionField::ExpenseDate).is_none());
    }

    #[test]
    fn test_summary_reports_flag_reason() {
        let mut result = ProcessingResult::new("e-1", "ext-1");
        result.flag(ProcessingDecision::Flagged, "max_iterations_exceeded");
        assert_eq!(result.summary(), "flagged: max_iterations_exceeded");

        let mut posted = ProcessingResult::new("e-2", "ext-2");
        posted.success = true;
        posted.decision = ProcessingDecision::AutoPost;
        posted.ledger_purchase_id = Some("145".to_string());
        posted.bank_transaction_id = Some("txn-9".to_string());
        posted.match_confidence = Some(95);
        assert_eq!(
            posted.summary(),
            "Posted to ledger (purchase 145) | bank txn txn-9 (95%)"
        );
    }

    #[test]
    fn test_request_payload_wire_names() {
        let req: ApprovedRequest = serde_json::from_value(serde_json::json!({
            "expenseId": "e-1",
            "bankTransactionId": "t-1",
            "corrections": { "amount": 42.5, "date": "2025-03-04" }
        }))
        .unwrap();

        assert_eq!(req.bank_transaction_id, "t-1");
        let corrections = req.corrections.unwrap();
        assert_eq!(corrections.amount, Some(42.5));
        assert_eq!(corrections.date, Some(date(2025, 3, 4)));

        let req: ProcessRequest =
            serde_json::from_value(serde_json::json!({ "expenseId": "e-2" })).unwrap();
        assert_eq!(req.retry_count, 0);
    }
}
