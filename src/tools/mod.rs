//! Operation catalog and handler registry
//!
//! The set of operations is closed. Each has exactly one handler, registered
//! once at startup into an immutable table. Handlers get read handles to the
//! expense and collaborators plus the run's result accumulator.

pub mod bank;
pub mod board;
pub mod jurisdiction;
pub mod ledger;
pub mod receipt;
pub mod review;

use crate::error::ProcessingError;
use crate::integrations::{EventBoard, Ledger, ReceiptStorage};
use crate::llm::ToolDefinition;
use crate::models::{Expense, ProcessingResult};
use crate::receipt::ReceiptReader;
use crate::state::ExpenseStore;
use crate::Result;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

//
// ================= Catalog =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ValidateReceipt,
    MatchBankTransaction,
    DetermineJurisdiction,
    LookupExpenseAccount,
    LookupVendor,
    CreateVendor,
    CreatePurchase,
    AttachReceipt,
    CreateTrackingSubitem,
    FlagForReview,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::ValidateReceipt,
        Operation::MatchBankTransaction,
        Operation::DetermineJurisdiction,
        Operation::LookupExpenseAccount,
        Operation::LookupVendor,
        Operation::CreateVendor,
        Operation::CreatePurchase,
        Operation::AttachReceipt,
        Operation::CreateTrackingSubitem,
        Operation::FlagForReview,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::ValidateReceipt => "validate_receipt",
            Operation::MatchBankTransaction => "match_bank_transaction",
            Operation::DetermineJurisdiction => "determine_state",
            Operation::LookupExpenseAccount => "lookup_expense_account",
            Operation::LookupVendor => "lookup_vendor",
            Operation::CreateVendor => "create_vendor",
            Operation::CreatePurchase => "create_purchase",
            Operation::AttachReceipt => "attach_receipt",
            Operation::CreateTrackingSubitem => "create_tracking_subitem",
            Operation::FlagForReview => "flag_for_review",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operation::ValidateReceipt => {
                "Read the receipt with vision and compare it to the expense. Returns extracted amount, date and merchant, discrepancies and suggested corrections."
            }
            Operation::MatchBankTransaction => {
                "Find the bank transaction for this expense by amount, date and merchant. Detects tips and day/month inversions. Returns the best match with a confidence score."
            }
            Operation::DetermineJurisdiction => {
                "Determine the jurisdiction code using the waterfall: expense tag, then board event, then vendor rules. Returns the code and its source."
            }
            Operation::LookupExpenseAccount => {
                "REQUIRED before create_purchase. Look up the ledger expense account for an expense category."
            }
            Operation::LookupVendor => "Search the ledger for a vendor by name.",
            Operation::CreateVendor => {
                "Create a vendor in the ledger. Use only if lookup_vendor found nothing."
            }
            Operation::CreatePurchase => {
                "Create the purchase in the ledger. This is the final posting step."
            }
            Operation::AttachReceipt => "Attach the receipt file to a ledger purchase.",
            Operation::CreateTrackingSubitem => {
                "Create a tracking subitem under the event's revenue item. Cost-of-sales expenses only."
            }
            Operation::FlagForReview => {
                "Flag the expense for human review with a reason and suggestions."
            }
        }
    }

    pub fn input_schema(&self) -> Value {
        match self {
            Operation::ValidateReceipt => json!({
                "type": "object",
                "properties": {
                    "receipt_ref": { "type": "string", "description": "Receipt file reference (defaults to the expense's receipt)" },
                    "expected_amount": { "type": "number", "description": "Amount claimed on the expense" },
                    "expected_merchant": { "type": "string", "description": "Vendor name on the expense" },
                    "expected_date": { "type": "string", "description": "Expense date (YYYY-MM-DD)" }
                },
                "required": ["expected_amount"]
            }),
            Operation::MatchBankTransaction => json!({
                "type": "object",
                "properties": {
                    "amount": { "type": "number", "description": "Expense amount" },
                    "date": { "type": "string", "description": "Expense date (YYYY-MM-DD)" },
                    "merchant": { "type": "string", "description": "Merchant or vendor name" },
                    "source": { "type": "string", "enum": ["amex", "wells_fargo"], "description": "Payment source to search" },
                    "amount_tolerance": { "type": "number", "description": "Amount tolerance (default 0.50)" },
                    "date_tolerance_days": { "type": "integer", "minimum": 0, "maximum": 31, "description": "Date tolerance in days (default 3, at most 31)" }
                },
                "required": ["amount", "date", "source"]
            }),
            Operation::DetermineJurisdiction => json!({
                "type": "object",
                "properties": {
                    "jurisdiction_tag": { "type": "string", "description": "Jurisdiction tag on the expense (e.g. 'California - CA')" },
                    "expense_date": { "type": "string", "description": "Expense date (YYYY-MM-DD)" },
                    "vendor_name": { "type": "string", "description": "Vendor name for rule lookup" },
                    "is_cost_of_sales": { "type": "boolean", "description": "Whether this is a cost-of-sales expense" }
                },
                "required": ["expense_date"]
            }),
            Operation::LookupExpenseAccount => json!({
                "type": "object",
                "properties": {
                    "category_name": { "type": "string", "description": "Expense category (e.g. 'Fuel - COS')" }
                },
                "required": ["category_name"]
            }),
            Operation::LookupVendor | Operation::CreateVendor => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Vendor display name" }
                },
                "required": ["name"]
            }),
            Operation::CreatePurchase => json!({
                "type": "object",
                "properties": {
                    "vendor_id": { "type": "string", "description": "Ledger vendor id" },
                    "amount": { "type": "number", "description": "Amount to post" },
                    "date": { "type": "string", "description": "Transaction date (YYYY-MM-DD); use the corrected date if matching repaired it" },
                    "account_id": { "type": "string", "description": "Expense account id from lookup_expense_account" },
                    "jurisdiction_code": { "type": "string", "description": "Two-letter jurisdiction code" },
                    "payment_source": { "type": "string", "enum": ["amex", "wells_fargo"] },
                    "memo": { "type": "string" }
                },
                "required": ["vendor_id", "amount", "date", "account_id", "payment_source"]
            }),
            Operation::AttachReceipt => json!({
                "type": "object",
                "properties": {
                    "purchase_id": { "type": "string", "description": "Ledger purchase id" },
                    "receipt_ref": { "type": "string", "description": "Receipt file reference (defaults to the expense's receipt)" },
                    "filename": { "type": "string", "description": "File name (default receipt.jpg)" }
                },
                "required": ["purchase_id"]
            }),
            Operation::CreateTrackingSubitem => json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "Expense date (YYYY-MM-DD)" },
                    "jurisdiction_code": { "type": "string" },
                    "name": { "type": "string", "description": "Subitem name" },
                    "category": { "type": "string" },
                    "amount": { "type": "number" }
                },
                "required": ["date", "name", "category", "amount"]
            }),
            Operation::FlagForReview => json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "Why a human needs to look at this" },
                    "confidence": { "type": "integer", "description": "Confidence 0-100" },
                    "suggestions": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["reason", "confidence"]
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

//
// ================= Handler context =================
//

/// Collaborator handles, built once per worker
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ExpenseStore>,
    pub ledger: Arc<dyn Ledger>,
    pub board: Arc<dyn EventBoard>,
    pub receipts: Arc<dyn ReceiptStorage>,
    pub reader: Arc<dyn ReceiptReader>,
}

/// Read-only view handed to every handler
pub struct ToolContext<'a> {
    pub expense: &'a Expense,
    pub services: &'a Services,
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn operation(&self) -> Operation;

    /// Run the operation. Handlers record what they learn on `result`.
    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value>;
}

/// Typed arguments from the model's JSON
pub(crate) fn parse_args<T: DeserializeOwned>(operation: Operation, input: &Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| {
        ProcessingError::InvalidToolInput(format!("{}: {}", operation.name(), e))
    })
}

//
// ================= Registry =================
//

pub struct ToolRegistry {
    tools: HashMap<Operation, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with every catalog operation bound to its handler
    pub fn build() -> Result<Self> {
        let handlers: Vec<Arc<dyn Tool>> = vec![
            Arc::new(receipt::ValidateReceiptTool::default()),
            Arc::new(bank::MatchBankTransactionTool),
            Arc::new(jurisdiction::DetermineJurisdictionTool),
            Arc::new(ledger::LookupExpenseAccountTool),
            Arc::new(ledger::LookupVendorTool),
            Arc::new(ledger::CreateVendorTool),
            Arc::new(ledger::CreatePurchaseTool),
            Arc::new(ledger::AttachReceiptTool),
            Arc::new(board::CreateTrackingSubitemTool),
            Arc::new(review::FlagForReviewTool),
        ];
        Self::from_handlers(handlers)
    }

    fn from_handlers(handlers: Vec<Arc<dyn Tool>>) -> Result<Self> {
        let mut tools = HashMap::with_capacity(handlers.len());
        for handler in handlers {
            let operation = handler.operation();
            if tools.insert(operation, handler).is_some() {
                return Err(ProcessingError::InvariantViolation(format!(
                    "operation {} registered twice",
                    operation.name()
                )));
            }
        }

        if let Some(missing) = Operation::ALL.iter().find(|op| !tools.contains_key(*op)) {
            return Err(ProcessingError::InvariantViolation(format!(
                "operation {} has no handler",
                missing.name()
            )));
        }

        Ok(Self { tools })
    }

    pub fn get(&self, operation: Operation) -> Option<Arc<dyn Tool>> {
        self.tools.get(&operation).cloned()
    }

    /// Definitions advertised to the model, in catalog order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        Operation::ALL.iter().map(Operation::definition).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("delete_everything"), None);
    }

    #[test]
    fn test_registry_covers_catalog() {
        let registry = ToolRegistry::build().unwrap();
        for op in Operation::ALL {
            assert_eq!(registry.get(op).unwrap().operation(), op);
        }
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[2], "determine_state");
    }

    #[test]
    fn test_incomplete_registry_is_rejected() {
        let handlers: Vec<Arc<dyn Tool>> = vec![Arc::new(review::FlagForReviewTool)];
        assert!(matches!(
            ToolRegistry::from_handlers(handlers),
            Err(ProcessingError::InvariantViolation(_))
        ));

        let doubled: Vec<Arc<dyn Tool>> = vec![
            Arc::new(review::FlagForReviewTool),
            Arc::new(review::FlagForReviewTool),
        ];
        assert!(ToolRegistry::from_handlers(doubled).is_err());
    }
}
