//! Ledger operations: account and vendor lookup, vendor creation, posting and attachments

use crate::error::ProcessingError;
use crate::integrations::{filename_for_content_type, PurchaseRequest};
use crate::models::{PaymentSource, ProcessingResult};
use crate::tools::{parse_args, Operation, Tool, ToolContext};
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const FALLBACK_ACCOUNT_ID: &str = "20";
pub const FALLBACK_ACCOUNT_NAME: &str = "Ask My Accountant";
const DEFAULT_RECEIPT_FILENAME: &str = "receipt.jpg";

//
// ================= lookup_expense_account =================
//

#[derive(Debug, Deserialize)]
struct AccountArgs {
    category_name: String,
}

pub struct LookupExpenseAccountTool;

#[async_trait::async_trait]
impl Tool for LookupExpenseAccountTool {
    fn operation(&self) -> Operation {
        Operation::LookupExpenseAccount
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        _result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: AccountArgs = parse_args(self.operation(), input)?;

        match ctx.services.store.account_for_category(&args.category_name).await? {
            Some(account) => Ok(json!({
                "found": true,
                "account": {
                    "id": account.id,
                    "name": account.name,
                    "category": args.category_name,
                },
            })),
            None => {
                warn!(category = %args.category_name, "No ledger account mapped for category");
                Ok(json!({
                    "found": false,
                    "message": format!("No account mapping for category '{}'", args.category_name),
                    "fallback_account": {
                        "id": FALLBACK_ACCOUNT_ID,
                        "name": FALLBACK_ACCOUNT_NAME,
                    },
                }))
            }
        }
    }
}

//
// ================= Vendors =================
//

#[derive(Debug, Deserialize)]
struct VendorArgs {
    name: String,
}

pub struct LookupVendorTool;

#[async_trait::async_trait]
impl Tool for LookupVendorTool {
    fn operation(&self) -> Operation {
        Operation::LookupVendor
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: VendorArgs = parse_args(self.operation(), input)?;

        match ctx.services.ledger.find_vendor(&args.name).await? {
            Some(vendor) => {
                result.ledger_vendor_id = Some(vendor.id.clone());
                result.ledger_vendor_name = Some(vendor.name.clone());
                Ok(json!({
                    "found": true,
                    "vendor": { "id": vendor.id, "display_name": vendor.name },
                }))
            }
            None => Ok(json!({
                "found": false,
                "message": format!("Vendor '{}' not found", args.name),
            })),
        }
    }
}

pub struct CreateVendorTool;

#[async_trait::async_trait]
impl Tool for CreateVendorTool {
    fn operation(&self) -> Operation {
        Operation::CreateVendor
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: VendorArgs = parse_args(self.operation(), input)?;

        let vendor = ctx.services.ledger.create_vendor(&args.name).await?;
        info!(vendor_id = %vendor.id, name = %vendor.name, "Created ledger vendor");

        result.ledger_vendor_id = Some(vendor.id.clone());
        result.ledger_vendor_name = Some(vendor.name.clone());
        result.ledger_vendor_created = true;

        Ok(json!({
            "created": true,
            "vendor": { "id": vendor.id, "display_name": vendor.name },
        }))
    }
}

//
// ================= create_purchase =================
//

#[derive(Debug, Deserialize)]
struct PurchaseArgs {
    vendor_id: String,
    amount: f64,
    date: NaiveDate,
    account_id: String,
    jurisdiction_code: Option<String>,
    payment_source: PaymentSource,
    memo: Option<String>,
}

pub struct CreatePurchaseTool;

#[async_trait::async_trait]
impl Tool for CreatePurchaseTool {
    fn operation(&self) -> Operation {
        Operation::CreatePurchase
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        if !result.has_successful_call(Operation::LookupExpenseAccount.name()) {
            return Err(ProcessingError::ToolError(
                "lookup_expense_account must succeed before create_purchase".to_string(),
            ));
        }

        let args: PurchaseArgs = parse_args(self.operation(), input)?;
        if args.amount <= 0.0 {
            return Err(ProcessingError::InvalidToolInput(format!(
                "create_purchase: amount must be positive, got {}",
                args.amount
            )));
        }

        let jurisdiction = args
            .jurisdiction_code
            .as_deref()
            .or(result.jurisdiction.as_deref())
            .map(str::to_string);
        let request = PurchaseRequest::new(
            args.vendor_id,
            args.amount,
            args.date,
            args.account_id,
            args.payment_source,
        )
        .with_jurisdiction(jurisdiction.as_deref())
        .with_memo(args.memo.as_deref(), &ctx.expense.external_id);

        let posted = ctx.services.ledger.create_purchase(&request).await?;
        info!(
            expense_id = %ctx.expense.id,
            purchase_id = %posted.id,
            amount = posted.total,
            "Purchase posted to ledger"
        );

        result.ledger_purchase_id = Some(posted.id.clone());

        Ok(json!({
            "purchase": {
                "id": posted.id,
                "total_amount": posted.total,
                "txn_date": posted.txn_date.to_string(),
                "payment_type": posted.payment_type.as_str(),
            },
        }))
    }
}

//
// ================= attach_receipt =================
//

#[derive(Debug, Deserialize)]
struct AttachArgs {
    purchase_id: String,
    receipt_ref: Option<String>,
    filename: Option<String>,
}

pub struct AttachReceiptTool;

#[async_trait::async_trait]
impl Tool for AttachReceiptTool {
    fn operation(&self) -> Operation {
        Operation::AttachReceipt
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: AttachArgs = parse_args(self.operation(), input)?;
        let receipt_ref = args
            .receipt_ref
            .filter(|r| !r.trim().is_empty())
            .or_else(|| ctx.expense.receipt_ref.clone())
            .ok_or_else(|| ProcessingError::MissingReceipt(ctx.expense.id.clone()))?;

        let file = ctx.services.receipts.fetch(&receipt_ref).await?;
        let requested = args
            .filename
            .unwrap_or_else(|| DEFAULT_RECEIPT_FILENAME.to_string());
        let filename = filename_for_content_type(&requested, &file.content_type);

        let attachment_id = ctx
            .services
            .ledger
            .attach_file(&args.purchase_id, &filename, &file.content_type, file.bytes)
            .await?;

        result.ledger_attachment_id = Some(attachment_id.clone());

        Ok(json!({
            "attachable": { "id": attachment_id, "filename": filename },
        }))
    }
}
