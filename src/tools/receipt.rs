//! validate_receipt

use crate::error::ProcessingError;
use crate::models::{Correction, CorrectionField, CorrectionSource, ProcessingResult};
use crate::receipt::{ExpectedFields, ReceiptValidator};
use crate::tools::{parse_args, Operation, Tool, ToolContext};
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
struct Args {
    receipt_ref: Option<String>,
    expected_amount: f64,
    expected_merchant: Option<String>,
    expected_date: Option<NaiveDate>,
}

#[derive(Default)]
pub struct ValidateReceiptTool {
    validator: ReceiptValidator,
}

#[async_trait::async_trait]
impl Tool for ValidateReceiptTool {
    fn operation(&self) -> Operation {
        Operation::ValidateReceipt
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: Args = parse_args(self.operation(), input)?;
        let receipt_ref = args
            .receipt_ref
            .filter(|r| !r.trim().is_empty())
            .or_else(|| ctx.expense.receipt_ref.clone())
            .ok_or_else(|| ProcessingError::MissingReceipt(ctx.expense.id.clone()))?;

        info!(expense_id = %ctx.expense.id, receipt = %receipt_ref, "Validating receipt");
        let extracted = ctx.services.reader.extract(&receipt_ref).await?;

        let expected = ExpectedFields {
            amount: Some(args.expected_amount),
            merchant: args.expected_merchant,
            date: args.expected_date,
        };
        let validation = self.validator.validate(&extracted, &expected);

        result.receipt_validated = Some(validation.validated);
        result.receipt_confidence = Some(validation.confidence);
        result.receipt_amount = extracted.amount;
        result.receipt_date = extracted.date.clone();
        result.receipt_merchant = extracted.merchant.clone();
        result.receipt_notes = Some(validation.notes.clone());

        if let Some(amount) = validation.suggested_corrections.amount {
            result.add_correction(Correction::new(
                CorrectionField::Amount,
                json!(args.expected_amount),
                json!(amount),
                format!("Receipt shows different amount: ${:.2}", amount),
                validation.confidence,
                CorrectionSource::Receipt,
            ));
        }
        if let (Some(corrected), Some(original)) =
            (validation.suggested_corrections.expense_date, expected.date)
        {
            result.add_correction(Correction::new(
                CorrectionField::ExpenseDate,
                json!(original.to_string()),
                json!(corrected.to_string()),
                format!("Receipt shows different date: {}", corrected),
                validation.confidence,
                CorrectionSource::Receipt,
            ));
        }

        Ok(json!({
            "validated": validation.validated,
            "confidence": validation.confidence,
            "extracted": {
                "amount": extracted.amount,
                "date": extracted.date,
                "merchant": extracted.merchant,
                "items": extracted.items,
            },
            "discrepancies": validation.discrepancies,
            "notes": validation.notes,
            "suggested_corrections": validation.suggested_corrections,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Expense;
    use crate::receipt::ExtractedReceipt;
    use crate::tools::testing::Fixture;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_mismatched_receipt_records_corrections() {
        let fixture = Fixture::new();
        fixture
            .reader
            .insert(
                "receipts/e-1.jpg",
                ExtractedReceipt {
                    merchant: Some("Sheetz #412".to_string()),
                    date: Some("2025-08-20".to_string()),
                    amount: Some(38.0),
                    ..ExtractedReceipt::default()
                },
            )
            .await;

        let mut expense = Expense::new("e-1", date(2025, 3, 12), 45.0);
        expense.receipt_ref = Some("receipts/e-1.jpg".to_string());
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let output = ValidateReceiptTool::default()
            .execute(
                &json!({"expected_amount": 45.0, "expected_merchant": "Sheetz", "expected_date": "2025-03-12"}),
                &ctx,
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(output["validated"], false);
        assert_eq!(output["confidence"], 55);
        assert_eq!(result.receipt_validated, Some(false));
        assert_eq!(result.corrections().len(), 2);
        let date_fix = result.correction_for(CorrectionField::ExpenseDate).unwrap();
        assert_eq!(date_fix.corrected_value, json!("2025-08-20"));
        assert_eq!(date_fix.source, CorrectionSource::Receipt);
    }

    #[tokio::test]
    async fn test_missing_receipt_is_an_error() {
        let fixture = Fixture::new();
        let expense = Expense::new("e-2", date(2025, 3, 12), 45.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let outcome = ValidateReceiptTool::default()
            .execute(&json!({"expected_amount": 45.0}), &ctx, &mut result)
            .await;
        assert!(matches!(outcome, Err(ProcessingError::MissingReceipt(_))));
    }
}
