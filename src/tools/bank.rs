//! match_bank_transaction

use crate::error::ProcessingError;
use crate::matching::{BankMatcher, MatchQuery, MAX_DATE_TOLERANCE_DAYS};
use crate::models::{PaymentSource, ProcessingResult};
use crate::tools::{parse_args, Operation, Tool, ToolContext};
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct Args {
    amount: f64,
    date: NaiveDate,
    merchant: Option<String>,
    source: PaymentSource,
    amount_tolerance: Option<f64>,
    date_tolerance_days: Option<i64>,
}

pub struct MatchBankTransactionTool;

#[async_trait::async_trait]
impl Tool for MatchBankTransactionTool {
    fn operation(&self) -> Operation {
        Operation::MatchBankTransaction
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: Args = parse_args(self.operation(), input)?;

        let mut query = MatchQuery::new(args.amount, args.date, args.source).with_merchant(args.merchant);
        if let Some(tolerance) = args.amount_tolerance {
            query.amount_tolerance = tolerance.abs();
        }
        if let Some(days) = args.date_tolerance_days {
            if !(0..=MAX_DATE_TOLERANCE_DAYS).contains(&days) {
                return Err(ProcessingError::InvalidToolInput(format!(
                    "{}: date_tolerance_days must be between 0 and {}, got {}",
                    self.operation().name(),
                    MAX_DATE_TOLERANCE_DAYS,
                    days
                )));
            }
            query.date_tolerance_days = days;
        }

        let outcome = BankMatcher::new(ctx.services.store.as_ref())
            .find_match(&query)
            .await?;

        let Some(transaction) = outcome.transaction.as_ref() else {
            return Ok(json!({
                "found": false,
                "confidence": 0,
                "match_type": outcome.label(),
                "candidates_checked": outcome.candidates_checked,
                "message": format!(
                    "No bank transaction found for ${:.2} around {} on {}",
                    query.amount, query.date, query.source
                ),
            }));
        };

        result.bank_transaction_id = Some(transaction.id.clone());
        result.match_confidence = Some(outcome.confidence());
        result.match_type = Some(outcome.label());
        if let Some(correction) = outcome.correction.clone() {
            result.add_correction(correction);
        }

        let date_correction = outcome.date_correction.as_ref().map(|c| {
            json!({
                "original": c.original.to_string(),
                "corrected": c.corrected.to_string(),
            })
        });

        Ok(json!({
            "found": true,
            "transaction": {
                "id": transaction.id,
                "date": transaction.transaction_date.to_string(),
                "amount": transaction.amount,
                "description": transaction.description,
                "source": transaction.source,
            },
            "confidence": outcome.confidence(),
            "match_type": outcome.label(),
            "note": outcome.note,
            "date_correction": date_correction,
            "candidates_checked": outcome.candidates_checked,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BankTransaction, CorrectionField, Expense};
    use crate::tools::testing::Fixture;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_inverted_date_match_reports_corrected_date() {
        let fixture = Fixture::new();
        fixture
            .store
            .insert_transaction(BankTransaction::new(
                "t-7",
                date(2025, 12, 3),
                82.4,
                "SHEETZ 0412 CHARLOTTE",
                PaymentSource::Amex,
            ))
            .await;

        let expense = Expense::new("e-1", date(2025, 3, 12), 82.4);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let output = MatchBankTransactionTool
            .execute(
                &json!({"amount": 82.4, "date": "2025-03-12", "merchant": "Sheetz", "source": "amex"}),
                &ctx,
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(output["found"], true);
        assert_eq!(output["date_correction"]["corrected"], "2025-12-03");
        assert_eq!(output["match_type"], "exact_date_corrected");
        assert_eq!(result.bank_transaction_id.as_deref(), Some("t-7"));
        assert_eq!(result.match_confidence, Some(100));
        let correction = result.correction_for(CorrectionField::ExpenseDate).unwrap();
        assert_eq!(correction.original_value, json!("2025-03-12"));
    }

    #[tokio::test]
    async fn test_no_match_leaves_result_untouched() {
        let fixture = Fixture::new();
        let expense = Expense::new("e-2", date(2025, 6, 20), 15.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let output = MatchBankTransactionTool
            .execute(
                &json!({"amount": 15.0, "date": "2025-06-20", "source": "wells_fargo"}),
                &ctx,
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(output["found"], false);
        assert!(result.bank_transaction_id.is_none());
        assert!(!result.was_corrected());
    }

    #[tokio::test]
    async fn test_unknown_source_is_invalid_input() {
        let fixture = Fixture::new();
        let expense = Expense::new("e-3", date(2025, 6, 20), 15.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let outcome = MatchBankTransactionTool
            .execute(
                &json!({"amount": 15.0, "date": "2025-06-20", "source": "visa"}),
                &ctx,
                &mut result,
            )
            .await;
        assert!(matches!(
            outcome,
            Err(crate::error::ProcessingError::InvalidToolInput(_))
        ));
    }

    #[tokio::test]
    async fn test_huge_date_tolerance_is_rejected_not_panicking() {
        let fixture = Fixture::new();
        let expense = Expense::new("e-4", date(2025, 6, 20), 15.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        for days in [1_000_000_000_i64, -1, MAX_DATE_TOLERANCE_DAYS + 1] {
            let outcome = MatchBankTransactionTool
                .execute(
                    &json!({"amount": 15.0, "date": "2025-06-20", "source": "amex", "date_tolerance_days": days}),
                    &ctx,
                    &mut result,
                )
                .await;
            assert!(matches!(outcome, Err(ProcessingError::InvalidToolInput(_))));
        }
        assert!(result.bank_transaction_id.is_none());
    }
}
