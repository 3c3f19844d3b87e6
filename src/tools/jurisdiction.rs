//! determine_state

use crate::jurisdiction::{JurisdictionQuery, JurisdictionResolver};
use crate::models::ProcessingResult;
use crate::tools::{parse_args, Operation, Tool, ToolContext};
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct Args {
    jurisdiction_tag: Option<String>,
    expense_date: NaiveDate,
    vendor_name: Option<String>,
    is_cost_of_sales: Option<bool>,
}

pub struct DetermineJurisdictionTool;

#[async_trait::async_trait]
impl Tool for DetermineJurisdictionTool {
    fn operation(&self) -> Operation {
        Operation::DetermineJurisdiction
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: Args = parse_args(self.operation(), input)?;
        let query = JurisdictionQuery {
            tag: args.jurisdiction_tag.or_else(|| ctx.expense.jurisdiction_tag.clone()),
            expense_date: args.expense_date,
            vendor_name: args.vendor_name.or_else(|| ctx.expense.vendor_name.clone()),
            is_cost_of_sales: args
                .is_cost_of_sales
                .unwrap_or_else(|| ctx.expense.is_cost_of_sales()),
        };

        let resolution =
            JurisdictionResolver::new(ctx.services.store.as_ref(), ctx.services.board.as_ref())
                .resolve(&query)
                .await?;

        if let Some(code) = &resolution.code {
            result.jurisdiction = Some(code.clone());
            result.jurisdiction_source = Some(resolution.source.as_str().to_string());
        }
        if let Some(event) = &resolution.event {
            result.board_event_id = Some(event.id.clone());
        }

        Ok(json!({
            "found": resolution.is_resolved(),
            "jurisdiction": resolution.code,
            "source": resolution.source.as_str(),
            "confidence": resolution.confidence,
            "event": resolution.event.as_ref().map(|e| json!({
                "id": e.id,
                "name": e.name,
                "venue": e.venue,
            })),
            "note": resolution.note,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::BoardEvent;
    use crate::models::Expense;
    use crate::tools::testing::Fixture;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_cost_of_sales_expense_records_event() {
        let fixture = Fixture::new();
        fixture
            .board
            .insert_event(BoardEvent {
                id: "ev-9".to_string(),
                name: "Laguna Seca Weekend".to_string(),
                start_date: date(2025, 7, 11),
                end_date: date(2025, 7, 13),
                venue: Some("WeatherTech Raceway, Monterey, CA".to_string()),
                jurisdiction: None,
            })
            .await;

        let mut expense = Expense::new("e-1", date(2025, 7, 14), 61.2);
        expense.category_name = Some("Fuel - COS".to_string());
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let output = DetermineJurisdictionTool
            .execute(&json!({"expense_date": "2025-07-14"}), &ctx, &mut result)
            .await
            .unwrap();

        assert_eq!(output["jurisdiction"], "CA");
        assert_eq!(output["confidence"], 90);
        assert_eq!(result.jurisdiction_source.as_deref(), Some("calendar_event"));
        assert_eq!(result.board_event_id.as_deref(), Some("ev-9"));
    }

    #[tokio::test]
    async fn test_unresolved_reports_not_found() {
        let fixture = Fixture::new();
        let expense = Expense::new("e-2", date(2025, 7, 14), 12.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let output = DetermineJurisdictionTool
            .execute(
                &json!({"expense_date": "2025-07-14", "vendor_name": "Joe's Garage"}),
                &ctx,
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(output["found"], false);
        assert_eq!(output["confidence"], 0);
        assert!(result.jurisdiction.is_none());
    }
}
