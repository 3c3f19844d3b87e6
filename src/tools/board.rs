//! create_tracking_subitem

use crate::error::ProcessingError;
use crate::integrations::{find_event, SubitemRequest};
use crate::jurisdiction::EVENT_BUFFER_DAYS;
use crate::models::ProcessingResult;
use crate::tools::{parse_args, Operation, Tool, ToolContext};
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
struct Args {
    date: NaiveDate,
    jurisdiction_code: Option<String>,
    name: String,
    category: String,
    amount: f64,
}

pub struct CreateTrackingSubitemTool;

#[async_trait::async_trait]
impl Tool for CreateTrackingSubitemTool {
    fn operation(&self) -> Operation {
        Operation::CreateTrackingSubitem
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: Args = parse_args(self.operation(), input)?;
        let board = ctx.services.board.as_ref();

        let event = find_event(board, args.date, EVENT_BUFFER_DAYS, args.jurisdiction_code.as_deref())
            .await?
            .ok_or_else(|| {
                ProcessingError::BoardError(format!("No event found for date {}", args.date))
            })?;

        let parent = board
            .revenue_item_for_event(&event.id)
            .await?
            .ok_or_else(|| {
                ProcessingError::BoardError(format!("No revenue item found for event {}", event.name))
            })?;

        let request = SubitemRequest {
            name: args.name,
            category: args.category,
            date: args.date,
            amount: args.amount,
        };
        let subitem_id = board.create_subitem(&parent, &request).await?;
        info!(event_id = %event.id, subitem_id = %subitem_id, "Tracking subitem created");

        result.board_event_id = Some(event.id.clone());
        result.board_subitem_id = Some(subitem_id.clone());

        Ok(json!({
            "subitem": { "id": subitem_id, "name": request.name, "parent_id": parent },
            "event": { "id": event.id, "name": event.name },
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

    fn event(id: &str, venue: &str) -> BoardEvent {
        BoardEvent {
            id: id.to_string(),
            name: format!("Event {}", id),
            start_date: date(2025, 9, 5),
            end_date: date(2025, 9, 7),
            venue: Some(venue.to_string()),
            jurisdiction: None,
        }
    }

    #[tokio::test]
    async fn test_subitem_goes_under_preferred_event() {
        let fixture = Fixture::new();
        fixture.board.insert_event(event("ev-1", "Road America, Elkhart Lake, WI")).await;
        fixture.board.insert_event(event("ev-2", "Thunderhill, Willows, CA")).await;
        fixture.board.insert_revenue_item("ev-2", "rev-2").await;

        let expense = Expense::new("e-1", date(2025, 9, 8), 220.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let output = CreateTrackingSubitemTool
            .execute(
                &json!({"date": "2025-09-08", "jurisdiction_code": "CA", "name": "Tires", "category": "Tires - COS", "amount": 220.0}),
                &ctx,
                &mut result,
            )
            .await
            .unwrap();

        assert_eq!(output["event"]["id"], "ev-2");
        assert_eq!(output["subitem"]["parent_id"], "rev-2");
        let subitems = fixture.board.subitems().await;
        assert_eq!(subitems.len(), 1);
        assert_eq!(subitems[0].request.category, "Tires - COS");
        assert_eq!(result.board_subitem_id.as_deref(), Some(subitems[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_event_without_revenue_item_is_an_error() {
        let fixture = Fixture::new();
        fixture.board.insert_event(event("ev-1", "Thunderhill, Willows, CA")).await;

        let expense = Expense::new("e-1", date(2025, 9, 6), 220.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let outcome = CreateTrackingSubitemTool
            .execute(
                &json!({"date": "2025-09-06", "name": "Tires", "category": "Tires - COS", "amount": 220.0}),
                &ctx,
                &mut result,
            )
            .await;
        assert!(matches!(outcome, Err(ProcessingError::BoardError(_))));
        assert!(result.board_subitem_id.is_none());
    }
}
