//! flag_for_review

use crate::models::{ExpenseStatus, ProcessingDecision, ProcessingResult};
use crate::tools::{parse_args, Operation, Tool, ToolContext};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

const MAX_FLAG_REASON_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct Args {
    reason: String,
    confidence: i64,
    #[serde(default)]
    suggestions: Vec<String>,
}

pub struct FlagForReviewTool;

#[async_trait::async_trait]
impl Tool for FlagForReviewTool {
    fn operation(&self) -> Operation {
        Operation::FlagForReview
    }

    async fn execute(
        &self,
        input: &Value,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> Result<Value> {
        let args: Args = parse_args(self.operation(), input)?;
        let confidence = args.confidence.clamp(0, 100) as u8;

        result.flag(ProcessingDecision::NeedsReview, args.reason.clone());
        result.confidence = confidence;

        let mut flag_reason = format!("AI flagged for review: {}", args.reason);
        if !args.suggestions.is_empty() {
            flag_reason.push_str(&format!(" | Suggestions: {}", args.suggestions.join("; ")));
        }
        let flag_reason: String = flag_reason.chars().take(MAX_FLAG_REASON_CHARS).collect();

        let mut expense = ctx.expense.clone();
        expense.status = ExpenseStatus::Flagged;
        expense.flag_reason = Some(flag_reason);
        expense.match_confidence = Some(confidence);
        expense.last_error = None;
        if let Err(e) = ctx.services.store.save_expense(&expense).await {
            warn!(expense_id = %expense.id, "Could not mark expense flagged: {}", e);
        }

        info!(expense_id = %ctx.expense.id, confidence = confidence, reason = %args.reason, "Expense flagged for review");

        Ok(json!({
            "flagged": true,
            "reason": args.reason,
            "confidence": confidence,
            "suggestions": args.suggestions,
            "message": "Expense flagged for human review",
        }))
    }
}
