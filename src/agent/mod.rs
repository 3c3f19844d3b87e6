//! Decision engine - the bounded tool-use loop
//!
//! MODEL TURN → DISPATCH → RESULTS → MODEL TURN ... → COMPLETE
//!
//! The engine does no I/O of its own besides the model call; every side
//! effect goes through the dispatch boundary.

pub mod prompts;

use crate::classifier::CompletionClassifier;
use crate::conversation::{Conversation, Turn};
use crate::execution::ExecutionEngine;
use crate::llm::{LanguageModel, ModelTurn};
use crate::models::{Expense, ProcessingDecision, ProcessingResult};
use crate::tools::{Services, ToolContext};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const MAX_REASONING_CHARS: usize = 1000;

pub struct DecisionEngine {
    model: Arc<dyn LanguageModel>,
    execution_engine: ExecutionEngine,
    max_iterations: u32,
}

impl DecisionEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        execution_engine: ExecutionEngine,
        max_iterations: u32,
    ) -> Self {
        Self {
            model,
            execution_engine,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    /// Drive the model until it completes, stops, fails or runs out of iterations
    pub async fn run(
        &self,
        expense: &Expense,
        retry_count: u32,
        services: &Services,
    ) -> ProcessingResult {
        let mut result = ProcessingResult::for_expense(expense);
        let ctx = ToolContext { expense, services };
        let definitions = self.execution_engine.definitions();
        let mut conversation = Conversation::new(prompts::expense_prompt(expense, retry_count));
        let mut terminated = false;

        info!(
            expense_id = %expense.id,
            amount = expense.amount,
            retry_count = retry_count,
            "Decision engine: starting run"
        );

        while result.iteration_count < self.max_iterations {
            result.iteration_count += 1;
            let iteration = result.iteration_count;
            debug!(expense_id = %expense.id, iteration = iteration, "Requesting model turn");

            let turn = match self
                .model
                .respond(prompts::system_prompt(), &conversation, &definitions)
                .await
            {
                Ok(turn) => turn,
                Err(e) => {
                    error!(expense_id = %expense.id, iteration = iteration, "Model call failed: {}", e);
                    result.error_message = Some(format!("API error: {}", e));
                    result.flag(ProcessingDecision::Flagged, "api_error");
                    terminated = true;
                    break;
                }
            };

            match turn {
                ModelTurn::Completed { text } => {
                    let completion = CompletionClassifier::apply(&text, &mut result);
                    result.reasoning = Some(text.chars().take(MAX_REASONING_CHARS).collect());
                    conversation.push(Turn::ModelText { text });
                    info!(
                        expense_id = %expense.id,
                        iteration = iteration,
                        completion = ?completion,
                        decision = %result.decision,
                        "Model completed"
                    );
                    terminated = true;
                    break;
                }
                ModelTurn::OperationRequest { text, requests } => {
                    if requests.is_empty() {
                        warn!(expense_id = %expense.id, iteration = iteration, "Operation turn without requests");
                        result.error_message =
                            Some("Unexpected stop: operation request without operations".to_string());
                        terminated = true;
                        break;
                    }

                    let mut results = Vec::with_capacity(requests.len());
                    for request in &requests {
                        info!(
                            expense_id = %expense.id,
                            iteration = iteration,
                            operation = %request.name,
                            "Executing operation"
                        );
                        results.push(self.execution_engine.dispatch(request, &ctx, &mut result).await);
                    }

                    conversation.push(Turn::ModelOperationRequest { text, requests });
                    conversation.push(Turn::OperationResult { results });
                }
                ModelTurn::Stopped { reason } => {
                    warn!(expense_id = %expense.id, iteration = iteration, reason = %reason, "Unexpected stop reason");
                    result.error_message = Some(format!("Unexpected stop: {}", reason));
                    terminated = true;
                    break;
                }
            }
        }

        if !terminated {
            warn!(
                expense_id = %expense.id,
                max_iterations = self.max_iterations,
                "Max iterations reached"
            );
            result.flag(ProcessingDecision::Flagged, "max_iterations_exceeded");
            result.error_message = Some("Processing exceeded maximum iterations".to_string());
        }

        result.finish();
        info!(
            expense_id = %expense.id,
            decision = %result.decision,
            iterations = result.iteration_count,
            tool_calls = result.tool_calls().len(),
            "Decision engine: run finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_ITERATIONS;
    use crate::conversation::OperationRequest;
    use crate::integrations::LedgerVendor;
    use crate::llm::ScriptedModel;
    use crate::models::{BankTransaction, PaymentSource};
    use crate::state::LedgerAccount;
    use crate::tools::testing::Fixture;
    use chrono::NaiveDate;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ModelTurn {
        ModelTurn::OperationRequest {
            text: None,
            requests: vec![OperationRequest {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }],
        }
    }

    fn engine(model: Arc<ScriptedModel>) -> DecisionEngine {
        DecisionEngine::new(
            model,
            ExecutionEngine::with_catalog().unwrap(),
            DEFAULT_MAX_ITERATIONS,
        )
    }

    #[tokio::test]
    async fn test_max_iterations_flags_run() {
        let fixture = Fixture::new();
        let model = Arc::new(ScriptedModel::repeating(call(
            "loop",
            "lookup_vendor",
            json!({"name": "Nobody"}),
        )));
        let expense = Expense::new("e-1", date(2025, 1, 5), 10.0);

        let result = engine(model.clone()).run(&expense, 0, &fixture.services).await;

        assert_eq!(result.decision, ProcessingDecision::Flagged);
        assert_eq!(result.flag_reason.as_deref(), Some("max_iterations_exceeded"));
        assert_eq!(result.iteration_count, 15);
        assert_eq!(result.tool_calls().len(), 15);
        assert_eq!(model.call_count().await, 15);
    }

    #[tokio::test]
    async fn test_model_error_is_api_error() {
        let fixture = Fixture::new();
        let model = Arc::new(ScriptedModel::failing_after(
            vec![call("a", "lookup_vendor", json!({"name": "Shell"}))],
            "connection reset",
        ));
        let expense = Expense::new("e-1", date(2025, 1, 5), 10.0);

        let result = engine(model).run(&expense, 0, &fixture.services).await;

        assert_eq!(result.decision, ProcessingDecision::Flagged);
        assert_eq!(result.flag_reason.as_deref(), Some("api_error"));
        assert!(result.error_message.unwrap().starts_with("API error:"));
        assert_eq!(result.iteration_count, 2);
    }

    #[tokio::test]
    async fn test_unexpected_stop_keeps_needs_review() {
        let fixture = Fixture::new();
        let model = Arc::new(ScriptedModel::new(vec![ModelTurn::Stopped {
            reason: "max_tokens".to_string(),
        }]));
        let expense = Expense::new("e-1", date(2025, 1, 5), 10.0);

        let result = engine(model).run(&expense, 0, &fixture.services).await;

        assert_eq!(result.decision, ProcessingDecision::NeedsReview);
        assert_eq!(result.error_message.as_deref(), Some("Unexpected stop: max_tokens"));
        assert!(result.flag_reason.is_none());
    }

    #[tokio::test]
    async fn test_full_posting_run() {
        let fixture = Fixture::new();
        fixture
            .store
            .insert_transaction(BankTransaction::new(
                "t-1",
                date(2025, 12, 15),
                50.0,
                "OLIVE GARDEN 1123",
                PaymentSource::Amex,
            ))
            .await;
        fixture
            .store
            .insert_account(
                "Meals",
                LedgerAccount {
                    id: "13".to_string(),
                    name: "Meals & Entertainment".to_string(),
                },
            )
            .await;
        fixture
            .ledger
            .insert_vendor(LedgerVendor {
                id: "58".to_string(),
                name: "Olive Garden".to_string(),
            })
            .await;

        let model = Arc::new(ScriptedModel::new(vec![
            call(
                "1",
                "match_bank_transaction",
                json!({"amount": 50.0, "date": "2025-12-15", "merchant": "Olive Garden", "source": "amex"}),
            ),
            call("2", "lookup_expense_account", json!({"category_name": "Meals"})),
            call(
                "3",
                "create_purchase",
                json!({"vendor_id": "58", "amount": 50.0, "date": "2025-12-15", "account_id": "13", "payment_source": "amex"}),
            ),
            ModelTurn::Completed {
                text: "Expense successfully posted. Matched t-1 at 100%.".to_string(),
            },
        ]));
        let mut expense = Expense::new("e-1", date(2025, 12, 15), 50.0);
        expense.vendor_name = Some("Olive Garden".to_string());

        let result = engine(model.clone()).run(&expense, 0, &fixture.services).await;

        assert!(result.success);
        assert_eq!(result.decision, ProcessingDecision::AutoPost);
        assert_eq!(result.confidence, 95);
        assert_eq!(result.bank_transaction_id.as_deref(), Some("t-1"));
        assert!(result.ledger_purchase_id.is_some());
        assert_eq!(result.iteration_count, 4);
        assert_eq!(result.failed_tool_calls().count(), 0);
        assert!(result.completed_at.is_some());
        // User prompt, then a request/result pair per operation turn
        assert_eq!(model.observed_turn_counts().await, vec![1, 3, 5, 7]);
    }
}
