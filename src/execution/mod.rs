//! Dispatch boundary between the decision engine and operation handlers
//!
//! Handler failures stop here. Every request comes back as an envelope the
//! model can read, and every request leaves a ToolCall on the result.

use crate::conversation::{OperationRequest, OperationResultItem};
use crate::error::ProcessingError;
use crate::llm::ToolDefinition;
use crate::models::{ProcessingResult, ToolCall};
use crate::tools::{Operation, ToolContext, ToolRegistry};
use crate::Result;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runs model-requested operations against the registry
pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry) -> Self {
        Self { tool_registry }
    }

    /// Engine over the full operation catalog
    pub fn with_catalog() -> Result<Self> {
        Ok(Self::new(ToolRegistry::build()?))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tool_registry.definitions()
    }

    /// Execute one request. Never fails; failures become error envelopes.
    pub async fn dispatch(
        &self,
        request: &OperationRequest,
        ctx: &ToolContext<'_>,
        result: &mut ProcessingResult,
    ) -> OperationResultItem {
        let start = Instant::now();
        debug!(
            expense_id = %ctx.expense.id,
            operation = %request.name,
            request_id = %request.id,
            "Dispatching operation"
        );

        let outcome = match Operation::from_name(&request.name) {
            Some(operation) => match self.tool_registry.get(operation) {
                Some(tool) => tool.execute(&request.arguments, ctx, result).await,
                None => Err(ProcessingError::InvariantViolation(format!(
                    "operation {} has no handler",
                    operation.name()
                ))),
            },
            None => Err(ProcessingError::UnknownOperation(request.name.clone())),
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        let (envelope, error) = match outcome {
            Ok(data) => (success_envelope(data), None),
            Err(e) => {
                warn!(
                    expense_id = %ctx.expense.id,
                    operation = %request.name,
                    error = %e,
                    "Operation failed"
                );
                let message = e.to_string();
                (json!({ "success": false, "error": message }), Some(message))
            }
        };

        let success = error.is_none();
        result.add_tool_call(ToolCall {
            call_id: Uuid::new_v4(),
            operation: request.name.clone(),
            input: request.arguments.clone(),
            output: envelope.clone(),
            success,
            error,
            duration_ms,
            recorded_at: Utc::now(),
        });

        OperationResultItem {
            request_id: request.id.clone(),
            content: envelope.to_string(),
            is_error: !success,
        }
    }
}

/// `{success: true, ...data}` for object payloads, `{success, data}` otherwise
fn success_envelope(data: Value) -> Value {
    match data {
        Value::Object(fields) => {
            let mut envelope = Map::with_capacity(fields.len() + 1);
            envelope.insert("success".to_string(), Value::Bool(true));
            envelope.extend(fields);
            Value::Object(envelope)
        }
        other => json!({ "success": true, "data": other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Expense;
    use crate::tools::testing::Fixture;
    use chrono::NaiveDate;

    fn request(name: &str, arguments: Value) -> OperationRequest {
        OperationRequest {
            id: format!("req-{}", name),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_unknown_operation_becomes_error_envelope() {
        let fixture = Fixture::new();
        let engine = ExecutionEngine::with_catalog().unwrap();
        let expense = Expense::new("e-1", NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(), 9.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let item = engine
            .dispatch(&request("wire_money", json!({})), &ctx, &mut result)
            .await;

        assert!(item.is_error);
        assert_eq!(item.request_id, "req-wire_money");
        let envelope: Value = serde_json::from_str(&item.content).unwrap();
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error"], "Unknown operation: wire_money");

        let calls = result.tool_calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].success);
    }

    #[tokio::test]
    async fn test_handler_errors_are_contained() {
        let fixture = Fixture::new();
        let engine = ExecutionEngine::with_catalog().unwrap();
        let expense = Expense::new("e-1", NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(), 9.0);
        let ctx = ToolContext {
            expense: &expense,
            services: &fixture.services,
        };
        let mut result = ProcessingResult::for_expense(&expense);

        let bad_args = engine
            .dispatch(&request("lookup_vendor", json!({"vendor": 3})), &ctx, &mut result)
            .await;
        assert!(bad_args.is_error);
        assert!(bad_args.content.contains("Invalid tool input"));

        let ok = engine
            .dispatch(&request("create_vendor", json!({"name": "NAPA Auto"})), &ctx, &mut result)
            .await;
        assert!(!ok.is_error);
        let envelope: Value = serde_json::from_str(&ok.content).unwrap();
        assert_eq!(envelope["success"], true);
        assert_eq!(envelope["created"], true);

        assert_eq!(result.tool_calls().len(), 2);
        assert_eq!(result.failed_tool_calls().count(), 1);
        assert!(result.has_successful_call("create_vendor"));
    }

    #[test]
    fn test_non_object_payload_is_wrapped() {
        assert_eq!(
            success_envelope(json!([1, 2])),
            json!({"success": true, "data": [1, 2]})
        );
    }
}
