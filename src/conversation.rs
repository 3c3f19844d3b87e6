//! Conversation between the decision engine and the model service
//!
//! Turns are appended in order and never rewritten. Every operation
//! request in a model turn is answered by exactly one result item in the
//! following `OperationResult` turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One operation the model asked us to run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Result for one operation request, echoed back with the request id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResultItem {
    pub request_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    ModelText {
        text: String,
    },
    ModelOperationRequest {
        text: Option<String>,
        requests: Vec<OperationRequest>,
    },
    OperationResult {
        results: Vec<OperationResultItem>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(initial_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::User {
                text: initial_prompt.into(),
            }],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Requests from the last model turn that have no result yet
    pub fn pending_requests(&self) -> &[OperationRequest] {
        match self.turns.last() {
            Some(Turn::ModelOperationRequest { requests, .. }) => requests,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_requests_cleared_by_result_turn() {
        let mut conversation = Conversation::new("process expense e-1");
        assert!(conversation.pending_requests().is_empty());

        conversation.push(Turn::ModelOperationRequest {
            text: None,
            requests: vec![OperationRequest {
                id: "toolu_1".to_string(),
                name: "lookup_vendor".to_string(),
                arguments: json!({"vendor_name": "Shell"}),
            }],
        });
        assert_eq!(conversation.pending_requests().len(), 1);

        conversation.push(Turn::OperationResult {
            results: vec![OperationResultItem {
                request_id: "toolu_1".to_string(),
                content: "{\"found\":false}".to_string(),
                is_error: false,
            }],
        });
        assert!(conversation.pending_requests().is_empty());
        assert_eq!(conversation.len(), 3);
    }
}
