//! Model service interface
//!
//! The decision engine only sees `LanguageModel`. The Anthropic client is
//! the production implementation; `ScriptedModel` replays fixed turns.

pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicClient;
pub use mock::ScriptedModel;

use crate::conversation::{Conversation, OperationRequest};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operation advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// How a model turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Normal completion with closing text
    Completed { text: String },
    /// One or more operations to run before the next turn
    OperationRequest {
        text: Option<String>,
        requests: Vec<OperationRequest>,
    },
    /// Any other stop condition (token limit, refusal, ...)
    Stopped { reason: String },
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn respond(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<ModelTurn>;
}
