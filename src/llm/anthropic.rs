//! Anthropic Messages API client
//!
//! Uses a long-lived reqwest::Client for connection pooling. Each request
//! carries the configured timeout so a stalled call ends as a transport error.

use crate::config::AgentConfig;
use crate::conversation::{Conversation, OperationRequest, Turn};
use crate::error::ProcessingError;
use crate::llm::{LanguageModel, ModelTurn, ToolDefinition};
use crate::Result;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image { source: MediaSource },

    #[serde(rename = "document")]
    Document { source: MediaSource },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "is_false", default)]
        is_error: bool,
    },

    #[serde(other)]
    Unsupported,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

//
// ================= Conversion =================
//

fn to_messages(conversation: &Conversation) -> Vec<Message> {
    conversation
        .turns()
        .iter()
        .map(|turn| match turn {
            Turn::User { text } => Message {
                role: "user",
                content: vec![ContentBlock::Text { text: text.clone() }],
            },
            Turn::ModelText { text } => Message {
                role: "assistant",
                content: vec![ContentBlock::Text { text: text.clone() }],
            },
            Turn::ModelOperationRequest { text, requests } => {
                let mut content = Vec::with_capacity(requests.len() + 1);
                if let Some(text) = text.as_ref().filter(|t| !t.is_empty()) {
                    content.push(ContentBlock::Text { text: text.clone() });
                }
                content.extend(requests.iter().map(|r| ContentBlock::ToolUse {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    input: r.arguments.clone(),
                }));
                Message {
                    role: "assistant",
                    content,
                }
            }
            Turn::OperationResult { results } => Message {
                role: "user",
                content: results
                    .iter()
                    .map(|r| ContentBlock::ToolResult {
                        tool_use_id: r.request_id.clone(),
                        content: r.content.clone(),
                        is_error: r.is_error,
                    })
                    .collect(),
            },
        })
        .collect()
}

fn joined_text(blocks: &[ContentBlock]) -> Option<String> {
    let text: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text.join("\n"))
    }
}

fn to_model_turn(response: MessagesResponse) -> ModelTurn {
    let text = joined_text(&response.content);

    match response.stop_reason.as_deref() {
        Some("end_turn") => ModelTurn::Completed {
            text: text.unwrap_or_default(),
        },
        Some("tool_use") => {
            let requests = response
                .content
                .into_iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(OperationRequest {
                        id,
                        name,
                        arguments: input,
                    }),
                    _ => None,
                })
                .collect();
            ModelTurn::OperationRequest { text, requests }
        }
        other => ModelTurn::Stopped {
            reason: other.unwrap_or("none").to_string(),
        },
    }
}

//
// ================= Client =================
//

/// Reusable Anthropic client (connection-pooled)
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            base_url: API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse> {
        if self.api_key.is_empty() {
            return Err(ProcessingError::LlmError(
                "ANTHROPIC_API_KEY not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Model API request failed: {}", e);
                ProcessingError::LlmError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Model API error response: {}", body);
            return Err(ProcessingError::LlmError(format!(
                "model API returned {}: {}",
                status, body
            )));
        }

        response.json::<MessagesResponse>().await.map_err(|e| {
            error!("Failed to parse model response: {}", e);
            ProcessingError::LlmError(format!("parse error: {}", e))
        })
    }

    /// Ask the model to read a receipt image or PDF and answer with text
    pub async fn describe_document(
        &self,
        bytes: &[u8],
        media_type: &str,
        instruction: &str,
    ) -> Result<String> {
        let source = MediaSource {
            source_type: "base64".to_string(),
            media_type: media_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        };

        let attachment = if media_type == "application/pdf" {
            ContentBlock::Document { source }
        } else {
            ContentBlock::Image { source }
        };

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 1024,
            system: None,
            messages: vec![Message {
                role: "user",
                content: vec![
                    attachment,
                    ContentBlock::Text {
                        text: instruction.to_string(),
                    },
                ],
            }],
            tools: &[],
        };

        let response = self.send(&request).await?;
        joined_text(&response.content)
            .ok_or_else(|| ProcessingError::LlmError("empty vision response".to_string()))
    }
}

#[async_trait::async_trait]
impl LanguageModel for AnthropicClient {
    async fn respond(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<ModelTurn> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: Some(system),
            messages: to_messages(conversation),
            tools,
        };

        debug!(turns = conversation.len(), "Calling model API");
        let response = self.send(&request).await?;
        Ok(to_model_turn(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::OperationResultItem;
    use serde_json::json;

    #[test]
    fn test_tool_use_response_maps_to_requests() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "m",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "Matching the bank transaction first."},
                {"type": "tool_use", "id": "toolu_1", "name": "match_bank_transaction",
                 "input": {"amount": 50.0, "date": "2025-12-15", "source": "amex"}}
            ]
        }))
        .unwrap();

        match to_model_turn(response) {
            ModelTurn::OperationRequest { text, requests } => {
                assert_eq!(text.as_deref(), Some("Matching the bank transaction first."));
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].name, "match_bank_transaction");
                assert_eq!(requests[0].arguments["source"], "amex");
            }
            other => panic!("unexpected turn: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_blocks_and_stop_reasons_are_tolerated() {
        let response: MessagesResponse = serde_json::from_value(json!({
            "stop_reason": "max_tokens",
            "content": [{"type": "thinking", "thinking": "..."}]
        }))
        .unwrap();

        assert_eq!(
            to_model_turn(response),
            ModelTurn::Stopped {
                reason: "max_tokens".to_string()
            }
        );
    }

    #[test]
    fn test_conversation_serializes_tool_results_as_user_blocks() {
        let mut conversation = Conversation::new("hello");
        conversation.push(Turn::ModelOperationRequest {
            text: None,
            requests: vec![OperationRequest {
                id: "toolu_9".to_string(),
                name: "lookup_vendor".to_string(),
                arguments: json!({"vendor_name": "Shell"}),
            }],
        });
        conversation.push(Turn::OperationResult {
            results: vec![OperationResultItem {
                request_id: "toolu_9".to_string(),
                content: "{\"success\":false}".to_string(),
                is_error: true,
            }],
        });

        let messages = serde_json::to_value(to_messages(&conversation)).unwrap();
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_9");
        assert_eq!(messages[2]["content"][0]["is_error"], true);
    }
}
