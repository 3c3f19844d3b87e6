//! Scripted model for tests and offline runs

use crate::conversation::Conversation;
use crate::error::ProcessingError;
use crate::llm::{LanguageModel, ModelTurn, ToolDefinition};
use crate::Result;
use std::collections::VecDeque;
use tokio::sync::Mutex;

enum Script {
    Sequence(VecDeque<std::result::Result<ModelTurn, String>>),
    Repeat(ModelTurn),
}

/// Replays a fixed list of model turns in order
pub struct ScriptedModel {
    script: Mutex<Script>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self::from_script(Script::Sequence(turns.into_iter().map(Ok).collect()))
    }

    /// Returns the same turn on every call
    pub fn repeating(turn: ModelTurn) -> Self {
        Self::from_script(Script::Repeat(turn))
    }

    /// Replays `turns`, then fails every later call with a transport error
    pub fn failing_after(turns: Vec<ModelTurn>, message: impl Into<String>) -> Self {
        let mut queue: VecDeque<_> = turns.into_iter().map(Ok).collect();
        queue.push_back(Err(message.into()));
        Self::from_script(Script::Sequence(queue))
    }

    fn from_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Conversation length seen on each call, in call order
    pub async fn observed_turn_counts(&self) -> Vec<usize> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn respond(
        &self,
        _system: &str,
        conversation: &Conversation,
        _tools: &[ToolDefinition],
    ) -> Result<ModelTurn> {
        self.calls.lock().await.push(conversation.len());

        let mut script = self.script.lock().await;
        match &mut *script {
            Script::Repeat(turn) => Ok(turn.clone()),
            Script::Sequence(queue) => match queue.pop_front() {
                Some(Ok(turn)) => Ok(turn),
                Some(Err(message)) => {
                    queue.push_front(Err(message.clone()));
                    Err(ProcessingError::LlmError(message))
                }
                None => Err(ProcessingError::LlmError("script exhausted".to_string())),
            },
        }
    }
}
